use num_derive::{FromPrimitive, ToPrimitive};

/// Error codes sent to the client in an `ERR` packet.
///
/// The low numbers mirror the handful of real MySQL server error codes this
/// proxy ever has occasion to emit itself (as opposed to codes relayed
/// verbatim from the upstream); the codes above 9000 are proxy-specific and
/// do not collide with any MySQL-assigned error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum ErrorKind {
    ER_ACCESS_DENIED_ERROR = 1045,
    ER_DBACCESS_DENIED_ERROR = 1044,
    ER_BAD_DB_ERROR = 1049,
    ER_DUP_ENTRY = 1062,
    ER_UNKNOWN_COM_ERROR = 1047,
    ER_ACCESS_DENIED_NO_PASSWORD_ERROR = 1698,
    /// Command is recognized but this proxy intentionally does not implement it.
    PROXY_UNSUPPORTED_COMMAND = 9990,
    /// Command byte does not match any known `COM_*` code.
    PROXY_UNKNOWN_COMMAND = 9997,
    /// Catch-all for upstream I/O failures and query-level upstream errors.
    PROXY_UPSTREAM_ERROR = 9999,
}

impl ErrorKind {
    /// 5-byte SQLSTATE string sent immediately after the error code when
    /// `CLIENT_PROTOCOL_41` is negotiated. `HY000` ("general error") covers
    /// everything this proxy raises on its own behalf.
    pub fn sqlstate(&self) -> &'static [u8; 5] {
        match self {
            ErrorKind::ER_ACCESS_DENIED_ERROR | ErrorKind::ER_ACCESS_DENIED_NO_PASSWORD_ERROR => {
                b"28000"
            }
            ErrorKind::ER_DBACCESS_DENIED_ERROR => b"42000",
            ErrorKind::ER_BAD_DB_ERROR => b"42000",
            _ => b"HY000",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_codes_do_not_collide_with_mysql_codes() {
        assert_eq!(ErrorKind::PROXY_UNSUPPORTED_COMMAND as u16, 9990);
        assert_eq!(ErrorKind::PROXY_UNKNOWN_COMMAND as u16, 9997);
        assert_eq!(ErrorKind::PROXY_UPSTREAM_ERROR as u16, 9999);
    }

    #[test]
    fn access_denied_uses_28000() {
        assert_eq!(ErrorKind::ER_ACCESS_DENIED_ERROR.sqlstate(), b"28000");
    }
}
