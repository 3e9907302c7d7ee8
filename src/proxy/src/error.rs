use crate::protocol::mysql::error_codes::ErrorKind;
use thiserror::Error;

/// The proxy's error taxonomy, per the error-handling design: wire-level
/// errors are fatal to the connection, command-level errors become an `ERR`
/// packet and the session keeps serving.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("access denied for user {user:?}")]
    AccessDenied { user: String },

    #[error("upstream operational error: {0}")]
    UpstreamOperational(String),

    #[error("upstream logical error (code {code}): {message}")]
    UpstreamLogical { code: u16, message: String },

    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("unknown command byte: {0:#x}")]
    UnknownCommand(u8),

    #[error("plugin fault: {0}")]
    PluginFault(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// True if this error should end the session rather than just produce an
    /// `ERR` packet and continue the command loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProxyError::MalformedPacket(_)
                | ProxyError::ProtocolViolation(_)
                | ProxyError::AccessDenied { .. }
                | ProxyError::Io(_)
        )
    }

    /// Maps this error to the wire error code an `ERR` packet should carry,
    /// per the error-handling design's per-kind reply column.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            ProxyError::MalformedPacket(_) => ErrorKind::PROXY_UNKNOWN_COMMAND,
            ProxyError::ProtocolViolation(_) => ErrorKind::PROXY_UNSUPPORTED_COMMAND,
            ProxyError::AccessDenied { .. } => ErrorKind::ER_ACCESS_DENIED_ERROR,
            ProxyError::UpstreamOperational(_) | ProxyError::UpstreamLogical { .. } => {
                ErrorKind::PROXY_UPSTREAM_ERROR
            }
            ProxyError::UnsupportedCommand(_) => ErrorKind::PROXY_UNSUPPORTED_COMMAND,
            ProxyError::UnknownCommand(_) => ErrorKind::PROXY_UNKNOWN_COMMAND,
            ProxyError::PluginFault(_) => ErrorKind::PROXY_UPSTREAM_ERROR,
            ProxyError::Io(_) => ErrorKind::PROXY_UPSTREAM_ERROR,
        }
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_terminate_the_connection() {
        assert!(ProxyError::MalformedPacket("x".into()).is_fatal());
        assert!(ProxyError::ProtocolViolation("x".into()).is_fatal());
        assert!(ProxyError::AccessDenied { user: "x".into() }.is_fatal());
        assert!(!ProxyError::UnsupportedCommand("x".into()).is_fatal());
        assert!(!ProxyError::UnknownCommand(0x99).is_fatal());
        assert!(!ProxyError::UpstreamLogical { code: 1, message: "x".into() }.is_fatal());
    }

    #[test]
    fn error_kinds_map_to_non_colliding_wire_codes() {
        assert_eq!(
            ProxyError::UnsupportedCommand("x".into()).error_kind(),
            ErrorKind::PROXY_UNSUPPORTED_COMMAND
        );
        assert_eq!(
            ProxyError::UnknownCommand(0).error_kind(),
            ErrorKind::PROXY_UNKNOWN_COMMAND
        );
        assert_eq!(
            ProxyError::AccessDenied { user: "x".into() }.error_kind(),
            ErrorKind::ER_ACCESS_DENIED_ERROR
        );
    }
}
