use num_derive::{FromPrimitive, ToPrimitive};
use strum_macros::AsRefStr;

// see: https://dev.mysql.com/doc/refman/8.0/en/identifier-length.html
// max packet payload length.
pub const MAX_PAYLOAD_LEN: usize = 16_777_215;

pub const PACKET_HEADER_LEN: usize = 4;
/// auth-plugin-data-part-1. The first 8 bytes of the nonce, sent unconditionally
/// in the handshake, before the 1-byte padding and the remaining 12 bytes.
pub const AUTH_PLUGIN_DATA_PART_1_LENGTH: usize = 8;
/// Total length of the nonce (auth-plugin-data-part-1 + auth-plugin-data-part-2).
pub const SCRAMBLE_SIZE: usize = 20;

/// Fixed server version string this proxy always advertises, regardless of
/// the version spoken by whatever upstream it happens to be fronting.
pub const SERVER_VERSION: &[u8] = b"5.5.11-mysqlproxy";

/// Connection id this proxy always advertises in the handshake. The proxy
/// does not track a real pool of connection ids since it never multiplexes
/// more than one client per session.
pub const CONNECTION_ID: u32 = 4;

#[derive(Debug, PartialEq, AsRefStr)]
pub enum AuthPluginName {
    #[strum(serialize = "mysql_old_password")]
    AuthMySQlOldPassword,
    #[strum(serialize = "caching_sha2_password")]
    AuthCachingSha2Password,
    #[strum(serialize = "sha256_password")]
    AuthSha256Password,
    #[strum(serialize = "mysql_native_password")]
    AuthNativePassword,
    #[strum(serialize = "auth_unknown_plugin")]
    UnknownPluginName,
}

#[derive(Debug, PartialEq, ToPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum HeaderInfo {
    OKHeader = 0x00,
    ErrHeader = 0xff,
    EOFHeader = 0xfe,
    LocalInFileHeader = 0xfb,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum CommandCode {
    ComSleep = 0,
    ComQuit,
    ComInitDB,
    ComQuery,
    ComFieldList,
    ComCreateDB,
    ComDropDB,
    ComRefresh,
    ComShutdown,
    ComStatistics,
    ComProcessInfo,
    ComConnect,
    ComProcessKill,
    ComDebug,
    ComPing,
    ComTime,
    ComDelayedInsert,
    ComChangeUser,
    ComBinlogDump,
    ComTableDump,
    ComConnectOut,
    ComRegisterSlave,
    ComStmtPrepare,
    ComStmtExecute,
    ComStmtSendLongData,
    ComStmtClose,
    ComStmtReset,
    ComSetOption,
    ComStmtFetch,
    ComDaemon,
    ComBinlogDumpGtid,
    ComResetConnection,
    ComEnd,
}

/// `COM_*` codes that are recognized (appear in [`CommandCode`]) but that this
/// proxy deliberately refuses to implement, per the session command dispatch
/// table. Anything not in this list and not otherwise handled falls through
/// to the "unknown command" path.
pub const UNSUPPORTED_COMMANDS: &[CommandCode] = &[
    CommandCode::ComCreateDB,
    CommandCode::ComDropDB,
    CommandCode::ComRefresh,
    CommandCode::ComShutdown,
    CommandCode::ComStatistics,
    CommandCode::ComProcessInfo,
    CommandCode::ComProcessKill,
    CommandCode::ComDebug,
    CommandCode::ComChangeUser,
    CommandCode::ComStmtPrepare,
    CommandCode::ComStmtExecute,
    CommandCode::ComStmtSendLongData,
    CommandCode::ComStmtClose,
    CommandCode::ComStmtReset,
    CommandCode::ComStmtFetch,
    CommandCode::ComResetConnection,
    CommandCode::ComDaemon,
    CommandCode::ComTime,
    CommandCode::ComDelayedInsert,
    CommandCode::ComConnect,
];

#[cfg(test)]
mod test {
    use crate::protocol::mysql::constants::*;
    #[allow(unused_imports)]
    use bitflags::Flags;

    #[test]
    pub fn max_packet_size_test() {
        let max_u24_size = 16_777_215;
        assert_eq!(max_u24_size, MAX_PAYLOAD_LEN);
    }

    #[test]
    pub fn column_flag_test() {
        let enum_flag = mysql_common::constants::ColumnFlags::NOT_NULL_FLAG.bits();
        assert_eq!(1_u16, enum_flag);
    }

    #[test]
    pub fn test_common_info_code() {
        let com_info = CommandCode::ComQuery as u8;
        println!("ComQueryCode = {com_info}");
    }
}
