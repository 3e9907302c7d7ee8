use crate::protocol::mysql::constants::CommandCode as ComInfo;
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;

use std::collections::HashMap;

use mysql_common::constants::{CapabilityFlags, StatusFlags};
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use winnow::binary::{le_u16, le_u32, le_u8};
use winnow::combinator::{alt, preceded, rest};
use winnow::prelude::*;
use winnow::token::{literal, take, take_until};
use winnow::{Parser, Partial};

/// A decoded `COM_*` request, produced by [`from_packet`] once the session
/// has already read one full logical packet off the wire.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Query(&'a [u8]),
    ListFields(&'a [u8]),
    InitDb(&'a [u8]),
    Ping,
    Quit,
    /// Recognized command byte this proxy does not implement.
    Unsupported(u8),
}

#[pin_project]
pub struct PacketIO<R, W> {
    pub reader: PacketReader<R>,
    pub writer: PacketWriter<W>,
}

impl<R: AsyncRead + Send + Unpin, W: AsyncWrite + Send + Unpin> PacketIO<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: PacketReader::new(reader),
            writer: PacketWriter::new(writer),
        }
    }
}

/// A column definition, as sent before every text or binary result set and
/// in response to `COM_FIELD_LIST`. Field names follow §4.4's data model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset_code: u16,
    pub column_length: u32,
    pub column_type: mysql_common::constants::ColumnType,
    pub column_flags: mysql_common::constants::ColumnFlags,
    pub decimals: u8,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: mysql_common::constants::ColumnType) -> Self {
        let name = name.into();
        Column {
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            org_name: name.clone(),
            name,
            charset_code: crate::protocol::mysql::charset::DEFAULT_COLLATION_ID,
            column_length: 0,
            column_type,
            column_flags: mysql_common::constants::ColumnFlags::empty(),
            decimals: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OkPacket {
    pub header: u8,
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: StatusFlags,
    pub warnings: u16,
    pub info: String,
    pub session_state_info: String,
}

/// `HandshakeResponse` represents the client's reply to the server's handshake packet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HandshakeResponse {
    pub client_flag: CapabilityFlags,
    pub max_packet_len: u32,
    pub collation: u16,
    pub username: Option<Vec<u8>>,
    pub auth_response: Vec<u8>,
    pub auth_plugin: Vec<u8>,
    pub database: Option<Vec<u8>>,
    pub connect_attributes: Option<HashMap<String, String>>,
}

impl HandshakeResponse {
    pub fn db_user_string(&self) -> String {
        match &self.username {
            Some(username) => String::from_utf8_lossy(username).to_string(),
            None => "_NONE".to_string(),
        }
    }
}

fn read_length_encoded_string(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = read_length_encoded_number(i)?;
    take(len).parse_peek(input)
}

pub fn eof_server_status(i: &[u8]) -> IResult<&[u8], StatusFlags> {
    let status_flag_slice = &i[3..i.len()];
    let (i, status_flags_code) = le_u16.parse_peek(status_flag_slice)?;
    Ok((i, StatusFlags::from_bits_truncate(status_flags_code)))
}

pub fn read_length_encoded_number(i: &[u8]) -> IResult<&[u8], u64> {
    let (i, b) = le_u8.parse_peek(i)?;
    let r_size: usize = match b {
        0xfb => return Ok((i, 0)),
        0xfc => 2,
        0xfd => 3,
        0xfe => 8,
        _ => return Ok((i, b as u64)),
    };
    let mut bytes = [0u8; 8];
    let (i, b) = take(r_size).parse_peek(i)?;
    bytes[..r_size].copy_from_slice(b);
    Ok((i, u64::from_le_bytes(bytes)))
}

pub fn ok_packet(i: &[u8], capabilities: CapabilityFlags) -> winnow::IResult<&[u8], OkPacket> {
    let (i, header) = le_u8.parse_peek(i)?;
    let (i, affected_rows) = read_length_encoded_number(i)?;
    let (i, last_insert_id) = read_length_encoded_number(i)?;
    let (i, status_flags_value) = le_u16.parse_peek(i)?;

    let status_flags = StatusFlags::from_bits_retain(status_flags_value);
    let (i, warnings) = le_u16.parse_peek(i)?;
    let (info, session_state_info) =
        if !i.is_empty() && capabilities.contains(CapabilityFlags::CLIENT_SESSION_TRACK) {
            let (i, info_size) = read_length_encoded_number(i)?;
            let (i, info) = take(info_size).parse_peek(i)?;

            let session_state_info =
                if status_flags.contains(StatusFlags::SERVER_SESSION_STATE_CHANGED) {
                    let (i, s_t_size) = read_length_encoded_number(i)?;
                    let (_i, session_state_info) = take(s_t_size).parse_peek(i)?;
                    std::str::from_utf8(session_state_info).unwrap_or("")
                } else {
                    ""
                };
            (
                std::str::from_utf8(info).unwrap_or("").to_string(),
                session_state_info.to_string(),
            )
        } else {
            ("".to_string(), "".to_string())
        };

    Ok((
        i,
        OkPacket {
            header,
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
            session_state_info,
        },
    ))
}

/// Parses a `HandshakeResponse41` (or, if `CLIENT_PROTOCOL_41` is absent, the
/// pre-4.1 `HandshakeResponse320`). This proxy requires the 4.1 variant to
/// proceed past authentication, but both are parsed so the failure can be
/// reported as a protocol error rather than a decode error.
pub fn client_handshake_response(i: &[u8]) -> IResult<&[u8], HandshakeResponse> {
    let (i, capability_flags) = le_u16.parse_peek(i)?;
    let mut capabilities = CapabilityFlags::from_bits_truncate(capability_flags as u32);
    if capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        let (i, cap2) = le_u16.parse_peek(i)?;
        let cap = (cap2 as u32) << 16 | capability_flags as u32;
        capabilities = CapabilityFlags::from_bits_truncate(cap);

        let (i, max_packet_len) = le_u32.parse_peek(i)?;
        let (i, collation) = take(1u8).parse_peek(i)?;
        let (i, _) = take(23u8).parse_peek(i)?;

        let (i, user) = take_until(1.., "\0").parse_peek(i)?;
        let (i, _) = literal(b"\0").parse_peek(i)?;
        let username = Some(user.to_owned());

        let (i, auth_response) =
            if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
                let (i, size) = read_length_encoded_number(i)?;
                take(size).parse_peek(i)?
            } else if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
                let (i, size) = le_u8.parse_peek(i)?;
                take(size).parse_peek(i)?
            } else {
                take_until(1.., "\0").parse_peek(i)?
            };

        let (i, db) =
            if capabilities.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB) && !i.is_empty() {
                let (i, db) = take_until(1.., "\0").parse_peek(i)?;
                let (i, _) = literal(b"\0").parse_peek(i)?;
                (i, Some(db))
            } else {
                (i, None)
            };

        let (i, auth_plugin) =
            if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) && !i.is_empty() {
                let (i, auth_plugin) = take_until(1.., "\0").parse_peek(i)?;
                let (i, _) = literal("\0").parse_peek(i)?;
                (i, auth_plugin)
            } else {
                (i, &b""[..])
            };

        let (i, connect_attributes) =
            if capabilities.contains(CapabilityFlags::CLIENT_CONNECT_ATTRS) && !i.is_empty() {
                let (i, data_len) = read_length_encoded_number(i)?;
                let (i, data) = take(data_len).parse_peek(i)?;
                let mut input = data;
                let mut connect_attributes = HashMap::new();
                while !input.is_empty() {
                    let (remaining, k) = read_length_encoded_string(input)?;
                    let (remaining, v) = read_length_encoded_string(remaining)?;
                    let conn_attr_key = std::str::from_utf8(k).unwrap_or_default().to_string();
                    let conn_attr_val = std::str::from_utf8(v).unwrap_or_default().to_string();
                    connect_attributes.insert(conn_attr_key, conn_attr_val);
                    input = remaining;
                }
                (i, Some(connect_attributes))
            } else {
                (i, None)
            };

        Ok((
            i,
            HandshakeResponse {
                client_flag: capabilities,
                max_packet_len,
                collation: u16::from(collation[0]),
                username,
                auth_response: auth_response.to_vec(),
                auth_plugin: auth_plugin.to_vec(),
                database: db.map(|c| c.to_vec()),
                connect_attributes,
            },
        ))
    } else {
        let (i, max_packet_len_v1) = le_u16.parse_peek(i)?;
        let (i, max_packet_len_v2) = le_u8.parse_peek(i)?;
        let max_packet_len = (max_packet_len_v2 as u32) << 16 | max_packet_len_v1 as u32;
        let (i, username) = take_until(1.., "\0").parse_peek(i)?;
        let (i, _) = literal(b"\0").parse_peek(i)?;

        Ok((
            i,
            HandshakeResponse {
                client_flag: capabilities,
                max_packet_len,
                collation: 0,
                username: Some(username.to_vec()),
                auth_response: vec![],
                auth_plugin: vec![],
                database: None,
                connect_attributes: None,
            },
        ))
    }
}

/// The server's own `HandshakeV10`, as read from an upstream this proxy
/// dials out to. Mirrors [`client_handshake_response`] but for the opposite
/// direction of the same packet kind (§4.3).
#[derive(Debug, Clone)]
pub struct ServerHandshake {
    pub protocol_version: u8,
    pub server_version: Vec<u8>,
    pub connection_id: u32,
    pub auth_plugin_data: [u8; crate::protocol::mysql::constants::SCRAMBLE_SIZE],
    pub capabilities: CapabilityFlags,
    pub charset: u8,
    pub status_flags: StatusFlags,
}

pub fn parse_server_handshake(i: &[u8]) -> IResult<&[u8], ServerHandshake> {
    let (i, protocol_version) = le_u8.parse_peek(i)?;
    let (i, server_version) = take_until(1.., "\0").parse_peek(i)?;
    let (i, _) = literal(b"\0").parse_peek(i)?;
    let (i, connection_id) = le_u32.parse_peek(i)?;
    let (i, scramble_part1) = take(8usize).parse_peek(i)?;
    let (i, _) = take(1usize).parse_peek(i)?; // filler
    let (i, cap_lo) = le_u16.parse_peek(i)?;
    let (i, charset) = le_u8.parse_peek(i)?;
    let (i, status_bits) = le_u16.parse_peek(i)?;
    let (i, cap_hi) = le_u16.parse_peek(i)?;
    let capabilities =
        CapabilityFlags::from_bits_truncate((cap_hi as u32) << 16 | cap_lo as u32);
    let (i, auth_plugin_data_len) = le_u8.parse_peek(i)?;
    let (i, _) = take(10usize).parse_peek(i)?; // reserved

    let mut auth_plugin_data = [0u8; crate::protocol::mysql::constants::SCRAMBLE_SIZE];
    auth_plugin_data[..8].copy_from_slice(scramble_part1);
    let i = if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        let part2_len = std::cmp::max(13, (auth_plugin_data_len as usize).saturating_sub(8));
        let (i, scramble_part2) = take(part2_len).parse_peek(i)?;
        let take_len = std::cmp::min(12, scramble_part2.len());
        auth_plugin_data[8..8 + take_len].copy_from_slice(&scramble_part2[..take_len]);
        i
    } else {
        i
    };
    let i = if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) && !i.is_empty() {
        let (i, _name) = take_until(1.., "\0").parse_peek(i)?;
        let (i, _) = literal(b"\0").parse_peek(i)?;
        i
    } else {
        i
    };

    Ok((
        i,
        ServerHandshake {
            protocol_version,
            server_version: server_version.to_vec(),
            connection_id,
            auth_plugin_data,
            capabilities,
            charset,
            status_flags: StatusFlags::from_bits_truncate(status_bits),
        },
    ))
}

/// Decodes one `ColumnDefinition41` packet, the inverse of
/// [`crate::protocol::mysql::packet::writers::write_column_definitions_41`].
pub fn parse_column_definition_41(i: &[u8]) -> IResult<&[u8], Column> {
    let (i, _catalog) = read_length_encoded_string(i)?;
    let (i, schema) = read_length_encoded_string(i)?;
    let (i, table) = read_length_encoded_string(i)?;
    let (i, org_table) = read_length_encoded_string(i)?;
    let (i, name) = read_length_encoded_string(i)?;
    let (i, org_name) = read_length_encoded_string(i)?;
    let (i, _fixed_len_marker) = read_length_encoded_number(i)?;
    let (i, charset_code) = le_u16.parse_peek(i)?;
    let (i, column_length) = le_u32.parse_peek(i)?;
    let (i, column_type) = le_u8.parse_peek(i)?;
    let (i, flags_bits) = le_u16.parse_peek(i)?;
    let (i, decimals) = le_u8.parse_peek(i)?;
    let (i, _reserved) = take(2usize).parse_peek(i)?;

    Ok((
        i,
        Column {
            schema: String::from_utf8_lossy(schema).into_owned(),
            table: String::from_utf8_lossy(table).into_owned(),
            org_table: String::from_utf8_lossy(org_table).into_owned(),
            name: String::from_utf8_lossy(name).into_owned(),
            org_name: String::from_utf8_lossy(org_name).into_owned(),
            charset_code,
            column_length,
            column_type: mysql_common::constants::ColumnType::try_from(column_type)
                .unwrap_or(mysql_common::constants::ColumnType::MYSQL_TYPE_VAR_STRING),
            column_flags: mysql_common::constants::ColumnFlags::from_bits_truncate(flags_bits),
            decimals,
        },
    ))
}

/// Decodes one text-protocol row, given the column count already known from
/// the preceding column-definition packets.
pub fn parse_text_row(i: &[u8], ncols: usize) -> IResult<&[u8], Vec<Option<String>>> {
    let mut values = Vec::with_capacity(ncols);
    let mut rest = i;
    for _ in 0..ncols {
        if rest.first() == Some(&0xfb) {
            rest = &rest[1..];
            values.push(None);
            continue;
        }
        let (next, value) = read_length_encoded_string(rest)?;
        values.push(Some(String::from_utf8_lossy(value).into_owned()));
        rest = next;
    }
    Ok((rest, values))
}

pub fn from_packet(pkt: &[u8]) -> IResult<Partial<&[u8]>, Command<'_>> {
    alt((
        preceded(literal([ComInfo::ComQuery as u8]), rest).map(Command::Query),
        preceded(literal([ComInfo::ComFieldList as u8]), rest).map(Command::ListFields),
        preceded(literal([ComInfo::ComInitDB as u8]), rest).map(Command::InitDb),
        literal([ComInfo::ComQuit as u8]).map(|_| Command::Quit),
        literal([ComInfo::ComPing as u8]).map(|_| Command::Ping),
        take(1usize).map(|b: &[u8]| Command::Unsupported(b[0])),
    ))
    .parse_peek(Partial::new(pkt))
}

#[cfg(test)]
mod tests {
    use crate::protocol::mysql::basic::client_handshake_response;
    use crate::protocol::mysql::charset::collation_names;
    use crate::protocol::mysql::packet::packet_reader::PacketReader;
    use mysql_common::constants::CapabilityFlags;
    use std::io::Cursor;

    #[test]
    pub fn test_handshake_parse() {
        let bytes = &[
            0x5b, 0x00, 0x00, 0x01, 0x8d, 0xa6, 0xff, 0x09, 0x00, 0x00, 0x00, 0x01, 0x21, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x64, 0x65, 0x66, 0x61, 0x75, 0x6c,
            0x74, 0x00, 0x14, 0xf7, 0xd1, 0x6c, 0xe9, 0x0d, 0x2f, 0x34, 0xb0, 0x2f, 0xd8, 0x1d,
            0x18, 0xc7, 0xa4, 0xe8, 0x98, 0x97, 0x67, 0xeb, 0xad, 0x64, 0x65, 0x66, 0x61, 0x75,
            0x6c, 0x74, 0x00, 0x6d, 0x79, 0x73, 0x71, 0x6c, 0x5f, 0x6e, 0x61, 0x74, 0x69, 0x76,
            0x65, 0x5f, 0x70, 0x61, 0x73, 0x73, 0x77, 0x6f, 0x72, 0x64, 0x00,
        ];
        let cursor = Cursor::new(&bytes[..]);
        let mut packet_reader = PacketReader::new(cursor);
        let (_, packet) = packet_reader.next_read().unwrap().unwrap();

        let handshake_rs = client_handshake_response(&packet);
        assert!(handshake_rs.is_ok());
        let handshake = handshake_rs.unwrap().1;
        assert!(handshake
            .client_flag
            .contains(CapabilityFlags::CLIENT_LONG_PASSWORD));
        assert!(handshake
            .client_flag
            .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB));
        assert_eq!(
            handshake.collation,
            *collation_names().get("utf8_general_ci").unwrap() as u16
        );
        assert_eq!(handshake.username.unwrap(), &b"default"[..]);
        assert_eq!(handshake.max_packet_len, 16777216);
    }

    #[test]
    pub fn test_handshake_parse_no_db() {
        let binary = &[
            0x25, 0x00, 0x00, 0x01, 0x85, 0xae, 0x3f, 0x20, 0x00, 0x00, 0x00, 0x01, 0x21, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x6a, 0x6f, 0x6e, 0x00, 0x00, 0x05,
        ];
        let cursor = Cursor::new(&binary[..]);
        let mut packet_reader = PacketReader::new(cursor);
        let (_, packet) = packet_reader.next_read().unwrap().unwrap();
        let (_, handshake) = client_handshake_response(&packet).unwrap();
        assert!(handshake
            .client_flag
            .contains(CapabilityFlags::CLIENT_LONG_PASSWORD));
        assert!(!handshake
            .client_flag
            .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB));
        assert_eq!(handshake.username.unwrap(), &b"jon"[..]);
    }

    #[test]
    pub fn test_parse_server_handshake() {
        use crate::protocol::mysql::basic::parse_server_handshake;

        let mut bytes = vec![0x0a];
        bytes.extend_from_slice(b"5.7.30\0");
        bytes.extend_from_slice(&42u32.to_le_bytes());
        bytes.extend_from_slice(&[1u8; 8]);
        bytes.push(0x00);
        let caps: u32 = (CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_SECURE_CONNECTION)
            .bits();
        bytes.extend_from_slice(&(caps as u16).to_le_bytes());
        bytes.push(0x21);
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
        bytes.push(21);
        bytes.extend_from_slice(&[0u8; 10]);
        bytes.extend_from_slice(&[2u8; 12]);
        bytes.push(0x00);

        let (_, handshake) = parse_server_handshake(&bytes).unwrap();
        assert_eq!(handshake.protocol_version, 0x0a);
        assert_eq!(handshake.server_version, b"5.7.30");
        assert_eq!(handshake.connection_id, 42);
        assert_eq!(&handshake.auth_plugin_data[..8], &[1u8; 8]);
        assert_eq!(&handshake.auth_plugin_data[8..20], &[2u8; 12]);
        assert!(handshake
            .capabilities
            .contains(CapabilityFlags::CLIENT_PROTOCOL_41));
    }

    #[test]
    pub fn test_column_definition_round_trip() {
        use crate::protocol::mysql::basic::{parse_column_definition_41, Column};

        let column = Column::new("id", mysql_common::constants::ColumnType::MYSQL_TYPE_LONG);
        let mut buf = Vec::new();
        let write_lenenc = |buf: &mut Vec<u8>, s: &[u8]| {
            buf.push(s.len() as u8);
            buf.extend_from_slice(s);
        };
        write_lenenc(&mut buf, b"def");
        write_lenenc(&mut buf, column.schema.as_bytes());
        write_lenenc(&mut buf, column.table.as_bytes());
        write_lenenc(&mut buf, column.org_table.as_bytes());
        write_lenenc(&mut buf, column.name.as_bytes());
        write_lenenc(&mut buf, column.org_name.as_bytes());
        buf.push(0x0c);
        buf.extend_from_slice(&column.charset_code.to_le_bytes());
        buf.extend_from_slice(&column.column_length.to_le_bytes());
        buf.push(column.column_type as u8);
        buf.extend_from_slice(&column.column_flags.bits().to_le_bytes());
        buf.push(column.decimals);
        buf.extend_from_slice(&[0x00, 0x00]);

        let (_, decoded) = parse_column_definition_41(&buf).unwrap();
        assert_eq!(decoded.name, "id");
        assert_eq!(
            decoded.column_type,
            mysql_common::constants::ColumnType::MYSQL_TYPE_LONG
        );
    }

    #[test]
    pub fn test_parse_text_row_with_null() {
        use crate::protocol::mysql::basic::parse_text_row;

        let bytes = [0xfb, 0x01, b'5'];
        let (_, row) = parse_text_row(&bytes, 2).unwrap();
        assert_eq!(row, vec![None, Some("5".to_string())]);
    }
}
