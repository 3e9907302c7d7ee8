use crate::error::{ProxyError, ProxyResult};
use crate::protocol::mysql::basic::{
    ok_packet, parse_column_definition_41, parse_server_handshake, parse_text_row,
    read_length_encoded_number, Column, PacketIO,
};
use crate::protocol::mysql::charset::DEFAULT_COLLATION_ID;
use crate::protocol::mysql::constants::{CommandCode, SCRAMBLE_SIZE};
use crate::protocol::mysql::packet::writers::{write_command_packet, write_handshake_response_41};
use crate::server::auth::native_password_response;

use async_trait::async_trait;
use mysql_common::constants::{CapabilityFlags, StatusFlags};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// What `U.execute()` returns: either an `OK` (no result set) rendered as
/// zero columns, or a full text result set.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Option<String>>>,
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: StatusFlags,
}

/// The interface the proxy expects from an upstream MySQL connection, per
/// §6.2. A session never touches the wire codec directly when talking to the
/// upstream; it goes through this trait.
#[async_trait]
pub trait UpstreamAdapter: Send {
    async fn connect(&mut self) -> ProxyResult<()>;
    fn salt(&self) -> [u8; SCRAMBLE_SIZE];
    fn server_capabilities(&self) -> CapabilityFlags;
    async fn authenticate(&mut self, username: &[u8], password: &[u8]) -> ProxyResult<()>;
    async fn forward_authentication(
        &mut self,
        username: &[u8],
        auth_response: &[u8],
    ) -> ProxyResult<bool>;
    async fn select_schema(&mut self, name: &[u8]) -> ProxyResult<()>;
    async fn execute(&mut self, sql: &[u8]) -> ProxyResult<QueryResult>;
    async fn field_list(&mut self, table: &str, wildcard: &str) -> ProxyResult<Vec<Column>>;
    async fn set_charset(&mut self, name: &str) -> ProxyResult<()>;
    fn character_set_name(&self) -> &str;
    async fn close(&mut self) -> ProxyResult<()>;
}

fn connection_aborted() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::ConnectionAborted, "upstream closed")
}

/// Reads an `ERR` packet's code and message. Assumes the 4.1 wire form
/// (`[0xFF][code u16][#][sqlstate 5]`) since this proxy requires a 4.1
/// upstream.
fn parse_err_payload(payload: &[u8]) -> (u16, String) {
    if payload.len() < 9 || payload[3] != b'#' {
        return (9999, String::from_utf8_lossy(payload).into_owned());
    }
    let code = u16::from_le_bytes([payload[1], payload[2]]);
    let message = String::from_utf8_lossy(&payload[9..]).into_owned();
    (code, message)
}

/// Concrete [`UpstreamAdapter`] that speaks the same wire codec (W/P/K) this
/// proxy uses with its own clients, over a plain TCP connection to a real
/// MySQL/MariaDB server. Grounded in the shape of the teacher's own
/// pooled backend connection: dial, read the handshake, authenticate, then
/// issue commands and decode responses with the identical packet reader and
/// writer types used on the client side.
pub struct TcpUpstream {
    addr: String,
    io: Option<PacketIO<OwnedReadHalf, OwnedWriteHalf>>,
    salt: [u8; SCRAMBLE_SIZE],
    server_capabilities: CapabilityFlags,
    charset_name: String,
}

impl TcpUpstream {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            io: None,
            salt: [0u8; SCRAMBLE_SIZE],
            server_capabilities: CapabilityFlags::empty(),
            charset_name: "utf8".to_string(),
        }
    }

    fn io_mut(&mut self) -> ProxyResult<&mut PacketIO<OwnedReadHalf, OwnedWriteHalf>> {
        self.io
            .as_mut()
            .ok_or_else(|| ProxyError::UpstreamOperational("not connected".to_string()))
    }

    async fn read_packet(&mut self) -> ProxyResult<Vec<u8>> {
        let io = self.io_mut()?;
        let (_seq, packet) = io
            .reader
            .next_async()
            .await?
            .ok_or_else(connection_aborted)?;
        Ok(packet.as_ref().to_vec())
    }

    fn handshake_capabilities() -> CapabilityFlags {
        CapabilityFlags::CLIENT_PROTOCOL_41 | CapabilityFlags::CLIENT_SECURE_CONNECTION
    }

    async fn send_handshake_response(
        &mut self,
        username: &[u8],
        auth_response: &[u8],
    ) -> ProxyResult<()> {
        let capabilities = Self::handshake_capabilities();
        let io = self.io_mut()?;
        io.writer.set_seq(1);
        write_handshake_response_41(
            &mut io.writer,
            capabilities,
            crate::protocol::mysql::constants::MAX_PAYLOAD_LEN as u32,
            DEFAULT_COLLATION_ID as u8,
            username,
            auth_response,
            None,
        )
        .await?;
        io.writer.flush_all().await?;
        Ok(())
    }
}

#[async_trait]
impl UpstreamAdapter for TcpUpstream {
    async fn connect(&mut self) -> ProxyResult<()> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (r, w) = stream.into_split();
        let mut io = PacketIO::new(r, w);
        let (_seq, packet) = io
            .reader
            .next_async()
            .await?
            .ok_or_else(connection_aborted)?;
        let (_, handshake) = parse_server_handshake(packet.as_ref())
            .map_err(|e| ProxyError::MalformedPacket(format!("upstream handshake: {e:?}")))?;
        self.salt = handshake.auth_plugin_data;
        self.server_capabilities = handshake.capabilities;
        self.io = Some(io);
        Ok(())
    }

    fn salt(&self) -> [u8; SCRAMBLE_SIZE] {
        self.salt
    }

    fn server_capabilities(&self) -> CapabilityFlags {
        self.server_capabilities
    }

    async fn authenticate(&mut self, username: &[u8], password: &[u8]) -> ProxyResult<()> {
        let auth_response: Vec<u8> = if password.is_empty() {
            Vec::new()
        } else {
            native_password_response(password, &self.salt).to_vec()
        };
        self.send_handshake_response(username, &auth_response).await?;
        let packet = self.read_packet().await?;
        match packet.first() {
            Some(0x00) => Ok(()),
            Some(0xff) => {
                let (code, message) = parse_err_payload(&packet);
                Err(ProxyError::UpstreamLogical { code, message })
            }
            _ => Err(ProxyError::ProtocolViolation(
                "unexpected upstream auth reply".to_string(),
            )),
        }
    }

    async fn forward_authentication(
        &mut self,
        username: &[u8],
        auth_response: &[u8],
    ) -> ProxyResult<bool> {
        self.send_handshake_response(username, auth_response).await?;
        let packet = self.read_packet().await?;
        Ok(packet.first() == Some(&0x00))
    }

    async fn select_schema(&mut self, name: &[u8]) -> ProxyResult<()> {
        {
            let io = self.io_mut()?;
            io.writer.reset_seq();
            write_command_packet(&mut io.writer, CommandCode::ComInitDB, name).await?;
            io.writer.flush_all().await?;
        }
        let packet = self.read_packet().await?;
        match packet.first() {
            Some(0x00) => Ok(()),
            Some(0xff) => {
                let (code, message) = parse_err_payload(&packet);
                Err(ProxyError::UpstreamLogical { code, message })
            }
            _ => Err(ProxyError::ProtocolViolation(
                "unexpected upstream init_db reply".to_string(),
            )),
        }
    }

    async fn execute(&mut self, sql: &[u8]) -> ProxyResult<QueryResult> {
        {
            let io = self.io_mut()?;
            io.writer.reset_seq();
            write_command_packet(&mut io.writer, CommandCode::ComQuery, sql).await?;
            io.writer.flush_all().await?;
        }
        let first = self.read_packet().await?;
        match first.first() {
            Some(0x00) => {
                let ok = ok_packet(&first, CapabilityFlags::CLIENT_PROTOCOL_41)
                    .map_err(|e| ProxyError::MalformedPacket(format!("{e:?}")))?
                    .1;
                Ok(QueryResult {
                    columns: Vec::new(),
                    rows: Vec::new(),
                    affected_rows: ok.affected_rows,
                    last_insert_id: ok.last_insert_id,
                    status_flags: ok.status_flags,
                })
            }
            Some(0xff) => {
                let (code, message) = parse_err_payload(&first);
                Err(ProxyError::UpstreamLogical { code, message })
            }
            _ => {
                let (_, ncols) = read_length_encoded_number(&first)
                    .map_err(|e| ProxyError::MalformedPacket(format!("{e:?}")))?;
                let mut columns = Vec::with_capacity(ncols as usize);
                for _ in 0..ncols {
                    let packet = self.read_packet().await?;
                    let (_, column) = parse_column_definition_41(&packet)
                        .map_err(|e| ProxyError::MalformedPacket(format!("{e:?}")))?;
                    columns.push(column);
                }
                let _eof = self.read_packet().await?; // column-definitions terminator

                let mut rows = Vec::new();
                loop {
                    let packet = self.read_packet().await?;
                    if packet.first() == Some(&0xfe) && packet.len() <= 5 {
                        break;
                    }
                    let (_, row) = parse_text_row(&packet, ncols as usize)
                        .map_err(|e| ProxyError::MalformedPacket(format!("{e:?}")))?;
                    rows.push(row);
                }

                Ok(QueryResult {
                    columns,
                    rows,
                    affected_rows: 0,
                    last_insert_id: 0,
                    status_flags: StatusFlags::empty(),
                })
            }
        }
    }

    async fn field_list(&mut self, table: &str, wildcard: &str) -> ProxyResult<Vec<Column>> {
        let mut payload = table.as_bytes().to_vec();
        payload.push(0x00);
        payload.extend_from_slice(wildcard.as_bytes());
        {
            let io = self.io_mut()?;
            io.writer.reset_seq();
            write_command_packet(&mut io.writer, CommandCode::ComFieldList, &payload).await?;
            io.writer.flush_all().await?;
        }

        let mut columns = Vec::new();
        loop {
            let packet = self.read_packet().await?;
            if packet.first() == Some(&0xfe) && packet.len() <= 5 {
                break;
            }
            if packet.first() == Some(&0xff) {
                let (code, message) = parse_err_payload(&packet);
                return Err(ProxyError::UpstreamLogical { code, message });
            }
            let (_, column) = parse_column_definition_41(&packet)
                .map_err(|e| ProxyError::MalformedPacket(format!("{e:?}")))?;
            columns.push(column);
        }
        Ok(columns)
    }

    async fn set_charset(&mut self, name: &str) -> ProxyResult<()> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(ProxyError::ProtocolViolation(format!(
                "invalid charset name: {name}"
            )));
        }
        let query = format!("SET NAMES '{name}'");
        self.execute(query.as_bytes()).await?;
        self.charset_name = name.to_string();
        Ok(())
    }

    fn character_set_name(&self) -> &str {
        &self.charset_name
    }

    async fn close(&mut self) -> ProxyResult<()> {
        self.io = None;
        Ok(())
    }
}
