use crate::error::{ProxyError, ProxyResult};
use crate::plugin::PluginRegistry;
use crate::protocol::mysql::basic::{client_handshake_response, from_packet, Column, Command, OkPacket, PacketIO};
use crate::protocol::mysql::constants::{CommandCode, UNSUPPORTED_COMMANDS};
use crate::protocol::mysql::error_codes::ErrorKind;
use crate::protocol::mysql::packet::Packet;
use crate::protocol::mysql::packet::writers::{
    write_column_definitions_41, write_err_packet, write_initial_handshake, write_ok_packet,
    write_ok_packet_with_client_flags, write_text_result_set,
};
use crate::server::auth::{gen_nonce, verify_native_password};
use crate::server::capabilities_with_upstream;
use crate::upstream::UpstreamAdapter;

use mysql_common::constants::{CapabilityFlags, ColumnType, StatusFlags};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

const VERSION_COMMENT_QUERY: &[u8] = b"select @@version_comment limit 1";
const VERSION_COMMENT_VALUE: &str = "mysql-proxy";
const DEFAULT_CHARSET: &str = "utf8";

/// The pieces of [`crate::server::config::ProxyArgs`] a session actually
/// needs, so it can be driven from configuration or from a test fixture
/// without depending on `clap`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub proxy_user: String,
    pub proxy_password: String,
    pub upstream_user: String,
    pub upstream_password: String,
    pub forward_auth: bool,
    /// Client socket read timeout, in seconds. `0` disables the timeout.
    pub read_timeout_secs: u64,
}

/// Drives one client connection: the handshake/auth exchange of §4.5,
/// followed by the `COM_*` command loop. Generic over the client socket
/// halves so tests can substitute an in-memory duplex stream.
pub struct Session<R, W> {
    io: PacketIO<R, W>,
    read_timeout_secs: u64,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Session {
            io: PacketIO::new(reader, writer),
            read_timeout_secs: 0,
        }
    }

    /// Runs the handshake, authentication, and command loop for this
    /// connection. Returns once the client disconnects, a read times out, or
    /// a fatal protocol error occurs (per §7, propagation policy).
    pub async fn run(
        &mut self,
        config: &SessionConfig,
        upstream: &mut dyn UpstreamAdapter,
        plugins: &PluginRegistry,
    ) -> ProxyResult<()> {
        self.read_timeout_secs = config.read_timeout_secs;
        let authenticated = self.handshake(config, upstream, plugins).await?;
        if !authenticated {
            return Ok(());
        }
        self.command_loop(upstream, plugins).await
    }

    /// Reads the next packet off the client socket, applying the configured
    /// read timeout. A `0` timeout disables the check. Per §5, an expired
    /// timeout is treated the same as the client closing the connection —
    /// the session transitions to CLOSED rather than raising an error.
    async fn read_client_packet(&mut self) -> ProxyResult<Option<(u8, Packet)>> {
        if self.read_timeout_secs == 0 {
            return Ok(self.io.reader.next_async().await?);
        }
        match tokio::time::timeout(
            Duration::from_secs(self.read_timeout_secs),
            self.io.reader.next_async(),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_elapsed) => {
                debug!("client read timed out, closing session");
                Ok(None)
            }
        }
    }

    /// Writes `err` as an `ERR` packet using the wire code its kind maps to.
    /// Callers still decide separately (via [`ProxyError::is_fatal`]) whether
    /// to keep serving the connection afterward.
    async fn emit_error(&mut self, err: &ProxyError) -> ProxyResult<()> {
        write_err_packet(err.error_kind(), err.to_string().as_bytes(), &mut self.io.writer).await?;
        Ok(())
    }

    async fn handshake(
        &mut self,
        config: &SessionConfig,
        upstream: &mut dyn UpstreamAdapter,
        plugins: &PluginRegistry,
    ) -> ProxyResult<bool> {
        let nonce = if config.forward_auth {
            upstream.salt()
        } else {
            upstream
                .authenticate(
                    config.upstream_user.as_bytes(),
                    config.upstream_password.as_bytes(),
                )
                .await?;
            gen_nonce()
        };

        self.io.writer.reset_seq();
        write_initial_handshake(&mut self.io.writer, nonce).await?;

        let (_seq, packet) = self
            .read_client_packet()
            .await?
            .ok_or_else(|| ProxyError::ProtocolViolation("client closed before handshake response".into()))?;
        let (_, response) = client_handshake_response(packet.as_ref())
            .map_err(|e| ProxyError::MalformedPacket(format!("{e:?}")))?;

        if !response.client_flag.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
            self.io.writer.set_seq(2);
            let err = ProxyError::ProtocolViolation("client must support protocol 4.1".into());
            self.emit_error(&err).await?;
            return Ok(false);
        }

        if !auth_plugin_supported(response.client_flag, &response.auth_plugin) {
            self.io.writer.set_seq(2);
            warn!(
                plugin = %String::from_utf8_lossy(&response.auth_plugin),
                "client requested unsupported auth plugin"
            );
            let err = ProxyError::AccessDenied {
                user: response.db_user_string(),
            };
            self.emit_error(&err).await?;
            return Ok(false);
        }

        let username = response.db_user_string();
        let success = if let Some(plugin_verdict) =
            plugins.call_auth(&username, &response.auth_response).await
        {
            plugin_verdict
        } else if config.forward_auth {
            upstream
                .forward_authentication(username.as_bytes(), &response.auth_response)
                .await?
        } else {
            verify_native_password(
                config.proxy_password.as_bytes(),
                &nonce,
                &response.auth_response,
            )
        };

        self.io.writer.set_seq(2);
        if success {
            info!(user = %username, "authenticated");
            write_ok_packet(&mut self.io.writer, 0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT).await?;
        } else {
            warn!(user = %username, "access denied");
            let err = ProxyError::AccessDenied { user: username };
            self.emit_error(&err).await?;
            return Ok(false);
        }

        if let Some(db) = &response.database {
            if let Err(e) = upstream.select_schema(db).await {
                warn!("initial schema selection failed: {e}");
            }
        }
        if let Err(e) = upstream.set_charset(DEFAULT_CHARSET).await {
            warn!("initial charset selection failed: {e}");
        }

        Ok(true)
    }

    async fn command_loop(
        &mut self,
        upstream: &mut dyn UpstreamAdapter,
        plugins: &PluginRegistry,
    ) -> ProxyResult<()> {
        let client_capabilities = capabilities_with_upstream(upstream.server_capabilities());

        loop {
            let (_seq, packet) = match self.read_client_packet().await? {
                Some(p) => p,
                None => return Ok(()),
            };
            self.io.writer.reset_seq();
            self.io.writer.set_seq(1);

            let command = match from_packet(packet.as_ref()) {
                Ok((_, command)) => command,
                Err(e) => {
                    let err = ProxyError::UnknownCommand(packet.as_ref().first().copied().unwrap_or(0));
                    debug!(parse_error = ?e, "command parse failed");
                    self.emit_error(&err).await?;
                    continue;
                }
            };

            match command {
                Command::Quit => {
                    let _ = write_ok_packet(&mut self.io.writer, 0, 0, StatusFlags::empty()).await;
                    return Ok(());
                }
                Command::Ping => {
                    self.respond_pong().await?;
                }
                Command::InitDb(name) => {
                    self.handle_init_db(upstream, name).await?;
                }
                Command::Query(query) => {
                    self.handle_query(upstream, plugins, query, client_capabilities)
                        .await?;
                }
                Command::ListFields(payload) => {
                    self.handle_field_list(upstream, payload, client_capabilities)
                        .await?;
                }
                Command::Unsupported(code) => {
                    self.handle_unsupported(code).await?;
                }
            }
        }
    }

    async fn respond_pong(&mut self) -> ProxyResult<()> {
        write_ok_packet_with_client_flags(
            &mut self.io.writer,
            CapabilityFlags::CLIENT_PROTOCOL_41,
            OkPacket {
                header: 0,
                affected_rows: 0,
                last_insert_id: 0,
                status_flags: StatusFlags::SERVER_STATUS_AUTOCOMMIT,
                warnings: 0,
                info: "PONG".to_string(),
                session_state_info: String::new(),
            },
        )
        .await?;
        Ok(())
    }

    async fn handle_init_db(
        &mut self,
        upstream: &mut dyn UpstreamAdapter,
        name: &[u8],
    ) -> ProxyResult<()> {
        match upstream.select_schema(name).await {
            Ok(()) => {
                write_ok_packet(&mut self.io.writer, 0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT)
                    .await?;
            }
            Err(ProxyError::UpstreamLogical { code, message }) => {
                write_err_packet(ErrorKind::ER_BAD_DB_ERROR, format!("{code}: {message}").as_bytes(), &mut self.io.writer)
                    .await?;
            }
            Err(e) => {
                write_err_packet(ErrorKind::PROXY_UPSTREAM_ERROR, e.to_string().as_bytes(), &mut self.io.writer)
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_query(
        &mut self,
        upstream: &mut dyn UpstreamAdapter,
        plugins: &PluginRegistry,
        query: &[u8],
        client_capabilities: CapabilityFlags,
    ) -> ProxyResult<()> {
        let normalized: Vec<u8> = query
            .iter()
            .map(|b| b.to_ascii_lowercase())
            .collect::<Vec<u8>>();
        let trimmed = std::str::from_utf8(&normalized)
            .unwrap_or_default()
            .trim();

        if trimmed.as_bytes() == VERSION_COMMENT_QUERY {
            let column = Column::new("@@version_comment", ColumnType::MYSQL_TYPE_VAR_STRING);
            write_text_result_set(
                &mut self.io.writer,
                &[column],
                &[vec![Some(VERSION_COMMENT_VALUE.to_string())]],
                client_capabilities,
            )
            .await?;
            return Ok(());
        }

        let query_str = String::from_utf8_lossy(query);
        if let Some(raw_packet) = plugins.call_com_query(&query_str).await {
            self.io.writer.write_all(&raw_packet).await?;
            self.io.writer.flush_all().await?;
            return Ok(());
        }

        match upstream.execute(query).await {
            Ok(result) if result.columns.is_empty() => {
                write_ok_packet(
                    &mut self.io.writer,
                    result.affected_rows,
                    result.last_insert_id,
                    result.status_flags,
                )
                .await?;
            }
            Ok(result) => {
                write_text_result_set(&mut self.io.writer, &result.columns, &result.rows, client_capabilities)
                    .await?;
            }
            Err(ProxyError::UpstreamLogical { code, message }) => {
                write_err_packet(ErrorKind::PROXY_UPSTREAM_ERROR, format!("{code}: {message}").as_bytes(), &mut self.io.writer)
                    .await?;
            }
            Err(e) => {
                write_err_packet(ErrorKind::PROXY_UPSTREAM_ERROR, e.to_string().as_bytes(), &mut self.io.writer)
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_field_list(
        &mut self,
        upstream: &mut dyn UpstreamAdapter,
        payload: &[u8],
        client_capabilities: CapabilityFlags,
    ) -> ProxyResult<()> {
        let mut parts = payload.splitn(2, |&b| b == 0x00);
        let table = parts.next().unwrap_or(b"");
        let wildcard = parts.next().unwrap_or(b"");

        if !is_valid_field_list_token(table) || !is_valid_field_list_token(wildcard) {
            write_err_packet(
                ErrorKind::ER_UNKNOWN_COM_ERROR,
                b"invalid table or wildcard",
                &mut self.io.writer,
            )
            .await?;
            return Ok(());
        }

        let table = String::from_utf8_lossy(table).into_owned();
        let wildcard = String::from_utf8_lossy(wildcard).into_owned();

        match upstream.field_list(&table, &wildcard).await {
            Ok(columns) => {
                write_column_definitions_41(&columns, &mut self.io.writer, client_capabilities, true)
                    .await?;
            }
            Err(e) => {
                write_err_packet(ErrorKind::PROXY_UPSTREAM_ERROR, e.to_string().as_bytes(), &mut self.io.writer)
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_unsupported(&mut self, code: u8) -> ProxyResult<()> {
        use num_traits::FromPrimitive;
        debug!(code, "unrecognized or unsupported command byte");
        let (kind, message): (ErrorKind, &[u8]) = match CommandCode::from_u8(code) {
            Some(known) if UNSUPPORTED_COMMANDS.contains(&known) => {
                debug!(?known, "known but unsupported command");
                (ErrorKind::PROXY_UNSUPPORTED_COMMAND, &b"unsupported"[..])
            }
            _ => (ErrorKind::PROXY_UNKNOWN_COMMAND, &b"unimplemented"[..]),
        };
        write_err_packet(kind, message, &mut self.io.writer).await?;
        Ok(())
    }
}

/// Per §4.5 auth step 2: a client that doesn't advertise `CLIENT_PLUGIN_AUTH`
/// (or sends an empty plugin name) gets the implicit default accepted; one
/// that names a plugin must name `mysql_native_password`, the only plugin
/// this proxy speaks.
fn auth_plugin_supported(client_flag: CapabilityFlags, auth_plugin: &[u8]) -> bool {
    if !client_flag.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) || auth_plugin.is_empty() {
        return true;
    }
    auth_plugin == b"mysql_native_password"
}

fn is_valid_field_list_token(token: &[u8]) -> bool {
    !token.is_empty()
        && token
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'_' || b == b'%')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_list_token_accepts_wildcards() {
        assert!(is_valid_field_list_token(b"users"));
        assert!(is_valid_field_list_token(b"user%"));
        assert!(!is_valid_field_list_token(b""));
        assert!(!is_valid_field_list_token(b"users;drop"));
    }

    #[test]
    fn auth_plugin_check_only_rejects_named_mismatches() {
        assert!(auth_plugin_supported(CapabilityFlags::empty(), b""));
        assert!(auth_plugin_supported(
            CapabilityFlags::CLIENT_PLUGIN_AUTH,
            b""
        ));
        assert!(auth_plugin_supported(
            CapabilityFlags::CLIENT_PLUGIN_AUTH,
            b"mysql_native_password"
        ));
        assert!(!auth_plugin_supported(
            CapabilityFlags::CLIENT_PLUGIN_AUTH,
            b"caching_sha2_password"
        ));
    }
}
