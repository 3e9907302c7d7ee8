//! In-process client <-> proxy <-> fake-upstream round trip, driven entirely
//! over `tokio::io::duplex`, per the test-tooling section of the component
//! design: no real socket, no real upstream server, but the exact same
//! packet codec on both ends of the wire.

use async_trait::async_trait;
use mysql_common::constants::{CapabilityFlags, ColumnType, StatusFlags};
use std::io::Write as _;

use proxy::error::ProxyResult;
use proxy::plugin::PluginRegistry;
use proxy::protocol::mysql::basic::{parse_server_handshake, Column};
use proxy::protocol::mysql::charset::DEFAULT_COLLATION_ID;
use proxy::protocol::mysql::constants::SCRAMBLE_SIZE;
use proxy::protocol::mysql::packet::packet_reader::PacketReader;
use proxy::protocol::mysql::packet::packet_writer::PacketWriter;
use proxy::protocol::mysql::packet::writers::write_handshake_response_41;
use proxy::server::auth::native_password_response;
use proxy::server::session::{Session, SessionConfig};
use proxy::upstream::{QueryResult, UpstreamAdapter};

struct FakeUpstream;

#[async_trait]
impl UpstreamAdapter for FakeUpstream {
    async fn connect(&mut self) -> ProxyResult<()> {
        Ok(())
    }

    fn salt(&self) -> [u8; SCRAMBLE_SIZE] {
        [9u8; SCRAMBLE_SIZE]
    }

    fn server_capabilities(&self) -> CapabilityFlags {
        CapabilityFlags::CLIENT_PROTOCOL_41 | CapabilityFlags::CLIENT_SECURE_CONNECTION
    }

    async fn authenticate(&mut self, _username: &[u8], _password: &[u8]) -> ProxyResult<()> {
        Ok(())
    }

    async fn forward_authentication(
        &mut self,
        _username: &[u8],
        _auth_response: &[u8],
    ) -> ProxyResult<bool> {
        Ok(true)
    }

    async fn select_schema(&mut self, _name: &[u8]) -> ProxyResult<()> {
        Ok(())
    }

    async fn execute(&mut self, _sql: &[u8]) -> ProxyResult<QueryResult> {
        Ok(QueryResult {
            columns: vec![Column::new("n", ColumnType::MYSQL_TYPE_LONG)],
            rows: vec![vec![Some("1".to_string())]],
            affected_rows: 0,
            last_insert_id: 0,
            status_flags: StatusFlags::empty(),
        })
    }

    async fn field_list(&mut self, _table: &str, _wildcard: &str) -> ProxyResult<Vec<Column>> {
        Ok(vec![])
    }

    async fn set_charset(&mut self, _name: &str) -> ProxyResult<()> {
        Ok(())
    }

    fn character_set_name(&self) -> &str {
        "utf8"
    }

    async fn close(&mut self) -> ProxyResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn handshake_query_and_quit_round_trip() {
    let (client_side, proxy_side) = tokio::io::duplex(64 * 1024);
    let (proxy_reader, proxy_writer) = tokio::io::split(proxy_side);
    let (client_reader, client_writer) = tokio::io::split(client_side);

    let mut client_packets = PacketReader::new(client_reader);
    let mut client_writer = PacketWriter::new(client_writer);

    let config = SessionConfig {
        proxy_user: "root".to_string(),
        proxy_password: "secret".to_string(),
        upstream_user: "root".to_string(),
        upstream_password: "".to_string(),
        forward_auth: false,
        read_timeout_secs: 0,
    };

    let server_task = tokio::spawn(async move {
        let mut session = Session::new(proxy_reader, proxy_writer);
        let mut upstream = FakeUpstream;
        let plugins = PluginRegistry::new();
        session.run(&config, &mut upstream, &plugins).await
    });

    // 1. read HandshakeV10 and recover the nonce.
    let (_, handshake_packet) = client_packets.next_async().await.unwrap().unwrap();
    let (_, handshake) = parse_server_handshake(&handshake_packet).unwrap();
    assert_eq!(handshake.protocol_version, 0x0a);

    // 2. respond with a HandshakeResponse41 authenticated against "secret".
    let auth_response = native_password_response(b"secret", &handshake.auth_plugin_data);
    client_writer.set_seq(1);
    write_handshake_response_41(
        &mut client_writer,
        CapabilityFlags::CLIENT_PROTOCOL_41 | CapabilityFlags::CLIENT_SECURE_CONNECTION,
        16_777_216,
        DEFAULT_COLLATION_ID as u8,
        b"root",
        &auth_response,
        None,
    )
    .await
    .unwrap();
    client_writer.flush_all().await.unwrap();

    // 3. expect an OK.
    let (_, ok_packet) = client_packets.next_async().await.unwrap().unwrap();
    assert_eq!(ok_packet[0], 0x00);

    // 4. issue a query and expect a text result set containing our fake row.
    client_writer.reset_seq();
    client_writer.write_all(&[0x03]).unwrap();
    client_writer
        .write_all(b"SELECT @@version_comment LIMIT 1")
        .unwrap();
    client_writer.end_packet().await.unwrap();

    let (_, column_count) = client_packets.next_async().await.unwrap().unwrap();
    assert_eq!(column_count[0], 1);
    let (_, _column_def) = client_packets.next_async().await.unwrap().unwrap();
    let (_, eof_after_columns) = client_packets.next_async().await.unwrap().unwrap();
    assert_eq!(eof_after_columns[0], 0xfe);
    let (_, row) = client_packets.next_async().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&row).contains("mysql-proxy"));
    let (_, eof_after_rows) = client_packets.next_async().await.unwrap().unwrap();
    assert_eq!(eof_after_rows[0], 0xfe);

    // 5. quit cleanly.
    client_writer.reset_seq();
    client_writer.write_all(&[0x01]).unwrap();
    client_writer.end_packet().await.unwrap();
    let (_, quit_ok) = client_packets.next_async().await.unwrap().unwrap();
    assert_eq!(quit_ok[0], 0x00);

    server_task.await.unwrap().unwrap();
}
