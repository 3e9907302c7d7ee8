use crate::protocol::mysql::basic::{Column, OkPacket};
use crate::protocol::mysql::charset::DEFAULT_COLLATION_ID;
use crate::protocol::mysql::constants::AuthPluginName::AuthNativePassword;
use crate::protocol::mysql::constants::{
    AUTH_PLUGIN_DATA_PART_1_LENGTH, CONNECTION_ID, SERVER_VERSION,
};
use crate::protocol::mysql::error_codes::ErrorKind;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::server::default_capabilities;

use byteorder::{LittleEndian, WriteBytesExt};
use mysql_common::constants::{CapabilityFlags, StatusFlags};
use mysql_common::io::WriteMysqlExt;
use std::io::{self, Write};
use tokio::io::AsyncWrite;

pub async fn write_err_packet<W: AsyncWrite + Unpin>(
    err: ErrorKind,
    msg: &[u8],
    w: &mut PacketWriter<W>,
) -> io::Result<()> {
    w.write_u8(0xff)?;
    w.write_u16::<LittleEndian>(err as u16)?;
    w.write_u8(b'#')?;
    w.write_all(err.sqlstate())?;
    w.write_all(msg)?;
    w.end_packet().await
}

pub async fn write_eof_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    s: StatusFlags,
) -> io::Result<()> {
    w.write_all(&[0xfe, 0x00, 0x00])?;
    w.write_u16::<LittleEndian>(s.bits())?;
    w.end_packet().await
}

pub async fn write_ok_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    rows: u64,
    last_insert_id: u64,
    s: StatusFlags,
) -> io::Result<()> {
    w.write_u8(0x00)?;
    w.write_lenenc_int(rows)?;
    w.write_lenenc_int(last_insert_id)?;
    w.write_u16::<LittleEndian>(s.bits())?;
    w.write_all(&[0x00, 0x00])?;
    w.end_packet().await
}

pub async fn write_ok_packet_with_client_flags<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    client_capabilities: CapabilityFlags,
    ok_packet: OkPacket,
) -> io::Result<()> {
    w.write_u8(ok_packet.header)?;
    w.write_lenenc_int(ok_packet.affected_rows)?;
    w.write_lenenc_int(ok_packet.last_insert_id)?;
    if client_capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        w.write_u16::<LittleEndian>(ok_packet.status_flags.bits())?;
        w.write_all(&[0x00, 0x00])?;
    } else if client_capabilities.contains(CapabilityFlags::CLIENT_TRANSACTIONS) {
        w.write_u16::<LittleEndian>(ok_packet.status_flags.bits())?;
    }

    if client_capabilities.contains(CapabilityFlags::CLIENT_SESSION_TRACK) {
        w.write_lenenc_str(ok_packet.info.as_bytes())?;
        if ok_packet
            .status_flags
            .contains(StatusFlags::SERVER_SESSION_STATE_CHANGED)
        {
            w.write_lenenc_str(ok_packet.session_state_info.as_bytes())?;
        }
    } else {
        w.write_all(ok_packet.info.as_bytes())?;
    }
    w.end_packet().await
}

/// Writes one `ColumnDefinition41` packet per column, per §4.4. Each field
/// is an independent lenenc-string except the fixed-width tail
/// (charset/length/type/flags/decimals).
pub async fn write_column_definitions_41<'a, I, W>(
    i: I,
    w: &mut PacketWriter<W>,
    client_capabilities: CapabilityFlags,
    is_com_field_list: bool,
) -> io::Result<()>
where
    I: IntoIterator<Item = &'a Column>,
    W: AsyncWrite + Unpin,
{
    for c in i {
        w.write_lenenc_str(b"def")?;
        w.write_lenenc_str(c.schema.as_bytes())?;
        w.write_lenenc_str(c.table.as_bytes())?;
        w.write_lenenc_str(c.org_table.as_bytes())?;
        w.write_lenenc_str(c.name.as_bytes())?;
        w.write_lenenc_str(c.org_name.as_bytes())?;
        w.write_lenenc_int(0x0c)?;
        w.write_u16::<LittleEndian>(c.charset_code)?;
        w.write_u32::<LittleEndian>(c.column_length)?;
        w.write_u8(c.column_type as u8)?;
        w.write_u16::<LittleEndian>(c.column_flags.bits())?;
        w.write_all(&[c.decimals])?;
        w.write_all(&[0x00, 0x00])?; // reserved

        if is_com_field_list {
            w.write_all(&[0xfb])?;
        }
        w.end_packet().await?;
    }

    if !client_capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
        write_eof_packet(w, StatusFlags::empty()).await
    } else {
        Ok(())
    }
}

/// Writes a full text result set: column-count, column definitions, EOF,
/// rows, EOF. If there are no columns, callers should send an `OK` instead
/// (per §4.4 — handled one level up, in the result-set builder).
pub async fn write_text_result_set<'a, W>(
    w: &mut PacketWriter<W>,
    columns: &'a [Column],
    rows: &'a [Vec<Option<String>>],
    client_capabilities: CapabilityFlags,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_lenenc_int(columns.len() as u64)?;
    w.end_packet().await?;
    write_column_definitions_41(columns, w, client_capabilities, false).await?;
    for row in rows {
        write_text_row(w, row).await?;
    }
    if !client_capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
        write_eof_packet(w, StatusFlags::empty()).await?;
    }
    Ok(())
}

pub async fn write_text_row<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    row: &[Option<String>],
) -> io::Result<()> {
    for value in row {
        match value {
            None => w.write_all(&[0xfb])?,
            Some(s) => {
                w.write_lenenc_str(s.as_bytes())?;
            }
        }
    }
    w.end_packet().await
}

/// Binary-protocol row encoding (prepared-statement result sets). Not
/// reached by the current command set (no `COM_STMT_EXECUTE` support), kept
/// as an alternate row-encoding mode alongside [`write_text_row`] so a
/// future prepared-statement path has a conforming writer to call into.
pub async fn write_binary_row<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    columns: &[Column],
    row: &[Option<String>],
) -> io::Result<()> {
    w.write_all(&[0x00])?;

    let bitmap_len = (columns.len() + 9 + 7) / 8;
    let mut bitmap = vec![0u8; bitmap_len];
    for (i, value) in row.iter().enumerate() {
        if value.is_none() {
            let bit = i + 2;
            bitmap[bit / 8] |= 1 << (bit % 8);
        }
    }
    w.write_all(&bitmap)?;

    for (column, value) in columns.iter().zip(row) {
        if let Some(text) = value {
            write_binary_value(w, column.column_type, text)?;
        }
    }
    w.end_packet().await
}

fn write_binary_value<W: Write>(
    w: &mut W,
    column_type: mysql_common::constants::ColumnType,
    text: &str,
) -> io::Result<()> {
    use mysql_common::constants::ColumnType::*;
    match column_type {
        MYSQL_TYPE_LONGLONG => {
            w.write_u64::<LittleEndian>(text.parse().unwrap_or(0))?;
        }
        MYSQL_TYPE_LONG | MYSQL_TYPE_INT24 => {
            w.write_u32::<LittleEndian>(text.parse().unwrap_or(0))?;
        }
        MYSQL_TYPE_SHORT | MYSQL_TYPE_YEAR => {
            w.write_u16::<LittleEndian>(text.parse().unwrap_or(0))?;
        }
        MYSQL_TYPE_TINY => {
            w.write_u8(text.parse().unwrap_or(0))?;
        }
        MYSQL_TYPE_DOUBLE => {
            w.write_f64::<LittleEndian>(text.parse().unwrap_or(0.0))?;
        }
        MYSQL_TYPE_FLOAT => {
            w.write_f32::<LittleEndian>(text.parse().unwrap_or(0.0))?;
        }
        MYSQL_TYPE_DATE | MYSQL_TYPE_DATETIME | MYSQL_TYPE_TIMESTAMP => {
            write_binary_datetime(w, text)?;
        }
        MYSQL_TYPE_TIME => {
            write_binary_time(w, text)?;
        }
        _ => {
            w.write_lenenc_str(text.as_bytes())?;
        }
    }
    Ok(())
}

/// Parses `YYYY-MM-DD[ HH:MM:SS[.ffffff]]` into the fixed `0x0B`-length
/// binary-protocol datetime encoding. Unparsable input is written as the
/// zero date rather than failing the whole row.
fn write_binary_datetime<W: Write>(w: &mut W, text: &str) -> io::Result<()> {
    let mut date_parts = [0u16, 0, 0];
    let mut time_parts = [0u8, 0, 0];
    let mut micros = 0u32;

    let mut halves = text.splitn(2, ' ');
    if let Some(date) = halves.next() {
        let mut it = date.split('-');
        date_parts[0] = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        date_parts[1] = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        date_parts[2] = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    }
    if let Some(time) = halves.next() {
        let mut secs_and_frac = time.splitn(2, '.');
        if let Some(hms) = secs_and_frac.next() {
            let mut it = hms.split(':');
            time_parts[0] = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            time_parts[1] = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            time_parts[2] = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        }
        if let Some(frac) = secs_and_frac.next() {
            micros = format!("{frac:0<6}")
                .get(..6)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
        }
    }

    w.write_u8(0x0b)?;
    w.write_u16::<LittleEndian>(date_parts[0])?;
    w.write_u8(date_parts[1] as u8)?;
    w.write_u8(date_parts[2] as u8)?;
    w.write_u8(time_parts[0])?;
    w.write_u8(time_parts[1])?;
    w.write_u8(time_parts[2])?;
    w.write_u32::<LittleEndian>(micros)
}

/// Parses `[-]DDD HH:MM:SS[.ffffff]` into the fixed `0x0C`-length
/// binary-protocol time encoding.
fn write_binary_time<W: Write>(w: &mut W, text: &str) -> io::Result<()> {
    let (is_negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let mut days = 0u32;
    let mut hms_part = text;
    if let Some((d, rest)) = text.split_once(' ') {
        days = d.parse().unwrap_or(0);
        hms_part = rest;
    }

    let mut secs_and_frac = hms_part.splitn(2, '.');
    let mut hours = 0u8;
    let mut minutes = 0u8;
    let mut seconds = 0u8;
    if let Some(hms) = secs_and_frac.next() {
        let mut it = hms.split(':');
        hours = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        minutes = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        seconds = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    }
    let micros: u32 = secs_and_frac
        .next()
        .and_then(|frac| format!("{frac:0<6}").get(..6).and_then(|s| s.parse().ok()))
        .unwrap_or(0);

    w.write_u8(0x0c)?;
    w.write_u8(is_negative as u8)?;
    w.write_u32::<LittleEndian>(days)?;
    w.write_u8(hours)?;
    w.write_u8(minutes)?;
    w.write_u8(seconds)?;
    w.write_u32::<LittleEndian>(micros)
}

pub async fn write_initial_handshake<W: AsyncWrite + Unpin>(
    writer: &mut PacketWriter<W>,
    scramble: [u8; 20],
) -> io::Result<()> {
    writer.write_all(&[10])?; // protocol version 10
    writer.write_all(SERVER_VERSION)?;
    writer.write_all(&[0x00])?;
    writer.write_u32::<LittleEndian>(CONNECTION_ID)?;

    let server_capabilities = default_capabilities();
    let server_capabilities_bytes = server_capabilities.bits().to_le_bytes();

    writer.write_all(&scramble[0..AUTH_PLUGIN_DATA_PART_1_LENGTH])?;
    writer.write_all(&[0x00])?;

    writer.write_all(&server_capabilities_bytes[..2])?;
    writer.write_all(&[DEFAULT_COLLATION_ID as u8])?;
    writer.write_all(&StatusFlags::SERVER_STATUS_AUTOCOMMIT.bits().to_le_bytes())?;
    writer.write_all(&server_capabilities_bytes[2..4])?;

    // auth-plugin-data-length: this proxy never advertises CLIENT_PLUGIN_AUTH.
    writer.write_all(&[0x00])?;
    writer.write_all(&[0x00; 10][..])?; // reserved

    writer.write_all(&scramble[AUTH_PLUGIN_DATA_PART_1_LENGTH..])?;
    writer.write_all(&[0x00])?;
    let _ = AuthNativePassword; // plugin name is withheld: CLIENT_PLUGIN_AUTH is never advertised.

    writer.end_packet().await?;
    writer.flush_all().await
}

/// Writes a `COM_*` request whose payload is already framed (query text,
/// schema name, or a `table\0wildcard` field-list selector).
pub async fn write_command_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    code: crate::protocol::mysql::constants::CommandCode,
    data: &[u8],
) -> io::Result<()> {
    w.write_u8(code as u8)?;
    w.write_all(data)?;
    w.end_packet().await
}

pub async fn write_query_request<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    data: &[u8],
) -> io::Result<()> {
    use crate::protocol::mysql::constants::CommandCode;
    write_command_packet(w, CommandCode::ComQuery, data).await
}

/// Writes a `HandshakeResponse41`, the inverse of
/// [`crate::protocol::mysql::basic::client_handshake_response`]'s 4.1 branch.
/// Used by the upstream adapter to authenticate against a real MySQL server,
/// either with the proxy's own configured upstream credentials or, in
/// forward-auth mode, with the client's auth bytes relayed verbatim.
pub async fn write_handshake_response_41<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    capabilities: CapabilityFlags,
    max_packet_len: u32,
    charset: u8,
    username: &[u8],
    auth_response: &[u8],
    database: Option<&[u8]>,
) -> io::Result<()> {
    w.write_u32::<LittleEndian>(capabilities.bits())?;
    w.write_u32::<LittleEndian>(max_packet_len)?;
    w.write_all(&[charset])?;
    w.write_all(&[0u8; 23])?;
    w.write_all(username)?;
    w.write_all(&[0x00])?;

    if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        w.write_u8(auth_response.len() as u8)?;
        w.write_all(auth_response)?;
    } else {
        w.write_all(auth_response)?;
        w.write_all(&[0x00])?;
    }

    if capabilities.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB) {
        if let Some(db) = database {
            w.write_all(db)?;
            w.write_all(&[0x00])?;
        }
    }

    w.end_packet().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysql_common::constants::ColumnType;

    #[tokio::test]
    async fn binary_row_encodes_null_bitmap_and_typed_values() {
        let columns = vec![
            Column::new("id", ColumnType::MYSQL_TYPE_LONG),
            Column::new("name", ColumnType::MYSQL_TYPE_VAR_STRING),
            Column::new("score", ColumnType::MYSQL_TYPE_DOUBLE),
        ];
        let row = vec![Some("7".to_string()), None, Some("1.5".to_string())];

        let (end_a, end_b) = tokio::io::duplex(4096);
        let (_a_read, a_write) = tokio::io::split(end_a);
        let (mut b_read, _b_write) = tokio::io::split(end_b);

        let mut w = PacketWriter::new(a_write);
        write_binary_row(&mut w, &columns, &row).await.unwrap();
        w.flush_all().await.unwrap();

        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; 64];
        let n = b_read.read(&mut buf).await.unwrap();
        let buf = &buf[..n];

        // header(4) + 0x00 + bitmap(ceil((3+9)/8)=2) + id(u32) + score(f64)
        assert_eq!(buf[4], 0x00);
        let bitmap = buf[5];
        // column 1 (name) is NULL -> bit (1+2)=3 set.
        assert_eq!(bitmap & 0b0000_1000, 0b0000_1000);
        assert_eq!(bitmap & 0b0000_0100, 0); // id not null
        let id_bytes = &buf[7..11];
        assert_eq!(u32::from_le_bytes(id_bytes.try_into().unwrap()), 7);
        let score_bytes = &buf[11..19];
        assert_eq!(f64::from_le_bytes(score_bytes.try_into().unwrap()), 1.5);
    }

    #[tokio::test]
    async fn binary_datetime_round_trips_fractional_seconds() {
        let mut buf = Vec::new();
        write_binary_datetime(&mut buf, "2024-03-05 09:08:07.125").unwrap();
        assert_eq!(buf[0], 0x0b);
        assert_eq!(u16::from_le_bytes([buf[1], buf[2]]), 2024);
        assert_eq!(buf[3], 3); // month
        assert_eq!(buf[4], 5); // day
        assert_eq!(buf[5], 9); // hour
        assert_eq!(buf[6], 8); // minute
        assert_eq!(buf[7], 7); // second
        let micros = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        assert_eq!(micros, 125_000);
    }

    #[test]
    fn binary_time_handles_negative_durations() {
        let mut buf = Vec::new();
        write_binary_time(&mut buf, "-2 03:04:05").unwrap();
        assert_eq!(buf[0], 0x0c);
        assert_eq!(buf[1], 1); // is_negative
        assert_eq!(u32::from_le_bytes(buf[2..6].try_into().unwrap()), 2);
        assert_eq!(buf[6], 3);
        assert_eq!(buf[7], 4);
        assert_eq!(buf[8], 5);
    }
}
