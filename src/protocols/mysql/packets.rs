//! MySQL connection-phase and command-phase packet layouts.

use serde::Serialize;
use tokio::io::AsyncRead;

use super::framing::FrameReader;
use crate::error_handling::types::DecodeError;

pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
pub const CLIENT_SSL: u32 = 0x0000_0800;
pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;

pub const COM_QUERY: u8 = 0x03;

const OK_HEADER: u8 = 0x00;
const EOF_HEADER: u8 = 0xfe;
const ERR_HEADER: u8 = 0xff;

/// Initial handshake (protocol v10) sent by the server.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake_v10.html>
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub status_flags: u16,
    pub capability_flags: u32,
}

impl ServerHandshake {
    /// Parses the fixed head of the packet; trailing auth data is left unread.
    pub async fn parse<R: AsyncRead + Unpin>(
        packet: &mut FrameReader<R>,
    ) -> Result<Self, DecodeError> {
        let protocol_version = packet.read_u8().await?;
        let server_version = packet.read_nul_str().await?;

        // connection id, auth-plugin-data-part-1, filler
        packet.skip(13).await?;

        let caps_low = packet.read_u16_le().await?;
        packet.skip(1).await?; // charset
        let status_flags = packet.read_u16_le().await?;
        let caps_high = packet.read_u16_le().await?;

        Ok(Self {
            protocol_version,
            server_version,
            status_flags,
            capability_flags: (caps_high as u32) << 16 | caps_low as u32,
        })
    }
}

/// Handshake response sent by a protocol 4.1 client.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake_response.html>
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientHandshake {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub user: String,
    pub database: Option<String>,
}

impl ClientHandshake {
    pub async fn parse<R: AsyncRead + Unpin>(
        packet: &mut FrameReader<R>,
    ) -> Result<Self, DecodeError> {
        let capability_flags = packet.read_u32_le().await?;
        if capability_flags & CLIENT_PROTOCOL_41 == 0 {
            return Err(DecodeError::UnsupportedClientProtocol);
        }

        let max_packet_size = packet.read_u32_le().await?;

        // charset + 23 filler bytes
        packet.skip(24).await?;

        // An SSLRequest stops here and the rest of the session is encrypted.
        if capability_flags & CLIENT_SSL != 0 && packet.at_packet_end() {
            return Err(DecodeError::TlsRequested);
        }

        let user = packet.read_nul_str().await?;
        let database = Self::read_database(packet, capability_flags).await?;

        Ok(Self {
            capability_flags,
            max_packet_size,
            user,
            database,
        })
    }

    async fn read_database<R: AsyncRead + Unpin>(
        packet: &mut FrameReader<R>,
        capability_flags: u32,
    ) -> Result<Option<String>, DecodeError> {
        if packet.at_packet_end() {
            return Ok(None);
        }

        if capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            let len = read_lenenc_int(packet).await?;
            packet.skip(len as usize).await?;
        } else if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let len = packet.read_u8().await?;
            packet.skip(len as usize).await?;
        } else {
            packet.read_nul_str().await?;
        }

        if capability_flags & CLIENT_CONNECT_WITH_DB == 0 || packet.at_packet_end() {
            return Ok(None);
        }
        Ok(Some(packet.read_nul_str().await?))
    }
}

/// Length-encoded integer.
pub async fn read_lenenc_int<R: AsyncRead + Unpin>(
    packet: &mut FrameReader<R>,
) -> Result<u64, DecodeError> {
    let first = packet.read_u8().await?;
    let width = match first {
        0x00..=0xfa => return Ok(first as u64),
        0xfc => 2,
        0xfd => 3,
        0xfe => 8,
        _ => {
            return Err(DecodeError::Malformed(format!(
                "invalid length-encoded integer prefix 0x{:02x}",
                first
            )))
        }
    };
    let mut buf = [0u8; 8];
    packet.read_exact(&mut buf[..width]).await?;
    Ok(u64::from_le_bytes(buf))
}

/// Name of a command-phase command byte.
pub fn command_name(code: u8) -> &'static str {
    match code {
        0x00 => "COM_SLEEP",
        0x01 => "COM_QUIT",
        0x02 => "COM_INIT_DB",
        0x03 => "COM_QUERY",
        0x04 => "COM_FIELD_LIST",
        0x05 => "COM_CREATE_DB",
        0x06 => "COM_DROP_DB",
        0x07 => "COM_REFRESH",
        0x08 => "COM_SHUTDOWN",
        0x09 => "COM_STATISTICS",
        0x0a => "COM_PROCESS_INFO",
        0x0c => "COM_PROCESS_KILL",
        0x0d => "COM_DEBUG",
        0x0e => "COM_PING",
        0x11 => "COM_CHANGE_USER",
        0x16 => "COM_STMT_PREPARE",
        0x17 => "COM_STMT_EXECUTE",
        0x18 => "COM_STMT_SEND_LONG_DATA",
        0x19 => "COM_STMT_CLOSE",
        0x1a => "COM_STMT_RESET",
        0x1b => "COM_SET_OPTION",
        0x1c => "COM_STMT_FETCH",
        0x1f => "COM_RESET_CONNECTION",
        _ => "COM_UNKNOWN",
    }
}

/// Decoded client-to-server packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MysqlRequest {
    ClientHandshake(ClientHandshake),
    Query(String),
    /// A command whose payload is not decoded.
    Unhandled { code: u8, name: &'static str },
}

/// Decoded server-to-client packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MysqlResponse {
    ServerHandshake(ServerHandshake),
    Ok,
    Err,
    Eof,
    /// Any other packet, tagged with its first byte.
    Data(u8),
}

/// Reads the command byte of a request packet; only COM_QUERY is decoded further.
pub async fn decode_command<R: AsyncRead + Unpin>(
    packet: &mut FrameReader<R>,
) -> Result<MysqlRequest, DecodeError> {
    let code = packet.read_u8().await?;
    if code == COM_QUERY {
        let sql = packet.read_to_end().await?;
        return Ok(MysqlRequest::Query(String::from_utf8_lossy(&sql).into_owned()));
    }
    Ok(MysqlRequest::Unhandled {
        code,
        name: command_name(code),
    })
}

/// Classifies a response packet by its first byte.
pub async fn decode_response<R: AsyncRead + Unpin>(
    packet: &mut FrameReader<R>,
) -> Result<MysqlResponse, DecodeError> {
    Ok(match packet.read_u8().await? {
        OK_HEADER => MysqlResponse::Ok,
        ERR_HEADER => MysqlResponse::Err,
        EOF_HEADER => MysqlResponse::Eof,
        other => MysqlResponse::Data(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::mysql::test_support::*;

    const CAPS_41: u32 = CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION;

    #[tokio::test]
    async fn parses_server_handshake_fields() {
        let wire = frame(0, &server_handshake_payload("8.0.30", 0xc7ff_f7ff, 0x0002));
        let mut packet = FrameReader::new(wire.as_slice());

        let hs = ServerHandshake::parse(&mut packet).await.unwrap();
        assert_eq!(hs.protocol_version, 10);
        assert_eq!(hs.server_version, "8.0.30");
        assert_eq!(hs.capability_flags, 0xc7ff_f7ff);
        assert_eq!(hs.status_flags, 0x0002);
    }

    #[tokio::test]
    async fn server_handshake_ignores_trailing_auth_data() {
        let mut payload = server_handshake_payload("8.0.30", 0x0000_a20d, 0x0200);
        payload.extend_from_slice(&[0x99u8; 300]);
        let wire = frame(0, &payload);
        let mut packet = FrameReader::new(wire.as_slice());

        let hs = ServerHandshake::parse(&mut packet).await.unwrap();
        assert_eq!(hs.server_version, "8.0.30");
        assert_eq!(hs.capability_flags, 0x0000_a20d);
        assert_eq!(hs.status_flags, 0x0200);
        assert!(packet.finish().await.unwrap() > 300);
    }

    #[tokio::test]
    async fn parses_client_handshake_with_database() {
        let wire = frame(1, &client_handshake_payload(CAPS_41, "root", Some("shop")));
        let mut packet = FrameReader::new(wire.as_slice());

        let hs = ClientHandshake::parse(&mut packet).await.unwrap();
        assert_eq!(hs.user, "root");
        assert_eq!(hs.max_packet_size, 16_777_216);
        assert_eq!(hs.database.as_deref(), Some("shop"));
        assert_ne!(hs.capability_flags & CLIENT_CONNECT_WITH_DB, 0);
    }

    #[tokio::test]
    async fn client_handshake_without_database() {
        let wire = frame(1, &client_handshake_payload(CLIENT_PROTOCOL_41, "app", None));
        let mut packet = FrameReader::new(wire.as_slice());

        let hs = ClientHandshake::parse(&mut packet).await.unwrap();
        assert_eq!(hs.user, "app");
        assert_eq!(hs.database, None);
    }

    #[tokio::test]
    async fn client_handshake_requires_protocol_41() {
        let wire = frame(1, &client_handshake_payload(CLIENT_SECURE_CONNECTION, "old", None));
        let mut packet = FrameReader::new(wire.as_slice());

        assert!(matches!(
            ClientHandshake::parse(&mut packet).await,
            Err(DecodeError::UnsupportedClientProtocol)
        ));
    }

    #[tokio::test]
    async fn ssl_request_is_reported() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(CLIENT_PROTOCOL_41 | CLIENT_SSL).to_le_bytes());
        payload.extend_from_slice(&16_777_216u32.to_le_bytes());
        payload.extend_from_slice(&[0u8; 24]);
        let wire = frame(1, &payload);
        let mut packet = FrameReader::new(wire.as_slice());

        assert!(matches!(
            ClientHandshake::parse(&mut packet).await,
            Err(DecodeError::TlsRequested)
        ));
    }

    #[tokio::test]
    async fn lenenc_integers() {
        let wire = frame(0, &[0xfa, 0xfc, 0x34, 0x12, 0xfd, 0x01, 0x00, 0x01]);
        let mut packet = FrameReader::new(wire.as_slice());
        assert_eq!(read_lenenc_int(&mut packet).await.unwrap(), 0xfa);
        assert_eq!(read_lenenc_int(&mut packet).await.unwrap(), 0x1234);
        assert_eq!(read_lenenc_int(&mut packet).await.unwrap(), 0x01_0001);
    }

    #[tokio::test]
    async fn query_command_keeps_sql_verbatim() {
        let wire = frame(0, &command_payload(COM_QUERY, b"SELECT * FROM t WHERE a = 'x'"));
        let mut packet = FrameReader::new(wire.as_slice());
        assert_eq!(
            decode_command(&mut packet).await.unwrap(),
            MysqlRequest::Query("SELECT * FROM t WHERE a = 'x'".to_string())
        );
    }

    #[tokio::test]
    async fn other_commands_are_unhandled() {
        let wire = frame(0, &command_payload(0x16, b"SELECT ?"));
        let mut packet = FrameReader::new(wire.as_slice());
        assert_eq!(
            decode_command(&mut packet).await.unwrap(),
            MysqlRequest::Unhandled {
                code: 0x16,
                name: "COM_STMT_PREPARE"
            }
        );
        assert_eq!(packet.finish().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn responses_are_classified_by_first_byte() {
        let mut wire = frame(1, &[0x00, 0x00, 0x00, 0x02, 0x00]);
        wire.extend_from_slice(&frame(1, &[0xff, 0x48, 0x04]));
        wire.extend_from_slice(&frame(1, &[0x01]));
        let mut packet = FrameReader::new(wire.as_slice());

        assert_eq!(decode_response(&mut packet).await.unwrap(), MysqlResponse::Ok);
        packet.finish().await.unwrap();
        assert_eq!(decode_response(&mut packet).await.unwrap(), MysqlResponse::Err);
        packet.finish().await.unwrap();
        assert_eq!(
            decode_response(&mut packet).await.unwrap(),
            MysqlResponse::Data(0x01)
        );
    }
}
