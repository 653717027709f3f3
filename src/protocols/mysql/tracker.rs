use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, BufReader};
use uuid::Uuid;

use super::framing::FrameReader;
use super::packets::{
    decode_command, decode_response, ClientHandshake, MysqlRequest, MysqlResponse,
    ServerHandshake,
};
use crate::error_handling::types::{DecodeError, TrackerError};
use crate::output::types::{Emission, OutputSink};
use crate::tracker::protocol_tracker::{
    ConnectionTracker, FlowStream, MessageDecoder, ProtocolTracker,
};
use crate::tracker::types::{ConnectionIdentity, Direction};

/// Connection-phase progress of one direction.
///
/// The first packet of a direction is always treated as its handshake and the
/// phase leaves `NotStarted` before that packet is parsed, whether or not the
/// parse succeeds. The stream cannot be rewound, so a failed handshake is never
/// retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    NotStarted,
    HandshakeConsumed,
    SteadyState,
}

/// How the next packet of a direction must be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketRole {
    Handshake,
    Command,
}

impl HandshakePhase {
    /// Role of the next packet together with the phase committed once it is read.
    pub fn advance(self) -> (PacketRole, HandshakePhase) {
        match self {
            HandshakePhase::NotStarted => (PacketRole::Handshake, HandshakePhase::HandshakeConsumed),
            HandshakePhase::HandshakeConsumed | HandshakePhase::SteadyState => {
                (PacketRole::Command, HandshakePhase::SteadyState)
            }
        }
    }
}

#[derive(Debug)]
struct MysqlSession {
    request_phase: HandshakePhase,
    response_phase: HandshakePhase,
    server: Option<ServerHandshake>,
    client: Option<ClientHandshake>,
    last_command: Option<&'static str>,
    queries: u64,
}

/// MySQL state of one tracked connection.
///
/// Both direction tasks reach this state, so it sits behind a mutex.
pub struct MysqlConnection {
    session_id: Uuid,
    identity: ConnectionIdentity,
    sink: Arc<dyn OutputSink>,
    state: Mutex<MysqlSession>,
}

impl MysqlConnection {
    fn new(identity: ConnectionIdentity, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            identity,
            sink,
            state: Mutex::new(MysqlSession {
                request_phase: HandshakePhase::NotStarted,
                response_phase: HandshakePhase::NotStarted,
                server: None,
                client: None,
                last_command: None,
                queries: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MysqlSession> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    /// Commits the phase transition for the next packet of `direction`.
    pub fn enter_packet(&self, direction: Direction) -> PacketRole {
        let mut state = self.state();
        let phase = match direction {
            Direction::Request => &mut state.request_phase,
            Direction::Response => &mut state.response_phase,
        };
        let (role, next) = phase.advance();
        *phase = next;
        role
    }

    pub fn phase(&self, direction: Direction) -> HandshakePhase {
        let state = self.state();
        match direction {
            Direction::Request => state.request_phase,
            Direction::Response => state.response_phase,
        }
    }

    pub fn server_handshake(&self) -> Option<ServerHandshake> {
        self.state().server.clone()
    }

    pub fn client_handshake(&self) -> Option<ClientHandshake> {
        self.state().client.clone()
    }

    pub fn query_count(&self) -> u64 {
        self.state().queries
    }
}

impl ConnectionTracker for MysqlConnection {
    type Request = MysqlRequest;
    type Response = MysqlResponse;

    fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn on_request(&self, request: MysqlRequest) -> Result<(), TrackerError> {
        match request {
            MysqlRequest::ClientHandshake(hs) => {
                info!(
                    "[{}] client user = {} database = {}",
                    self.session_id,
                    hs.user,
                    hs.database.as_deref().unwrap_or("-")
                );
                self.state().client = Some(hs);
            }
            MysqlRequest::Query(sql) => {
                {
                    let mut state = self.state();
                    state.last_command = Some("COM_QUERY");
                    state.queries += 1;
                }
                self.sink.emit(Emission::Query {
                    session: self.session_id,
                    connection: self.identity.clone(),
                    sql,
                    captured_at: Utc::now(),
                });
            }
            MysqlRequest::Unhandled { code, name } => {
                debug!("[{}] {} (0x{:02x}) not decoded", self.session_id, name, code);
                self.state().last_command = Some(name);
            }
        }
        Ok(())
    }

    fn on_response(&self, response: MysqlResponse) -> Result<(), TrackerError> {
        match response {
            MysqlResponse::ServerHandshake(hs) => {
                match serde_json::to_string(&hs) {
                    Ok(js) => info!("[{}] server = {}", self.session_id, js),
                    Err(_) => info!("[{}] server = {:?}", self.session_id, hs),
                }
                self.state().server = Some(hs);
            }
            other => {
                let command = self.state().last_command.take();
                debug!(
                    "[{}] {} -> {:?}",
                    self.session_id,
                    command.unwrap_or("(no command)"),
                    other
                );
            }
        }
        Ok(())
    }

    fn on_error(&self, err: DecodeError) {
        warn!("[{}] {}", self.session_id, err);
    }
}

/// Re-arms the packet cursor after a decode attempt.
///
/// When the stream itself failed there is nothing left to skip; otherwise the
/// unread rest of the packet is discarded so the next decode starts on a
/// header.
async fn settle<R, T>(
    packet: &mut FrameReader<R>,
    result: Result<T, DecodeError>,
) -> Result<T, DecodeError>
where
    R: AsyncRead + Unpin,
{
    match result {
        Err(e @ (DecodeError::Eof | DecodeError::Truncated | DecodeError::Io(_))) => {
            packet.reset();
            Err(e)
        }
        other => {
            packet.finish().await?;
            other
        }
    }
}

pub struct MysqlRequestDecoder {
    packet: FrameReader<BufReader<FlowStream>>,
    conn: Arc<MysqlConnection>,
}

impl MessageDecoder for MysqlRequestDecoder {
    type Message = MysqlRequest;

    async fn decode(&mut self) -> Result<MysqlRequest, DecodeError> {
        let result = match self.conn.enter_packet(Direction::Request) {
            PacketRole::Handshake => ClientHandshake::parse(&mut self.packet)
                .await
                .map(MysqlRequest::ClientHandshake),
            PacketRole::Command => decode_command(&mut self.packet).await,
        };
        settle(&mut self.packet, result).await
    }
}

pub struct MysqlResponseDecoder {
    packet: FrameReader<BufReader<FlowStream>>,
    conn: Arc<MysqlConnection>,
}

impl MessageDecoder for MysqlResponseDecoder {
    type Message = MysqlResponse;

    async fn decode(&mut self) -> Result<MysqlResponse, DecodeError> {
        let result = match self.conn.enter_packet(Direction::Response) {
            PacketRole::Handshake => ServerHandshake::parse(&mut self.packet)
                .await
                .map(MysqlResponse::ServerHandshake),
            PacketRole::Command => decode_response(&mut self.packet).await,
        };
        settle(&mut self.packet, result).await
    }
}

/// MySQL protocol tracker. Clients must connect with `--ssl-mode=DISABLED`.
pub struct MysqlTracker {
    sink: Arc<dyn OutputSink>,
}

impl MysqlTracker {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self { sink }
    }
}

impl ProtocolTracker for MysqlTracker {
    type Connection = MysqlConnection;
    type RequestDecoder = MysqlRequestDecoder;
    type ResponseDecoder = MysqlResponseDecoder;

    fn protocol(&self) -> &'static str {
        "mysql"
    }

    fn new_connection(&self, identity: &ConnectionIdentity) -> MysqlConnection {
        let conn = MysqlConnection::new(identity.clone(), Arc::clone(&self.sink));
        info!("[{}] new mysql connection {}", conn.session_id, identity);
        conn
    }

    fn request_decoder(&self, stream: FlowStream, conn: Arc<MysqlConnection>) -> MysqlRequestDecoder {
        MysqlRequestDecoder {
            packet: FrameReader::new(BufReader::new(stream)),
            conn,
        }
    }

    fn response_decoder(
        &self,
        stream: FlowStream,
        conn: Arc<MysqlConnection>,
    ) -> MysqlResponseDecoder {
        MysqlResponseDecoder {
            packet: FrameReader::new(BufReader::new(stream)),
            conn,
        }
    }

    fn on_close(&self, conn: &MysqlConnection) {
        let state = conn.state();
        info!(
            "[{}] mysql connection {} closed: server={} user={} queries={}",
            conn.session_id,
            conn.identity,
            state
                .server
                .as_ref()
                .map(|s| s.server_version.as_str())
                .unwrap_or("-"),
            state.client.as_ref().map(|c| c.user.as_str()).unwrap_or("-"),
            state.queries
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::mysql::packets::{CLIENT_PROTOCOL_41, CLIENT_SECURE_CONNECTION, COM_QUERY};
    use crate::protocols::mysql::test_support::*;
    use crate::tracker::types::FlowTuple;

    fn setup() -> (MysqlTracker, Arc<MysqlConnection>, Arc<Mutex<Vec<Emission>>>) {
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let sink_store = Arc::clone(&emitted);
        let sink: Arc<dyn OutputSink> =
            Arc::new(move |e: Emission| sink_store.lock().unwrap().push(e));
        let tracker = MysqlTracker::new(sink);
        let flow = FlowTuple::new(
            "10.0.0.5:53000".parse().unwrap(),
            "10.0.0.1:3306".parse().unwrap(),
        );
        let (identity, _) = ConnectionIdentity::resolve(&flow);
        let conn = Arc::new(tracker.new_connection(&identity));
        (tracker, conn, emitted)
    }

    fn stream(bytes: Vec<u8>) -> FlowStream {
        Box::new(std::io::Cursor::new(bytes))
    }

    #[test]
    fn phase_advances_once_and_unconditionally() {
        let (role, phase) = HandshakePhase::NotStarted.advance();
        assert_eq!(role, PacketRole::Handshake);
        assert_eq!(phase, HandshakePhase::HandshakeConsumed);

        let (role, phase) = phase.advance();
        assert_eq!(role, PacketRole::Command);
        assert_eq!(phase, HandshakePhase::SteadyState);

        assert_eq!(phase.advance(), (PacketRole::Command, HandshakePhase::SteadyState));
    }

    #[tokio::test]
    async fn failed_client_handshake_still_reaches_steady_state() {
        let (tracker, conn, emitted) = setup();

        let mut wire = frame(1, &client_handshake_payload(CLIENT_SECURE_CONNECTION, "old", None));
        wire.extend_from_slice(&frame(0, &command_payload(COM_QUERY, b"SELECT 2")));
        let mut decoder = tracker.request_decoder(stream(wire), Arc::clone(&conn));

        let first = decoder.decode().await;
        assert!(matches!(first, Err(DecodeError::UnsupportedClientProtocol)));
        assert_eq!(conn.phase(Direction::Request), HandshakePhase::HandshakeConsumed);

        let second = decoder.decode().await.unwrap();
        assert_eq!(second, MysqlRequest::Query("SELECT 2".to_string()));
        assert_eq!(conn.phase(Direction::Request), HandshakePhase::SteadyState);

        conn.on_request(second).unwrap();
        assert_eq!(emitted.lock().unwrap().len(), 1);
        assert!(decoder.decode().await.unwrap_err().is_eof());
    }

    #[tokio::test]
    async fn directions_advance_independently() {
        let (tracker, conn, _) = setup();

        let wire = frame(0, &server_handshake_payload("5.7.44", 0x0000_f7ff, 0x0002));
        let mut responses = tracker.response_decoder(stream(wire), Arc::clone(&conn));

        match responses.decode().await.unwrap() {
            MysqlResponse::ServerHandshake(hs) => conn.on_response(MysqlResponse::ServerHandshake(hs)).unwrap(),
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(conn.phase(Direction::Response), HandshakePhase::HandshakeConsumed);
        assert_eq!(conn.phase(Direction::Request), HandshakePhase::NotStarted);
        assert_eq!(
            conn.server_handshake().map(|s| s.server_version),
            Some("5.7.44".to_string())
        );
    }

    #[tokio::test]
    async fn query_emits_sql_to_sink() {
        let (tracker, conn, emitted) = setup();

        let mut wire = frame(1, &client_handshake_payload(
            CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION,
            "root",
            Some("shop"),
        ));
        wire.extend_from_slice(&frame(0, &command_payload(0x0e, b"")));
        wire.extend_from_slice(&frame(0, &command_payload(COM_QUERY, b"SELECT 1")));
        let mut decoder = tracker.request_decoder(stream(wire), Arc::clone(&conn));

        for _ in 0..3 {
            let msg = decoder.decode().await.unwrap();
            conn.on_request(msg).unwrap();
        }

        assert_eq!(conn.client_handshake().map(|c| c.user), Some("root".to_string()));
        assert_eq!(conn.query_count(), 1);
        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        match &emitted[0] {
            Emission::Query { sql, session, .. } => {
                assert_eq!(sql, "SELECT 1");
                assert_eq!(*session, conn.session_id());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_command_does_not_desync_the_stream() {
        let (tracker, conn, _) = setup();
        conn.enter_packet(Direction::Request);

        let mut wire = frame(0, b"");
        wire.extend_from_slice(&frame(0, &command_payload(COM_QUERY, b"SELECT 3")));
        let mut decoder = tracker.request_decoder(stream(wire), Arc::clone(&conn));

        assert!(matches!(decoder.decode().await, Err(DecodeError::Malformed(_))));
        assert_eq!(
            decoder.decode().await.unwrap(),
            MysqlRequest::Query("SELECT 3".to_string())
        );
    }
}
