use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::io::BufReader;
use tokio::sync::Notify;
use uuid::Uuid;

use super::messages::{
    read_body, read_request_head, read_response_head, BodyFraming, HttpRequest, HttpResponse,
};
use crate::configuration::types::RecordConfig;
use crate::error_handling::types::{DecodeError, TrackerError};
use crate::output::types::{Emission, OutputSink};
use crate::tracker::protocol_tracker::{
    ConnectionTracker, FlowStream, MessageDecoder, ProtocolTracker,
};
use crate::tracker::types::ConnectionIdentity;

/// Requests kept waiting for a response before the oldest is dropped.
const MAX_PENDING_REQUESTS: usize = 64;

/// Decides from a request whether its exchange is emitted.
pub type RecordPredicate = Arc<dyn Fn(&HttpRequest) -> bool + Send + Sync>;

/// Builds a predicate from configured method and path-prefix lists.
///
/// An empty list matches everything.
pub fn record_predicate(config: &RecordConfig) -> RecordPredicate {
    let methods: Vec<String> = config.methods.iter().map(|m| m.to_ascii_uppercase()).collect();
    let prefixes = config.path_prefixes.clone();
    Arc::new(move |req: &HttpRequest| {
        let method_ok = methods.is_empty() || methods.iter().any(|m| req.method.eq_ignore_ascii_case(m));
        let path_ok = prefixes.is_empty() || prefixes.iter().any(|p| req.path.starts_with(p.as_str()));
        method_ok && path_ok
    })
}

#[derive(Debug)]
struct PendingRequest {
    request: HttpRequest,
    recording: bool,
}

#[derive(Debug, Default)]
struct HttpSession {
    // requests handled but not yet answered, oldest first
    pending: VecDeque<PendingRequest>,
    // live request decoders on this connection
    request_sides: usize,
    exchanges: u64,
}

/// HTTP state of one tracked connection.
///
/// The response direction does not get ahead of the request direction: a
/// response is only handed out once the request it answers has been handled,
/// or once no request can arrive anymore.
pub struct HttpConnection {
    session_id: Uuid,
    identity: ConnectionIdentity,
    sink: Arc<dyn OutputSink>,
    record: RecordPredicate,
    state: Mutex<HttpSession>,
    request_ready: Notify,
}

impl HttpConnection {
    fn state(&self) -> MutexGuard<'_, HttpSession> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    /// Number of handled requests still waiting for their response.
    pub fn pending_requests(&self) -> usize {
        self.state().pending.len()
    }

    pub fn exchange_count(&self) -> u64 {
        self.state().exchanges
    }

    fn open_request_side(&self) {
        self.state().request_sides += 1;
    }

    fn close_request_side(&self) {
        {
            let mut state = self.state();
            state.request_sides = state.request_sides.saturating_sub(1);
        }
        self.request_ready.notify_one();
    }

    /// `Some(method)` of the request next in line, `Some(None)` when none can come.
    fn next_request_method(&self) -> Option<Option<String>> {
        let state = self.state();
        match state.pending.front() {
            Some(pending) => Some(Some(pending.request.method.clone())),
            None if state.request_sides == 0 => Some(None),
            None => None,
        }
    }

    /// Waits for the request the next response answers and returns its method.
    async fn wait_for_request(&self) -> Option<String> {
        loop {
            if let Some(method) = self.next_request_method() {
                return method;
            }
            self.request_ready.notified().await;
        }
    }
}

impl ConnectionTracker for HttpConnection {
    type Request = HttpRequest;
    type Response = HttpResponse;

    fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn on_request(&self, request: HttpRequest) -> Result<(), TrackerError> {
        let recording = (self.record)(&request);
        debug!(
            "[{}] {} {} recording={}",
            self.session_id, request.method, request.path, recording
        );
        {
            let mut state = self.state();
            state.pending.push_back(PendingRequest { request, recording });
            if state.pending.len() > MAX_PENDING_REQUESTS {
                if let Some(dropped) = state.pending.pop_front() {
                    warn!(
                        "[{}] no response seen for {} {}, dropped",
                        self.session_id, dropped.request.method, dropped.request.path
                    );
                }
            }
        }
        self.request_ready.notify_one();
        Ok(())
    }

    fn on_response(&self, response: HttpResponse) -> Result<(), TrackerError> {
        if response.is_informational() {
            debug!("[{}] interim {} ignored", self.session_id, response.status);
            return Ok(());
        }

        let pending = self
            .state()
            .pending
            .pop_front()
            .ok_or(TrackerError::MissingRequest)?;
        if !pending.recording {
            return Ok(());
        }

        self.state().exchanges += 1;
        self.sink.emit(Emission::Exchange {
            session: self.session_id,
            connection: self.identity.clone(),
            request: pending.request,
            response,
            captured_at: Utc::now(),
        });
        Ok(())
    }

    fn on_error(&self, err: DecodeError) {
        warn!("[{}] {}", self.session_id, err);
    }
}

pub struct HttpRequestDecoder {
    reader: BufReader<FlowStream>,
    conn: Arc<HttpConnection>,
    max_body_bytes: usize,
}

impl MessageDecoder for HttpRequestDecoder {
    type Message = HttpRequest;

    async fn decode(&mut self) -> Result<HttpRequest, DecodeError> {
        let mut req = read_request_head(&mut self.reader).await?;
        let framing = BodyFraming::for_request(&req)?;
        let (body, len) = read_body(&mut self.reader, framing, self.max_body_bytes).await?;
        req.body = body;
        req.body_len = len;
        Ok(req)
    }
}

impl Drop for HttpRequestDecoder {
    fn drop(&mut self) {
        self.conn.close_request_side();
    }
}

pub struct HttpResponseDecoder {
    reader: BufReader<FlowStream>,
    conn: Arc<HttpConnection>,
    max_body_bytes: usize,
}

impl MessageDecoder for HttpResponseDecoder {
    type Message = HttpResponse;

    async fn decode(&mut self) -> Result<HttpResponse, DecodeError> {
        let mut resp = read_response_head(&mut self.reader).await?;
        let method = self.conn.wait_for_request().await;
        let framing = BodyFraming::for_response(&resp, method.as_deref())?;
        let (body, len) = read_body(&mut self.reader, framing, self.max_body_bytes).await?;
        resp.body = body;
        resp.body_len = len;
        Ok(resp)
    }
}

/// HTTP/1.x tracker pairing each response with the oldest unanswered request.
pub struct HttpTracker {
    sink: Arc<dyn OutputSink>,
    record: RecordPredicate,
    max_body_bytes: usize,
}

impl HttpTracker {
    /// Records every exchange until [`HttpTracker::with_record_predicate`] narrows it.
    pub fn new(sink: Arc<dyn OutputSink>, max_body_bytes: usize) -> Self {
        Self {
            sink,
            record: Arc::new(|_: &HttpRequest| true),
            max_body_bytes,
        }
    }

    pub fn from_config(sink: Arc<dyn OutputSink>, config: &RecordConfig) -> Self {
        Self::new(sink, config.max_body_bytes).with_record_predicate(record_predicate(config))
    }

    pub fn with_record_predicate(mut self, record: RecordPredicate) -> Self {
        self.record = record;
        self
    }
}

impl ProtocolTracker for HttpTracker {
    type Connection = HttpConnection;
    type RequestDecoder = HttpRequestDecoder;
    type ResponseDecoder = HttpResponseDecoder;

    fn protocol(&self) -> &'static str {
        "http"
    }

    fn new_connection(&self, identity: &ConnectionIdentity) -> HttpConnection {
        let conn = HttpConnection {
            session_id: Uuid::new_v4(),
            identity: identity.clone(),
            sink: Arc::clone(&self.sink),
            record: Arc::clone(&self.record),
            state: Mutex::new(HttpSession::default()),
            request_ready: Notify::new(),
        };
        info!("[{}] new http connection {}", conn.session_id, identity);
        conn
    }

    fn request_decoder(&self, stream: FlowStream, conn: Arc<HttpConnection>) -> HttpRequestDecoder {
        conn.open_request_side();
        HttpRequestDecoder {
            reader: BufReader::new(stream),
            conn,
            max_body_bytes: self.max_body_bytes,
        }
    }

    fn response_decoder(
        &self,
        stream: FlowStream,
        conn: Arc<HttpConnection>,
    ) -> HttpResponseDecoder {
        HttpResponseDecoder {
            reader: BufReader::new(stream),
            conn,
            max_body_bytes: self.max_body_bytes,
        }
    }

    fn on_close(&self, conn: &HttpConnection) {
        info!(
            "[{}] http connection {} closed: exchanges={}",
            conn.session_id,
            conn.identity,
            conn.exchange_count()
        );
    }
}
