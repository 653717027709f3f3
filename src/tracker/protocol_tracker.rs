//! Protocol-agnostic capability traits implemented by every decoder.
//!
//! A [`ProtocolTracker`] is registered once per listening port. It builds one
//! [`ConnectionTracker`] per tracked connection and hands out a
//! [`MessageDecoder`] for each direction of it. The session manager drives
//! each decoder in its own task and feeds the decoded messages to the
//! connection tracker.
//!
//! Guarantees given to implementors:
//! - calls for one direction (`decode`, then `on_request` / `on_response` /
//!   `on_error`) are strictly sequential;
//! - the two directions of a connection run concurrently with no relative
//!   ordering, so a connection tracker must synchronize any state both
//!   directions touch (all its methods take `&self`);
//! - `on_close` runs exactly once per connection, when the first of its two
//!   directions reaches end-of-stream.

use std::future::Future;
use std::sync::Arc;

use tokio::io::AsyncRead;
use uuid::Uuid;

use super::types::ConnectionIdentity;
use crate::error_handling::types::{DecodeError, TrackerError};

/// One direction's reassembled, in-order byte stream.
pub type FlowStream = Box<dyn AsyncRead + Send + Unpin>;

/// Produces logical messages from one direction of a connection.
pub trait MessageDecoder: Send + 'static {
    type Message: Send + 'static;

    /// Waits until one complete message has been read.
    ///
    /// Returns [`DecodeError::Eof`] once the stream is exhausted at a message
    /// boundary; every other error leaves the decoder usable for the next
    /// message.
    fn decode(&mut self) -> impl Future<Output = Result<Self::Message, DecodeError>> + Send;
}

/// Per-connection protocol state, shared by the connection's two direction tasks.
pub trait ConnectionTracker: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    /// Identifier used to correlate log lines and emissions of this connection.
    fn session_id(&self) -> Uuid;

    fn on_request(&self, request: Self::Request) -> Result<(), TrackerError>;

    fn on_response(&self, response: Self::Response) -> Result<(), TrackerError>;

    /// A message on either direction failed to decode. Never fatal to the connection.
    fn on_error(&self, err: DecodeError);
}

/// Per-port protocol singleton: decoder factory and connection constructor.
pub trait ProtocolTracker: Send + Sync + 'static {
    type Connection: ConnectionTracker;
    type RequestDecoder: MessageDecoder<
        Message = <Self::Connection as ConnectionTracker>::Request,
    >;
    type ResponseDecoder: MessageDecoder<
        Message = <Self::Connection as ConnectionTracker>::Response,
    >;

    /// Protocol identifier as written in configuration files.
    fn protocol(&self) -> &'static str;

    fn new_connection(&self, identity: &ConnectionIdentity) -> Self::Connection;

    fn request_decoder(&self, stream: FlowStream, conn: Arc<Self::Connection>)
        -> Self::RequestDecoder;

    fn response_decoder(
        &self,
        stream: FlowStream,
        conn: Arc<Self::Connection>,
    ) -> Self::ResponseDecoder;

    fn on_close(&self, conn: &Self::Connection);
}
