//! Generic protocol-tracking framework.
//!
//! Turns a pair of unidirectional byte streams into paired request/response
//! messages, independent of the wire protocol spoken on them.

/// Per-connection tracker registry scoped to one server port.
pub mod connection_pool;
/// Capability traits implemented by protocol decoders.
pub mod protocol_tracker;
/// Flow tuples, directions and canonical connection identity.
pub mod types;

pub use connection_pool::ConnectionPool;
pub use protocol_tracker::{ConnectionTracker, FlowStream, MessageDecoder, ProtocolTracker};
pub use types::{ConnectionIdentity, Direction, FlowTuple};
