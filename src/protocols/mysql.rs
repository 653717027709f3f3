//! MySQL client/server protocol decoder.

/// Packet framing with transparent continuation frames.
pub mod framing;
/// Handshake and command packet layouts.
pub mod packets;
/// Protocol and connection trackers.
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_support;

pub use framing::{FrameRead, FrameReader};
pub use packets::{ClientHandshake, MysqlRequest, MysqlResponse, ServerHandshake};
pub use tracker::{HandshakePhase, MysqlConnection, MysqlTracker};
