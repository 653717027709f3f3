//! Byte-stream source adapters.
//!
//! Packet capture and TCP reassembly happen outside this crate. Live capture
//! writes into pipes from `SessionManager::open_flow`; recorded sessions are
//! replayed from a directory of per-direction payload files.

pub mod flow_replay;
pub mod types;

pub use flow_replay::FlowDirectory;
pub use types::FlowSource;
