//! Session management core module.
//!
//! Flows arriving from a byte-stream source are resolved to a connection
//! identity, bound to the tracker registered for their server port and decoded
//! by one task per direction.

/// Per-direction decode loop.
pub mod direction_task;
/// Type-erased handle over a registered protocol tracker.
pub mod flow_handler;
/// Port registry and task ownership.
pub mod session_manager;


pub use flow_handler::{FlowHandler, TrackerHandle};
pub use session_manager::{FlowDisposition, RunExit, SessionManager};
