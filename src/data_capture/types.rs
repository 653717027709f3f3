//! Common data types used across the data_capture subsystem.

use std::future::Future;

use crate::error_handling::types::ReplayError;
use crate::tracker::protocol_tracker::FlowStream;
use crate::tracker::types::FlowTuple;

/// Supplier of reassembled flow directions, grouped by connection.
///
/// Each flow is one direction of one TCP connection: its addresses as seen on
/// the wire and a gap-free, in-order byte stream that ends when the direction
/// closes. A source hands out every direction it knows of a connection in one
/// group, so they can be attached together.
pub trait FlowSource: Send {
    /// Waits for the next connection's flows; `None` once the source is exhausted.
    fn next_connection(
        &mut self,
    ) -> impl Future<Output = Result<Option<Vec<(FlowTuple, FlowStream)>>, ReplayError>> + Send;
}
