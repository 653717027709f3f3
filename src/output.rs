pub mod stdout_sink;
pub mod types;

pub use stdout_sink::StdoutSink;
pub use types::{Emission, OutputSink};
