pub mod configuration;
pub use configuration::*;

pub mod data_capture;
pub mod error_handling;
pub mod output;
pub mod protocols;
pub mod session_management;
pub mod tracker;
