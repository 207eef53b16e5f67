//! The simulator proper: a single-context dispatcher over the device model,
//! an async runtime task multiplexing serial IO, operator commands and the
//! 1 Hz behavior tick, and the serial transport glue.

#![forbid(unsafe_code)]

pub mod dispatch;
pub mod runtime;
pub mod serial;

pub use dispatch::Simulator;
pub use runtime::{spawn, BoxedLink, ServerError, ServerHandle, StatePaths};
pub use serial::SerialConfig;
