//! The node's side of the round exchange protocol.

mod net;
mod retry;
mod round;
mod state;

pub use net::connect;
pub use retry::{Attempts, RetryPolicy, is_retryable};
pub use round::{
    DEFAULT_IO_TIMEOUT, DEFAULT_MAX_ITERATIONS, DEFAULT_SHUTDOWN_GRACE, RoundClient, RunReport,
    SessionOptions,
};
pub use state::{ConnectionState, Termination};
