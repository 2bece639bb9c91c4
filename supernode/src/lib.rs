pub mod client;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod trainer;

pub use client::{ConnectionState, RoundClient, RunReport, SessionOptions, Termination};
pub use config::{Args, NodeConfig};
pub use error::{NodeErr, Result};
pub use metrics::MetricsSink;
pub use trainer::LocalTrainer;
