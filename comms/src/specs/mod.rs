mod metrics;
mod node;
mod params;

pub use metrics::RoundMetrics;
pub use node::{InvalidIdentity, NodeIdentity};
pub use params::ParameterVector;
