use serde::{Deserialize, Serialize};

/// Local quality metrics of one completed training round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundMetrics {
    pub round: u64,
    pub loss: f64,
    pub accuracy: f64,
    pub num_examples: u64,
}

impl RoundMetrics {
    /// The record reported when no round ever completed.
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// Returns the same metrics tagged with `round`.
    pub fn with_round(self, round: u64) -> Self {
        Self { round, ..self }
    }
}
