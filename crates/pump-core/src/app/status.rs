use serde::{Deserialize, Serialize};

pub use crate::domain::MetricsSnapshot;

/// Outcome of one publisher batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub peak_in_flight: usize,
}
