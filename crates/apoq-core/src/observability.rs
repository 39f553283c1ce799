use serde::{Deserialize, Serialize};

/// Task counts per state, as reported by a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    /// Pending tasks currently held by a live claim (subset of `pending`).
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.completed + self.failed
    }
}
