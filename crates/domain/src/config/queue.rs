use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending-queue configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Soft size cap; overflow evicts the oldest items of priority > P1.
    #[serde(default = "d_max_size")]
    pub max_size: usize,

    /// Items older than this are dropped by `expire_old`, in seconds.
    #[serde(default = "d_max_age_secs")]
    pub max_age_secs: u64,

    /// Persist the queue to `pending_queue.json` on every mutation.
    #[serde(default = "d_persist")]
    pub persist: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: d_max_size(),
            max_age_secs: d_max_age_secs(),
            persist: d_persist(),
        }
    }
}

fn d_max_size() -> usize {
    100
}

fn d_max_age_secs() -> u64 {
    24 * 60 * 60
}

fn d_persist() -> bool {
    true
}
