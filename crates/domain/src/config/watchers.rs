use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Completion-watcher configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// CPU sampling interval for the idle watcher, in seconds.
    #[serde(default = "d_cpu_poll_secs")]
    pub cpu_poll_secs: u64,

    /// Average CPU percentage below which a process counts as idle.
    #[serde(default = "d_idle_threshold")]
    pub idle_threshold: f32,

    /// Average CPU percentage above which a process counts as active.
    #[serde(default = "d_active_threshold")]
    pub active_threshold: f32,

    /// How long a process must stay idle before a session is completed.
    #[serde(default = "d_idle_duration_secs")]
    pub idle_duration_secs: u64,

    /// Poll interval for the signals.jsonl tail, in milliseconds.
    #[serde(default = "d_signal_poll_ms")]
    pub signal_poll_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            cpu_poll_secs: d_cpu_poll_secs(),
            idle_threshold: d_idle_threshold(),
            active_threshold: d_active_threshold(),
            idle_duration_secs: d_idle_duration_secs(),
            signal_poll_ms: d_signal_poll_ms(),
        }
    }
}

fn d_cpu_poll_secs() -> u64 {
    2
}

fn d_idle_threshold() -> f32 {
    3.0
}

fn d_active_threshold() -> f32 {
    30.0
}

fn d_idle_duration_secs() -> u64 {
    10
}

fn d_signal_poll_ms() -> u64 {
    500
}
