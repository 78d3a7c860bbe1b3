use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide runtime settings.
///
/// `state_path` is the single directory the core owns on disk; every
/// persistent file (`pending_queue.json`, `buffers.json`, `sessions.json`,
/// `queues/signals.jsonl`, the `reset.pending` marker, ...) lives under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Root of the state directory. Overridable with `STATE_PATH`.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,

    /// File-based inbox/outbox transport for tests.
    /// Overridable with `SYNTHETIC_MODE`.
    #[serde(default)]
    pub synthetic_mode: bool,

    /// Extra instructions appended to the prompt for wake-type focus items.
    #[serde(default)]
    pub wakeup_instructions: Option<String>,

    /// Executive idle tick when no queue notification arrives.
    #[serde(default = "d_tick_secs")]
    pub tick_secs: u64,

    /// Arousal decay factor applied once per executive tick.
    #[serde(default = "d_arousal_decay")]
    pub arousal_decay: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            synthetic_mode: false,
            wakeup_instructions: None,
            tick_secs: d_tick_secs(),
            arousal_decay: d_arousal_decay(),
        }
    }
}

impl RuntimeConfig {
    /// Apply environment overrides (`STATE_PATH`, `SYNTHETIC_MODE`).
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("STATE_PATH") {
            if !path.is_empty() {
                self.state_path = PathBuf::from(path);
            }
        }
        if let Ok(v) = std::env::var("SYNTHETIC_MODE") {
            if matches!(v.as_str(), "1" | "true" | "yes") {
                self.synthetic_mode = true;
            }
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./state")
}

fn d_tick_secs() -> u64 {
    5
}

fn d_arousal_decay() -> f64 {
    0.98
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.state_path, PathBuf::from("./state"));
        assert!(!cfg.synthetic_mode);
        assert_eq!(cfg.tick_secs, 5);
    }

    #[test]
    fn deserialize_with_wakeup_instructions() {
        let cfg: RuntimeConfig = toml::from_str(
            r#"
            state_path = "/var/lib/bud"
            wakeup_instructions = "Check your reminders."
            "#,
        )
        .unwrap();
        assert_eq!(cfg.state_path, PathBuf::from("/var/lib/bud"));
        assert_eq!(
            cfg.wakeup_instructions.as_deref(),
            Some("Check your reminders.")
        );
    }
}
