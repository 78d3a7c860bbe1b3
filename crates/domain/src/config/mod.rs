mod attention;
mod budgets;
mod buffer;
mod driver;
mod graph;
mod queue;
mod runtime;
mod watchers;

pub use attention::*;
pub use budgets::*;
pub use buffer::*;
pub use driver::*;
pub use graph::*;
pub use queue::*;
pub use runtime::*;
pub use watchers::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub attention: AttentionConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub budgets: BudgetConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub watchers: WatcherConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let mut error = |field: &str, message: String| {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: field.to_owned(),
                message,
            });
        };

        if self.runtime.state_path.as_os_str().is_empty() {
            error("runtime.state_path", "must not be empty".into());
        }
        if self.buffer.max_tokens == 0 {
            error("buffer.max_tokens", "must be positive".into());
        }
        if self.queue.max_size == 0 {
            error("queue.max_size", "must be positive".into());
        }
        if self.driver.cli_path.is_empty() {
            error("driver.cli_path", "must not be empty".into());
        }
        if self.driver.max_context_tokens == 0 {
            error("driver.max_context_tokens", "must be positive".into());
        }
        if self.watchers.idle_threshold >= self.watchers.active_threshold {
            error(
                "watchers.idle_threshold",
                format!(
                    "must be below active_threshold ({} >= {})",
                    self.watchers.idle_threshold, self.watchers.active_threshold
                ),
            );
        }
        if !(0.0..=1.0).contains(&self.attention.initial_arousal) {
            error(
                "attention.initial_arousal",
                "must be within [0.0, 1.0]".into(),
            );
        }

        let mut warn = |field: &str, message: String| {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: field.to_owned(),
                message,
            });
        };

        if self.graph.base_url.is_empty() {
            warn(
                "graph.base_url",
                "empty — memory retrieval will be unavailable".into(),
            );
        }
        if self.budgets.daily_token_limit.is_none() && self.budgets.daily_minutes_limit.is_none() {
            warn(
                "budgets",
                "no daily limits configured; autonomous work is unbounded".into(),
            );
        }

        errors
    }
}
