use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory-graph client configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Base URL of the remote memory service (e.g. `http://localhost:8900`).
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "d_max_retries")]
    pub max_retries: u32,

    /// Result cap for dual-trigger retrieval.
    #[serde(default = "d_retrieve_limit")]
    pub retrieve_limit: u32,

    /// Activation floor for the fallback retrieval path.
    #[serde(default = "d_activation_threshold")]
    pub activation_threshold: f64,

    /// Reinforcement applied to every surfaced trace.
    #[serde(default = "d_boost_alpha")]
    pub boost_alpha: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            timeout_ms: d_timeout_ms(),
            max_retries: d_max_retries(),
            retrieve_limit: d_retrieve_limit(),
            activation_threshold: d_activation_threshold(),
            boost_alpha: d_boost_alpha(),
        }
    }
}

fn d_timeout_ms() -> u64 {
    10_000
}

fn d_max_retries() -> u32 {
    2
}

fn d_retrieve_limit() -> u32 {
    10
}

fn d_activation_threshold() -> f64 {
    0.1
}

fn d_boost_alpha() -> f64 {
    0.1
}
