use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation buffer configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Token budget per scope before compression triggers.
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,

    /// Oldest-entry age before compression triggers, in seconds.
    #[serde(default = "d_max_age_secs")]
    pub max_age_secs: u64,

    /// Entries kept when compressing without a summarizer.
    #[serde(default = "d_keep_recent")]
    pub keep_recent: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_tokens: d_max_tokens(),
            max_age_secs: d_max_age_secs(),
            keep_recent: d_keep_recent(),
        }
    }
}

fn d_max_tokens() -> u32 {
    3000
}

fn d_max_age_secs() -> u64 {
    600
}

fn d_keep_recent() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = BufferConfig::default();
        assert_eq!(cfg.max_tokens, 3000);
        assert_eq!(cfg.max_age_secs, 600);
        assert_eq!(cfg.keep_recent, 10);
    }
}
