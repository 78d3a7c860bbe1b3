use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Daily budget configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Daily limits gating autonomous work. User messages are never gated.
/// `None` means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BudgetConfig {
    /// Total tokens (input + output) per calendar day.
    #[serde(default)]
    pub daily_token_limit: Option<u64>,

    /// Total thinking minutes per calendar day.
    #[serde(default)]
    pub daily_minutes_limit: Option<u64>,
}
