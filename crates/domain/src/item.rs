//! Pending-item model.
//!
//! A [`PendingItem`] is one unit of work awaiting attention: a chat message,
//! a timer firing, an internal impulse. Items are produced by adapters,
//! persisted by the pending queue, and consumed one at a time by the
//! executive.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ── Well-known item types and sources ────────────────────────────────

/// A message from a human that must receive a reply.
pub const TYPE_USER_INPUT: &str = "user_input";
/// A scheduled self-wake impulse (memory retrieval is skipped for these).
pub const TYPE_WAKE: &str = "wake";
/// A reminder firing.
pub const TYPE_REMINDER: &str = "reminder";
/// Previously suspended autonomous work.
pub const TYPE_ACTIVE_WORK: &str = "active_work";

pub const SOURCE_DISCORD: &str = "discord";
pub const SOURCE_INBOX: &str = "inbox";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Priority
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Item priority. Lower numeric value = more urgent; the derived `Ord`
/// sorts P0 first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    /// Critical — never evicted, always selected first.
    P0,
    /// User input — never evicted, preempts autonomous work.
    P1,
    P2,
    P3,
    /// Background noise.
    P4,
}

impl Priority {
    /// Base salience contribution when the producer did not set one.
    pub fn base_salience(self) -> f64 {
        match self {
            Priority::P0 => 1.0,
            Priority::P1 => 0.9,
            Priority::P2 => 0.7,
            Priority::P3 => 0.5,
            Priority::P4 => 0.2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
            Priority::P4 => "P4",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PendingItem
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One unit of work awaiting attention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub priority: Priority,
    /// Salience in [0, 1]. `0.0` means "compute one for me".
    #[serde(default)]
    pub salience: f64,
    #[serde(default)]
    pub source: String,
    pub content: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
    /// Stamped by the queue on `add` when left at the epoch.
    #[serde(default = "epoch")]
    pub timestamp: DateTime<Utc>,
    /// Opaque adapter payload (attachments, platform message ids, ...).
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).unwrap()
}

impl PendingItem {
    pub fn new(id: impl Into<String>, item_type: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: id.into(),
            item_type: item_type.into(),
            priority,
            salience: 0.0,
            source: String::new(),
            content: String::new(),
            channel_id: None,
            author_id: None,
            timestamp: epoch(),
            data: serde_json::Map::new(),
        }
    }

    /// Whether the producer left the timestamp unset.
    pub fn is_unstamped(&self) -> bool {
        self.timestamp.timestamp() == 0 && self.timestamp.timestamp_subsec_nanos() == 0
    }

    /// Age relative to `now`, saturating at zero for future timestamps.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// A message from a human that must receive a reply (§response
    /// enforcement): P1 priority or a recognized inbound source.
    pub fn requires_reply(&self) -> bool {
        self.priority == Priority::P1
            || self.source == SOURCE_DISCORD
            || self.source == SOURCE_INBOX
    }

    /// Autonomous impulses are gated by the daily budget; user input is not.
    pub fn is_autonomous(&self) -> bool {
        self.item_type == TYPE_WAKE
    }
}
