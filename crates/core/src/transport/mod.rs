//! Synthetic file transport and the effector seam.
//!
//! Platform adapters are external collaborators; the core only needs the
//! [`ActionSink`] contract. In synthetic mode (tests, local runs) the
//! sink appends to `outbox.jsonl` and an inbox tail turns
//! `inbox.jsonl` lines into pending items and buffer entries.

pub mod inbox;
pub mod outbox;

use async_trait::async_trait;

use bud_domain::error::Result;

pub use inbox::InboxWatcher;
pub use outbox::OutboxWriter;

/// Outbound effects the executive can request. Implemented by platform
/// adapters in production and by [`OutboxWriter`] in synthetic mode.
#[async_trait]
pub trait ActionSink: Send + Sync {
    /// Deliver a message to a channel. Also the response-enforcement
    /// fallback path.
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<()>;

    /// Show a typing indicator on a channel. Best-effort.
    async fn typing(&self, channel_id: &str) -> Result<()>;

    /// React to a message. Best-effort.
    async fn react(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()>;
}
