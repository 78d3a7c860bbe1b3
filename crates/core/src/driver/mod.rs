//! The LLM session driver — one subprocess per turn.
//!
//! [`TurnDriver`] is the seam the executive programs against;
//! [`SubprocessDriver`](subprocess::SubprocessDriver) is the production
//! implementation, [`SessionScratch`] the per-session working memory
//! both share with the context builder.

pub mod stream;
pub mod subprocess;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use bud_domain::error::Result;

use stream::{ToolCall, TurnResult};

pub use subprocess::SubprocessDriver;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn interface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Callbacks installed for the duration of one turn.
///
/// `on_output` receives assistant text in stream order and is never
/// invoked concurrently with itself. `on_tool` observes tool calls; its
/// return value is discarded (the CLI executes tools itself).
#[derive(Clone)]
pub struct TurnHooks {
    pub on_output: Arc<dyn Fn(&str) + Send + Sync>,
    pub on_tool: Arc<dyn Fn(&ToolCall) -> String + Send + Sync>,
}

impl TurnHooks {
    /// Hooks that drop everything (maintenance turns).
    pub fn discard() -> Self {
        Self {
            on_output: Arc::new(|_| {}),
            on_tool: Arc::new(|_| "observed".to_owned()),
        }
    }
}

/// What a completed turn produced.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// Accumulated assistant text (blocks and deltas, in order).
    pub text: String,
    /// Final metrics; `None` when the stream ended without a result event.
    pub result: Option<TurnResult>,
}

/// The executive's seam to the LLM subprocess.
#[async_trait]
pub trait TurnDriver: Send + Sync {
    /// Per-session working memory shared with the context builder.
    fn scratch(&self) -> Arc<SessionScratch>;

    /// Whether the last turn pushed context usage over the budget.
    fn should_reset(&self) -> bool;

    /// Start a fresh session: clears the scratch maps and removes the
    /// `reset.pending` marker.
    fn reset(&self, reason: &str) -> Result<()>;

    /// Usage of the most recent turn.
    fn last_usage(&self) -> Option<TurnResult>;

    /// Drive one prompt through the subprocess. Serialized per driver;
    /// cancellation kills the child.
    async fn run_turn(
        &self,
        prompt: &str,
        hooks: TurnHooks,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionScratch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ScratchInner {
    session_id: String,
    started_at: DateTime<Utc>,
    turns_sent: u32,
    seen_items: HashSet<String>,
    /// trace id → display number; M-ids stay stable within a session.
    memory_ids: HashMap<String, u32>,
    next_memory_id: u32,
    last_buffer_sync: Option<DateTime<Utc>>,
}

impl ScratchInner {
    fn fresh() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            turns_sent: 0,
            seen_items: HashSet::new(),
            memory_ids: HashMap::new(),
            next_memory_id: 1,
            last_buffer_sync: None,
        }
    }
}

/// In-memory per-session state: the session id, which items and memories
/// the model has already seen, and the buffer-sync watermark. Cleared as
/// a unit by `reset`.
pub struct SessionScratch {
    inner: Mutex<ScratchInner>,
}

impl Default for SessionScratch {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionScratch {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ScratchInner::fresh()),
        }
    }

    pub fn session_id(&self) -> String {
        self.inner.lock().session_id.clone()
    }

    /// When this session began (reset at every `reset`).
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.lock().started_at
    }

    /// Claim the next turn. Returns the session id and whether this is a
    /// resume (anything after the session's first prompt).
    pub fn begin_turn(&self) -> (String, bool) {
        let mut inner = self.inner.lock();
        let resume = inner.turns_sent > 0;
        inner.turns_sent += 1;
        (inner.session_id.clone(), resume)
    }

    /// Display id (`M1`, `M2`, ...) for a trace, assigning a fresh one
    /// for traces unseen this session.
    pub fn display_id(&self, trace_id: &str) -> String {
        let mut inner = self.inner.lock();
        if let Some(&n) = inner.memory_ids.get(trace_id) {
            return format!("M{n}");
        }
        let n = inner.next_memory_id;
        inner.next_memory_id += 1;
        inner.memory_ids.insert(trace_id.to_owned(), n);
        format!("M{n}")
    }

    /// How many distinct traces have been shown this session.
    pub fn shown_memory_count(&self) -> usize {
        self.inner.lock().memory_ids.len()
    }

    pub fn mark_item_seen(&self, id: &str) {
        self.inner.lock().seen_items.insert(id.to_owned());
    }

    pub fn item_seen(&self, id: &str) -> bool {
        self.inner.lock().seen_items.contains(id)
    }

    pub fn last_buffer_sync(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_buffer_sync
    }

    pub fn set_last_buffer_sync(&self, at: DateTime<Utc>) {
        self.inner.lock().last_buffer_sync = Some(at);
    }

    /// Drop everything and mint a new session id. Returns (old, new).
    pub fn reset(&self) -> (String, String) {
        let mut inner = self.inner.lock();
        let old = inner.session_id.clone();
        *inner = ScratchInner::fresh();
        (old, inner.session_id.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_turn_creates_then_resumes() {
        let scratch = SessionScratch::new();
        let (id1, resume1) = scratch.begin_turn();
        let (id2, resume2) = scratch.begin_turn();
        assert_eq!(id1, id2);
        assert!(!resume1);
        assert!(resume2);
    }

    #[test]
    fn display_ids_are_stable_per_trace() {
        let scratch = SessionScratch::new();
        assert_eq!(scratch.display_id("t-a"), "M1");
        assert_eq!(scratch.display_id("t-b"), "M2");
        assert_eq!(scratch.display_id("t-a"), "M1");
        assert_eq!(scratch.shown_memory_count(), 2);
    }

    #[test]
    fn reset_clears_maps_and_mints_new_session() {
        let scratch = SessionScratch::new();
        scratch.begin_turn();
        scratch.display_id("t-a");
        scratch.mark_item_seen("i-1");
        scratch.set_last_buffer_sync(Utc::now());

        let (old, new) = scratch.reset();
        assert_ne!(old, new);
        assert_eq!(scratch.shown_memory_count(), 0);
        assert!(!scratch.item_seen("i-1"));
        assert!(scratch.last_buffer_sync().is_none());
        // Numbering starts over.
        assert_eq!(scratch.display_id("t-z"), "M1");
        // The first turn after a reset creates again.
        let (_, resume) = scratch.begin_turn();
        assert!(!resume);
    }
}
