use std::collections::HashMap;
use std::sync::Arc;

use bud_buffer::BufferManager;
use bud_domain::config::Config;
use bud_memory::{Embedder, Graph};

use crate::attention::Attention;
use crate::context::ContextBuilder;
use crate::driver::TurnDriver;
use crate::queue::PendingQueue;
use crate::reflex::ReflexLog;
use crate::tracker::SessionTracker;
use crate::transport::ActionSink;

/// Receives `<memory_eval>` ratings (trace id → score) extracted from a
/// turn's output.
pub type MemoryEvalCallback = Arc<dyn Fn(HashMap<String, i64>) + Send + Sync>;

/// Shared core state handed to the executive and the watchers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, memory graph, embedder
/// - **Working memory** — conversation buffer, reflex log
/// - **Scheduling** — pending queue, attention
/// - **Turn machinery** — session driver, context builder, tracker
/// - **Effects** — action sink, memory-eval hook
#[derive(Clone)]
pub struct CoreState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub graph: Arc<dyn Graph>,
    pub embedder: Arc<dyn Embedder>,

    // ── Working memory ────────────────────────────────────────────────
    pub buffer: Arc<BufferManager>,
    pub reflex: Arc<ReflexLog>,

    // ── Scheduling ────────────────────────────────────────────────────
    pub queue: Arc<PendingQueue>,
    pub attention: Arc<Attention>,

    // ── Turn machinery ────────────────────────────────────────────────
    pub driver: Arc<dyn TurnDriver>,
    pub builder: Arc<ContextBuilder>,
    pub tracker: Arc<SessionTracker>,

    // ── Effects ───────────────────────────────────────────────────────
    pub actions: Arc<dyn ActionSink>,
    /// `None` drops memory evaluations on the floor.
    pub on_memory_eval: Option<MemoryEvalCallback>,
}
