//! Completion watchers — close out sessions the subprocess left behind.
//!
//! Two independent paths can complete a session: an explicit
//! `session_done` signal in `queues/signals.jsonl`, or the CPU-idle
//! detector noticing the CLI process has gone quiet. Exactly-once
//! semantics come from the tracker's unknown-id rule plus the idle
//! watcher's per-episode guard.

pub mod cpu_idle;
pub mod signal;

use std::sync::Arc;

use crate::tracker::SessionRecord;

/// Invoked when a watcher completes a session. The second argument is the
/// signal's summary, when one was provided.
pub type CompletionCallback = Arc<dyn Fn(SessionRecord, Option<String>) + Send + Sync>;

pub use cpu_idle::CpuIdleWatcher;
pub use signal::SignalWatcher;
