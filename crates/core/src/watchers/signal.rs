//! Tails `<state>/queues/signals.jsonl` for external completion signals.
//!
//! The file is append-only; the watcher remembers its byte offset and
//! only ever parses whole lines. Malformed lines are logged and skipped.

use std::path::PathBuf;
use std::sync::Weak;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bud_domain::config::WatcherConfig;
use bud_domain::trace::TraceEvent;

use crate::tracker::SessionTracker;
use crate::watchers::CompletionCallback;

/// One line of `signals.jsonl`.
#[derive(Debug, Deserialize)]
struct Signal {
    #[serde(rename = "type")]
    signal_type: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    timestamp: Option<serde_json::Value>,
}

pub struct SignalWatcher {
    path: PathBuf,
    poll: Duration,
    tracker: Weak<SessionTracker>,
    on_complete: Option<CompletionCallback>,
    offset: u64,
}

impl SignalWatcher {
    pub fn new(
        cfg: &WatcherConfig,
        state_dir: &std::path::Path,
        tracker: Weak<SessionTracker>,
    ) -> Self {
        Self {
            path: state_dir.join("queues").join("signals.jsonl"),
            poll: Duration::from_millis(cfg.signal_poll_ms),
            tracker,
            on_complete: None,
            offset: 0,
        }
    }

    pub fn with_completion_callback(mut self, cb: CompletionCallback) -> Self {
        self.on_complete = Some(cb);
        self
    }

    /// Run the tail loop until cancelled.
    pub fn spawn(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.poll);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => self.poll_once(),
                }
            }
            tracing::debug!("signal watcher stopped");
        })
    }

    /// Read any new complete lines past the remembered offset.
    pub fn poll_once(&mut self) {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };
        if meta.len() < self.offset {
            // File was truncated or rotated; start over.
            self.offset = 0;
        }
        if meta.len() == self.offset {
            return;
        }

        let raw = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read signals.jsonl");
                return;
            }
        };
        let new = &raw[self.offset as usize..];

        // Only consume up to the last newline; a partial trailing line
        // stays for the next poll.
        let Some(last_newline) = new.iter().rposition(|&b| b == b'\n') else {
            return;
        };
        let chunk = &new[..=last_newline];
        self.offset += (last_newline + 1) as u64;

        for line in chunk.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Signal>(line) {
                Ok(signal) => self.handle(signal),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed signal line");
                }
            }
        }
    }

    fn handle(&self, signal: Signal) {
        TraceEvent::SignalReceived {
            signal_type: signal.signal_type.clone(),
            session_id: signal.session_id.clone(),
        }
        .emit();

        if signal.signal_type != "session_done" {
            tracing::debug!(signal_type = %signal.signal_type, "ignoring non-completion signal");
            return;
        }
        let Some(session_id) = signal.session_id else {
            tracing::warn!("session_done signal without session_id");
            return;
        };
        let Some(tracker) = self.tracker.upgrade() else {
            return;
        };

        // The tracker ignores unknown ids, so a signal racing the idle
        // detector completes at most once.
        if let Some(record) = tracker.complete_session(&session_id) {
            tracing::info!(session_id = %session_id, "session completed via signal");
            if let Some(cb) = &self.on_complete {
                cb(record, signal.summary);
            }
        }
    }
}
