//! Reflex activity log.
//!
//! Reflexes answer without waking the model; the core only records their
//! activity so the next prompt can mention what was already handled.
//! Bounded ring, unsent entries surface once.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

const DEFAULT_CAP: usize = 50;

/// One reflex exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ReflexEntry {
    pub query: String,
    pub response: String,
    pub at: DateTime<Utc>,
    pub sent: bool,
}

/// Bounded ring of recent reflex activity.
pub struct ReflexLog {
    cap: usize,
    entries: Mutex<VecDeque<ReflexEntry>>,
}

impl Default for ReflexLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAP)
    }
}

impl ReflexLog {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, query: impl Into<String>, response: impl Into<String>) {
        let mut entries = self.entries.lock();
        if entries.len() == self.cap {
            entries.pop_front();
        }
        entries.push_back(ReflexEntry {
            query: query.into(),
            response: response.into(),
            at: Utc::now(),
            sent: false,
        });
    }

    /// Entries not yet surfaced in a prompt, in insertion order.
    pub fn unsent(&self) -> Vec<ReflexEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| !e.sent)
            .cloned()
            .collect()
    }

    pub fn mark_all_sent(&self) {
        for entry in self.entries.lock().iter_mut() {
            entry.sent = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
