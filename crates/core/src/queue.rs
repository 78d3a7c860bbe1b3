//! Persistent, priority-aware pending store with a wake-up channel.
//!
//! The queue preserves insertion order; selection is by priority, then
//! salience, then arrival. Overflow evicts the oldest low-priority items
//! — critical (P0) and user-input (P1) items are never evicted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use bud_domain::error::{Error, Result};
use bud_domain::item::{PendingItem, Priority};
use bud_domain::trace::TraceEvent;
use bud_domain::config::QueueConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PendingQueue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PendingQueue {
    cfg: QueueConfig,
    path: PathBuf,
    items: Mutex<Vec<PendingItem>>,
    /// Capacity-1 wake channel. Consumers learn "at least one item
    /// arrived since the last drain", never a count.
    notify: mpsc::Sender<()>,
}

impl PendingQueue {
    /// Create the queue. The returned receiver is the executive's wake
    /// signal.
    pub fn new(cfg: QueueConfig, state_dir: &Path) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                cfg,
                path: state_dir.join("pending_queue.json"),
                items: Mutex::new(Vec::new()),
                notify: tx,
            },
            rx,
        )
    }

    /// Append an item, stamping its timestamp when unset, trimming
    /// overflow, and signaling the wake channel.
    pub fn add(&self, mut item: PendingItem) {
        if item.is_unstamped() {
            item.timestamp = Utc::now();
        }

        let queue_len;
        {
            let mut items = self.items.lock();
            TraceEvent::ItemEnqueued {
                item_id: item.id.clone(),
                item_type: item.item_type.clone(),
                priority: item.priority.to_string(),
                queue_len: items.len() + 1,
            }
            .emit();
            items.push(item);

            // Overflow: drop the oldest evictable (priority > P1) items.
            while items.len() > self.cfg.max_size {
                match items.iter().position(|i| i.priority > Priority::P1) {
                    Some(idx) => {
                        let dropped = items.remove(idx);
                        tracing::debug!(
                            item_id = %dropped.id,
                            priority = %dropped.priority,
                            "queue overflow; dropped item"
                        );
                    }
                    None => break,
                }
            }
            queue_len = items.len();
        }

        self.persist_best_effort();
        // Full channel means a wake-up is already pending.
        let _ = self.notify.try_send(());
        tracing::trace!(queue_len, "pending item added");
    }

    /// Remove and return the best item: lowest priority value first, ties
    /// broken by higher salience, then by insertion order.
    pub fn pop_highest(&self) -> Option<PendingItem> {
        let item = {
            let mut items = self.items.lock();
            let idx = best_index(&items)?;
            Some(items.remove(idx))
        };
        if item.is_some() {
            self.persist_best_effort();
        }
        item
    }

    /// The item `pop_highest` would return, without removing it.
    pub fn peek(&self) -> Option<PendingItem> {
        let items = self.items.lock();
        best_index(&items).map(|idx| items[idx].clone())
    }

    /// Remove a specific item by id (attention-driven selection).
    pub fn remove(&self, id: &str) -> Option<PendingItem> {
        let item = {
            let mut items = self.items.lock();
            let idx = items.iter().position(|i| i.id == id)?;
            Some(items.remove(idx))
        };
        if item.is_some() {
            self.persist_best_effort();
        }
        item
    }

    /// Items at or above the given urgency (priority value ≤ `max`).
    pub fn filter_by_priority(&self, max: Priority) -> Vec<PendingItem> {
        self.items
            .lock()
            .iter()
            .filter(|i| i.priority <= max)
            .cloned()
            .collect()
    }

    pub fn filter_by_type(&self, item_type: &str) -> Vec<PendingItem> {
        self.items
            .lock()
            .iter()
            .filter(|i| i.item_type == item_type)
            .cloned()
            .collect()
    }

    /// Drop items older than `max_age`. Returns the number removed.
    pub fn expire_old(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let removed = {
            let mut items = self.items.lock();
            let before = items.len();
            items.retain(|i| i.timestamp >= cutoff);
            before - items.len()
        };
        if removed > 0 {
            tracing::debug!(removed, "expired old pending items");
            self.persist_best_effort();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Insertion-ordered copy of the queue contents.
    pub fn snapshot(&self) -> Vec<PendingItem> {
        self.items.lock().clone()
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Atomic write of the entire queue, preserving insertion order.
    pub fn save(&self) -> Result<()> {
        let items = self.items.lock();
        let json = serde_json::to_string_pretty(&*items)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, &self.path).map_err(Error::Io)?;
        Ok(())
    }

    /// Load the persisted queue, replacing in-memory contents. A missing
    /// file is an empty queue.
    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(Error::Io)?;
        let loaded: Vec<PendingItem> = serde_json::from_str(&raw)?;
        *self.items.lock() = loaded;
        Ok(())
    }

    fn persist_best_effort(&self) {
        if !self.cfg.persist {
            return;
        }
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "failed to persist pending queue");
        }
    }
}

/// Index of the best item under the selection order.
fn best_index(items: &[PendingItem]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, item) in items.iter().enumerate() {
        match best {
            None => best = Some(idx),
            Some(b) => {
                let current = &items[b];
                let better = item.priority < current.priority
                    || (item.priority == current.priority && item.salience > current.salience);
                if better {
                    best = Some(idx);
                }
            }
        }
    }
    best
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
