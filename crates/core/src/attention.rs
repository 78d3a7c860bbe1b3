//! Attention — picks one pending item per tick, keeps a suspension stack
//! for preempted work, and tracks arousal and timed domain modes.
//!
//! Selection order: critical items first, then user input, then anything
//! whose salience clears the arousal-gated admission threshold. The
//! focus callback is always invoked outside the lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use bud_domain::config::AttentionConfig;
use bud_domain::item::{PendingItem, Priority, SOURCE_DISCORD, TYPE_USER_INPUT};
use bud_domain::trace::TraceEvent;

use crate::queue::PendingQueue;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Invoked whenever a new item gains focus. Supplied by the executive at
/// wiring time so attention never holds a direct executive reference.
pub trait FocusCallback: Send + Sync {
    fn on_focus(&self, item: &PendingItem);
}

/// A timed attention setting scoped to a domain (e.g. `gtd: bypass_reflex`).
/// Domain `all` matches every lookup.
#[derive(Debug, Clone, Serialize)]
pub struct Mode {
    pub domain: String,
    pub action: String,
    pub set_by: String,
    pub expires_at: DateTime<Utc>,
}

impl Mode {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Snapshot of the attention state for context assembly.
#[derive(Debug, Clone)]
pub struct FocusSnapshot {
    pub current: Option<PendingItem>,
    pub suspended: Vec<PendingItem>,
    pub arousal: f64,
}

struct FocusState {
    current: Option<PendingItem>,
    /// Preempted items; the top resumes on `complete`.
    suspended: Vec<PendingItem>,
    modes: Vec<Mode>,
    arousal: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Attention
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Attention {
    cfg: AttentionConfig,
    state: Mutex<FocusState>,
    callback: Mutex<Option<Arc<dyn FocusCallback>>>,
}

impl Attention {
    pub fn new(cfg: AttentionConfig) -> Self {
        let arousal = cfg.initial_arousal;
        Self {
            cfg,
            state: Mutex::new(FocusState {
                current: None,
                suspended: Vec::new(),
                modes: Vec::new(),
                arousal,
            }),
            callback: Mutex::new(None),
        }
    }

    /// Install the focus callback. The executive does this once after
    /// construction.
    pub fn set_focus_callback(&self, cb: Arc<dyn FocusCallback>) {
        *self.callback.lock() = Some(cb);
    }

    // ── Arousal ──────────────────────────────────────────────────────

    pub fn arousal(&self) -> f64 {
        self.state.lock().arousal
    }

    /// Urgent arrivals (priority ≤ P1) raise arousal by 0.1, capped at 1.0.
    pub fn note_enqueued(&self, priority: Priority) {
        if priority <= Priority::P1 {
            let mut state = self.state.lock();
            state.arousal = (state.arousal + 0.1).min(1.0);
        }
    }

    /// Multiply arousal by `factor`, flooring at the configured minimum.
    pub fn decay_arousal(&self, factor: f64) {
        let mut state = self.state.lock();
        state.arousal = (state.arousal * factor).max(self.cfg.arousal_floor);
    }

    // ── Salience ─────────────────────────────────────────────────────

    /// Salience for an item whose producer left it at zero: a base from
    /// priority, a bump for live-chat sources, and a recency bump that
    /// fades over the first minute.
    pub fn compute_salience(&self, item: &PendingItem, now: DateTime<Utc>) -> f64 {
        let mut salience = item.priority.base_salience();
        if item.source == SOURCE_DISCORD {
            salience += 0.1;
        }
        let age = item.age_secs(now);
        if age < 60.0 {
            salience += 0.1 * (1.0 - age / 60.0);
        }
        salience.min(1.0)
    }

    fn effective_salience(&self, item: &PendingItem, now: DateTime<Utc>) -> f64 {
        if item.salience > 0.0 {
            item.salience
        } else {
            self.compute_salience(item, now)
        }
    }

    // ── Selection ────────────────────────────────────────────────────

    /// Choose and remove the next item from the queue, or `None` when
    /// nothing is urgent enough to clear the admission threshold.
    pub fn select_next(&self, queue: &PendingQueue) -> Option<PendingItem> {
        let items = queue.snapshot();
        if items.is_empty() {
            return None;
        }
        let now = Utc::now();

        // 1. Critical items win outright, earliest first.
        if let Some(item) = items.iter().find(|i| i.priority == Priority::P0) {
            return queue.remove(&item.id);
        }

        // 2. User input preempts everything else, earliest first.
        if let Some(item) = items.iter().find(|i| i.item_type == TYPE_USER_INPUT) {
            return queue.remove(&item.id);
        }

        // 3. Best remaining item, admitted only above the arousal-gated
        //    threshold.
        let arousal = self.state.lock().arousal;
        let threshold = self.cfg.admission_threshold(arousal);

        let mut best: Option<(&PendingItem, f64)> = None;
        for item in &items {
            let salience = self.effective_salience(item, now);
            let better = match best {
                None => true,
                Some((b, bs)) => {
                    item.priority < b.priority
                        || (item.priority == b.priority && salience > bs)
                }
            };
            if better {
                best = Some((item, salience));
            }
        }

        let (top, salience) = best?;
        if salience >= threshold {
            queue.remove(&top.id)
        } else {
            tracing::trace!(
                item_id = %top.id,
                salience,
                threshold,
                "top item below admission threshold"
            );
            None
        }
    }

    // ── Focus / complete ─────────────────────────────────────────────

    /// Make `item` the current focus, suspending any previous focus.
    /// The focus callback runs outside the lock.
    pub fn focus(&self, item: PendingItem) {
        let suspended_depth;
        {
            let mut state = self.state.lock();
            if let Some(prev) = state.current.take() {
                state.suspended.push(prev);
            }
            suspended_depth = state.suspended.len();
            state.current = Some(item.clone());
        }

        TraceEvent::ItemFocused {
            item_id: item.id.clone(),
            item_type: item.item_type.clone(),
            suspended_depth,
        }
        .emit();

        let cb = self.callback.lock().clone();
        if let Some(cb) = cb {
            cb.on_focus(&item);
        }
    }

    /// Finish the current focus. The top of the suspension stack, if any,
    /// resumes as the new current item and is returned.
    pub fn complete(&self) -> Option<PendingItem> {
        let (completed, resumed) = {
            let mut state = self.state.lock();
            let completed = state.current.take();
            let resumed = state.suspended.pop();
            state.current = resumed.clone();
            (completed, resumed)
        };

        if let Some(done) = completed {
            TraceEvent::ItemCompleted {
                item_id: done.id,
                resumed: resumed.as_ref().map(|r| r.id.clone()),
            }
            .emit();
        }
        resumed
    }

    pub fn current(&self) -> Option<PendingItem> {
        self.state.lock().current.clone()
    }

    pub fn snapshot(&self) -> FocusSnapshot {
        let state = self.state.lock();
        FocusSnapshot {
            current: state.current.clone(),
            suspended: state.suspended.clone(),
            arousal: state.arousal,
        }
    }

    // ── Modes ────────────────────────────────────────────────────────

    /// Set (or replace) a domain mode for `ttl`.
    pub fn set_mode(
        &self,
        domain: impl Into<String>,
        action: impl Into<String>,
        set_by: impl Into<String>,
        ttl: Duration,
    ) {
        let domain = domain.into();
        let mode = Mode {
            domain: domain.clone(),
            action: action.into(),
            set_by: set_by.into(),
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
        };
        let mut state = self.state.lock();
        state.modes.retain(|m| m.domain != domain);
        state.modes.push(mode);
    }

    /// Whether an unexpired mode matches `domain` (or the `all` wildcard).
    pub fn is_attending(&self, domain: &str) -> bool {
        let now = Utc::now();
        self.state
            .lock()
            .modes
            .iter()
            .any(|m| !m.is_expired(now) && (m.domain == domain || m.domain == "all"))
    }

    /// Drop expired modes. Lookups already ignore them; this just bounds
    /// the list.
    pub fn prune_modes(&self) {
        let now = Utc::now();
        self.state.lock().modes.retain(|m| !m.is_expired(now));
    }

    pub fn active_modes(&self) -> Vec<Mode> {
        let now = Utc::now();
        self.state
            .lock()
            .modes
            .iter()
            .filter(|m| !m.is_expired(now))
            .cloned()
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
