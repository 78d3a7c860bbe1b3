//! Session tracking — active/completed turn records, daily token and
//! time aggregates, and the autonomous-work budget gate.
//!
//! Records persist to `sessions.json` after every mutation and survive a
//! restart only within the same calendar day; the first touch on a new
//! day clears the completed list.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use bud_domain::config::BudgetConfig;
use bud_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One LLM turn's record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub focus_item_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_secs: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_create_tokens: u64,
    #[serde(default)]
    pub num_turns: u32,
}

/// Daily token aggregates over completed sessions.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_create: u64,
}

impl TokenTotals {
    /// Tokens counted against the daily budget.
    pub fn billable(&self) -> u64 {
        self.input + self.output
    }
}

/// Returned when the budget gate denies autonomous work.
#[derive(Debug, Clone)]
pub struct BudgetExceeded {
    pub reason: String,
}

/// On-disk shape of `sessions.json`.
#[derive(Debug, Serialize, Deserialize)]
struct TrackerFile {
    date: String,
    active: Vec<SessionRecord>,
    completed: Vec<SessionRecord>,
}

struct TrackerState {
    date: NaiveDate,
    active: Vec<SessionRecord>,
    completed: Vec<SessionRecord>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionTracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionTracker {
    budgets: BudgetConfig,
    path: PathBuf,
    state: RwLock<TrackerState>,
}

impl SessionTracker {
    /// Load or create the tracker at `<state>/sessions.json`. Persisted
    /// records are restored only when the stored date is today.
    pub fn new(budgets: BudgetConfig, state_dir: &Path) -> Result<Self> {
        let path = state_dir.join("sessions.json");
        let today = Utc::now().date_naive();

        let state = match Self::load_file(&path)? {
            Some(file) if file.date == today.to_string() => TrackerState {
                date: today,
                active: file.active,
                completed: file.completed,
            },
            _ => TrackerState {
                date: today,
                active: Vec::new(),
                completed: Vec::new(),
            },
        };

        tracing::info!(
            active = state.active.len(),
            completed = state.completed.len(),
            path = %path.display(),
            "session tracker ready"
        );

        Ok(Self {
            budgets,
            path,
            state: RwLock::new(state),
        })
    }

    fn load_file(path: &Path) -> Result<Option<TrackerFile>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        match serde_json::from_str(&raw) {
            Ok(file) => Ok(Some(file)),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable sessions.json");
                Ok(None)
            }
        }
    }

    /// First touch on a new calendar day clears the completed list.
    fn rollover(state: &mut TrackerState) {
        let today = Utc::now().date_naive();
        if state.date != today {
            tracing::info!(
                old_date = %state.date,
                completed = state.completed.len(),
                "daily rollover; clearing completed sessions"
            );
            state.date = today;
            state.completed.clear();
        }
    }

    fn persist(&self, state: &TrackerState) {
        let file = TrackerFile {
            date: state.date.to_string(),
            active: state.active.clone(),
            completed: state.completed.clone(),
        };
        let result = serde_json::to_string_pretty(&file)
            .map_err(Error::Json)
            .and_then(|json| std::fs::write(&self.path, json).map_err(Error::Io));
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist sessions.json");
        }
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Register a new active session.
    pub fn start_session(&self, id: impl Into<String>, focus_item_id: impl Into<String>) {
        let mut state = self.state.write();
        Self::rollover(&mut state);
        state.active.push(SessionRecord {
            id: id.into(),
            focus_item_id: focus_item_id.into(),
            started_at: Utc::now(),
            completed_at: None,
            duration_secs: 0,
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_create_tokens: 0,
            num_turns: 0,
        });
        self.persist(&state);
    }

    /// Move an active session to completed, filling duration exactly once.
    /// Unknown ids are ignored — no phantom zero-duration rows.
    pub fn complete_session(&self, id: &str) -> Option<SessionRecord> {
        let mut state = self.state.write();
        Self::rollover(&mut state);

        let idx = state.active.iter().position(|s| s.id == id)?;
        let mut record = state.active.remove(idx);
        let now = Utc::now();
        record.completed_at = Some(now);
        record.duration_secs = (now - record.started_at).num_seconds().max(0) as u64;
        state.completed.push(record.clone());
        self.persist(&state);
        Some(record)
    }

    /// Attach usage metrics to a completed session.
    pub fn set_session_usage(
        &self,
        id: &str,
        input: u64,
        output: u64,
        cache_create: u64,
        cache_read: u64,
        num_turns: u32,
    ) {
        let mut state = self.state.write();
        Self::rollover(&mut state);
        let updated = match state.completed.iter_mut().find(|s| s.id == id) {
            Some(record) => {
                record.input_tokens = input;
                record.output_tokens = output;
                record.cache_create_tokens = cache_create;
                record.cache_read_tokens = cache_read;
                record.num_turns = num_turns;
                true
            }
            None => false,
        };
        if updated {
            self.persist(&state);
        }
    }

    // ── Aggregates ───────────────────────────────────────────────────

    /// Thinking minutes today: completed durations plus the elapsed time
    /// of still-active sessions.
    pub fn today_thinking_minutes(&self) -> f64 {
        let mut state = self.state.write();
        Self::rollover(&mut state);
        let now = Utc::now();

        let completed: u64 = state.completed.iter().map(|s| s.duration_secs).sum();
        let active: u64 = state
            .active
            .iter()
            .map(|s| (now - s.started_at).num_seconds().max(0) as u64)
            .sum();
        (completed + active) as f64 / 60.0
    }

    /// Token aggregates over today's completed sessions.
    pub fn today_token_usage(&self) -> TokenTotals {
        let mut state = self.state.write();
        Self::rollover(&mut state);
        let mut totals = TokenTotals::default();
        for s in &state.completed {
            totals.input += s.input_tokens;
            totals.output += s.output_tokens;
            totals.cache_read += s.cache_read_tokens;
            totals.cache_create += s.cache_create_tokens;
        }
        totals
    }

    pub fn has_active_sessions(&self) -> bool {
        !self.state.read().active.is_empty()
    }

    pub fn get_active_sessions(&self) -> Vec<SessionRecord> {
        self.state.read().active.clone()
    }

    /// The active session running the longest, if any.
    pub fn longest_active_session(&self) -> Option<SessionRecord> {
        self.state
            .read()
            .active
            .iter()
            .min_by_key(|s| s.started_at)
            .cloned()
    }

    // ── Budget gate ──────────────────────────────────────────────────

    /// Whether autonomous work is still within today's budget. Active
    /// sessions never gate by themselves.
    pub fn can_do_autonomous_work(&self) -> std::result::Result<(), BudgetExceeded> {
        if let Some(limit) = self.budgets.daily_token_limit {
            let used = self.today_token_usage().billable();
            if used >= limit {
                return Err(BudgetExceeded {
                    reason: format!("daily token budget exhausted: {used}/{limit}"),
                });
            }
        }
        if let Some(limit) = self.budgets.daily_minutes_limit {
            let used = self.today_thinking_minutes();
            if used >= limit as f64 {
                return Err(BudgetExceeded {
                    reason: format!("daily thinking budget exhausted: {used:.1}/{limit} minutes"),
                });
            }
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
