//! CPU-idle completion detection.
//!
//! Some CLI runs never emit a done signal and never exit on their own
//! (e.g. a hung MCP server keeps the process alive). This watcher
//! samples per-process CPU for every tracked CLI process, smooths it over
//! a 5-sample moving average, and completes the oldest active session
//! once a process has stayed idle long enough. `completed_once` guards
//! against re-firing within the same idle episode.

use std::collections::{HashMap, VecDeque};
use std::sync::Weak;
use std::time::Duration;

use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bud_domain::config::WatcherConfig;
use bud_domain::trace::TraceEvent;

use crate::tracker::SessionTracker;
use crate::watchers::CompletionCallback;

const SAMPLE_WINDOW: usize = 5;
const MIN_SAMPLES_FOR_IDLE: u32 = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-process state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unknown,
    Active,
    Idle,
    Completed,
}

/// Smoothed CPU history and phase for one tracked process.
struct ProcState {
    session_id: String,
    samples: VecDeque<f32>,
    sample_count: u32,
    phase: Phase,
    idle_since: Option<f64>,
    completed_once: bool,
}

impl ProcState {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            samples: VecDeque::with_capacity(SAMPLE_WINDOW),
            sample_count: 0,
            phase: Phase::Unknown,
            idle_since: None,
            completed_once: false,
        }
    }

    fn average(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }

    /// Feed one CPU sample taken at `now_secs`. Returns true when the
    /// process just entered `Completed` (fire the callback).
    fn observe(&mut self, cpu: f32, now_secs: f64, cfg: &WatcherConfig) -> bool {
        if self.samples.len() == SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(cpu);
        self.sample_count += 1;
        let avg = self.average();

        match self.phase {
            Phase::Unknown => {
                if avg > cfg.active_threshold {
                    self.phase = Phase::Active;
                } else if self.sample_count >= MIN_SAMPLES_FOR_IDLE
                    && avg < cfg.active_threshold
                {
                    self.phase = Phase::Idle;
                    self.idle_since = Some(now_secs);
                }
                false
            }
            Phase::Active => {
                if avg < cfg.idle_threshold {
                    self.phase = Phase::Idle;
                    self.idle_since = Some(now_secs);
                }
                false
            }
            Phase::Idle => {
                if avg > cfg.active_threshold {
                    self.phase = Phase::Active;
                    self.idle_since = None;
                    self.completed_once = false;
                    return false;
                }
                let idle_for = self
                    .idle_since
                    .map(|since| now_secs - since)
                    .unwrap_or(0.0);
                if idle_for >= cfg.idle_duration_secs as f64 && !self.completed_once {
                    self.phase = Phase::Completed;
                    self.completed_once = true;
                    return true;
                }
                false
            }
            Phase::Completed => {
                if avg > cfg.active_threshold {
                    self.phase = Phase::Active;
                    self.idle_since = None;
                    self.completed_once = false;
                }
                false
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CpuIdleWatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CpuIdleWatcher {
    cfg: WatcherConfig,
    /// Substring matched against process command lines (the CLI binary).
    cli_name: String,
    tracker: Weak<SessionTracker>,
    on_complete: Option<CompletionCallback>,
    states: HashMap<u32, ProcState>,
}

impl CpuIdleWatcher {
    pub fn new(cfg: WatcherConfig, cli_name: impl Into<String>, tracker: Weak<SessionTracker>) -> Self {
        Self {
            cfg,
            cli_name: cli_name.into(),
            tracker,
            on_complete: None,
            states: HashMap::new(),
        }
    }

    pub fn with_completion_callback(mut self, cb: CompletionCallback) -> Self {
        self.on_complete = Some(cb);
        self
    }

    /// Run the sampling loop until cancelled.
    pub fn spawn(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        let poll = Duration::from_secs(self.cfg.cpu_poll_secs.max(1));
        tokio::spawn(async move {
            let mut system = System::new_with_specifics(
                RefreshKind::new().with_processes(ProcessRefreshKind::new().with_cpu()),
            );
            let mut tick = tokio::time::interval(poll);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let started = std::time::Instant::now();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        system.refresh_processes_specifics(ProcessRefreshKind::new().with_cpu());
                        self.sample(&system, started.elapsed().as_secs_f64());
                    }
                }
            }
            tracing::debug!("cpu idle watcher stopped");
        })
    }

    /// One sampling pass over the process table.
    fn sample(&mut self, system: &System, now_secs: f64) {
        let Some(tracker) = self.tracker.upgrade() else {
            return;
        };
        let active_ids: Vec<String> = tracker
            .get_active_sessions()
            .into_iter()
            .map(|s| s.id)
            .collect();
        if active_ids.is_empty() {
            self.states.clear();
            return;
        }

        let mut seen: Vec<u32> = Vec::new();
        for (pid, process) in system.processes() {
            let Some(session_id) = self.matched_session(process, &active_ids) else {
                continue;
            };
            let pid = pid.as_u32();
            seen.push(pid);

            let (completed, avg, proc_session) = {
                let state = self
                    .states
                    .entry(pid)
                    .or_insert_with(|| ProcState::new(session_id.clone()));
                // The process may have been reassigned after a resume.
                state.session_id = session_id;
                let completed = state.observe(process.cpu_usage(), now_secs, &self.cfg);
                (completed, state.average(), state.session_id.clone())
            };
            if completed {
                self.fire_completion(&tracker, pid, avg, &proc_session);
            }
        }

        // Forget processes that disappeared.
        self.states.retain(|pid, _| seen.contains(pid));
    }

    /// A process matches when its command line names the CLI and carries
    /// one of the tracked session ids.
    fn matched_session(
        &self,
        process: &sysinfo::Process,
        active_ids: &[String],
    ) -> Option<String> {
        let cmd = process.cmd();
        let names_cli = cmd.iter().any(|arg| arg.contains(&self.cli_name))
            || process.name().contains(&self.cli_name);
        if !names_cli {
            return None;
        }
        active_ids
            .iter()
            .find(|id| cmd.iter().any(|arg| arg.contains(id.as_str())))
            .cloned()
    }

    fn fire_completion(&self, tracker: &SessionTracker, pid: u32, avg: f32, proc_session: &str) {
        TraceEvent::ProcessIdle {
            pid,
            session_id: proc_session.to_owned(),
            avg_cpu: avg,
        }
        .emit();

        // Complete the oldest active session; the tracker's unknown-id
        // rule keeps this idempotent against a racing done-signal.
        let Some(oldest) = tracker.longest_active_session() else {
            return;
        };
        if let Some(record) = tracker.complete_session(&oldest.id) {
            tracing::info!(
                session_id = %record.id,
                pid,
                "session completed via idle detection"
            );
            if let Some(cb) = &self.on_complete {
                cb(record, None);
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
