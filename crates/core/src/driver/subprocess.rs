//! One-shot subprocess driver for the LLM CLI.
//!
//! Each turn spawns the CLI in print mode, writes the prompt to stdin,
//! closes it, and consumes the newline-delimited JSON event stream to
//! EOF. A per-driver mutex serializes turns; cancellation kills the
//! child. The `reset.pending` marker file gates prompt dispatch for a
//! bounded wait before being cleared.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use bud_domain::config::DriverConfig;
use bud_domain::error::{Error, Result};
use bud_domain::trace::TraceEvent;

use super::stream::{self, StreamEvent, TurnResult};
use super::{SessionScratch, TurnDriver, TurnHooks, TurnOutcome};

const RESET_POLL: Duration = Duration::from_millis(500);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SubprocessDriver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SubprocessDriver {
    cfg: DriverConfig,
    marker_path: PathBuf,
    /// Serializes turns: at most one subprocess per driver.
    turn_lock: tokio::sync::Mutex<()>,
    scratch: Arc<SessionScratch>,
    last: Mutex<Option<TurnResult>>,
}

impl SubprocessDriver {
    pub fn new(cfg: DriverConfig, state_dir: &Path) -> Self {
        Self {
            cfg,
            marker_path: state_dir.join("reset.pending"),
            turn_lock: tokio::sync::Mutex::new(()),
            scratch: Arc::new(SessionScratch::new()),
            last: Mutex::new(None),
        }
    }

    /// Block new prompts while `reset.pending` exists, up to the
    /// configured wait. A marker that outlives the wait is logged,
    /// cleared, and the prompt proceeds — never a stall.
    async fn wait_for_reset_marker(&self) {
        if !self.marker_path.exists() {
            return;
        }
        let deadline = Instant::now() + Duration::from_secs(self.cfg.reset_wait_secs);
        while self.marker_path.exists() && Instant::now() < deadline {
            tokio::time::sleep(RESET_POLL).await;
        }
        if self.marker_path.exists() {
            tracing::warn!(
                wait_secs = self.cfg.reset_wait_secs,
                "reset.pending marker outlived its wait; clearing and proceeding"
            );
            if let Err(e) = std::fs::remove_file(&self.marker_path) {
                tracing::warn!(error = %e, "failed to clear reset.pending marker");
            }
        }
    }

    fn build_command(&self, session_id: &str, resume: bool) -> Command {
        let mut cmd = Command::new(&self.cfg.cli_path);
        cmd.arg(&self.cfg.print_flag);
        cmd.args(&self.cfg.stream_args);
        if resume {
            cmd.arg(&self.cfg.session_resume_flag);
        } else {
            cmd.arg(&self.cfg.session_new_flag);
        }
        cmd.arg(session_id);
        if let Some(model) = &self.cfg.model {
            cmd.arg(&self.cfg.model_flag).arg(model);
        }
        cmd.args(&self.cfg.extra_args);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TurnDriver for SubprocessDriver {
    fn scratch(&self) -> Arc<SessionScratch> {
        self.scratch.clone()
    }

    fn should_reset(&self) -> bool {
        self.last
            .lock()
            .as_ref()
            .map(|r| r.usage.context_tokens() > self.cfg.max_context_tokens)
            .unwrap_or(false)
    }

    fn reset(&self, reason: &str) -> Result<()> {
        let (old, new) = self.scratch.reset();
        *self.last.lock() = None;
        if self.marker_path.exists() {
            std::fs::remove_file(&self.marker_path).map_err(Error::Io)?;
        }
        TraceEvent::SessionReset {
            old_session_id: old,
            new_session_id: new,
            reason: reason.to_owned(),
        }
        .emit();
        Ok(())
    }

    fn last_usage(&self) -> Option<TurnResult> {
        self.last.lock().clone()
    }

    async fn run_turn(
        &self,
        prompt: &str,
        hooks: TurnHooks,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome> {
        self.wait_for_reset_marker().await;
        let _guard = self.turn_lock.lock().await;
        let (session_id, resume) = self.scratch.begin_turn();

        let mut child = self
            .build_command(&session_id, resume)
            .spawn()
            .map_err(|e| Error::Driver(format!("spawning {}: {e}", self.cfg.cli_path)))?;

        // Deliver the prompt off-task so a child that floods stdout before
        // reading stdin cannot deadlock the pipes; dropping the handle
        // closes stdin. A write failure usually means the CLI died early;
        // the exit status below reports it.
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = prompt.to_owned();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    tracing::warn!(error = %e, "LLM CLI closed stdin early");
                }
            });
        }

        // Drain stderr in the background so the child never blocks on it.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(line = %line, "llm cli stderr");
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Driver("child stdout not captured".into()))?;
        let mut reader = BufReader::new(stdout);
        let mut outcome = TurnOutcome::default();
        let mut buf: Vec<u8> = Vec::with_capacity(8192);

        loop {
            buf.clear();
            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(Error::Driver("turn cancelled".into()));
                }
                r = reader.read_until(b'\n', &mut buf) => r.map_err(Error::Io)?,
            };
            if read == 0 {
                break;
            }
            if buf.len() > stream::MAX_LINE_BYTES {
                tracing::warn!(bytes = buf.len(), "skipping oversized stream line");
                continue;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match stream::parse_line(line) {
                Ok(StreamEvent::AssistantText(texts)) => {
                    for text in texts {
                        (hooks.on_output)(&text);
                        outcome.text.push_str(&text);
                    }
                }
                Ok(StreamEvent::ContentDelta(text)) => {
                    (hooks.on_output)(&text);
                    outcome.text.push_str(&text);
                }
                Ok(StreamEvent::ToolUse(call)) => {
                    // Observer only; the CLI runs the tool itself.
                    let _ = (hooks.on_tool)(&call);
                }
                Ok(StreamEvent::TurnResult(result)) => {
                    outcome.result = Some(result);
                }
                Ok(StreamEvent::Ignored) => {}
                Ok(StreamEvent::Unknown(event_type)) => {
                    tracing::debug!(event_type = %event_type, "skipping unknown stream event");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unparseable stream line");
                }
            }
        }

        let status = child.wait().await.map_err(Error::Io)?;
        if !status.success() {
            return Err(Error::Driver(format!("LLM CLI exited with {status}")));
        }

        match &outcome.result {
            Some(result) => {
                *self.last.lock() = Some(result.clone());
                TraceEvent::TurnCompleted {
                    session_id,
                    input_tokens: result.usage.input_tokens,
                    output_tokens: result.usage.output_tokens,
                    cache_read_tokens: result.usage.cache_read_tokens,
                    num_turns: result.num_turns,
                    duration_ms: result.duration_ms,
                }
                .emit();
            }
            None => {
                tracing::warn!(session_id = %session_id, "stream ended without a result event");
            }
        }

        Ok(outcome)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
