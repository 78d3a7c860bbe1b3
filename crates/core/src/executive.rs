//! The executive loop — one tick per focused item.
//!
//! dequeue → focus → build context → drive the LLM → validate → record.
//! A failed turn re-enqueues its item and never poisons the loop; user
//! messages are guaranteed a reply through the send-message fallback
//! when the model never invoked a user-facing tool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bud_domain::error::Result;
use bud_domain::item::PendingItem;
use bud_domain::trace::TraceEvent;

use crate::context::render_prompt;
use crate::driver::TurnHooks;
use crate::state::CoreState;

/// Tool-name suffixes that count as a reply to the user. Suffix matching
/// tolerates adapter-specific prefixes (`bud_send_message`, ...).
const REPLY_TOOL_SUFFIXES: &[&str] = &[
    "talk_to_user",
    "send_message",
    "respond_to_user",
    "discord_react",
];

const FALLBACK_ERROR_LINE: &str =
    "I hit an internal error while composing a reply. Please try again.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executive
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Executive {
    state: CoreState,
    notify: mpsc::Receiver<()>,
}

impl Executive {
    pub fn new(state: CoreState, notify: mpsc::Receiver<()>) -> Self {
        Self { state, notify }
    }

    /// Run until cancelled: wake on queue notifications or the idle tick,
    /// then drain whatever attention admits.
    pub async fn run(mut self, cancel: CancellationToken) {
        let tick = Duration::from_secs(self.state.config.runtime.tick_secs.max(1));
        tracing::info!("executive loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.notify.recv() => {}
                _ = tokio::time::sleep(tick) => {}
            }
            self.tick(&cancel).await;
        }
        tracing::info!("executive loop stopped");
    }

    /// One scheduling pass: housekeeping, then process admitted items
    /// until attention returns none or a turn fails.
    pub async fn tick(&self, cancel: &CancellationToken) {
        let state = &self.state;
        state.attention.prune_modes();
        state.attention.decay_arousal(state.config.runtime.arousal_decay);
        state
            .queue
            .expire_old(Duration::from_secs(state.config.queue.max_age_secs));
        tracing::trace!(
            queue_len = state.queue.len(),
            arousal = state.attention.arousal(),
            "scheduling pass"
        );

        loop {
            if cancel.is_cancelled() {
                return;
            }
            let Some(item) = state.attention.select_next(&state.queue) else {
                return;
            };

            // Budget gate: wake impulses are skipped when the daily
            // budget is spent; user messages always go through.
            if item.is_autonomous() {
                if let Err(denied) = state.tracker.can_do_autonomous_work() {
                    TraceEvent::BudgetDenied {
                        reason: denied.reason.clone(),
                    }
                    .emit();
                    tracing::info!(item_id = %item.id, reason = %denied.reason, "skipping wake impulse");
                    continue;
                }
            }

            state.attention.focus(item.clone());
            let result = self.process_item(&item, cancel).await;
            state.attention.complete();

            if let Err(e) = result {
                tracing::warn!(item_id = %item.id, error = %e, "turn failed; item re-enqueued");
                state.queue.add(item);
                // Retry on a later tick rather than hot-looping.
                return;
            }
        }
    }

    /// Process one focused item end to end.
    pub async fn process_item(
        &self,
        item: &PendingItem,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let state = &self.state;
        tracing::debug!(item_id = %item.id, item_type = %item.item_type, "waking for item");

        // Typing indicator is best-effort.
        if let Some(channel) = &item.channel_id {
            if let Err(e) = state.actions.typing(channel).await {
                tracing::debug!(error = %e, "typing indicator failed");
            }
        }

        // Assemble and render the context bundle.
        let scratch = state.driver.scratch();
        let bundle = state.builder.build(item, &scratch).await?;
        let prompt = render_prompt(&bundle);

        // Install the turn hooks: accumulate text, watch for a
        // user-facing tool call.
        let captured: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
        let user_got_response = Arc::new(AtomicBool::new(false));
        let hooks = {
            let captured = captured.clone();
            let user_got_response = user_got_response.clone();
            TurnHooks {
                on_output: Arc::new(move |text| captured.lock().push_str(text)),
                on_tool: Arc::new(move |call| {
                    if REPLY_TOOL_SUFFIXES
                        .iter()
                        .any(|suffix| call.name.ends_with(suffix))
                    {
                        user_got_response.store(true, Ordering::SeqCst);
                    }
                    // Unknown tools are fine; the CLI executes them itself.
                    "observed".to_owned()
                }),
            }
        };

        // A prior turn may have left the context over budget.
        if state.driver.should_reset() {
            state.driver.reset("context budget exceeded")?;
        }

        let session_id = scratch.session_id();
        state.tracker.start_session(&session_id, &item.id);
        TraceEvent::TurnStarted {
            session_id: session_id.clone(),
            focus_id: item.id.clone(),
            resume: scratch.last_buffer_sync().is_some(),
        }
        .emit();

        // Drive the turn. On error the caller re-enqueues; the session
        // stays active for the watchers to close out.
        let outcome = state
            .driver
            .run_turn(&prompt, hooks, cancel.clone())
            .await?;

        // One-shot model: subprocess exit is the completion path.
        state.tracker.complete_session(&session_id);
        if let Some(result) = &outcome.result {
            state.tracker.set_session_usage(
                &session_id,
                result.usage.input_tokens,
                result.usage.output_tokens,
                result.usage.cache_create_tokens,
                result.usage.cache_read_tokens,
                result.num_turns,
            );
        }

        scratch.mark_item_seen(&item.id);
        state.reflex.mark_all_sent();
        scratch.set_last_buffer_sync(Utc::now());

        // Forward memory ratings when the model provided them.
        if let Some(ratings) = extract_memory_eval(&outcome.text) {
            if let Some(cb) = &state.on_memory_eval {
                cb(ratings);
            }
        }

        // Response enforcement: a user message without a tool-mediated
        // reply gets the captured text (or the canned line) directly.
        if item.requires_reply() && !user_got_response.load(Ordering::SeqCst) {
            if let Some(channel) = &item.channel_id {
                let text = captured.lock().clone();
                let had_text = !text.trim().is_empty();
                let fallback = if had_text {
                    text
                } else {
                    FALLBACK_ERROR_LINE.to_owned()
                };
                state.actions.send_message(channel, &fallback).await?;
                TraceEvent::FallbackReply {
                    item_id: item.id.clone(),
                    channel_id: channel.clone(),
                    had_text,
                }
                .emit();
            } else {
                tracing::warn!(item_id = %item.id, "reply required but item has no channel");
            }
        }

        Ok(())
    }
}

/// Extract `<memory_eval>{"trace": rating, ...}</memory_eval>` from the
/// accumulated turn output.
pub fn extract_memory_eval(output: &str) -> Option<HashMap<String, i64>> {
    // The pattern is a literal; compile failure is unreachable.
    let re = Regex::new(r"(?s)<memory_eval>(.*?)</memory_eval>").ok()?;
    let inner = re.captures(output)?.get(1)?.as_str().trim();
    match serde_json::from_str::<HashMap<String, serde_json::Value>>(inner) {
        Ok(map) => Some(
            map.into_iter()
                .filter_map(|(k, v)| v.as_i64().map(|n| (k, n)))
                .collect(),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "unparseable memory_eval block");
            None
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use bud_buffer::BufferManager;
    use bud_domain::config::Config;
    use bud_domain::error::Error;
    use bud_domain::item::{Priority, TYPE_USER_INPUT, TYPE_WAKE};
    use bud_memory::types::{EpisodeIngestRequest, RetrieveResponse, Trace};
    use bud_memory::{Embedder, Graph};

    use crate::attention::Attention;
    use crate::context::ContextBuilder;
    use crate::driver::stream::{ToolCall, TurnResult, TurnUsage};
    use crate::driver::{SessionScratch, TurnDriver, TurnOutcome};
    use crate::queue::PendingQueue;
    use crate::reflex::ReflexLog;
    use crate::tracker::SessionTracker;
    use crate::transport::OutboxWriter;

    // ── Scripted driver ──────────────────────────────────────────────

    struct ScriptedTurn {
        text: String,
        tools: Vec<ToolCall>,
        result: Option<TurnResult>,
        fail: bool,
    }

    impl ScriptedTurn {
        fn text_only(text: &str) -> Self {
            Self {
                text: text.into(),
                tools: Vec::new(),
                result: Some(TurnResult::default()),
                fail: false,
            }
        }
    }

    struct ScriptedDriver {
        scratch: Arc<SessionScratch>,
        turns: Mutex<VecDeque<ScriptedTurn>>,
        over_budget: AtomicBool,
        resets: AtomicUsize,
    }

    impl ScriptedDriver {
        fn new(turns: Vec<ScriptedTurn>) -> Self {
            Self {
                scratch: Arc::new(SessionScratch::new()),
                turns: Mutex::new(turns.into()),
                over_budget: AtomicBool::new(false),
                resets: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TurnDriver for ScriptedDriver {
        fn scratch(&self) -> Arc<SessionScratch> {
            self.scratch.clone()
        }

        fn should_reset(&self) -> bool {
            self.over_budget.load(Ordering::SeqCst)
        }

        fn reset(&self, _reason: &str) -> Result<()> {
            self.scratch.reset();
            self.over_budget.store(false, Ordering::SeqCst);
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn last_usage(&self) -> Option<TurnResult> {
            None
        }

        async fn run_turn(
            &self,
            _prompt: &str,
            hooks: TurnHooks,
            _cancel: CancellationToken,
        ) -> Result<TurnOutcome> {
            let turn = self
                .turns
                .lock()
                .pop_front()
                .expect("script exhausted");
            if turn.fail {
                return Err(Error::Driver("scripted failure".into()));
            }
            self.scratch.begin_turn();
            (hooks.on_output)(&turn.text);
            for tool in &turn.tools {
                let _ = (hooks.on_tool)(tool);
            }
            // A turn whose usage overflows the window flags the reset.
            if let Some(result) = &turn.result {
                if result.usage.context_tokens() > 150_000 {
                    self.over_budget.store(true, Ordering::SeqCst);
                }
            }
            Ok(TurnOutcome {
                text: turn.text,
                result: turn.result,
            })
        }
    }

    // ── Fakes for the builder ────────────────────────────────────────

    #[derive(Default)]
    struct NullGraph;

    #[async_trait]
    impl Graph for NullGraph {
        async fn retrieve(&self, _e: Vec<f32>, _q: &str, _l: u32) -> Result<RetrieveResponse> {
            Ok(RetrieveResponse::default())
        }
        async fn get_activated_traces(&self, _t: f64, _l: u32) -> Result<Vec<Trace>> {
            Ok(Vec::new())
        }
        async fn get_core_traces(&self) -> Result<Vec<Trace>> {
            Ok(Vec::new())
        }
        async fn boost_trace_access(&self, _ids: &[String], _a: f64) -> Result<()> {
            Ok(())
        }
        async fn ingest_episode(&self, _r: EpisodeIngestRequest) -> Result<()> {
            Ok(())
        }
        async fn consolidate(&self) -> Result<()> {
            Ok(())
        }
        async fn decay_activation(&self) -> Result<()> {
            Ok(())
        }
        async fn flush(&self) -> Result<()> {
            Ok(())
        }
        async fn reset(&self) -> Result<()> {
            Ok(())
        }
    }

    struct NullEmbedder;

    #[async_trait]
    impl Embedder for NullEmbedder {
        async fn embed(&self, _t: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0])
        }
    }

    // ── Harness ──────────────────────────────────────────────────────

    struct Harness {
        executive: Executive,
        state: CoreState,
        dir: tempfile::TempDir,
    }

    fn harness(driver: Arc<dyn TurnDriver>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.queue.persist = false;
        let config = Arc::new(config);

        let graph: Arc<dyn Graph> = Arc::new(NullGraph);
        let embedder: Arc<dyn Embedder> = Arc::new(NullEmbedder);
        let buffer = Arc::new(BufferManager::new(config.buffer.clone(), dir.path()));
        let reflex = Arc::new(ReflexLog::default());
        let attention = Arc::new(Attention::new(config.attention.clone()));
        let (queue, notify) = PendingQueue::new(config.queue.clone(), dir.path());
        let queue = Arc::new(queue);
        let tracker =
            Arc::new(SessionTracker::new(config.budgets.clone(), dir.path()).unwrap());
        let builder = Arc::new(ContextBuilder::new(
            graph.clone(),
            embedder.clone(),
            buffer.clone(),
            reflex.clone(),
            attention.clone(),
            config.graph.clone(),
            dir.path(),
            None,
        ));
        let actions = Arc::new(OutboxWriter::new(dir.path()));

        let state = CoreState {
            config,
            graph,
            embedder,
            buffer,
            reflex,
            queue,
            attention,
            driver,
            builder,
            tracker,
            actions,
            on_memory_eval: None,
        };
        Harness {
            executive: Executive::new(state.clone(), notify),
            state,
            dir,
        }
    }

    fn outbox_actions(dir: &std::path::Path, action_type: &str) -> Vec<serde_json::Value> {
        let Ok(raw) = std::fs::read_to_string(dir.join("outbox.jsonl")) else {
            return Vec::new();
        };
        raw.lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap())
            .filter(|a| a["type"] == action_type)
            .collect()
    }

    fn user_item(id: &str, content: &str) -> PendingItem {
        let mut item = PendingItem::new(id, TYPE_USER_INPUT, Priority::P1);
        item.content = content.into();
        item.channel_id = Some("c-1".into());
        item
    }

    // ── Scenarios ────────────────────────────────────────────────────

    #[tokio::test]
    async fn text_only_turn_falls_back_to_send_message() {
        let driver = Arc::new(ScriptedDriver::new(vec![ScriptedTurn::text_only(
            "Here's my answer.",
        )]));
        let h = harness(driver);

        h.executive
            .process_item(&user_item("i-1", "question?"), &CancellationToken::new())
            .await
            .unwrap();

        let sends = outbox_actions(h.dir.path(), "send_message");
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0]["payload"]["channel_id"], "c-1");
        assert_eq!(sends[0]["payload"]["text"], "Here's my answer.");
    }

    #[tokio::test]
    async fn tool_reply_suppresses_the_fallback() {
        let driver = Arc::new(ScriptedDriver::new(vec![ScriptedTurn {
            text: "sent via tool".into(),
            tools: vec![ToolCall {
                name: "bud_send_message".into(),
                args: serde_json::json!({}),
                id: "t1".into(),
            }],
            result: Some(TurnResult::default()),
            fail: false,
        }]));
        let h = harness(driver);

        h.executive
            .process_item(&user_item("i-1", "question?"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outbox_actions(h.dir.path(), "send_message").is_empty());
    }

    #[tokio::test]
    async fn empty_output_sends_the_canned_line() {
        let driver = Arc::new(ScriptedDriver::new(vec![ScriptedTurn::text_only("")]));
        let h = harness(driver);

        h.executive
            .process_item(&user_item("i-1", "question?"), &CancellationToken::new())
            .await
            .unwrap();

        let sends = outbox_actions(h.dir.path(), "send_message");
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0]["payload"]["text"], FALLBACK_ERROR_LINE);
    }

    #[tokio::test]
    async fn autonomous_items_skip_the_fallback() {
        let driver = Arc::new(ScriptedDriver::new(vec![ScriptedTurn::text_only(
            "internal musing",
        )]));
        let h = harness(driver);

        let mut wake = PendingItem::new("w-1", TYPE_WAKE, Priority::P3);
        wake.channel_id = Some("c-1".into());
        h.executive
            .process_item(&wake, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outbox_actions(h.dir.path(), "send_message").is_empty());
    }

    #[tokio::test]
    async fn overflowing_turn_resets_before_the_next_prompt() {
        let over = TurnResult {
            usage: TurnUsage {
                input_tokens: 60_000,
                cache_read_tokens: 100_000,
                ..Default::default()
            },
            ..Default::default()
        };
        let driver = Arc::new(ScriptedDriver::new(vec![
            ScriptedTurn {
                text: "big turn".into(),
                tools: Vec::new(),
                result: Some(over),
                fail: false,
            },
            ScriptedTurn::text_only("fresh turn"),
        ]));
        let h = harness(driver.clone());

        let scratch = driver.scratch();
        let first_session = scratch.session_id();

        h.executive
            .process_item(&user_item("i-1", "q1"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(driver.should_reset());
        assert!(scratch.last_buffer_sync().is_some());

        h.executive
            .process_item(&user_item("i-2", "q2"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(driver.resets.load(Ordering::SeqCst), 1);
        assert_ne!(scratch.session_id(), first_session);
        // Both turns were tracked under their own session ids.
        let totals = h.state.tracker.today_token_usage();
        assert_eq!(totals.input, 60_000);
    }

    #[tokio::test]
    async fn failed_turn_reenqueues_and_stops_the_drain() {
        let driver = Arc::new(ScriptedDriver::new(vec![ScriptedTurn {
            text: String::new(),
            tools: Vec::new(),
            result: None,
            fail: true,
        }]));
        let h = harness(driver);

        h.state.queue.add(user_item("i-1", "question?"));
        h.executive.tick(&CancellationToken::new()).await;

        // The item came back for a later retry and attention is clear.
        assert_eq!(h.state.queue.len(), 1);
        assert!(h.state.attention.current().is_none());
    }

    #[tokio::test]
    async fn budget_gate_drops_wake_impulses_but_not_user_input() {
        let driver = Arc::new(ScriptedDriver::new(vec![ScriptedTurn::text_only("reply")]));
        let dir = tempfile::tempdir().unwrap();

        // Zero-token budget: autonomous work is always denied.
        let mut config = Config::default();
        config.queue.persist = false;
        config.budgets.daily_token_limit = Some(0);
        let config = Arc::new(config);

        let graph: Arc<dyn Graph> = Arc::new(NullGraph);
        let embedder: Arc<dyn Embedder> = Arc::new(NullEmbedder);
        let buffer = Arc::new(BufferManager::new(config.buffer.clone(), dir.path()));
        let reflex = Arc::new(ReflexLog::default());
        let attention = Arc::new(Attention::new(config.attention.clone()));
        let (queue, notify) = PendingQueue::new(config.queue.clone(), dir.path());
        let queue = Arc::new(queue);
        let tracker =
            Arc::new(SessionTracker::new(config.budgets.clone(), dir.path()).unwrap());
        let builder = Arc::new(ContextBuilder::new(
            graph.clone(),
            embedder.clone(),
            buffer.clone(),
            reflex.clone(),
            attention.clone(),
            config.graph.clone(),
            dir.path(),
            None,
        ));
        let actions = Arc::new(OutboxWriter::new(dir.path()));
        let state = CoreState {
            config,
            graph,
            embedder,
            buffer,
            reflex,
            queue: queue.clone(),
            attention,
            driver,
            builder,
            tracker,
            actions,
            on_memory_eval: None,
        };
        let executive = Executive::new(state, notify);

        let mut wake = PendingItem::new("w-1", TYPE_WAKE, Priority::P2);
        wake.salience = 0.9;
        queue.add(wake);
        queue.add(user_item("i-1", "still here?"));

        executive.tick(&CancellationToken::new()).await;

        // The wake was dropped, the user message was processed.
        assert_eq!(queue.len(), 0);
        let sends = outbox_actions(dir.path(), "send_message");
        assert_eq!(sends.len(), 1);
    }

    #[tokio::test]
    async fn memory_eval_block_is_extracted_and_forwarded() {
        let output = r#"Thinking done.
<memory_eval>{"trace-1": 5, "trace-2": 2}</memory_eval>
All set."#;
        let ratings = extract_memory_eval(output).unwrap();
        assert_eq!(ratings.get("trace-1"), Some(&5));
        assert_eq!(ratings.get("trace-2"), Some(&2));

        assert!(extract_memory_eval("no block here").is_none());
        assert!(extract_memory_eval("<memory_eval>not json</memory_eval>").is_none());
    }
}
