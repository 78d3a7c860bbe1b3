//! Multi-tier context assembly for one focus item.
//!
//! Tier order: core identity, conversation buffer (with authorization
//! scan), reflex log, memory retrieval (dual-trigger with an
//! activation fallback), suspension stack. Retrieval is skipped for
//! wake items — wake-time queries have low precision and mostly surface
//! noise.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use bud_buffer::{BufferManager, EntryFilter, Scope};
use bud_domain::config::GraphConfig;
use bud_domain::error::Result;
use bud_domain::item::{PendingItem, TYPE_WAKE};
use bud_domain::trace::TraceEvent;
use bud_memory::{Embedder, Graph};

use crate::attention::Attention;
use crate::driver::SessionScratch;
use crate::reflex::{ReflexEntry, ReflexLog};

use super::authorization::AuthorizationClassifier;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bundle types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A retrieved memory with its per-session display id.
#[derive(Debug, Clone)]
pub struct RecalledMemory {
    pub id: String,
    pub summary: String,
    pub relevance: f64,
    pub timestamp: Option<DateTime<Utc>>,
    /// Stable within the session: `M1`, `M2`, ...
    pub display_id: String,
}

/// Everything one turn's prompt is rendered from. References its inputs;
/// built fresh per turn and discarded after rendering.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub core_identity: String,
    pub session_started: DateTime<Utc>,
    pub reflex_log: Vec<ReflexEntry>,
    pub memories: Vec<RecalledMemory>,
    /// Distinct traces already shown earlier in this session.
    pub prior_memories_count: usize,
    pub buffer_content: String,
    pub has_authorizations: bool,
    pub suspended: Vec<PendingItem>,
    pub current_focus: PendingItem,
    pub wakeup_instructions: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ContextBuilder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ContextBuilder {
    graph: Arc<dyn Graph>,
    embedder: Arc<dyn Embedder>,
    buffer: Arc<BufferManager>,
    reflex: Arc<ReflexLog>,
    attention: Arc<Attention>,
    classifier: AuthorizationClassifier,
    cfg: GraphConfig,
    /// `<state>/system/core.md` — when present its contents are the core
    /// identity verbatim, skipping the graph round-trip.
    core_identity_path: PathBuf,
    wakeup_instructions: Option<String>,
}

impl ContextBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<dyn Graph>,
        embedder: Arc<dyn Embedder>,
        buffer: Arc<BufferManager>,
        reflex: Arc<ReflexLog>,
        attention: Arc<Attention>,
        cfg: GraphConfig,
        state_dir: &std::path::Path,
        wakeup_instructions: Option<String>,
    ) -> Self {
        Self {
            graph,
            embedder,
            buffer,
            reflex,
            attention,
            classifier: AuthorizationClassifier::new(),
            cfg,
            core_identity_path: state_dir.join("system").join("core.md"),
            wakeup_instructions,
        }
    }

    /// Assemble the bundle for one focus item. Graph failures degrade the
    /// affected tier to empty rather than failing the turn.
    pub async fn build(
        &self,
        focus: &PendingItem,
        scratch: &SessionScratch,
    ) -> Result<ContextBundle> {
        let core_identity = self.core_identity().await;
        let (buffer_content, has_authorizations) = self.buffer_tier(focus).await;
        let reflex_log = self.reflex.unsent();

        let prior_memories_count = scratch.shown_memory_count();
        let memories = if focus.item_type == TYPE_WAKE {
            Vec::new()
        } else {
            self.retrieve_memories(focus, scratch).await
        };

        if !memories.is_empty() {
            let ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
            if let Err(e) = self
                .graph
                .boost_trace_access(&ids, self.cfg.boost_alpha)
                .await
            {
                tracing::warn!(error = %e, "failed to boost surfaced traces");
            }
        }

        let snapshot = self.attention.snapshot();
        let bundle = ContextBundle {
            core_identity,
            session_started: scratch.started_at(),
            reflex_log,
            memories,
            prior_memories_count,
            buffer_content,
            has_authorizations,
            suspended: snapshot.suspended,
            current_focus: focus.clone(),
            wakeup_instructions: if focus.item_type == TYPE_WAKE {
                self.wakeup_instructions.clone()
            } else {
                None
            },
        };

        TraceEvent::ContextBuilt {
            focus_id: focus.id.clone(),
            memories: bundle.memories.len(),
            buffer_chars: bundle.buffer_content.len(),
            has_authorizations: bundle.has_authorizations,
        }
        .emit();

        Ok(bundle)
    }

    // ── Tiers ────────────────────────────────────────────────────────

    /// Core identity: the cached file verbatim when present, else the
    /// graph's core traces joined.
    async fn core_identity(&self) -> String {
        if let Ok(cached) = std::fs::read_to_string(&self.core_identity_path) {
            return cached;
        }
        match self.graph.get_core_traces().await {
            Ok(traces) => traces
                .iter()
                .map(|t| t.summary.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
            Err(e) => {
                tracing::warn!(error = %e, "core identity unavailable");
                String::new()
            }
        }
    }

    /// Buffer content for the focus scope (full first-sync read, focus
    /// item excluded) plus the authorization scan over entries and
    /// summary.
    async fn buffer_tier(&self, focus: &PendingItem) -> (String, bool) {
        let scope = Scope::for_message(focus.channel_id.as_deref(), &focus.id);
        let filter = EntryFilter {
            exclude_id: Some(focus.id.clone()),
            exclude_bot_author: None,
        };
        let slice = self
            .buffer
            .get_entries_since_filtered(&scope, None, &filter)
            .await;

        let mut has_authorizations = slice
            .entries
            .iter()
            .any(|e| self.classifier.matches(&e.content));

        let mut content = String::new();
        if let Some(summary) = &slice.summary {
            has_authorizations = has_authorizations || self.classifier.matches(summary);
            content.push_str("[Earlier context summary]\n");
            content.push_str(summary);
            content.push('\n');
        }
        if !slice.entries.is_empty() {
            content.push_str("[Recent messages]\n");
            for entry in &slice.entries {
                content.push_str(&entry.format_line());
                content.push('\n');
            }
        }
        (content, has_authorizations)
    }

    /// Dual-trigger retrieval with the activation fallback, mapped to
    /// display ids.
    async fn retrieve_memories(
        &self,
        focus: &PendingItem,
        scratch: &SessionScratch,
    ) -> Vec<RecalledMemory> {
        let mut traces = match self.embedder.embed(&focus.content).await {
            Ok(embedding) => match self
                .graph
                .retrieve(embedding, &focus.content, self.cfg.retrieve_limit)
                .await
            {
                Ok(resp) => resp.traces,
                Err(e) => {
                    tracing::warn!(error = %e, "memory retrieval failed");
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed; skipping semantic retrieval");
                Vec::new()
            }
        };

        if traces.is_empty() {
            traces = match self
                .graph
                .get_activated_traces(self.cfg.activation_threshold, self.cfg.retrieve_limit)
                .await
            {
                Ok(traces) => traces,
                Err(e) => {
                    tracing::warn!(error = %e, "activated-trace fallback failed");
                    Vec::new()
                }
            };
        }

        traces
            .into_iter()
            .map(|t| RecalledMemory {
                display_id: scratch.display_id(&t.id),
                id: t.id,
                summary: t.summary,
                relevance: t.relevance,
                timestamp: t.timestamp,
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use bud_buffer::BufferEntry;
    use bud_domain::config::{AttentionConfig, BufferConfig};
    use bud_domain::item::{Priority, TYPE_USER_INPUT};
    use bud_memory::types::{EpisodeIngestRequest, RetrieveResponse, Trace};

    #[derive(Default)]
    struct FakeGraph {
        retrieve_traces: Vec<Trace>,
        activated_traces: Vec<Trace>,
        core_traces: Vec<Trace>,
        boosted: Mutex<Vec<(Vec<String>, f64)>>,
    }

    #[async_trait]
    impl Graph for FakeGraph {
        async fn retrieve(
            &self,
            _embedding: Vec<f32>,
            _query: &str,
            _limit: u32,
        ) -> Result<RetrieveResponse> {
            Ok(RetrieveResponse {
                traces: self.retrieve_traces.clone(),
            })
        }

        async fn get_activated_traces(
            &self,
            _threshold: f64,
            _limit: u32,
        ) -> Result<Vec<Trace>> {
            Ok(self.activated_traces.clone())
        }

        async fn get_core_traces(&self) -> Result<Vec<Trace>> {
            Ok(self.core_traces.clone())
        }

        async fn boost_trace_access(&self, ids: &[String], alpha: f64) -> Result<()> {
            self.boosted.lock().push((ids.to_vec(), alpha));
            Ok(())
        }

        async fn ingest_episode(&self, _req: EpisodeIngestRequest) -> Result<()> {
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

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    fn trace(id: &str, summary: &str) -> Trace {
        Trace {
            id: id.into(),
            summary: summary.into(),
            relevance: 0.8,
            timestamp: Some(Utc::now()),
        }
    }

    fn builder_with(
        graph: Arc<FakeGraph>,
        dir: &std::path::Path,
    ) -> (ContextBuilder, Arc<BufferManager>) {
        let buffer = Arc::new(BufferManager::new(BufferConfig::default(), dir));
        let builder = ContextBuilder::new(
            graph,
            Arc::new(FakeEmbedder),
            buffer.clone(),
            Arc::new(ReflexLog::default()),
            Arc::new(Attention::new(AttentionConfig::default())),
            GraphConfig::default(),
            dir,
            Some("Check your reminders.".into()),
        );
        (builder, buffer)
    }

    fn user_item(id: &str, content: &str, channel: &str) -> PendingItem {
        let mut item = PendingItem::new(id, TYPE_USER_INPUT, Priority::P1);
        item.content = content.into();
        item.channel_id = Some(channel.into());
        item
    }

    #[tokio::test]
    async fn retrieval_assigns_stable_display_ids_and_boosts() {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(FakeGraph {
            retrieve_traces: vec![trace("t-a", "likes rust"), trace("t-b", "ships on fridays")],
            ..Default::default()
        });
        let (builder, _buffer) = builder_with(graph.clone(), dir.path());
        let scratch = SessionScratch::new();

        let first = builder
            .build(&user_item("i-1", "what do I like?", "c-1"), &scratch)
            .await
            .unwrap();
        assert_eq!(first.memories.len(), 2);
        assert_eq!(first.memories[0].display_id, "M1");
        assert_eq!(first.prior_memories_count, 0);

        let second = builder
            .build(&user_item("i-2", "again?", "c-1"), &scratch)
            .await
            .unwrap();
        // Same traces keep their ids; both were already shown.
        assert_eq!(second.memories[0].display_id, "M1");
        assert_eq!(second.memories[1].display_id, "M2");
        assert_eq!(second.prior_memories_count, 2);

        let boosted = graph.boosted.lock();
        assert_eq!(boosted.len(), 2);
        assert_eq!(boosted[0].0, vec!["t-a".to_string(), "t-b".to_string()]);
        assert!((boosted[0].1 - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn wake_items_skip_retrieval_and_carry_instructions() {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(FakeGraph {
            retrieve_traces: vec![trace("t-a", "noise")],
            ..Default::default()
        });
        let (builder, _buffer) = builder_with(graph.clone(), dir.path());
        let scratch = SessionScratch::new();

        let mut wake = PendingItem::new("w-1", TYPE_WAKE, Priority::P3);
        wake.content = "morning wake".into();
        let bundle = builder.build(&wake, &scratch).await.unwrap();

        assert!(bundle.memories.is_empty());
        assert!(graph.boosted.lock().is_empty());
        assert_eq!(
            bundle.wakeup_instructions.as_deref(),
            Some("Check your reminders.")
        );
    }

    #[tokio::test]
    async fn empty_retrieval_falls_back_to_activated_traces() {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(FakeGraph {
            activated_traces: vec![trace("t-act", "lingering thought")],
            ..Default::default()
        });
        let (builder, _buffer) = builder_with(graph, dir.path());
        let scratch = SessionScratch::new();

        let bundle = builder
            .build(&user_item("i-1", "anything?", "c-1"), &scratch)
            .await
            .unwrap();
        assert_eq!(bundle.memories.len(), 1);
        assert_eq!(bundle.memories[0].id, "t-act");
    }

    #[tokio::test]
    async fn buffer_tier_excludes_focus_and_flags_authorizations() {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(FakeGraph::default());
        let (builder, buffer) = builder_with(graph, dir.path());
        let scratch = SessionScratch::new();

        let scope = Scope::channel("c-1");
        buffer
            .add(&scope, BufferEntry::new("m-1", "dan", "go ahead and deploy"))
            .await;
        buffer
            .add(&scope, BufferEntry::new("i-1", "dan", "the focus message"))
            .await;

        let bundle = builder
            .build(&user_item("i-1", "the focus message", "c-1"), &scratch)
            .await
            .unwrap();

        assert!(bundle.has_authorizations);
        assert!(bundle.buffer_content.contains("go ahead and deploy"));
        assert!(!bundle.buffer_content.contains("the focus message"));
    }

    #[tokio::test]
    async fn cached_core_identity_file_wins_over_graph() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("system")).unwrap();
        std::fs::write(dir.path().join("system/core.md"), "# I am Bud\n").unwrap();

        let graph = Arc::new(FakeGraph {
            core_traces: vec![trace("t-core", "graph identity")],
            ..Default::default()
        });
        let (builder, _buffer) = builder_with(graph, dir.path());
        let scratch = SessionScratch::new();

        let bundle = builder
            .build(&user_item("i-1", "hi", "c-1"), &scratch)
            .await
            .unwrap();
        assert_eq!(bundle.core_identity, "# I am Bud\n");
    }
}
