//! Per-scope buffer store with filtered reads and JSON persistence.
//!
//! One coarse read/write lock guards all scopes; compression runs under
//! the write lock so readers never observe a half-folded scope.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use bud_domain::config::BufferConfig;
use bud_domain::error::{Error, Result};
use bud_domain::trace::TraceEvent;

use crate::compress::{self, Summarizer};
use crate::entry::BufferEntry;
use crate::scope::Scope;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Conversation state for one scope.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BufferState {
    /// Raw entries, insertion-ordered. Older entries fold into `summary`.
    pub entries: Vec<BufferEntry>,
    /// Accumulated compression output; grows across compressions.
    #[serde(default)]
    pub summary: String,
    /// Invariant: equals the sum of `entries[*].token_count`.
    #[serde(default)]
    pub token_count: u32,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl BufferState {
    fn recompute_tokens(&mut self) {
        self.token_count = self.entries.iter().map(|e| e.token_count).sum();
    }
}

/// Read filter for [`BufferManager::get_entries_since_filtered`].
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    /// Drop this one entry (typically the focus item's own message).
    pub exclude_id: Option<String>,
    /// Drop entries by this author — incremental syncs only; the first
    /// sync includes them so the model sees its own earlier replies.
    pub exclude_bot_author: Option<String>,
}

/// Result of a filtered read.
#[derive(Debug, Clone, Default)]
pub struct SyncSlice {
    pub entries: Vec<BufferEntry>,
    /// Present only on a first sync (`since` unset) with a non-empty
    /// summary.
    pub summary: Option<String>,
}

/// Aggregate counters for the stats log line.
#[derive(Debug, Clone, Serialize)]
pub struct BufferStats {
    pub scopes: usize,
    pub total_entries: usize,
    pub total_tokens: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BufferManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Owns every scope's conversation state, backed by `buffers.json`.
pub struct BufferManager {
    cfg: BufferConfig,
    path: PathBuf,
    summarizer: Option<Arc<dyn Summarizer>>,
    scopes: RwLock<HashMap<Scope, BufferState>>,
}

impl BufferManager {
    pub fn new(cfg: BufferConfig, state_dir: &Path) -> Self {
        Self {
            cfg,
            path: state_dir.join("buffers.json"),
            summarizer: None,
            scopes: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Append an entry to a scope, estimating its token count when unset,
    /// and compress the scope if it has outgrown its token or age budget.
    ///
    /// A summarizer failure is logged and absorbed; the buffer is left
    /// unchanged and compression is retried on the next `add`.
    pub async fn add(&self, scope: &Scope, entry: BufferEntry) {
        let entry = entry.with_estimated_tokens();
        let now = Utc::now();

        let mut scopes = self.scopes.write().await;
        let state = scopes.entry(scope.clone()).or_default();
        state.token_count += entry.token_count;
        state.entries.push(entry);
        state.updated_at = now;

        let over_tokens = state.token_count > self.cfg.max_tokens;
        let over_age = state
            .entries
            .first()
            .map(|e| now - e.timestamp > Duration::seconds(self.cfg.max_age_secs as i64))
            .unwrap_or(false);
        if !(over_tokens || over_age) {
            return;
        }

        match compress::compress(
            &state.entries,
            self.summarizer.as_deref(),
            self.cfg.keep_recent,
        )
        .await
        {
            Ok(Some(c)) => {
                state.entries.drain(..c.fold_count);
                compress::append_summary(&mut state.summary, &c.summary_fragment);
                state.recompute_tokens();
                state.updated_at = now;
                TraceEvent::BufferCompressed {
                    scope: scope.to_string(),
                    entries_folded: c.fold_count,
                    entries_kept: state.entries.len(),
                    tokens_after: state.token_count,
                }
                .emit();
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(scope = %scope, error = %e, "buffer compression failed; will retry");
            }
        }
    }

    /// Entries newer than `since`, filtered. `since = None` is a first
    /// sync: every entry qualifies and the summary rides along.
    pub async fn get_entries_since_filtered(
        &self,
        scope: &Scope,
        since: Option<DateTime<Utc>>,
        filter: &EntryFilter,
    ) -> SyncSlice {
        let scopes = self.scopes.read().await;
        let Some(state) = scopes.get(scope) else {
            return SyncSlice::default();
        };

        let first_sync = since.is_none();
        let entries = state
            .entries
            .iter()
            .filter(|e| match since {
                Some(t) => e.timestamp > t,
                None => true,
            })
            .filter(|e| filter.exclude_id.as_deref() != Some(e.id.as_str()))
            .filter(|e| {
                // First-sync exception: the bot's own messages stay in.
                first_sync || filter.exclude_bot_author.as_deref() != Some(e.author.as_str())
            })
            .cloned()
            .collect();

        let summary = if first_sync && !state.summary.is_empty() {
            Some(state.summary.clone())
        } else {
            None
        };

        SyncSlice { entries, summary }
    }

    /// Render a scope for display: summary header plus formatted lines.
    pub async fn get_context(&self, scope: &Scope) -> String {
        let scopes = self.scopes.read().await;
        let Some(state) = scopes.get(scope) else {
            return String::new();
        };

        let mut out = String::new();
        if !state.summary.is_empty() {
            out.push_str("[Earlier context summary]\n");
            out.push_str(&state.summary);
            out.push('\n');
        }
        out.push_str("[Recent messages]\n");
        for entry in &state.entries {
            out.push_str(&entry.format_line());
            out.push('\n');
        }
        out
    }

    /// Resolve an entry's `reply_to` against the raw entries of its scope.
    ///
    /// Returns `None` when the target has been compressed out — reply
    /// context is intentionally lost with compression and summaries are
    /// never re-expanded.
    pub async fn find_reply_context(
        &self,
        scope: &Scope,
        entry: &BufferEntry,
    ) -> Option<BufferEntry> {
        let target = entry.reply_to.as_deref()?;
        let scopes = self.scopes.read().await;
        scopes
            .get(scope)?
            .entries
            .iter()
            .find(|e| e.id == target)
            .cloned()
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Write every scope to `buffers.json` (atomic tmp + rename).
    pub async fn save(&self) -> Result<()> {
        let scopes = self.scopes.read().await;
        let by_key: HashMap<String, &BufferState> =
            scopes.iter().map(|(k, v)| (k.to_string(), v)).collect();
        let json = serde_json::to_string_pretty(&by_key)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, &self.path).map_err(Error::Io)?;
        Ok(())
    }

    /// Load `buffers.json`, replacing in-memory state. Missing file is an
    /// empty store. Unparseable scope keys are skipped with a warning.
    pub async fn load(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(Error::Io)?;
        let by_key: HashMap<String, BufferState> = serde_json::from_str(&raw)?;

        let mut scopes = self.scopes.write().await;
        scopes.clear();
        for (key, state) in by_key {
            match key.parse::<Scope>() {
                Ok(scope) => {
                    scopes.insert(scope, state);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping buffer scope with bad key");
                }
            }
        }
        Ok(())
    }

    pub async fn clear(&self) {
        self.scopes.write().await.clear();
    }

    pub async fn clear_scope(&self, scope: &Scope) {
        self.scopes.write().await.remove(scope);
    }

    pub async fn stats(&self) -> BufferStats {
        let scopes = self.scopes.read().await;
        BufferStats {
            scopes: scopes.len(),
            total_entries: scopes.values().map(|s| s.entries.len()).sum(),
            total_tokens: scopes.values().map(|s| s.token_count as u64).sum(),
        }
    }

    /// Raw snapshot of one scope (tests and the stats surface).
    pub async fn snapshot(&self, scope: &Scope) -> Option<BufferState> {
        self.scopes.read().await.get(scope).cloned()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn manager(cfg: BufferConfig, dir: &Path) -> BufferManager {
        BufferManager::new(cfg, dir)
    }

    fn entry(id: &str, author: &str, content: &str) -> BufferEntry {
        BufferEntry::new(id, author, content)
    }

    #[tokio::test]
    async fn aggregate_tracks_entry_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(BufferConfig::default(), dir.path());
        let scope = Scope::channel("c-1");

        m.add(&scope, entry("m-1", "dan", "hello there friend")).await;
        m.add(&scope, entry("m-2", "dan", "how are you today")).await;

        let state = m.snapshot(&scope).await.unwrap();
        let sum: u32 = state.entries.iter().map(|e| e.token_count).sum();
        assert_eq!(state.token_count, sum);
    }

    #[tokio::test]
    async fn reply_chain_is_preserved_and_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(BufferConfig::default(), dir.path());
        let scope = Scope::channel("channel-1");

        m.add(&scope, entry("msg-001", "dan", "Should I deploy?")).await;
        m.add(&scope, entry("msg-002", "bud", "I'd recommend waiting.")).await;
        let mut reply = entry("msg-003", "dan", "yes");
        reply.reply_to = Some("msg-002".into());
        m.add(&scope, reply.clone()).await;

        let target = m.find_reply_context(&scope, &reply).await.unwrap();
        assert_eq!(target.id, "msg-002");

        let context = m.get_context(&scope).await;
        let reply_line = context
            .lines()
            .find(|l| l.contains("yes"))
            .expect("msg-003 rendered");
        assert!(reply_line.contains("(reply)"), "line = {reply_line}");
    }

    #[tokio::test]
    async fn overflow_compresses_and_records_summary() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BufferConfig {
            max_tokens: 100,
            max_age_secs: 300,
            keep_recent: 10,
        };
        let m = manager(cfg, dir.path());
        let scope = Scope::channel("c-1");

        for i in 0..10 {
            let mut e = entry(&format!("m-{i}"), "dan", &format!("message number {i}"));
            e.token_count = 20;
            m.add(&scope, e).await;
        }

        let state = m.snapshot(&scope).await.unwrap();
        assert!(state.entries.len() < 10, "len = {}", state.entries.len());
        assert!(!state.summary.is_empty());
        let sum: u32 = state.entries.iter().map(|e| e.token_count).sum();
        assert_eq!(state.token_count, sum);
    }

    #[tokio::test]
    async fn reply_context_is_lost_after_compression() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BufferConfig {
            max_tokens: 50,
            max_age_secs: 300,
            keep_recent: 2,
        };
        let m = manager(cfg, dir.path());
        let scope = Scope::channel("c-1");

        let mut first = entry("m-0", "dan", "original question");
        first.token_count = 30;
        m.add(&scope, first).await;
        for i in 1..6 {
            let mut e = entry(&format!("m-{i}"), "dan", "follow up");
            e.token_count = 30;
            m.add(&scope, e).await;
        }
        let state = m.snapshot(&scope).await.unwrap();
        assert!(state.entries.iter().all(|e| e.id != "m-0"));

        let mut late = entry("m-9", "dan", "as I said");
        late.reply_to = Some("m-0".into());
        m.add(&scope, late.clone()).await;
        assert!(m.find_reply_context(&scope, &late).await.is_none());
    }

    #[tokio::test]
    async fn old_entries_trigger_age_compression() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BufferConfig {
            max_tokens: 10_000,
            max_age_secs: 60,
            keep_recent: 1,
        };
        let m = manager(cfg, dir.path());
        let scope = Scope::channel("c-1");

        let mut stale = entry("m-0", "dan", "long ago");
        stale.timestamp = Utc::now() - Duration::seconds(3600);
        m.add(&scope, stale).await;
        m.add(&scope, entry("m-1", "dan", "just now")).await;

        let state = m.snapshot(&scope).await.unwrap();
        assert!(state.entries.len() <= 1);
        assert!(!state.summary.is_empty());
    }

    struct Failing;

    #[async_trait]
    impl Summarizer for Failing {
        async fn summarize(&self, _c: &str) -> Result<String> {
            Err(Error::Timeout("down".into()))
        }
    }

    #[tokio::test]
    async fn summarizer_failure_leaves_buffer_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BufferConfig {
            max_tokens: 50,
            max_age_secs: 300,
            keep_recent: 10,
        };
        let m = manager(cfg, dir.path()).with_summarizer(Arc::new(Failing));
        let scope = Scope::channel("c-1");

        for i in 0..4 {
            let mut e = entry(&format!("m-{i}"), "dan", "chatter");
            e.token_count = 20;
            m.add(&scope, e).await;
        }

        let state = m.snapshot(&scope).await.unwrap();
        assert_eq!(state.entries.len(), 4);
        assert!(state.summary.is_empty());
        assert_eq!(state.token_count, 80);
    }

    #[tokio::test]
    async fn incremental_sync_excludes_bot_author() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(BufferConfig::default(), dir.path());
        let scope = Scope::channel("c-1");

        let t0 = Utc::now() - Duration::seconds(100);
        let mut old = entry("m-1", "bud", "earlier reply");
        old.timestamp = t0;
        m.add(&scope, old).await;
        m.add(&scope, entry("m-2", "bud", "recent reply")).await;
        m.add(&scope, entry("m-3", "dan", "recent question")).await;

        let filter = EntryFilter {
            exclude_bot_author: Some("bud".into()),
            ..Default::default()
        };

        // Incremental: bot entries filtered, only entries after t0.
        let inc = m
            .get_entries_since_filtered(&scope, Some(t0), &filter)
            .await;
        assert!(inc.entries.iter().all(|e| e.author != "bud"));
        assert_eq!(inc.entries.len(), 1);
        assert!(inc.summary.is_none());

        // First sync: bot entries included.
        let first = m.get_entries_since_filtered(&scope, None, &filter).await;
        assert!(first.entries.iter().any(|e| e.author == "bud"));
        assert_eq!(first.entries.len(), 3);
    }

    #[tokio::test]
    async fn first_sync_includes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BufferConfig {
            max_tokens: 50,
            max_age_secs: 300,
            keep_recent: 1,
        };
        let m = manager(cfg, dir.path());
        let scope = Scope::channel("c-1");
        for i in 0..5 {
            let mut e = entry(&format!("m-{i}"), "dan", "words words");
            e.token_count = 20;
            m.add(&scope, e).await;
        }

        let first = m
            .get_entries_since_filtered(&scope, None, &EntryFilter::default())
            .await;
        assert!(first.summary.is_some());

        let inc = m
            .get_entries_since_filtered(
                &scope,
                Some(Utc::now() - Duration::seconds(600)),
                &EntryFilter::default(),
            )
            .await;
        assert!(inc.summary.is_none());
    }

    #[tokio::test]
    async fn exclude_id_drops_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(BufferConfig::default(), dir.path());
        let scope = Scope::channel("c-1");
        m.add(&scope, entry("m-1", "dan", "a")).await;
        m.add(&scope, entry("m-2", "dan", "b")).await;

        let filter = EntryFilter {
            exclude_id: Some("m-1".into()),
            ..Default::default()
        };
        let slice = m.get_entries_since_filtered(&scope, None, &filter).await;
        assert_eq!(slice.entries.len(), 1);
        assert_eq!(slice.entries[0].id, "m-2");
    }

    #[tokio::test]
    async fn save_load_roundtrip_is_structurally_equal() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(BufferConfig::default(), dir.path());
        let scope = Scope::channel("c-1");
        m.add(&scope, entry("m-1", "dan", "persist me")).await;
        m.add(&scope, entry("m-2", "bud", "and me")).await;
        let before = m.snapshot(&scope).await.unwrap();
        m.save().await.unwrap();

        let m2 = manager(BufferConfig::default(), dir.path());
        m2.load().await.unwrap();
        let after = m2.snapshot(&scope).await.unwrap();

        assert_eq!(after.entries.len(), before.entries.len());
        assert_eq!(after.token_count, before.token_count);
        assert_eq!(after.summary, before.summary);
        for (a, b) in after.entries.iter().zip(before.entries.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.content, b.content);
        }
    }

    #[tokio::test]
    async fn clear_scope_leaves_other_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(BufferConfig::default(), dir.path());
        m.add(&Scope::channel("a"), entry("m-1", "dan", "x")).await;
        m.add(&Scope::channel("b"), entry("m-2", "dan", "y")).await;

        m.clear_scope(&Scope::channel("a")).await;
        assert!(m.snapshot(&Scope::channel("a")).await.is_none());
        assert!(m.snapshot(&Scope::channel("b")).await.is_some());

        let stats = m.stats().await;
        assert_eq!(stats.scopes, 1);
        assert_eq!(stats.total_entries, 1);
    }
}
