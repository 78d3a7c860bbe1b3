//! Synthetic inbound transport — tails `inbox.jsonl` and turns `new`
//! records into pending items and buffer entries, standing in for a chat
//! adapter during tests and local runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bud_buffer::{BufferEntry, BufferManager, Scope};
use bud_domain::item::{PendingItem, Priority, SOURCE_INBOX, TYPE_USER_INPUT};

use crate::attention::Attention;
use crate::queue::PendingQueue;

/// One line of `inbox.jsonl`.
#[derive(Debug, Deserialize)]
struct InboxRecord {
    id: String,
    content: String,
    channel_id: String,
    author: String,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
    status: String,
    #[serde(default)]
    extra: Option<serde_json::Map<String, serde_json::Value>>,
}

pub struct InboxWatcher {
    path: PathBuf,
    poll: Duration,
    queue: Arc<PendingQueue>,
    attention: Arc<Attention>,
    buffer: Arc<BufferManager>,
    offset: u64,
}

impl InboxWatcher {
    pub fn new(
        state_dir: &std::path::Path,
        queue: Arc<PendingQueue>,
        attention: Arc<Attention>,
        buffer: Arc<BufferManager>,
    ) -> Self {
        Self {
            path: state_dir.join("inbox.jsonl"),
            poll: Duration::from_millis(500),
            queue,
            attention,
            buffer,
            offset: 0,
        }
    }

    pub fn spawn(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.poll);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => self.poll_once().await,
                }
            }
            tracing::debug!("inbox watcher stopped");
        })
    }

    /// Consume any new complete lines past the remembered offset.
    pub async fn poll_once(&mut self) {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };
        if meta.len() < self.offset {
            self.offset = 0;
        }
        if meta.len() == self.offset {
            return;
        }

        let raw = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read inbox.jsonl");
                return;
            }
        };
        let new = &raw[self.offset as usize..];
        let Some(last_newline) = new.iter().rposition(|&b| b == b'\n') else {
            return;
        };
        let chunk = &new[..=last_newline];
        self.offset += (last_newline + 1) as u64;

        for line in chunk.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<InboxRecord>(line) {
                Ok(record) if record.status == "new" => self.ingest(record).await,
                Ok(record) => {
                    tracing::trace!(id = %record.id, status = %record.status, "skipping inbox record");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed inbox line");
                }
            }
        }
    }

    async fn ingest(&self, record: InboxRecord) {
        let timestamp = parse_timestamp(record.timestamp.as_ref());

        let mut entry = BufferEntry::new(&record.id, &record.author, &record.content);
        entry.timestamp = timestamp;
        entry.channel_id = Some(record.channel_id.clone());
        self.buffer
            .add(&Scope::channel(&record.channel_id), entry)
            .await;

        let mut item = PendingItem::new(&record.id, TYPE_USER_INPUT, Priority::P1);
        item.source = SOURCE_INBOX.into();
        item.content = record.content;
        item.channel_id = Some(record.channel_id);
        item.author_id = Some(record.author);
        item.timestamp = timestamp;
        if let Some(extra) = record.extra {
            item.data = extra;
        }

        self.attention.note_enqueued(item.priority);
        self.queue.add(item);
    }
}

/// Inbox timestamps arrive as unix seconds or RFC-3339 strings.
fn parse_timestamp(value: Option<&serde_json::Value>) -> DateTime<Utc> {
    match value {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now),
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        _ => Utc::now(),
    }
}
