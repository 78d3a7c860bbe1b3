//! Append-only outbox for external effectors.
//!
//! Every requested action becomes one JSONL line in `outbox.jsonl` with
//! status `pending`; an external effector process consumes and updates
//! them. Writes are serialized by a mutex so concurrent actions never
//! interleave bytes.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use bud_domain::error::{Error, Result};

use super::ActionSink;

/// One outbox line.
#[derive(Debug, Serialize)]
struct OutboxAction<'a> {
    id: String,
    effector: &'a str,
    #[serde(rename = "type")]
    action_type: &'a str,
    payload: serde_json::Value,
    status: &'a str,
    timestamp: String,
}

pub struct OutboxWriter {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl OutboxWriter {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("outbox.jsonl"),
            write_lock: Mutex::new(()),
        }
    }

    fn append(&self, action_type: &str, payload: serde_json::Value) -> Result<()> {
        let action = OutboxAction {
            id: Uuid::new_v4().to_string(),
            effector: "chat",
            action_type,
            payload,
            status: "pending",
            timestamp: Utc::now().to_rfc3339(),
        };
        let line = serde_json::to_string(&action)?;

        let _guard = self.write_lock.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(Error::Io)?;
        writeln!(file, "{line}").map_err(Error::Io)?;
        Ok(())
    }
}

#[async_trait]
impl ActionSink for OutboxWriter {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<()> {
        self.append(
            "send_message",
            serde_json::json!({ "channel_id": channel_id, "text": text }),
        )
    }

    async fn typing(&self, channel_id: &str) -> Result<()> {
        self.append("typing", serde_json::json!({ "channel_id": channel_id }))
    }

    async fn react(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        self.append(
            "reaction",
            serde_json::json!({
                "channel_id": channel_id,
                "message_id": message_id,
                "emoji": emoji,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_actions(dir: &Path) -> Vec<serde_json::Value> {
        let raw = std::fs::read_to_string(dir.join("outbox.jsonl")).unwrap();
        raw.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn actions_append_as_pending_lines() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = OutboxWriter::new(dir.path());

        outbox.send_message("c-1", "hello there").await.unwrap();
        outbox.typing("c-1").await.unwrap();
        outbox.react("c-1", "m-9", "👍").await.unwrap();

        let actions = read_actions(dir.path());
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0]["type"], "send_message");
        assert_eq!(actions[0]["status"], "pending");
        assert_eq!(actions[0]["payload"]["channel_id"], "c-1");
        assert_eq!(actions[0]["payload"]["text"], "hello there");
        assert_eq!(actions[1]["type"], "typing");
        assert_eq!(actions[2]["payload"]["emoji"], "👍");
        // Every action has a unique id.
        assert_ne!(actions[0]["id"], actions[1]["id"]);
    }
}
