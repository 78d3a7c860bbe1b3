use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bud_domain::tokens::estimate_tokens;

/// One message in a conversation buffer. Immutable after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferEntry {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub author_id: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Dialogue act classification (e.g. `question`, `ack`), when known.
    #[serde(default)]
    pub dialogue_act: Option<String>,
    /// Id of the entry this one replies to.
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Estimated on insert when left at zero.
    #[serde(default)]
    pub token_count: u32,
}

impl BufferEntry {
    pub fn new(
        id: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            author_id: None,
            content: content.into(),
            timestamp: Utc::now(),
            channel_id: None,
            dialogue_act: None,
            reply_to: None,
            token_count: 0,
        }
    }

    /// Fill in the estimated token count when the producer left it unset.
    pub fn with_estimated_tokens(mut self) -> Self {
        if self.token_count == 0 {
            self.token_count = estimate_tokens(&self.content).max(1);
        }
        self
    }

    /// Render as a context line: `[HH:MM] author(reply)?[act]?: content`.
    pub fn format_line(&self) -> String {
        let clock = self.timestamp.format("%H:%M");
        let reply = if self.reply_to.is_some() { "(reply)" } else { "" };
        let act = match &self.dialogue_act {
            Some(a) => format!("[{a}]"),
            None => String::new(),
        };
        format!("[{clock}] {}{reply}{act}: {}", self.author, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimation_fills_only_unset_counts() {
        let entry = BufferEntry::new("m-1", "dan", "hello there").with_estimated_tokens();
        assert!(entry.token_count >= 1);

        let mut pre = BufferEntry::new("m-2", "dan", "hello there");
        pre.token_count = 42;
        assert_eq!(pre.with_estimated_tokens().token_count, 42);
    }

    #[test]
    fn empty_content_still_counts_one_token() {
        let entry = BufferEntry::new("m-1", "dan", "").with_estimated_tokens();
        assert_eq!(entry.token_count, 1);
    }

    #[test]
    fn format_line_includes_reply_and_act_markers() {
        let mut entry = BufferEntry::new("m-3", "dan", "yes");
        entry.reply_to = Some("m-2".into());
        entry.dialogue_act = Some("ack".into());
        let line = entry.format_line();
        assert!(line.contains("dan(reply)[ack]: yes"), "line = {line}");
    }

    #[test]
    fn format_line_plain_message() {
        let entry = BufferEntry::new("m-1", "dan", "Should I deploy?");
        let line = entry.format_line();
        assert!(line.ends_with("dan: Should I deploy?"), "line = {line}");
        assert!(!line.contains("(reply)"));
    }
}
