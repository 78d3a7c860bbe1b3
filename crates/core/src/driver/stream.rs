//! Stream-event grammar for the LLM CLI's newline-delimited JSON output.
//!
//! Only the event shapes below are contractual; payloads are open-ended
//! maps, so parsing goes through `serde_json::Value` and takes just the
//! fields the core consumes. Unknown event types pass through as
//! [`StreamEvent::Unknown`] for the caller to log and skip.

use serde_json::Value;

use bud_domain::error::{Error, Result};

/// Lines longer than this are logged and skipped rather than parsed.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Final usage metrics of one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_create_tokens: u64,
}

impl TurnUsage {
    /// Tokens that land in the context window next turn.
    pub fn context_tokens(&self) -> u64 {
        self.cache_read_tokens + self.input_tokens
    }
}

/// Payload of the `result` event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnResult {
    pub num_turns: u32,
    pub duration_ms: u64,
    pub usage: TurnUsage,
    pub context_window: Option<u64>,
    pub max_output_tokens: Option<u64>,
}

/// An observed tool invocation. The core only watches; the CLI executes.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
    pub id: String,
}

/// One parsed line of the event stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Assistant text blocks from a complete message.
    AssistantText(Vec<String>),
    /// A tool invocation to observe.
    ToolUse(ToolCall),
    /// Incremental assistant text.
    ContentDelta(String),
    /// Final turn metrics.
    TurnResult(TurnResult),
    /// Bookkeeping event with no effect.
    Ignored,
    /// Unrecognized event type; logged and skipped by the consumer.
    Unknown(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse one stream line. Malformed JSON or a missing `type` is an
/// `InvalidInput` error — the consumer logs and skips.
pub fn parse_line(line: &str) -> Result<StreamEvent> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| Error::InvalidInput(format!("malformed stream line: {e}")))?;

    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput("stream event without a type".into()))?;

    match event_type {
        "assistant" => Ok(StreamEvent::AssistantText(assistant_texts(&value))),
        "tool_use" => parse_tool_use(&value),
        "content_block_delta" => {
            let text = value
                .pointer("/content/delta/text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            Ok(StreamEvent::ContentDelta(text))
        }
        "result" => Ok(StreamEvent::TurnResult(parse_result(&value))),
        "message_start" | "message_stop" | "content_block_start" | "content_block_stop"
        | "system" | "user" => Ok(StreamEvent::Ignored),
        other => Ok(StreamEvent::Unknown(other.to_owned())),
    }
}

fn assistant_texts(value: &Value) -> Vec<String> {
    let Some(blocks) = value.pointer("/message/content").and_then(Value::as_array) else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .map(str::to_owned)
        .collect()
}

fn parse_tool_use(value: &Value) -> Result<StreamEvent> {
    let tool = value
        .get("tool")
        .ok_or_else(|| Error::InvalidInput("tool_use event without tool".into()))?;
    let name = tool
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput("tool_use event without tool.name".into()))?
        .to_owned();
    Ok(StreamEvent::ToolUse(ToolCall {
        name,
        args: tool.get("args").cloned().unwrap_or(Value::Null),
        id: tool
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
    }))
}

fn parse_result(value: &Value) -> TurnResult {
    let u64_at = |v: &Value, path: &str| v.pointer(path).and_then(Value::as_u64).unwrap_or(0);

    let usage = TurnUsage {
        input_tokens: u64_at(value, "/usage/input"),
        output_tokens: u64_at(value, "/usage/output"),
        cache_read_tokens: u64_at(value, "/usage/cache_read"),
        cache_create_tokens: u64_at(value, "/usage/cache_create"),
    };

    // modelUsage is keyed by model name; the one-shot turn has one entry.
    let (context_window, max_output_tokens) = value
        .get("modelUsage")
        .and_then(Value::as_object)
        .and_then(|models| models.values().next())
        .map(|m| {
            (
                m.get("contextWindow").and_then(Value::as_u64),
                m.get("maxOutputTokens").and_then(Value::as_u64),
            )
        })
        .unwrap_or((None, None));

    TurnResult {
        num_turns: u64_at(value, "/num_turns") as u32,
        duration_ms: u64_at(value, "/duration_ms"),
        usage,
        context_window,
        max_output_tokens,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_event_collects_text_blocks() {
        let line = r#"{"type": "assistant", "message": {"content": [
            {"type": "text", "text": "Hello"},
            {"type": "tool_use", "name": "x"},
            {"type": "text", "text": " world"}
        ]}}"#;
        match parse_line(line).unwrap() {
            StreamEvent::AssistantText(texts) => {
                assert_eq!(texts, vec!["Hello", " world"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn tool_use_event_carries_name_args_id() {
        let line = r#"{"type": "tool_use", "tool": {"name": "send_message", "args": {"text": "hi"}, "id": "tc-1"}}"#;
        match parse_line(line).unwrap() {
            StreamEvent::ToolUse(call) => {
                assert_eq!(call.name, "send_message");
                assert_eq!(call.id, "tc-1");
                assert_eq!(call.args["text"], "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn content_delta_extracts_text() {
        let line = r#"{"type": "content_block_delta", "content": {"delta": {"text": "chunk"}}}"#;
        match parse_line(line).unwrap() {
            StreamEvent::ContentDelta(text) => assert_eq!(text, "chunk"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn result_event_populates_usage_and_model_limits() {
        let line = r#"{"type": "result", "num_turns": 3, "duration_ms": 4200,
            "usage": {"input": 1200, "output": 350, "cache_read": 90000, "cache_create": 400},
            "modelUsage": {"claude-sonnet-4": {"contextWindow": 200000, "maxOutputTokens": 16000}}}"#;
        match parse_line(line).unwrap() {
            StreamEvent::TurnResult(r) => {
                assert_eq!(r.num_turns, 3);
                assert_eq!(r.duration_ms, 4200);
                assert_eq!(r.usage.input_tokens, 1200);
                assert_eq!(r.usage.cache_read_tokens, 90_000);
                assert_eq!(r.usage.context_tokens(), 91_200);
                assert_eq!(r.context_window, Some(200_000));
                assert_eq!(r.max_output_tokens, Some(16_000));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn result_event_tolerates_missing_fields() {
        let r = match parse_line(r#"{"type": "result"}"#).unwrap() {
            StreamEvent::TurnResult(r) => r,
            other => panic!("unexpected event: {other:?}"),
        };
        assert_eq!(r.usage, TurnUsage::default());
        assert!(r.context_window.is_none());
    }

    #[test]
    fn bookkeeping_events_are_ignored() {
        for t in [
            "message_start",
            "message_stop",
            "content_block_start",
            "content_block_stop",
            "system",
            "user",
        ] {
            let line = format!(r#"{{"type": "{t}"}}"#);
            assert!(matches!(parse_line(&line).unwrap(), StreamEvent::Ignored));
        }
    }

    #[test]
    fn unknown_types_pass_through() {
        match parse_line(r#"{"type": "telemetry", "data": 1}"#).unwrap() {
            StreamEvent::Unknown(t) => assert_eq!(t, "telemetry"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn malformed_lines_and_missing_type_error() {
        assert!(parse_line("{oops").is_err());
        assert!(parse_line(r#"{"no_type": true}"#).is_err());
    }
}
