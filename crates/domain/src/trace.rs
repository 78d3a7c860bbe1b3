use serde::Serialize;

/// Structured trace events emitted across all BudCore crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ItemEnqueued {
        item_id: String,
        item_type: String,
        priority: String,
        queue_len: usize,
    },
    ItemFocused {
        item_id: String,
        item_type: String,
        suspended_depth: usize,
    },
    ItemCompleted {
        item_id: String,
        resumed: Option<String>,
    },
    BufferCompressed {
        scope: String,
        entries_folded: usize,
        entries_kept: usize,
        tokens_after: u32,
    },
    ContextBuilt {
        focus_id: String,
        memories: usize,
        buffer_chars: usize,
        has_authorizations: bool,
    },
    TurnStarted {
        session_id: String,
        focus_id: String,
        resume: bool,
    },
    TurnCompleted {
        session_id: String,
        input_tokens: u64,
        output_tokens: u64,
        cache_read_tokens: u64,
        num_turns: u32,
        duration_ms: u64,
    },
    SessionReset {
        old_session_id: String,
        new_session_id: String,
        reason: String,
    },
    GraphCall {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    SignalReceived {
        signal_type: String,
        session_id: Option<String>,
    },
    ProcessIdle {
        pid: u32,
        session_id: String,
        avg_cpu: f32,
    },
    BudgetDenied {
        reason: String,
    },
    FallbackReply {
        item_id: String,
        channel_id: String,
        had_text: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "bud_event");
    }
}
