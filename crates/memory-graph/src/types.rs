use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types for the memory-graph API
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A consolidated memory record held by the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub summary: String,
    /// Retrieval relevance in [0, 1]; activation level on fallback reads.
    #[serde(default)]
    pub relevance: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Dual-trigger retrieval request: semantic top-K over the embedding plus
/// lexical boosting over the query text.
#[derive(Debug, Clone, Serialize)]
pub struct RetrieveRequest {
    pub embedding: Vec<f32>,
    pub query: String,
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RetrieveResponse {
    #[serde(default)]
    pub traces: Vec<Trace>,
}

/// Plain trace list (core traces, activated traces).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TraceList {
    #[serde(default)]
    pub traces: Vec<Trace>,
}

/// One raw episode handed to the service for later consolidation.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeIngestRequest {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct BoostRequest<'a> {
    pub ids: &'a [String],
    pub alpha: f64,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct EmbedRequest<'a> {
    pub text: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EmbedResponse {
    pub embedding: Vec<f32>,
}
