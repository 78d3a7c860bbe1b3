//! The `Graph` trait defines the interface to the remote memory service
//! (REST in production, a test double everywhere else), and `Embedder`
//! the query-embedding port.

use async_trait::async_trait;

use bud_domain::error::Result;

use crate::types::{EpisodeIngestRequest, RetrieveResponse, Trace};

/// Abstraction over the memory-graph service API surface.
#[async_trait]
pub trait Graph: Send + Sync {
    /// Dual-trigger retrieval: semantic top-K plus lexical boosting
    /// (POST /api/traces/retrieve).
    async fn retrieve(
        &self,
        embedding: Vec<f32>,
        query: &str,
        limit: u32,
    ) -> Result<RetrieveResponse>;

    /// Traces whose activation exceeds `threshold` — the fallback path
    /// when retrieval comes back empty (GET /api/traces/activated).
    async fn get_activated_traces(&self, threshold: f64, limit: u32) -> Result<Vec<Trace>>;

    /// Core identity traces (GET /api/traces/core).
    async fn get_core_traces(&self) -> Result<Vec<Trace>>;

    /// Reinforce the given traces so used memories stay alive
    /// (POST /api/traces/boost).
    async fn boost_trace_access(&self, ids: &[String], alpha: f64) -> Result<()>;

    /// Hand a raw episode to the service (POST /api/episodes).
    async fn ingest_episode(&self, req: EpisodeIngestRequest) -> Result<()>;

    /// Trigger consolidation of recent episodes (POST /api/maintenance/consolidate).
    async fn consolidate(&self) -> Result<()>;

    /// Decay all activation levels (POST /api/maintenance/decay).
    async fn decay_activation(&self) -> Result<()>;

    /// Flush pending writes (POST /api/maintenance/flush).
    async fn flush(&self) -> Result<()>;

    /// Reset the service's working state (POST /api/maintenance/reset).
    async fn reset(&self) -> Result<()>;
}

/// Turns text into the query vector for semantic retrieval.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
