//! REST implementation of [`Graph`] and [`Embedder`].
//!
//! `RestGraphClient` wraps a `reqwest::Client` and translates every trait
//! method into the corresponding HTTP call against the memory-graph
//! service, with automatic retry + exponential back-off on transient
//! (5xx / timeout) failures.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use uuid::Uuid;

use bud_domain::config::GraphConfig;
use bud_domain::error::{Error, Result};
use bud_domain::trace::TraceEvent;

use crate::provider::{Embedder, Graph};
use crate::types::{
    BoostRequest, EmbedRequest, EmbedResponse, EpisodeIngestRequest, RetrieveRequest,
    RetrieveResponse, Trace, TraceList,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A REST-based client for the memory-graph service.
///
/// Created once and reused for the lifetime of the agent process; the
/// underlying `reqwest::Client` maintains a connection pool.
#[derive(Debug, Clone)]
pub struct RestGraphClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl RestGraphClient {
    /// Build a new client from the shared `GraphConfig`.
    pub fn new(cfg: &GraphConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key: cfg.api_key.clone(),
            max_retries: cfg.max_retries,
        })
    }

    // ── request helpers ──────────────────────────────────────────────

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        let trace_id = Uuid::new_v4().to_string();
        let mut rb = rb
            .header("X-Client-Type", "bud-core")
            .header("X-Trace-Id", &trace_id);
        if let Some(ref key) = self.api_key {
            rb = rb.header("X-Api-Key", key);
        }
        rb
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ── retry engine ─────────────────────────────────────────────────

    /// Execute a request with retry + exponential back-off on transient
    /// errors.
    ///
    /// * Retries on 5xx status codes and on timeouts.
    /// * Does **not** retry on 4xx (client errors are permanent).
    /// * Emits a `TraceEvent::GraphCall` after every attempt.
    async fn execute_with_retry(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let start = Instant::now();
            let result = self.decorate(build_request()).send().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    TraceEvent::GraphCall {
                        endpoint: endpoint.to_owned(),
                        status,
                        duration_ms,
                    }
                    .emit();

                    if resp.status().is_server_error() {
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some(Error::Graph(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                        continue;
                    }

                    if resp.status().is_client_error() {
                        let resp_status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        if resp_status == StatusCode::UNAUTHORIZED
                            || resp_status == StatusCode::FORBIDDEN
                        {
                            return Err(Error::Graph(format!(
                                "{endpoint} auth failed ({status}): {body}"
                            )));
                        }
                        return Err(Error::Graph(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    let status = e.status().map(|s| s.as_u16()).unwrap_or(0);
                    TraceEvent::GraphCall {
                        endpoint: endpoint.to_owned(),
                        status,
                        duration_ms,
                    }
                    .emit();

                    last_err = Some(from_reqwest(e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Graph(format!("{endpoint}: all retries exhausted"))))
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        endpoint: &str,
        resp: Response,
    ) -> Result<T> {
        let body = resp.text().await.map_err(from_reqwest)?;
        serde_json::from_str(&body)
            .map_err(|e| Error::Graph(format!("failed to parse {endpoint} response: {e}: {body}")))
    }

    async fn post_empty(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        self.execute_with_retry(&format!("POST {path}"), || self.http.post(&url))
            .await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl Graph for RestGraphClient {
    async fn retrieve(
        &self,
        embedding: Vec<f32>,
        query: &str,
        limit: u32,
    ) -> Result<RetrieveResponse> {
        let url = self.url("/api/traces/retrieve");
        let req = RetrieveRequest {
            embedding,
            query: query.to_owned(),
            limit,
        };
        let resp = self
            .execute_with_retry("POST /api/traces/retrieve", || {
                self.http.post(&url).json(&req)
            })
            .await?;
        Self::parse_json("retrieve", resp).await
    }

    async fn get_activated_traces(&self, threshold: f64, limit: u32) -> Result<Vec<Trace>> {
        let url = self.url("/api/traces/activated");
        let resp = self
            .execute_with_retry("GET /api/traces/activated", || {
                self.http
                    .get(&url)
                    .query(&[("threshold", threshold.to_string()), ("limit", limit.to_string())])
            })
            .await?;
        let list: TraceList = Self::parse_json("activated traces", resp).await?;
        Ok(list.traces)
    }

    async fn get_core_traces(&self) -> Result<Vec<Trace>> {
        let url = self.url("/api/traces/core");
        let resp = self
            .execute_with_retry("GET /api/traces/core", || self.http.get(&url))
            .await?;
        let list: TraceList = Self::parse_json("core traces", resp).await?;
        Ok(list.traces)
    }

    async fn boost_trace_access(&self, ids: &[String], alpha: f64) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let url = self.url("/api/traces/boost");
        let req = BoostRequest { ids, alpha };
        self.execute_with_retry("POST /api/traces/boost", || self.http.post(&url).json(&req))
            .await?;
        Ok(())
    }

    async fn ingest_episode(&self, req: EpisodeIngestRequest) -> Result<()> {
        let url = self.url("/api/episodes");
        self.execute_with_retry("POST /api/episodes", || self.http.post(&url).json(&req))
            .await?;
        Ok(())
    }

    async fn consolidate(&self) -> Result<()> {
        self.post_empty("/api/maintenance/consolidate").await
    }

    async fn decay_activation(&self) -> Result<()> {
        self.post_empty("/api/maintenance/decay").await
    }

    async fn flush(&self) -> Result<()> {
        self.post_empty("/api/maintenance/flush").await
    }

    async fn reset(&self) -> Result<()> {
        self.post_empty("/api/maintenance/reset").await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Embedder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// REST embedder backed by the same service (POST /api/embed).
#[derive(Debug, Clone)]
pub struct RestEmbedder {
    client: RestGraphClient,
}

impl RestEmbedder {
    pub fn new(cfg: &GraphConfig) -> Result<Self> {
        Ok(Self {
            client: RestGraphClient::new(cfg)?,
        })
    }
}

#[async_trait]
impl Embedder for RestEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = self.client.url("/api/embed");
        let req = EmbedRequest { text };
        let resp = self
            .client
            .execute_with_retry("POST /api/embed", || self.client.http.post(&url).json(&req))
            .await?;
        let parsed: EmbedResponse = RestGraphClient::parse_json("embed", resp).await?;
        Ok(parsed.embedding)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error conversion helper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert a `reqwest::Error` into a domain `Error`.
///
/// Timeout errors become `Error::Timeout`; everything else becomes
/// `Error::Http`.
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
