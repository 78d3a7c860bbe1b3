//! `bud-memory` — client crate for the remote memory-graph service.
//!
//! The core never persists long-term memory itself; a remote service owns
//! the trace store. This crate provides the [`Graph`] trait the core
//! programs against, a production REST implementation
//! ([`RestGraphClient`]) with retry + exponential back-off, the
//! [`Embedder`] port used to turn focus content into a query vector, and
//! typed DTOs for the service API.

pub mod provider;
pub mod rest;
pub mod types;

pub use provider::{Embedder, Graph};
pub use rest::{from_reqwest, RestEmbedder, RestGraphClient};
pub use types::{
    EpisodeIngestRequest, RetrieveRequest, RetrieveResponse, Trace, TraceList,
};
