//! `bud-domain` — shared types for the BudCore agent.
//!
//! Home of the cross-crate [`Error`](error::Error) type, the structured
//! [`TraceEvent`](trace::TraceEvent) log surface, the configuration tree,
//! the pending-item model, and the rough token estimator. Everything else
//! in the workspace depends on this crate and nothing here depends on the
//! rest of the workspace.

pub mod config;
pub mod error;
pub mod item;
pub mod tokens;
pub mod trace;

pub use error::{Error, Result};
pub use item::{PendingItem, Priority};
