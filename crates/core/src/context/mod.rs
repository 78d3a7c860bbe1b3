//! Context-bundle assembly — the per-turn prompt input.
//!
//! The builder queries the memory graph, the conversation buffer, the
//! reflex log, and attention, and the renderer lays the bundle out as a
//! deterministic prompt with stable section headers.

pub mod authorization;
pub mod builder;
pub mod render;

pub use authorization::AuthorizationClassifier;
pub use builder::{ContextBuilder, ContextBundle, RecalledMemory};
pub use render::render_prompt;
