//! `bud-buffer` — per-scope conversation buffers with automatic
//! summarization.
//!
//! Each scope (a channel or a focus item) keeps an ordered log of recent
//! messages. When a scope's token budget or age limit is exceeded, the
//! older half is folded into a prose summary and the raw entries are
//! discarded. Reply-chain resolution works only against raw entries;
//! once a message is compressed out it is no longer individually
//! addressable.

pub mod compress;
pub mod entry;
pub mod manager;
pub mod scope;

pub use compress::Summarizer;
pub use entry::BufferEntry;
pub use manager::{BufferManager, BufferState, BufferStats, EntryFilter, SyncSlice};
pub use scope::Scope;
