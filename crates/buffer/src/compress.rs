//! Buffer compression — folds the older half of a scope's raw entries
//! into a prose summary so the context stays bounded.
//!
//! Compression never rewrites the kept entries; the summary only grows.
//! A summarizer failure leaves the buffer untouched and the next `add`
//! retries.

use async_trait::async_trait;

use bud_domain::error::Result;

use crate::entry::BufferEntry;

/// Produces a prose summary of a formatted conversation slice.
///
/// Implementations typically drive an LLM; tests use canned text. The
/// buffer works without one, falling back to a count marker.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, conversation: &str) -> Result<String>;
}

/// Outcome of a compression pass over one scope.
pub struct Compression {
    /// Number of entries to discard from the front of the raw list.
    pub fold_count: usize,
    /// Text appended to the scope summary.
    pub summary_fragment: String,
}

/// Number of entries the midpoint split would fold.
pub fn midpoint_fold(len: usize) -> usize {
    len / 2
}

/// Concatenate the formatted lines of the entries to be folded, as the
/// summarizer input.
pub fn fold_text(entries: &[BufferEntry]) -> String {
    let mut buf = String::new();
    for entry in entries {
        buf.push_str(&entry.format_line());
        buf.push('\n');
    }
    buf
}

/// Run one compression pass: fold the older half through the summarizer,
/// or, without one, trim down to `keep_recent` entries and record a count
/// marker.
///
/// Returns `Ok(None)` when there is nothing to fold.
pub async fn compress(
    entries: &[BufferEntry],
    summarizer: Option<&dyn Summarizer>,
    keep_recent: usize,
) -> Result<Option<Compression>> {
    match summarizer {
        Some(s) => {
            let fold_count = midpoint_fold(entries.len());
            if fold_count == 0 {
                return Ok(None);
            }
            let text = fold_text(&entries[..fold_count]);
            let summary_fragment = s.summarize(&text).await?;
            Ok(Some(Compression {
                fold_count,
                summary_fragment,
            }))
        }
        None => {
            // Fold at least the older half, and always down to the
            // keep_recent cap.
            let fold_count = midpoint_fold(entries.len())
                .max(entries.len().saturating_sub(keep_recent));
            if fold_count == 0 {
                return Ok(None);
            }
            Ok(Some(Compression {
                fold_count,
                summary_fragment: format!("[{fold_count} earlier messages not shown]"),
            }))
        }
    }
}

/// Append a summary fragment to an existing summary, blank-line separated.
pub fn append_summary(summary: &mut String, fragment: &str) {
    if fragment.is_empty() {
        return;
    }
    if !summary.is_empty() {
        summary.push_str("\n\n");
    }
    summary.push_str(fragment);
}
