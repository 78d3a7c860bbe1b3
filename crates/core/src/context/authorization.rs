//! Authorization phrase detection.
//!
//! Old buffer entries can contain permission grants ("go ahead and
//! deploy") that must not be acted on in a later session. The classifier
//! flags them so the prompt carries a re-confirmation warning. Patterns
//! are compiled once into a `RegexSet`.

use regex::RegexSet;

const PATTERNS: &[&str] = &[
    r"(?i)\byes,? you can\b",
    r"(?i)\bgo ahead\b",
    r"(?i)\bapproved\b",
    r"(?i)\bpermission granted\b",
    r"(?i)\byou have my permission\b",
    r"(?i)\bfeel free to\b",
    r"(?i)\bi authorize\b",
    r"(?i)\bauthoriz(?:e|ed|ation)\b",
    r"(?i)\bgreen ?light\b",
];

pub struct AuthorizationClassifier {
    set: RegexSet,
}

impl Default for AuthorizationClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorizationClassifier {
    pub fn new() -> Self {
        // The pattern list is static; a failure here is a programmer error
        // caught by the tests below.
        let set = RegexSet::new(PATTERNS).unwrap_or_else(|e| {
            tracing::error!(error = %e, "authorization patterns failed to compile");
            RegexSet::empty()
        });
        Self { set }
    }

    /// Whether the text contains an authorization-like phrase.
    pub fn matches(&self, text: &str) -> bool {
        self.set.is_match(text)
    }
}
