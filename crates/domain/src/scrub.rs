//! Privacy scrubbing contract.
//!
//! The implementation lives outside the core; the core's promise is that
//! every string that leaves it (memory records, lifecycle payloads, error
//! messages) has passed through the configured scrubber first.

use std::sync::Arc;

pub trait PrivacyScrubber: Send + Sync {
    /// Remove secrets from `text`. `scope_id` identifies the session or
    /// run the text belongs to, for scrubbers that keep per-scope state.
    fn scrub_text(&self, text: &str, scope_id: &str) -> String;
}

/// Pass-through scrubber for tests and hosts that scrub upstream.
#[derive(Debug, Default, Clone)]
pub struct NoopScrubber;

impl PrivacyScrubber for NoopScrubber {
    fn scrub_text(&self, text: &str, _scope_id: &str) -> String {
        text.to_string()
    }
}

pub type SharedScrubber = Arc<dyn PrivacyScrubber>;
