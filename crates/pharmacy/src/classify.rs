//! Failure classification for the retry coordinator.
//!
//! Classification is a pattern match over the rendered failure message;
//! anything not matched is non-retryable.

/// Message fragments that mark a failure as transient.
///
/// Covers rate limiting and server-side HTTP statuses plus transport-level
/// failures (refused connections, timeouts, DNS, generic network text).
const RETRYABLE_PATTERNS: [&str; 13] = [
    "429",
    "500",
    "502",
    "503",
    "504",
    "rate limit",
    "too many requests",
    "connection refused",
    "connection reset",
    "timed out",
    "timeout",
    "dns",
    "network",
];

/// Whether a failure message describes a transient error worth retrying.
pub fn is_retryable_message(message: &str) -> bool {
    let haystack = message.to_ascii_lowercase();
    RETRYABLE_PATTERNS
        .iter()
        .any(|pattern| haystack.contains(pattern))
}
