//! Retry backoff schedule.
//!
//! A fixed ordered sequence of delays; the final entry is a ceiling reused
//! for every attempt past the end of the table.

use std::time::Duration;

/// Delay before attempt `n`, indexed by `min(retry_count, len - 1)`.
pub const RETRY_SCHEDULE: [Duration; 6] = [
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(2 * 60),
    Duration::from_secs(4 * 60),
    Duration::from_secs(8 * 60),
    Duration::from_secs(16 * 60),
];

/// Maximum number of automatic retry attempts before a delivery is failed.
pub const RETRY_CAP: u32 = RETRY_SCHEDULE.len() as u32;

/// Delay to wait before the next attempt given how many attempts were made.
///
/// The final schedule entry is a ceiling reused for any further attempts.
pub fn delay_for(retry_count: u32) -> Duration {
    let idx = (retry_count as usize).min(RETRY_SCHEDULE.len() - 1);
    RETRY_SCHEDULE[idx]
}

/// Whether the retry budget is spent.
pub fn cap_reached(retry_count: u32) -> bool {
    retry_count >= RETRY_CAP
}
