//! Wall-clock helpers

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix timestamp in whole seconds.
///
/// Heartbeat payloads carry this value. A clock before the epoch yields 0
/// rather than panicking.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
