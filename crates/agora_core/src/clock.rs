//! Epoch-millisecond clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock in unix-epoch milliseconds.
///
/// A clock set before the epoch reads as `0` rather than failing.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Returns `now` unless it would move a per-domain sequence backwards.
pub fn not_before(now: i64, floor: Option<i64>) -> i64 {
    match floor {
        Some(floor) if floor > now => floor,
        _ => now,
    }
}
