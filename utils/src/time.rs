//! Time helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch. Clamps to 0 if the clock is before 1970.
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Compact `1h02m05s` rendering of a span in seconds, without leading
/// zero units. Freezes rarely outlast a day, so hours are the largest unit.
pub fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m{s:02}s"),
        _ => format!("{h}h{m:02}m{s:02}s"),
    }
}
