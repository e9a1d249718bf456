//! Timestamp formatting for snapshot suffixes.

use chrono::{DateTime, Local};

/// Format used for generated snapshot suffixes, e.g.
/// `2024-05-01-13:45:10`.
const SNAPSHOT_SUFFIX_FORMAT: &str = "%F-%H:%M:%S";

/// Render a snapshot suffix from the given local time.
pub fn snapshot_suffix_at(t: DateTime<Local>) -> String {
    t.format(SNAPSHOT_SUFFIX_FORMAT).to_string()
}

/// Render a snapshot suffix from the current local time.
pub fn snapshot_suffix_now() -> String {
    snapshot_suffix_at(Local::now())
}
