//! Wall-clock helpers.

use chrono::Utc;

/// Current wall-clock time as nanoseconds since the Unix epoch.
///
/// All entity timestamps (`create_at`, `release_at`, lock acquisition
/// times, webhook payloads) use this representation.
#[must_use]
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
