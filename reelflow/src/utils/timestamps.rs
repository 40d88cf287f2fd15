//! Timestamp helpers for dispatch times and deadlines.

use chrono::{DateTime, Utc};

/// UTC timestamp used throughout the orchestrator.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Returns the current time as an ISO 8601 string.
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339()
}
