use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A park's inferred operating window for one park-local calendar day.
///
/// One row per (park_id, session_date), upserted on every re-detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatingSession {
    pub park_id: i64,
    pub session_date: NaiveDate,
    pub session_start_utc: DateTime<Utc>,
    pub session_end_utc: DateTime<Utc>,
    pub operating_minutes: i64,
    pub active_rides: i64,
    pub open_snapshots: i64,
}
