use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::RideStatus;

/// A detected open/closed transition for one ride.
///
/// Derived from adjacent snapshots and append-only once stored. The
/// open→closed event is stamped at the last snapshot still observed open;
/// the closed→open event at the first snapshot observed open again, so the
/// pair brackets the full outage window. `downtime_duration_minutes` is
/// populated only on closed→open transitions.
///
/// `new_is_open` carries the direction explicitly: the raw statuses cannot
/// always tell (a ride can report OPERATING while the computed open flag is
/// false, e.g. zero wait and a closed raw flag).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub ride_id: i64,
    pub park_id: i64,
    pub changed_at: DateTime<Utc>,
    pub previous_status: RideStatus,
    pub new_status: RideStatus,
    pub new_is_open: bool,
    pub downtime_duration_minutes: Option<i64>,
}

impl StatusChangeEvent {
    /// Whether this event records a ride going out of service.
    pub fn is_closure(&self) -> bool {
        !self.new_is_open
    }
}
