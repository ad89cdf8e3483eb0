use serde::{Deserialize, Serialize};

use super::job::AggregationType;

/// Per-ride statistics for one period, upserted by
/// (ride_id, period_type, period_key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideStats {
    pub ride_id: i64,
    pub park_id: i64,
    pub period_type: AggregationType,
    pub period_key: String,
    pub uptime_minutes: i64,
    pub downtime_minutes: i64,
    pub uptime_percentage: f64,
    pub avg_wait_time: Option<f64>,
    pub peak_wait_time: Option<i32>,
    pub status_changes: i64,
    pub snapshot_count: i64,
}

/// Per-park statistics for one period, upserted by
/// (park_id, period_type, period_key).
///
/// `shame_score` stays `Option` end to end: `None` means no qualifying
/// data existed (park never open, zero classified weight), which is a
/// different fact than a spotless 0.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkStats {
    pub park_id: i64,
    pub period_type: AggregationType,
    pub period_key: String,
    pub rides_total: i64,
    pub rides_active: i64,
    pub operating_minutes: i64,
    pub downtime_minutes: i64,
    pub uptime_percentage: f64,
    pub avg_wait_time: Option<f64>,
    pub peak_wait_time: Option<i32>,
    pub status_changes: i64,
    pub shame_score: Option<f64>,
}
