use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Live status reported by the collector for a single ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Operating,
    Down,
    Closed,
    Refurbishment,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Operating => "OPERATING",
            RideStatus::Down => "DOWN",
            RideStatus::Closed => "CLOSED",
            RideStatus::Refurbishment => "REFURBISHMENT",
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPERATING" => Ok(RideStatus::Operating),
            "DOWN" => Ok(RideStatus::Down),
            "CLOSED" => Ok(RideStatus::Closed),
            "REFURBISHMENT" => Ok(RideStatus::Refurbishment),
            other => Err(format!("unknown ride status '{other}'")),
        }
    }
}

/// One periodic observation of a ride's live state.
///
/// Immutable and append-only: rows are written once by the collector and
/// only ever deleted by the cleanup job, below the aggregated-until
/// high-water mark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideSnapshot {
    pub ride_id: i64,
    pub park_id: i64,
    pub recorded_at: DateTime<Utc>,
    pub wait_time: Option<i32>,
    pub status: RideStatus,
    pub is_open: Option<bool>,
    pub computed_is_open: bool,
}

impl RideSnapshot {
    pub fn new(
        ride_id: i64,
        park_id: i64,
        recorded_at: DateTime<Utc>,
        wait_time: Option<i32>,
        status: RideStatus,
        is_open: Option<bool>,
    ) -> Self {
        Self {
            ride_id,
            park_id,
            recorded_at,
            wait_time,
            status,
            is_open,
            computed_is_open: computed_is_open(wait_time, is_open),
        }
    }
}

/// The open/closed rule every downstream statistic hangs off.
///
/// A posted wait time implies riders are queueing regardless of what the
/// raw flag says; with no wait signal (zero or missing) the raw flag
/// decides, and a missing flag means closed.
pub fn computed_is_open(wait_time: Option<i32>, is_open: Option<bool>) -> bool {
    match wait_time {
        Some(w) if w > 0 => true,
        _ => is_open.unwrap_or(false),
    }
}

/// Park-level activity observation, derived by the collector from whether
/// any ride at the park was open at that instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkSnapshot {
    pub park_id: i64,
    pub recorded_at: DateTime<Utc>,
    pub park_appears_open: bool,
    pub rides_open: u32,
    pub rides_total: u32,
}
