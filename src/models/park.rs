use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// A park as the upstream catalog describes it.
///
/// `separate_closed_status` is the operator-type flag: operators that
/// distinguish a scheduled closure from a malfunction report CLOSED and
/// DOWN as different things, and only DOWN counts against the shame score.
/// Operators without the distinction report closures and breakdowns the
/// same way, so both count as down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Park {
    pub id: i64,
    pub name: String,
    pub timezone: String,
    pub separate_closed_status: bool,
    pub active: bool,
}

impl Park {
    /// Parse the stored IANA timezone name.
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| PipelineError::Timezone(self.timezone.clone()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: i64,
    pub park_id: i64,
    pub name: String,
    pub active: bool,
}

/// Read-only tier classification input: tier 1 headliners weigh 3, tier 2
/// weighs 2, tier 3 weighs 1. Rides absent from the table get the
/// configured default weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideWeight {
    pub ride_id: i64,
    pub tier: i64,
    pub tier_weight: i64,
}
