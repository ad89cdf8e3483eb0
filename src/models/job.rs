use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Granularity of one aggregation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Hourly => "hourly",
            AggregationType::Daily => "daily",
            AggregationType::Weekly => "weekly",
            AggregationType::Monthly => "monthly",
            AggregationType::Yearly => "yearly",
        }
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(AggregationType::Hourly),
            "daily" => Ok(AggregationType::Daily),
            "weekly" => Ok(AggregationType::Weekly),
            "monthly" => Ok(AggregationType::Monthly),
            "yearly" => Ok(AggregationType::Yearly),
            other => Err(format!("unknown aggregation type '{other}'")),
        }
    }
}

/// Job lifecycle: `running` → `success` | `failed`, both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// One attempt at computing period statistics for a (date, type) pair.
///
/// Unique per (aggregation_date, aggregation_type); the coupling point the
/// external cleanup job reads to decide which raw snapshots are safe to
/// delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationJob {
    pub id: String,
    pub aggregation_date: NaiveDate,
    pub aggregation_type: AggregationType,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub aggregated_until_ts: Option<DateTime<Utc>>,
    pub parks_processed: i64,
    pub rides_processed: i64,
    pub error_message: Option<String>,
}

/// What `last_successful` hands the cleanup consumer. Snapshots with
/// `recorded_at >= aggregated_until_ts` must never be deleted; a `None`
/// timestamp permits no deletion at all for that job's coverage.
#[derive(Debug, Clone, Serialize)]
pub struct LastSuccessful {
    pub aggregation_date: NaiveDate,
    pub aggregated_until_ts: Option<DateTime<Utc>>,
    pub parks_processed: i64,
    pub rides_processed: i64,
}
