use serde::Deserialize;
use std::path::Path;

use crate::retry::RetryPolicy;

/// Top-level config loaded from `parkpulse.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Expected collector cadence between snapshots of one ride.
    #[serde(default = "default_cadence")]
    pub snapshot_cadence_minutes: i64,
    /// Weight applied to rides the classifier has not tiered yet.
    #[serde(default = "default_tier_weight")]
    pub default_tier_weight: i64,
    /// A `running` job row older than this is treated as failed and
    /// reclaimed by the next attempt.
    #[serde(default = "default_stale_running")]
    pub stale_running_minutes: i64,
    /// Fixed reference timezone for site-wide reporting windows. Parks
    /// keep their own local-day policy regardless.
    #[serde(default = "default_reporting_tz")]
    pub reporting_timezone: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            snapshot_cadence_minutes: default_cadence(),
            default_tier_weight: default_tier_weight(),
            stale_running_minutes: default_stale_running(),
            reporting_timezone: default_reporting_tz(),
        }
    }
}

fn default_cadence() -> i64 {
    5
}

fn default_tier_weight() -> i64 {
    1
}

fn default_stale_running() -> i64 {
    120
}

fn default_reporting_tz() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// With no successful daily job on record, snapshots younger than this
    /// many hours are never eligible for deletion.
    #[serde(default = "default_safety_buffer")]
    pub safety_buffer_hours: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            safety_buffer_hours: default_safety_buffer(),
        }
    }
}

fn default_safety_buffer() -> i64 {
    48
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifierConfig {
    /// Shame-score drift below this is a rounding warning, above it a
    /// formula divergence.
    #[serde(default = "default_shame_tolerance")]
    pub shame_tolerance: f64,
    #[serde(default = "default_minutes_tolerance")]
    pub minutes_tolerance: i64,
    #[serde(default = "default_percent_tolerance")]
    pub percent_tolerance: f64,
    /// Observed median snapshot interval may exceed the configured cadence
    /// by this factor before the cadence check warns.
    #[serde(default = "default_cadence_slack")]
    pub cadence_slack_factor: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            shame_tolerance: default_shame_tolerance(),
            minutes_tolerance: default_minutes_tolerance(),
            percent_tolerance: default_percent_tolerance(),
            cadence_slack_factor: default_cadence_slack(),
        }
    }
}

fn default_shame_tolerance() -> f64 {
    0.05
}

fn default_minutes_tolerance() -> i64 {
    1
}

fn default_percent_tolerance() -> f64 {
    0.1
}

fn default_cadence_slack() -> f64 {
    1.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How often the rollup scheduler checks whether an attempt is due.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Attempt offsets after local-day rollover, in minutes.
    #[serde(default = "default_retry_offsets")]
    pub retry_offsets_minutes: Vec<i64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            poll_interval_secs: default_poll_interval(),
            retry_offsets_minutes: default_retry_offsets(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    60
}

fn default_retry_offsets() -> Vec<i64> {
    vec![10, 70, 130]
}

impl PipelineConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_offsets_minutes(&self.scheduler.retry_offsets_minutes)
    }

    pub fn reporting_tz(&self) -> crate::error::Result<chrono_tz::Tz> {
        crate::time::parse_tz(&self.aggregation.reporting_timezone)
    }
}
