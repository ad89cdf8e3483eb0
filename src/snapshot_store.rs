use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Client;

use crate::error::{PipelineError, Result};
use crate::models::event::StatusChangeEvent;
use crate::models::snapshot::{ParkSnapshot, RideSnapshot};

/// Aggregate view over a park's *open* snapshots in a window. `None` rows
/// upstream mean the park never stirred that day, which callers must treat
/// as "no session", not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenActivitySummary {
    pub first_open: DateTime<Utc>,
    pub last_open: DateTime<Utc>,
    pub active_rides: i64,
    pub open_snapshots: i64,
}

/// Access to the raw snapshot time series and the derived status-change
/// log. The production implementation is ClickHouse; tests swap in the
/// in-memory store below.
///
/// All range queries are half-open `[start, end)` and return rows in
/// ascending `recorded_at` order.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn ride_snapshots(
        &self,
        ride_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RideSnapshot>>;

    /// All ride snapshots for every ride of one park.
    async fn park_ride_snapshots(
        &self,
        park_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RideSnapshot>>;

    async fn park_snapshots(
        &self,
        park_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ParkSnapshot>>;

    async fn latest_park_snapshot(&self, park_id: i64) -> Result<Option<ParkSnapshot>>;

    /// min/max/open-count aggregate over open ride snapshots of a park.
    async fn open_activity_summary(
        &self,
        park_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<OpenActivitySummary>>;

    /// Append detected transitions. Must be idempotent under retry.
    async fn insert_status_changes(&self, events: &[StatusChangeEvent]) -> Result<()>;

    /// Top-N stored outages by duration, optionally filtered by park and window.
    async fn longest_status_changes(
        &self,
        park_id: Option<i64>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<StatusChangeEvent>>;

    /// Newest raw ride-snapshot timestamp within a window; the basis for
    /// the aggregated-until high-water mark.
    async fn max_recorded_at(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;
}

/// ClickHouse-backed store over the tables in `migrations.rs`.
#[derive(Clone)]
pub struct ClickHouseStore {
    ch: Client,
}

impl ClickHouseStore {
    pub fn new(ch: Client) -> Self {
        Self { ch }
    }
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn ts_from_unix(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| PipelineError::Decode(format!("timestamp {secs} out of range")))
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct RideSnapshotRow {
    recorded_at: i64,
    ride_id: i64,
    park_id: i64,
    wait_time: Option<i32>,
    status: String,
    is_open: Option<u8>,
    computed_is_open: u8,
}

impl RideSnapshotRow {
    fn into_model(self) -> Result<RideSnapshot> {
        Ok(RideSnapshot {
            ride_id: self.ride_id,
            park_id: self.park_id,
            recorded_at: ts_from_unix(self.recorded_at)?,
            wait_time: self.wait_time,
            status: self.status.parse().map_err(PipelineError::Decode)?,
            is_open: self.is_open.map(|v| v != 0),
            computed_is_open: self.computed_is_open != 0,
        })
    }
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct ParkSnapshotRow {
    recorded_at: i64,
    park_id: i64,
    park_appears_open: u8,
    rides_open: u32,
    rides_total: u32,
}

impl ParkSnapshotRow {
    fn into_model(self) -> Result<ParkSnapshot> {
        Ok(ParkSnapshot {
            park_id: self.park_id,
            recorded_at: ts_from_unix(self.recorded_at)?,
            park_appears_open: self.park_appears_open != 0,
            rides_open: self.rides_open,
            rides_total: self.rides_total,
        })
    }
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct StatusChangeRow {
    changed_at: i64,
    ride_id: i64,
    park_id: i64,
    previous_status: String,
    new_status: String,
    new_is_open: u8,
    downtime_duration_minutes: Option<i64>,
}

impl StatusChangeRow {
    fn into_model(self) -> Result<StatusChangeEvent> {
        Ok(StatusChangeEvent {
            ride_id: self.ride_id,
            park_id: self.park_id,
            changed_at: ts_from_unix(self.changed_at)?,
            previous_status: self.previous_status.parse().map_err(PipelineError::Decode)?,
            new_status: self.new_status.parse().map_err(PipelineError::Decode)?,
            new_is_open: self.new_is_open != 0,
            downtime_duration_minutes: self.downtime_duration_minutes,
        })
    }
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct OpenSummaryRow {
    first_open: i64,
    last_open: i64,
    active_rides: u64,
    open_snapshots: u64,
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct MaxTsRow {
    max_ts: i64,
    row_count: u64,
}

const RIDE_SNAPSHOT_COLS: &str = "toInt64(toUnixTimestamp(recorded_at)) AS recorded_at, \
     ride_id, park_id, wait_time, status, is_open, computed_is_open";

#[async_trait]
impl SnapshotStore for ClickHouseStore {
    async fn ride_snapshots(
        &self,
        ride_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RideSnapshot>> {
        let sql = format!(
            "SELECT {RIDE_SNAPSHOT_COLS} FROM parkpulse.ride_snapshots \
             WHERE ride_id = {ride_id} \
             AND recorded_at >= parseDateTimeBestEffort('{}') \
             AND recorded_at < parseDateTimeBestEffort('{}') \
             ORDER BY recorded_at ASC",
            fmt_ts(start),
            fmt_ts(end),
        );
        let rows = self.ch.query(&sql).fetch_all::<RideSnapshotRow>().await?;
        rows.into_iter().map(RideSnapshotRow::into_model).collect()
    }

    async fn park_ride_snapshots(
        &self,
        park_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RideSnapshot>> {
        let sql = format!(
            "SELECT {RIDE_SNAPSHOT_COLS} FROM parkpulse.ride_snapshots \
             WHERE park_id = {park_id} \
             AND recorded_at >= parseDateTimeBestEffort('{}') \
             AND recorded_at < parseDateTimeBestEffort('{}') \
             ORDER BY recorded_at ASC, ride_id ASC",
            fmt_ts(start),
            fmt_ts(end),
        );
        let rows = self.ch.query(&sql).fetch_all::<RideSnapshotRow>().await?;
        rows.into_iter().map(RideSnapshotRow::into_model).collect()
    }

    async fn park_snapshots(
        &self,
        park_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ParkSnapshot>> {
        let sql = format!(
            "SELECT toInt64(toUnixTimestamp(recorded_at)) AS recorded_at, park_id, \
             park_appears_open, rides_open, rides_total \
             FROM parkpulse.park_snapshots \
             WHERE park_id = {park_id} \
             AND recorded_at >= parseDateTimeBestEffort('{}') \
             AND recorded_at < parseDateTimeBestEffort('{}') \
             ORDER BY recorded_at ASC",
            fmt_ts(start),
            fmt_ts(end),
        );
        let rows = self.ch.query(&sql).fetch_all::<ParkSnapshotRow>().await?;
        rows.into_iter().map(ParkSnapshotRow::into_model).collect()
    }

    async fn latest_park_snapshot(&self, park_id: i64) -> Result<Option<ParkSnapshot>> {
        let sql = format!(
            "SELECT toInt64(toUnixTimestamp(recorded_at)) AS recorded_at, park_id, \
             park_appears_open, rides_open, rides_total \
             FROM parkpulse.park_snapshots \
             WHERE park_id = {park_id} \
             ORDER BY recorded_at DESC LIMIT 1"
        );
        let rows = self.ch.query(&sql).fetch_all::<ParkSnapshotRow>().await?;
        rows.into_iter().next().map(ParkSnapshotRow::into_model).transpose()
    }

    async fn open_activity_summary(
        &self,
        park_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<OpenActivitySummary>> {
        let sql = format!(
            "SELECT toInt64(toUnixTimestamp(min(recorded_at))) AS first_open, \
             toInt64(toUnixTimestamp(max(recorded_at))) AS last_open, \
             uniqExact(ride_id) AS active_rides, \
             count() AS open_snapshots \
             FROM parkpulse.ride_snapshots \
             WHERE park_id = {park_id} AND computed_is_open = 1 \
             AND recorded_at >= parseDateTimeBestEffort('{}') \
             AND recorded_at < parseDateTimeBestEffort('{}')",
            fmt_ts(start),
            fmt_ts(end),
        );
        let row = self.ch.query(&sql).fetch_one::<OpenSummaryRow>().await?;
        if row.open_snapshots == 0 {
            return Ok(None);
        }
        Ok(Some(OpenActivitySummary {
            first_open: ts_from_unix(row.first_open)?,
            last_open: ts_from_unix(row.last_open)?,
            active_rides: row.active_rides as i64,
            open_snapshots: row.open_snapshots as i64,
        }))
    }

    async fn insert_status_changes(&self, events: &[StatusChangeEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        // Batch INSERT with literal values; the ReplacingMergeTree key
        // collapses duplicate (ride_id, changed_at) rows on merge.
        let mut values = Vec::with_capacity(events.len());
        for e in events {
            let duration = match e.downtime_duration_minutes {
                Some(d) => d.to_string(),
                None => "NULL".to_string(),
            };
            values.push(format!(
                "('{}', {}, {}, '{}', '{}', {}, {})",
                e.changed_at.format("%Y-%m-%d %H:%M:%S"),
                e.ride_id,
                e.park_id,
                e.previous_status.as_str(),
                e.new_status.as_str(),
                u8::from(e.new_is_open),
                duration,
            ));
        }
        let sql = format!(
            "INSERT INTO parkpulse.status_changes \
             (changed_at, ride_id, park_id, previous_status, new_status, new_is_open, \
             downtime_duration_minutes) VALUES {}",
            values.join(", ")
        );
        self.ch.query(&sql).execute().await?;
        Ok(())
    }

    async fn longest_status_changes(
        &self,
        park_id: Option<i64>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<StatusChangeEvent>> {
        let mut conditions = vec!["downtime_duration_minutes IS NOT NULL".to_string()];
        if let Some(pid) = park_id {
            conditions.push(format!("park_id = {pid}"));
        }
        if let Some(s) = start {
            conditions.push(format!("changed_at >= parseDateTimeBestEffort('{}')", fmt_ts(s)));
        }
        if let Some(e) = end {
            conditions.push(format!("changed_at < parseDateTimeBestEffort('{}')", fmt_ts(e)));
        }
        let sql = format!(
            "SELECT toInt64(toUnixTimestamp(changed_at)) AS changed_at, ride_id, park_id, \
             previous_status, new_status, new_is_open, downtime_duration_minutes \
             FROM parkpulse.status_changes FINAL \
             WHERE {} \
             ORDER BY downtime_duration_minutes DESC LIMIT {limit}",
            conditions.join(" AND "),
        );
        let rows = self.ch.query(&sql).fetch_all::<StatusChangeRow>().await?;
        rows.into_iter().map(StatusChangeRow::into_model).collect()
    }

    async fn max_recorded_at(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let sql = format!(
            "SELECT toInt64(toUnixTimestamp(max(recorded_at))) AS max_ts, count() AS row_count \
             FROM parkpulse.ride_snapshots \
             WHERE recorded_at >= parseDateTimeBestEffort('{}') \
             AND recorded_at < parseDateTimeBestEffort('{}')",
            fmt_ts(start),
            fmt_ts(end),
        );
        let row = self.ch.query(&sql).fetch_one::<MaxTsRow>().await?;
        if row.row_count == 0 {
            return Ok(None);
        }
        Ok(Some(ts_from_unix(row.max_ts)?))
    }
}

/// In-memory store for tests: same contract, no server.
#[cfg(test)]
pub mod memory {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryStore {
        ride: Mutex<Vec<RideSnapshot>>,
        park: Mutex<Vec<ParkSnapshot>>,
        changes: Mutex<Vec<StatusChangeEvent>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_ride(&self, snapshot: RideSnapshot) {
            self.ride.lock().unwrap().push(snapshot);
        }

        pub fn push_park(&self, snapshot: ParkSnapshot) {
            self.park.lock().unwrap().push(snapshot);
        }

        pub fn stored_changes(&self) -> Vec<StatusChangeEvent> {
            self.changes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SnapshotStore for MemoryStore {
        async fn ride_snapshots(
            &self,
            ride_id: i64,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<RideSnapshot>> {
            let mut rows: Vec<RideSnapshot> = self
                .ride
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.ride_id == ride_id && s.recorded_at >= start && s.recorded_at < end)
                .cloned()
                .collect();
            rows.sort_by_key(|s| s.recorded_at);
            Ok(rows)
        }

        async fn park_ride_snapshots(
            &self,
            park_id: i64,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<RideSnapshot>> {
            let mut rows: Vec<RideSnapshot> = self
                .ride
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.park_id == park_id && s.recorded_at >= start && s.recorded_at < end)
                .cloned()
                .collect();
            rows.sort_by_key(|s| (s.recorded_at, s.ride_id));
            Ok(rows)
        }

        async fn park_snapshots(
            &self,
            park_id: i64,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<ParkSnapshot>> {
            let mut rows: Vec<ParkSnapshot> = self
                .park
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.park_id == park_id && s.recorded_at >= start && s.recorded_at < end)
                .cloned()
                .collect();
            rows.sort_by_key(|s| s.recorded_at);
            Ok(rows)
        }

        async fn latest_park_snapshot(&self, park_id: i64) -> Result<Option<ParkSnapshot>> {
            Ok(self
                .park
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.park_id == park_id)
                .max_by_key(|s| s.recorded_at)
                .cloned())
        }

        async fn open_activity_summary(
            &self,
            park_id: i64,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Option<OpenActivitySummary>> {
            let ride = self.ride.lock().unwrap();
            let open: Vec<&RideSnapshot> = ride
                .iter()
                .filter(|s| {
                    s.park_id == park_id
                        && s.computed_is_open
                        && s.recorded_at >= start
                        && s.recorded_at < end
                })
                .collect();
            if open.is_empty() {
                return Ok(None);
            }
            let first_open = open.iter().map(|s| s.recorded_at).min().unwrap();
            let last_open = open.iter().map(|s| s.recorded_at).max().unwrap();
            let mut ride_ids: Vec<i64> = open.iter().map(|s| s.ride_id).collect();
            ride_ids.sort_unstable();
            ride_ids.dedup();
            Ok(Some(OpenActivitySummary {
                first_open,
                last_open,
                active_rides: ride_ids.len() as i64,
                open_snapshots: open.len() as i64,
            }))
        }

        async fn insert_status_changes(&self, events: &[StatusChangeEvent]) -> Result<()> {
            let mut changes = self.changes.lock().unwrap();
            for e in events {
                // Mirror the ReplacingMergeTree key.
                changes.retain(|c| !(c.ride_id == e.ride_id && c.changed_at == e.changed_at));
                changes.push(e.clone());
            }
            Ok(())
        }

        async fn longest_status_changes(
            &self,
            park_id: Option<i64>,
            start: Option<DateTime<Utc>>,
            end: Option<DateTime<Utc>>,
            limit: u32,
        ) -> Result<Vec<StatusChangeEvent>> {
            let mut rows: Vec<StatusChangeEvent> = self
                .changes
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.downtime_duration_minutes.is_some())
                .filter(|c| park_id.is_none_or(|p| c.park_id == p))
                .filter(|c| start.is_none_or(|s| c.changed_at >= s))
                .filter(|c| end.is_none_or(|e| c.changed_at < e))
                .cloned()
                .collect();
            rows.sort_by_key(|c| std::cmp::Reverse(c.downtime_duration_minutes));
            rows.truncate(limit as usize);
            Ok(rows)
        }

        async fn max_recorded_at(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Option<DateTime<Utc>>> {
            Ok(self
                .ride
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.recorded_at >= start && s.recorded_at < end)
                .map(|s| s.recorded_at)
                .max())
        }
    }
}
