use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::job::{AggregationType, JobStatus, LastSuccessful};
use crate::models::park::Park;
use crate::models::stats::{ParkStats, RideStats};
use crate::operating_hours::OperatingHoursDetector;
use crate::shame_score::ShameScoreCalculator;
use crate::snapshot_store::SnapshotStore;
use crate::stats_db::StatsDb;
use crate::status_change::{detect_transitions, summarize_events};
use crate::time::{Clock, month_bounds, park_local_day_utc, week_bounds, year_bounds};

/// What one `run` call produced (or found already persisted).
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: JobStatus,
    pub parks_processed: i64,
    pub rides_processed: i64,
    pub aggregated_until_ts: Option<DateTime<Utc>>,
}

/// The stats key for a (type, date) pair. Hourly rows append the hour via
/// [`hourly_period_key`].
pub fn period_key(agg_type: AggregationType, date: NaiveDate) -> String {
    match agg_type {
        AggregationType::Hourly | AggregationType::Daily => date.to_string(),
        AggregationType::Weekly => {
            let iso = date.iso_week();
            format!("{}-W{:02}", iso.year(), iso.week())
        }
        AggregationType::Monthly => date.format("%Y-%m").to_string(),
        AggregationType::Yearly => date.format("%Y").to_string(),
    }
}

pub fn hourly_period_key(date: NaiveDate, hour: u32) -> String {
    format!("{date} {hour:02}")
}

/// Orchestrates one aggregation pass per (date, granularity): detects
/// operating sessions and status changes, computes ride and park period
/// stats, and keeps the job log that gates raw-snapshot cleanup.
///
/// Everything it persists is an upsert keyed by entity + period, so the
/// external scheduler can call `run` as many times as it likes.
pub struct AggregationService {
    store: Arc<dyn SnapshotStore>,
    db: Arc<StatsDb>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    operating_hours: OperatingHoursDetector,
    shame: ShameScoreCalculator,
}

struct ParkDayResult {
    rides_processed: i64,
}

impl AggregationService {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        db: Arc<StatsDb>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        let operating_hours = OperatingHoursDetector::new(store.clone(), db.clone());
        let shame = ShameScoreCalculator::new(
            store.clone(),
            db.clone(),
            config.aggregation.default_tier_weight,
        );
        Self {
            store,
            db,
            clock,
            config,
            operating_hours,
            shame,
        }
    }

    /// Run one aggregation attempt. Safe to call repeatedly: a prior
    /// success short-circuits (unless `force`), a fresh `running` row is a
    /// conflict, and a stale `running` row is reclaimed.
    pub async fn run(
        &self,
        date: NaiveDate,
        agg_type: AggregationType,
        timezone_filter: Option<&str>,
        force: bool,
    ) -> Result<RunOutcome> {
        if let Some(existing) = self.db.find_job(date, agg_type)? {
            match existing.status {
                JobStatus::Success if !force => {
                    tracing::info!(
                        "{agg_type} aggregation for {date} already succeeded, skipping"
                    );
                    return Ok(RunOutcome {
                        status: JobStatus::Success,
                        parks_processed: existing.parks_processed,
                        rides_processed: existing.rides_processed,
                        aggregated_until_ts: existing.aggregated_until_ts,
                    });
                }
                JobStatus::Running => {
                    let age = self.clock.now_utc() - existing.started_at;
                    let stale_after =
                        Duration::minutes(self.config.aggregation.stale_running_minutes);
                    if age < stale_after {
                        return Err(PipelineError::Job(format!(
                            "{agg_type} aggregation for {date} is already running (started {})",
                            existing.started_at
                        )));
                    }
                    tracing::warn!(
                        "{agg_type} aggregation for {date} has a stale running row \
                         (started {}), reclaiming",
                        existing.started_at
                    );
                }
                _ => {}
            }
        }

        // The job identifier stays optional until the row exists; an error
        // raised before that point must not try to mark anything failed.
        let mut job_id: Option<String> = None;
        match self
            .run_inner(date, agg_type, timezone_filter, &mut job_id)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Some(id) = job_id.as_deref() {
                    let message = e.to_string();
                    if let Err(mark_err) =
                        self.db.mark_job_failed(id, self.clock.now_utc(), &message)
                    {
                        tracing::error!("could not mark job {id} failed: {mark_err}");
                    }
                }
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        date: NaiveDate,
        agg_type: AggregationType,
        timezone_filter: Option<&str>,
        job_id: &mut Option<String>,
    ) -> Result<RunOutcome> {
        let id = uuid::Uuid::new_v4().to_string();
        self.db
            .upsert_running_job(&id, date, agg_type, self.clock.now_utc())?;
        *job_id = Some(id.clone());
        tracing::info!("{agg_type} aggregation for {date} started (job {id})");

        let (parks, rides, until) = match agg_type {
            AggregationType::Daily => self.aggregate_daily(date, timezone_filter).await?,
            AggregationType::Hourly => self.aggregate_hourly(date, timezone_filter).await?,
            AggregationType::Weekly | AggregationType::Monthly | AggregationType::Yearly => {
                self.aggregate_rollup(date, agg_type)?
            }
        };

        self.db
            .mark_job_success(&id, self.clock.now_utc(), until, parks, rides)?;
        tracing::info!(
            "{agg_type} aggregation for {date} succeeded: {parks} parks, {rides} rides"
        );
        Ok(RunOutcome {
            status: JobStatus::Success,
            parks_processed: parks,
            rides_processed: rides,
            aggregated_until_ts: until,
        })
    }

    /// Group active parks by IANA timezone so each group's UTC window is
    /// computed once; groups touch disjoint parks and rides.
    fn timezone_groups(
        &self,
        timezone_filter: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<Park>>> {
        let mut groups: BTreeMap<String, Vec<Park>> = BTreeMap::new();
        for park in self.db.active_parks()? {
            if timezone_filter.is_some_and(|tz| tz != park.timezone) {
                continue;
            }
            groups.entry(park.timezone.clone()).or_default().push(park);
        }
        Ok(groups)
    }

    async fn aggregate_daily(
        &self,
        date: NaiveDate,
        timezone_filter: Option<&str>,
    ) -> Result<(i64, i64, Option<DateTime<Utc>>)> {
        let mut parks_processed = 0_i64;
        let mut rides_processed = 0_i64;
        let mut aggregated_until: Option<DateTime<Utc>> = None;

        for (tz_name, parks) in self.timezone_groups(timezone_filter)? {
            let tz = match crate::time::parse_tz(&tz_name) {
                Ok(tz) => tz,
                Err(e) => {
                    tracing::warn!("skipping timezone group '{tz_name}': {e}");
                    continue;
                }
            };
            let (day_start, day_end) = park_local_day_utc(date, tz);
            let day_end_ex = day_end + Duration::seconds(1);

            for park in parks {
                match self.process_park_daily(&park, date, tz, day_start, day_end_ex).await {
                    Ok(result) => {
                        parks_processed += 1;
                        rides_processed += result.rides_processed;
                    }
                    Err(e @ (PipelineError::Decode(_) | PipelineError::Timezone(_))) => {
                        tracing::warn!("skipping park {} for {date}: {e}", park.id);
                    }
                    Err(e) => return Err(e),
                }
            }

            if let Some(group_max) = self.store.max_recorded_at(day_start, day_end_ex).await? {
                aggregated_until = Some(match aggregated_until {
                    Some(current) => current.max(group_max),
                    None => group_max,
                });
            }
        }

        Ok((parks_processed, rides_processed, aggregated_until))
    }

    async fn process_park_daily(
        &self,
        park: &Park,
        date: NaiveDate,
        tz: chrono_tz::Tz,
        day_start: DateTime<Utc>,
        day_end_ex: DateTime<Utc>,
    ) -> Result<ParkDayResult> {
        let session = self.operating_hours.detect_and_save(park.id, date, tz).await?;

        // Stats windows follow the detected operating session when the park
        // ran that day; uptime is measured against hours the gates were
        // actually open, not the wall clock.
        let (window_start, window_end_ex) = match &session {
            Some(s) => (s.session_start_utc, s.session_end_utc + Duration::seconds(1)),
            None => (day_start, day_end_ex),
        };
        let period_minutes = (window_end_ex - window_start).num_minutes();
        let key = period_key(AggregationType::Daily, date);

        let rides = self.db.rides_for_park(park.id)?;
        let rides_total = rides.len() as i64;
        let mut rides_active = 0_i64;
        let mut park_downtime = 0_i64;
        let mut park_changes = 0_i64;
        let mut uptime_pct_sum = 0.0_f64;
        let mut wait_sum = 0.0_f64;
        let mut wait_count = 0_i64;
        let mut park_peak: Option<i32> = None;

        for ride in &rides {
            let snapshots = self
                .store
                .ride_snapshots(ride.id, window_start, window_end_ex)
                .await?;
            if snapshots.is_empty() {
                // A ride with no data that day is skipped, not failed.
                continue;
            }

            let events = detect_transitions(&snapshots);
            self.store.insert_status_changes(&events).await?;
            let summary = summarize_events(ride.id, &events, period_minutes);

            let waits: Vec<i32> = snapshots.iter().filter_map(|s| s.wait_time).collect();
            let avg_wait = if waits.is_empty() {
                None
            } else {
                Some(waits.iter().map(|w| *w as f64).sum::<f64>() / waits.len() as f64)
            };
            let peak_wait = waits.iter().max().copied();

            let downtime = summary.total_downtime_minutes;
            let stats = RideStats {
                ride_id: ride.id,
                park_id: park.id,
                period_type: AggregationType::Daily,
                period_key: key.clone(),
                uptime_minutes: (period_minutes - downtime).max(0),
                downtime_minutes: downtime,
                uptime_percentage: summary.uptime_percentage,
                avg_wait_time: avg_wait,
                peak_wait_time: peak_wait,
                status_changes: events.len() as i64,
                snapshot_count: snapshots.len() as i64,
            };
            self.db.upsert_ride_stats(&stats)?;

            rides_active += 1;
            park_downtime += downtime;
            park_changes += stats.status_changes;
            uptime_pct_sum += stats.uptime_percentage;
            if let Some(avg) = avg_wait {
                wait_sum += avg * waits.len() as f64;
                wait_count += waits.len() as i64;
            }
            park_peak = park_peak.max(peak_wait);
        }

        let shame = self
            .shame
            .average(park.id, window_start, window_end_ex)
            .await?;

        let park_stats = ParkStats {
            park_id: park.id,
            period_type: AggregationType::Daily,
            period_key: key,
            rides_total,
            rides_active,
            operating_minutes: session.as_ref().map_or(0, |s| s.operating_minutes),
            downtime_minutes: park_downtime,
            uptime_percentage: if rides_active > 0 {
                uptime_pct_sum / rides_active as f64
            } else {
                0.0
            },
            avg_wait_time: (wait_count > 0).then(|| wait_sum / wait_count as f64),
            peak_wait_time: park_peak,
            status_changes: park_changes,
            shame_score: shame,
        };
        self.db.upsert_park_stats(&park_stats)?;

        Ok(ParkDayResult {
            rides_processed: rides_active,
        })
    }

    /// Hourly granularity persists park-level rows only: per-hour shame and
    /// wait aggregates for the live dashboards.
    async fn aggregate_hourly(
        &self,
        date: NaiveDate,
        timezone_filter: Option<&str>,
    ) -> Result<(i64, i64, Option<DateTime<Utc>>)> {
        let mut parks_processed = 0_i64;
        let mut aggregated_until: Option<DateTime<Utc>> = None;

        for (tz_name, parks) in self.timezone_groups(timezone_filter)? {
            let tz = match crate::time::parse_tz(&tz_name) {
                Ok(tz) => tz,
                Err(e) => {
                    tracing::warn!("skipping timezone group '{tz_name}': {e}");
                    continue;
                }
            };
            let (day_start, day_end) = park_local_day_utc(date, tz);
            let day_end_ex = day_end + Duration::seconds(1);

            for park in parks {
                let hours = self.shame.hourly_breakdown(park.id, date).await?;
                let rides_total = self.db.rides_for_park(park.id)?.len() as i64;
                let mut wrote_any = false;

                for bucket in hours {
                    let Some(value) = bucket.value else { continue };
                    let stats = ParkStats {
                        park_id: park.id,
                        period_type: AggregationType::Hourly,
                        period_key: hourly_period_key(date, bucket.hour),
                        rides_total,
                        rides_active: 0,
                        operating_minutes: 0,
                        downtime_minutes: 0,
                        uptime_percentage: 0.0,
                        avg_wait_time: None,
                        peak_wait_time: None,
                        status_changes: 0,
                        shame_score: Some(value),
                    };
                    self.db.upsert_park_stats(&stats)?;
                    wrote_any = true;
                }
                if wrote_any {
                    parks_processed += 1;
                }
            }

            if let Some(group_max) = self.store.max_recorded_at(day_start, day_end_ex).await? {
                aggregated_until = Some(match aggregated_until {
                    Some(current) => current.max(group_max),
                    None => group_max,
                });
            }
        }

        Ok((parks_processed, 0, aggregated_until))
    }

    /// Weekly/monthly/yearly periods roll persisted daily rows up in SQL.
    /// Raw snapshots may legally be gone by the time these run; the daily
    /// rows are the durable source.
    fn aggregate_rollup(
        &self,
        date: NaiveDate,
        agg_type: AggregationType,
    ) -> Result<(i64, i64, Option<DateTime<Utc>>)> {
        let (from, to) = match agg_type {
            AggregationType::Weekly => week_bounds(date),
            AggregationType::Monthly => month_bounds(date),
            AggregationType::Yearly => year_bounds(date),
            _ => unreachable!("rollup called for {agg_type}"),
        };
        let key = period_key(agg_type, date);

        let ride_rows = self.db.rollup_ride_stats(agg_type, &key, from, to)?;
        for row in &ride_rows {
            self.db.upsert_ride_stats(row)?;
        }
        let park_rows = self.db.rollup_park_stats(agg_type, &key, from, to)?;
        for row in &park_rows {
            self.db.upsert_park_stats(row)?;
        }

        Ok((park_rows.len() as i64, ride_rows.len() as i64, None))
    }

    /// The cleanup consumer's contract: the newest successful job of a
    /// type. Snapshots at or above its `aggregated_until_ts` must survive.
    pub fn last_successful(&self, agg_type: AggregationType) -> Result<Option<LastSuccessful>> {
        self.db.last_successful(agg_type)
    }

    /// Oldest `recorded_at` that must be kept, for the cleanup consumer.
    /// Falls back to `now - safety_buffer` when no daily job has ever
    /// succeeded; failing closed rather than permitting a full wipe.
    pub fn deletion_watermark(&self) -> Result<DateTime<Utc>> {
        let last = self.db.last_successful(AggregationType::Daily)?;
        let buffer = self.clock.now_utc()
            - Duration::hours(self.config.cleanup.safety_buffer_hours);
        Ok(match last.and_then(|l| l.aggregated_until_ts) {
            Some(until) => until.min(buffer),
            None => buffer,
        })
    }
}
