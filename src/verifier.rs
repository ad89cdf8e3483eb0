use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;

use crate::aggregation::period_key;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::audit::{AuditSummary, Discrepancy, Severity};
use crate::models::job::AggregationType;
use crate::models::park::Park;
use crate::models::snapshot::RideSnapshot;
use crate::models::stats::{ParkStats, RideStats};
use crate::shame_score::{ShameScoreCalculator, per_instant_scores};
use crate::snapshot_store::SnapshotStore;
use crate::stats_db::StatsDb;
use crate::status_change::{detect_transitions, summarize_events};
use crate::time::park_local_day_utc;

/// Independently recomputes daily metrics from raw snapshots and diffs
/// them against the persisted rows.
///
/// Mismatches are findings, never errors: rounding-scale drift and cadence
/// irregularities classify as warnings, anything a formula or logic
/// divergence could explain classifies as critical.
pub struct AggregateVerifier {
    store: Arc<dyn SnapshotStore>,
    db: Arc<StatsDb>,
    config: PipelineConfig,
    shame: ShameScoreCalculator,
}

impl AggregateVerifier {
    pub fn new(store: Arc<dyn SnapshotStore>, db: Arc<StatsDb>, config: PipelineConfig) -> Self {
        let shame = ShameScoreCalculator::new(
            store.clone(),
            db.clone(),
            config.aggregation.default_tier_weight,
        );
        Self {
            store,
            db,
            config,
            shame,
        }
    }

    /// Verify daily aggregates for a date. `table` narrows the check to
    /// `"ride_stats"` or `"park_stats"`; `None` checks both.
    pub async fn verify(&self, date: NaiveDate, table: Option<&str>) -> Result<Vec<Discrepancy>> {
        let check_rides = table.is_none_or(|t| t == "ride_stats");
        let check_parks = table.is_none_or(|t| t == "park_stats");
        let mut issues = Vec::new();

        for park in self.db.active_parks()? {
            let tz = match park.tz() {
                Ok(tz) => tz,
                Err(e) => {
                    tracing::warn!("audit skipping park {}: {e}", park.id);
                    continue;
                }
            };
            let (day_start, day_end) = park_local_day_utc(date, tz);
            let day_end_ex = day_end + Duration::seconds(1);

            let session = self.db.get_operating_session(park.id, date)?;
            let (window_start, window_end_ex) = match &session {
                Some(s) => (s.session_start_utc, s.session_end_utc + Duration::seconds(1)),
                None => (day_start, day_end_ex),
            };
            let period_minutes = (window_end_ex - window_start).num_minutes();
            let key = period_key(AggregationType::Daily, date);

            let recomputed = self
                .recompute_park_day(&park, window_start, window_end_ex, period_minutes, &key)
                .await?;

            if check_rides {
                for (expected, snapshots) in &recomputed.rides {
                    let persisted =
                        self.db
                            .get_ride_stats(expected.ride_id, AggregationType::Daily, &key)?;
                    match persisted {
                        None => issues.push(missing_row(
                            "ride_stats",
                            expected.ride_id,
                            &key,
                            snapshots.len(),
                        )),
                        Some(actual) => {
                            self.diff_ride_stats(expected, &actual, &mut issues);
                        }
                    }
                }
            }

            if check_parks {
                let persisted = self.db.get_park_stats(park.id, AggregationType::Daily, &key)?;
                match persisted {
                    None if recomputed.has_data => {
                        issues.push(missing_row("park_stats", park.id, &key, 0));
                    }
                    None => {}
                    Some(actual) => {
                        self.diff_park_stats(&park, &recomputed, &actual, &mut issues);
                    }
                }
            }
        }

        Ok(issues)
    }

    async fn recompute_park_day(
        &self,
        park: &Park,
        window_start: DateTime<Utc>,
        window_end_ex: DateTime<Utc>,
        period_minutes: i64,
        key: &str,
    ) -> Result<RecomputedParkDay> {
        let rides = self.db.rides_for_park(park.id)?;
        let mut out = RecomputedParkDay {
            rides_total: rides.len() as i64,
            ..RecomputedParkDay::default()
        };

        for ride in &rides {
            let snapshots = self
                .store
                .ride_snapshots(ride.id, window_start, window_end_ex)
                .await?;
            if snapshots.is_empty() {
                continue;
            }
            let events = detect_transitions(&snapshots);
            let summary = summarize_events(ride.id, &events, period_minutes);
            let waits: Vec<i32> = snapshots.iter().filter_map(|s| s.wait_time).collect();
            let avg_wait = if waits.is_empty() {
                None
            } else {
                Some(waits.iter().map(|w| *w as f64).sum::<f64>() / waits.len() as f64)
            };

            let stats = RideStats {
                ride_id: ride.id,
                park_id: park.id,
                period_type: AggregationType::Daily,
                period_key: key.to_string(),
                uptime_minutes: (period_minutes - summary.total_downtime_minutes).max(0),
                downtime_minutes: summary.total_downtime_minutes,
                uptime_percentage: summary.uptime_percentage,
                avg_wait_time: avg_wait,
                peak_wait_time: waits.iter().max().copied(),
                status_changes: events.len() as i64,
                snapshot_count: snapshots.len() as i64,
            };

            out.downtime_minutes += stats.downtime_minutes;
            out.status_changes += stats.status_changes;
            out.uptime_pct_sum += stats.uptime_percentage;
            out.rides_active += 1;
            if let Some(avg) = avg_wait {
                out.wait_sum += avg * waits.len() as f64;
                out.wait_count += waits.len() as i64;
            }
            out.peak_wait = out.peak_wait.max(stats.peak_wait_time);
            out.has_data = true;
            out.rides.push((stats, snapshots));
        }

        // Shame, with the park's actual operator flag and, for the
        // down-rule consistency check, with the flag deliberately flipped.
        let weights = self.db.ride_weights_for_park(park.id)?;
        let all_snaps: Vec<RideSnapshot> = self
            .store
            .park_ride_snapshots(park.id, window_start, window_end_ex)
            .await?;
        let park_snaps = self
            .store
            .park_snapshots(park.id, window_start, window_end_ex)
            .await?;
        let default_weight = self.config.aggregation.default_tier_weight;

        out.shame = mean_scores(&per_instant_scores(
            &all_snaps,
            &park_snaps,
            &weights,
            default_weight,
            park.separate_closed_status,
        ));
        out.shame_wrong_rule = mean_scores(&per_instant_scores(
            &all_snaps,
            &park_snaps,
            &weights,
            default_weight,
            !park.separate_closed_status,
        ));

        Ok(out)
    }

    fn diff_ride_stats(
        &self,
        expected: &RideStats,
        actual: &RideStats,
        issues: &mut Vec<Discrepancy>,
    ) {
        let tol = &self.config.verifier;
        push_if(issues, compare_count(
            "ride_stats", expected.ride_id, &expected.period_key,
            "snapshot_count", expected.snapshot_count, actual.snapshot_count, tol.minutes_tolerance,
        ));
        push_if(issues, compare_count(
            "ride_stats", expected.ride_id, &expected.period_key,
            "downtime_minutes", expected.downtime_minutes, actual.downtime_minutes, tol.minutes_tolerance,
        ));
        push_if(issues, compare_count(
            "ride_stats", expected.ride_id, &expected.period_key,
            "uptime_minutes", expected.uptime_minutes, actual.uptime_minutes, tol.minutes_tolerance,
        ));
        push_if(issues, compare_count(
            "ride_stats", expected.ride_id, &expected.period_key,
            "status_changes", expected.status_changes, actual.status_changes, 1,
        ));
        push_if(issues, compare_float(
            "ride_stats", expected.ride_id, &expected.period_key,
            "uptime_percentage", Some(expected.uptime_percentage), Some(actual.uptime_percentage),
            tol.percent_tolerance,
        ));
        push_if(issues, compare_float(
            "ride_stats", expected.ride_id, &expected.period_key,
            "avg_wait_time", expected.avg_wait_time, actual.avg_wait_time, tol.percent_tolerance,
        ));
    }

    fn diff_park_stats(
        &self,
        park: &Park,
        recomputed: &RecomputedParkDay,
        actual: &ParkStats,
        issues: &mut Vec<Discrepancy>,
    ) {
        let tol = &self.config.verifier;
        let key = &actual.period_key;

        push_if(issues, compare_count(
            "park_stats", park.id, key, "rides_total",
            recomputed.rides_total, actual.rides_total, 0,
        ));
        push_if(issues, compare_count(
            "park_stats", park.id, key, "rides_active",
            recomputed.rides_active, actual.rides_active, 0,
        ));
        push_if(issues, compare_count(
            "park_stats", park.id, key, "downtime_minutes",
            recomputed.downtime_minutes, actual.downtime_minutes, tol.minutes_tolerance,
        ));
        push_if(issues, compare_count(
            "park_stats", park.id, key, "status_changes",
            recomputed.status_changes, actual.status_changes, 1,
        ));
        let expected_pct = if recomputed.rides_active > 0 {
            recomputed.uptime_pct_sum / recomputed.rides_active as f64
        } else {
            0.0
        };
        push_if(issues, compare_float(
            "park_stats", park.id, key, "uptime_percentage",
            Some(expected_pct), Some(actual.uptime_percentage), tol.percent_tolerance,
        ));
        let expected_wait = (recomputed.wait_count > 0)
            .then(|| recomputed.wait_sum / recomputed.wait_count as f64);
        push_if(issues, compare_float(
            "park_stats", park.id, key, "avg_wait_time",
            expected_wait, actual.avg_wait_time, tol.percent_tolerance,
        ));
        push_if(issues, compare_float(
            "park_stats", park.id, key, "peak_wait_time",
            recomputed.peak_wait.map(f64::from), actual.peak_wait_time.map(f64::from),
            0.0,
        ));

        // Shame score gets the null-aware comparison plus the operator
        // down-rule consistency check.
        match shame_mismatch(recomputed.shame, actual.shame_score, tol.shame_tolerance) {
            ShameVerdict::Ok => {}
            ShameVerdict::Rounding(diff) => {
                issues.push(Discrepancy {
                    severity: Severity::Warning,
                    table: "park_stats".into(),
                    entity_id: park.id,
                    period_key: key.clone(),
                    metric: "shame_score".into(),
                    expected: fmt_opt(recomputed.shame),
                    actual: fmt_opt(actual.shame_score),
                    detail: format!("rounding-level drift ({diff:.4})"),
                });
            }
            ShameVerdict::Divergent => {
                let wrong_rule_match = matches!(
                    (recomputed.shame_wrong_rule, actual.shame_score),
                    (Some(wrong), Some(stored)) if (wrong - stored).abs() <= tol.shame_tolerance
                );
                let detail = if wrong_rule_match {
                    format!(
                        "matches the {} down rule: wrong is-down predicate applied",
                        if park.separate_closed_status {
                            "non-distinguishing"
                        } else {
                            "distinguishing"
                        }
                    )
                } else {
                    "outside rounding tolerance".to_string()
                };
                issues.push(Discrepancy {
                    severity: Severity::Critical,
                    table: "park_stats".into(),
                    entity_id: park.id,
                    period_key: key.clone(),
                    metric: "shame_score".into(),
                    expected: fmt_opt(recomputed.shame),
                    actual: fmt_opt(actual.shame_score),
                    detail,
                });
            }
        }
    }

    /// Snapshot-cadence consistency: the observed median interval between a
    /// park's snapshot instants should stay near the configured cadence.
    pub async fn cadence_issues(&self, date: NaiveDate) -> Result<Vec<Discrepancy>> {
        let cadence = self.config.aggregation.snapshot_cadence_minutes;
        let threshold = cadence as f64 * self.config.verifier.cadence_slack_factor;
        let mut issues = Vec::new();

        for park in self.db.active_parks()? {
            let Ok(tz) = park.tz() else { continue };
            let (start, end) = park_local_day_utc(date, tz);
            let snaps = self
                .store
                .park_ride_snapshots(park.id, start, end + Duration::seconds(1))
                .await?;

            let mut instants: Vec<DateTime<Utc>> = snaps.iter().map(|s| s.recorded_at).collect();
            instants.sort_unstable();
            instants.dedup();
            if instants.len() < 3 {
                continue;
            }
            let mut gaps: Vec<i64> = instants
                .windows(2)
                .map(|p| (p[1] - p[0]).num_minutes())
                .collect();
            gaps.sort_unstable();
            let median = gaps[gaps.len() / 2] as f64;

            if median > threshold {
                issues.push(Discrepancy {
                    severity: Severity::Warning,
                    table: "ride_snapshots".into(),
                    entity_id: park.id,
                    period_key: date.to_string(),
                    metric: "snapshot_cadence".into(),
                    expected: format!("{cadence}m"),
                    actual: format!("{median}m"),
                    detail: "observed median interval exceeds the collector cadence".into(),
                });
            }
        }
        Ok(issues)
    }

    /// Contract between the two time-averaged readings: the unweighted
    /// mean of non-null hourly buckets must equal the window average to
    /// one decimal.
    pub async fn hourly_contract_issues(&self, date: NaiveDate) -> Result<Vec<Discrepancy>> {
        let mut issues = Vec::new();
        for park in self.db.active_parks()? {
            let Ok(tz) = park.tz() else { continue };
            let (start, end) = park_local_day_utc(date, tz);
            let average = self
                .shame
                .average(park.id, start, end + Duration::seconds(1))
                .await?;
            let hours = self.shame.hourly_breakdown(park.id, date).await?;
            let buckets: Vec<f64> = hours.iter().filter_map(|h| h.value).collect();
            let bucket_mean = if buckets.is_empty() {
                None
            } else {
                Some(buckets.iter().sum::<f64>() / buckets.len() as f64)
            };

            let mismatch = match (average, bucket_mean) {
                (None, None) => false,
                (Some(a), Some(b)) => (a - b).abs() > 0.1,
                _ => true,
            };
            if mismatch {
                issues.push(Discrepancy {
                    severity: Severity::Critical,
                    table: "park_stats".into(),
                    entity_id: park.id,
                    period_key: date.to_string(),
                    metric: "hourly_vs_average".into(),
                    expected: fmt_opt(average),
                    actual: fmt_opt(bucket_mean),
                    detail: "hourly buckets and window average disagree".into(),
                });
            }
        }
        Ok(issues)
    }

    /// Standard audit: recompute-and-diff both stats tables plus the
    /// cadence check.
    pub async fn audit(&self, date: NaiveDate, table: Option<&str>) -> Result<AuditSummary> {
        let mut issues = self.verify(date, table).await?;
        issues.extend(self.cadence_issues(date).await?);
        let summary = AuditSummary::from_issues(issues);
        log_summary(date, &summary);
        Ok(summary)
    }

    /// Full audit adds the hourly-vs-average contract check.
    pub async fn full_audit(&self, date: NaiveDate) -> Result<AuditSummary> {
        let mut issues = self.verify(date, None).await?;
        issues.extend(self.cadence_issues(date).await?);
        issues.extend(self.hourly_contract_issues(date).await?);
        let summary = AuditSummary::from_issues(issues);
        log_summary(date, &summary);
        Ok(summary)
    }

    /// Audit a run of consecutive dates ending before `start + days`.
    pub async fn backfill_audit(&self, start: NaiveDate, days: u32) -> Result<AuditSummary> {
        let mut merged = AuditSummary::from_issues(Vec::new());
        for offset in 0..days {
            let date = start + Duration::days(offset as i64);
            merged.merge(self.audit(date, None).await?);
        }
        Ok(merged)
    }
}

#[derive(Default)]
struct RecomputedParkDay {
    rides_total: i64,
    rides_active: i64,
    downtime_minutes: i64,
    status_changes: i64,
    uptime_pct_sum: f64,
    wait_sum: f64,
    wait_count: i64,
    peak_wait: Option<i32>,
    shame: Option<f64>,
    shame_wrong_rule: Option<f64>,
    has_data: bool,
    rides: Vec<(RideStats, Vec<RideSnapshot>)>,
}

enum ShameVerdict {
    Ok,
    Rounding(f64),
    Divergent,
}

fn shame_mismatch(expected: Option<f64>, actual: Option<f64>, tolerance: f64) -> ShameVerdict {
    match (expected, actual) {
        (None, None) => ShameVerdict::Ok,
        (Some(e), Some(a)) => {
            let diff = (e - a).abs();
            if diff < 1e-9 {
                ShameVerdict::Ok
            } else if diff <= tolerance {
                ShameVerdict::Rounding(diff)
            } else {
                ShameVerdict::Divergent
            }
        }
        // NULL means "no qualifying data" and must never trade places with
        // a numeric score.
        _ => ShameVerdict::Divergent,
    }
}

fn mean_scores(series: &[(DateTime<Utc>, f64)]) -> Option<f64> {
    if series.is_empty() {
        return None;
    }
    Some(series.iter().map(|(_, s)| s).sum::<f64>() / series.len() as f64)
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{v:.4}"),
        None => "null".to_string(),
    }
}

fn push_if(issues: &mut Vec<Discrepancy>, candidate: Option<Discrepancy>) {
    if let Some(issue) = candidate {
        issues.push(issue);
    }
}

fn missing_row(table: &str, entity_id: i64, key: &str, snapshots: usize) -> Discrepancy {
    Discrepancy {
        severity: Severity::Critical,
        table: table.into(),
        entity_id,
        period_key: key.into(),
        metric: "row".into(),
        expected: "present".into(),
        actual: "missing".into(),
        detail: format!("raw data exists ({snapshots} snapshots) but no persisted row"),
    }
}

fn compare_count(
    table: &str,
    entity_id: i64,
    key: &str,
    metric: &str,
    expected: i64,
    actual: i64,
    warn_within: i64,
) -> Option<Discrepancy> {
    let diff = (expected - actual).abs();
    if diff == 0 {
        return None;
    }
    Some(Discrepancy {
        severity: if diff <= warn_within {
            Severity::Warning
        } else {
            Severity::Critical
        },
        table: table.into(),
        entity_id,
        period_key: key.into(),
        metric: metric.into(),
        expected: expected.to_string(),
        actual: actual.to_string(),
        detail: if diff <= warn_within {
            "boundary-scale difference".into()
        } else {
            "outside tolerance".into()
        },
    })
}

fn compare_float(
    table: &str,
    entity_id: i64,
    key: &str,
    metric: &str,
    expected: Option<f64>,
    actual: Option<f64>,
    warn_within: f64,
) -> Option<Discrepancy> {
    let (severity, detail) = match (expected, actual) {
        (None, None) => return None,
        (Some(e), Some(a)) => {
            let diff = (e - a).abs();
            if diff < 1e-9 {
                return None;
            } else if diff <= warn_within {
                (Severity::Warning, format!("rounding-level drift ({diff:.4})"))
            } else {
                (Severity::Critical, "outside tolerance".to_string())
            }
        }
        _ => (Severity::Critical, "null/value disagreement".to_string()),
    };
    Some(Discrepancy {
        severity,
        table: table.into(),
        entity_id,
        period_key: key.into(),
        metric: metric.into(),
        expected: expected.map_or("null".into(), |v| format!("{v:.4}")),
        actual: actual.map_or("null".into(), |v| format!("{v:.4}")),
        detail,
    })
}

fn log_summary(date: NaiveDate, summary: &AuditSummary) {
    if summary.overall_passed && summary.warnings == 0 {
        tracing::info!("audit {date}: clean");
    } else {
        tracing::warn!(
            "audit {date}: {} critical, {} warnings",
            summary.critical_failures,
            summary.warnings
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::AggregationService;
    use crate::models::park::{Ride, RideWeight};
    use crate::models::snapshot::{ParkSnapshot, RideStatus};
    use crate::snapshot_store::memory::MemoryStore;
    use crate::time::FixedClock;
    use chrono::TimeZone;

    struct Fixture {
        store: Arc<MemoryStore>,
        db: Arc<StatsDb>,
        now: DateTime<Utc>,
    }

    impl Fixture {
        fn new(separate_closed_status: bool) -> Self {
            let db = Arc::new(StatsDb::open_in_memory().unwrap());
            db.upsert_park(&Park {
                id: 1,
                name: "Thornfield Gardens".into(),
                timezone: "America/New_York".into(),
                separate_closed_status,
                active: true,
            })
            .unwrap();
            db.upsert_ride(&Ride {
                id: 10,
                park_id: 1,
                name: "Ironwing".into(),
                active: true,
            })
            .unwrap();
            db.upsert_ride_weight(&RideWeight {
                ride_id: 10,
                tier: 1,
                tier_weight: 3,
            })
            .unwrap();
            Self {
                store: Arc::new(MemoryStore::new()),
                db,
                now: Utc.with_ymd_and_hms(2025, 6, 2, 4, 10, 0).unwrap(),
            }
        }

        fn seed_day(&self, down_status: RideStatus) {
            let base = Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap();
            let mut minute = 0;
            while minute <= 720 {
                let at = base + chrono::Duration::minutes(minute);
                let down = (240..=300).contains(&minute);
                let status = if down { down_status } else { RideStatus::Operating };
                let (wait, open) = if down { (Some(0), Some(false)) } else { (Some(15), Some(true)) };
                self.store.push_ride(RideSnapshot::new(10, 1, at, wait, status, open));
                self.store.push_park(ParkSnapshot {
                    park_id: 1,
                    recorded_at: at,
                    park_appears_open: true,
                    rides_open: u32::from(!down),
                    rides_total: 1,
                });
                minute += 5;
            }
        }

        async fn run_daily(&self) {
            let service = AggregationService::new(
                self.store.clone(),
                self.db.clone(),
                Arc::new(FixedClock(self.now)),
                PipelineConfig::default(),
            );
            service
                .run(june1(), AggregationType::Daily, None, false)
                .await
                .unwrap();
        }

        fn verifier(&self) -> AggregateVerifier {
            AggregateVerifier::new(self.store.clone(), self.db.clone(), PipelineConfig::default())
        }
    }

    fn june1() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[tokio::test]
    async fn clean_aggregation_passes_audit() {
        let fx = Fixture::new(true);
        fx.seed_day(RideStatus::Down);
        fx.run_daily().await;

        let summary = fx.verifier().full_audit(june1()).await.unwrap();
        assert!(summary.overall_passed, "issues: {:?}", summary.issues_found);
        assert_eq!(summary.critical_failures, 0);
        assert_eq!(summary.warnings, 0);
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn tampered_shame_is_critical() {
        let fx = Fixture::new(true);
        fx.seed_day(RideStatus::Down);
        fx.run_daily().await;

        let mut stats = fx
            .db
            .get_park_stats(1, AggregationType::Daily, "2025-06-01")
            .unwrap()
            .unwrap();
        stats.shame_score = Some(9.9);
        fx.db.upsert_park_stats(&stats).unwrap();

        let summary = fx.verifier().audit(june1(), None).await.unwrap();
        assert!(!summary.overall_passed);
        assert_eq!(summary.exit_code(), 1);
        assert!(summary
            .issues_found
            .iter()
            .any(|i| i.metric == "shame_score" && i.is_critical()));
    }

    #[tokio::test]
    async fn null_shame_never_decays_to_zero_silently() {
        let fx = Fixture::new(true);
        fx.seed_day(RideStatus::Down);
        fx.run_daily().await;

        let mut stats = fx
            .db
            .get_park_stats(1, AggregationType::Daily, "2025-06-01")
            .unwrap()
            .unwrap();
        // A score exists; a buggy writer "defaulting" it to NULL must trip.
        stats.shame_score = None;
        fx.db.upsert_park_stats(&stats).unwrap();

        let summary = fx.verifier().audit(june1(), None).await.unwrap();
        assert!(summary
            .issues_found
            .iter()
            .any(|i| i.metric == "shame_score" && i.is_critical()));
    }

    #[tokio::test]
    async fn one_minute_drift_is_only_a_warning() {
        let fx = Fixture::new(true);
        fx.seed_day(RideStatus::Down);
        fx.run_daily().await;

        let mut stats = fx
            .db
            .get_ride_stats(10, AggregationType::Daily, "2025-06-01")
            .unwrap()
            .unwrap();
        stats.downtime_minutes += 1;
        stats.uptime_minutes -= 1;
        fx.db.upsert_ride_stats(&stats).unwrap();

        let summary = fx.verifier().audit(june1(), Some("ride_stats")).await.unwrap();
        assert!(summary.overall_passed);
        assert!(summary.warnings > 0);
        assert_eq!(summary.exit_code(), 2);
    }

    #[tokio::test]
    async fn raw_data_without_rows_is_critical() {
        let fx = Fixture::new(true);
        fx.seed_day(RideStatus::Down);
        // No aggregation ran at all.
        let summary = fx.verifier().audit(june1(), None).await.unwrap();
        assert!(!summary.overall_passed);
        let tables: Vec<&str> = summary
            .issues_found
            .iter()
            .filter(|i| i.metric == "row")
            .map(|i| i.table.as_str())
            .collect();
        assert!(tables.contains(&"ride_stats"));
        assert!(tables.contains(&"park_stats"));
    }

    #[tokio::test]
    async fn flipped_operator_flag_is_called_out_as_down_rule_divergence() {
        // Aggregated while the operator distinguished CLOSED from DOWN,
        // with a scheduled closure in the data.
        let fx = Fixture::new(true);
        fx.seed_day(RideStatus::Closed);
        fx.run_daily().await;

        // The catalog then flips the flag; persisted scores now match the
        // wrong predicate for the park's current operator type.
        fx.db
            .upsert_park(&Park {
                id: 1,
                name: "Thornfield Gardens".into(),
                timezone: "America/New_York".into(),
                separate_closed_status: false,
                active: true,
            })
            .unwrap();

        let summary = fx.verifier().audit(june1(), Some("park_stats")).await.unwrap();
        let shame_issue = summary
            .issues_found
            .iter()
            .find(|i| i.metric == "shame_score")
            .expect("expected a shame mismatch");
        assert!(shame_issue.is_critical());
        assert!(shame_issue.detail.contains("down rule"), "{}", shame_issue.detail);
    }

    #[tokio::test]
    async fn sparse_cadence_warns() {
        let fx = Fixture::new(true);
        // 20-minute cadence against an expected 5.
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap();
        for i in 0..20 {
            let at = base + chrono::Duration::minutes(i * 20);
            fx.store
                .push_ride(RideSnapshot::new(10, 1, at, Some(10), RideStatus::Operating, Some(true)));
            fx.store.push_park(ParkSnapshot {
                park_id: 1,
                recorded_at: at,
                park_appears_open: true,
                rides_open: 1,
                rides_total: 1,
            });
        }
        fx.run_daily().await;

        let summary = fx.verifier().audit(june1(), None).await.unwrap();
        assert!(summary.overall_passed);
        assert!(summary
            .issues_found
            .iter()
            .any(|i| i.metric == "snapshot_cadence" && i.severity == Severity::Warning));
    }

    #[tokio::test]
    async fn backfill_audit_merges_days() {
        let fx = Fixture::new(true);
        fx.seed_day(RideStatus::Down);
        fx.run_daily().await;

        // Day one is clean, day two has raw-only data for a new ride.
        fx.store.push_ride(RideSnapshot::new(
            10,
            1,
            Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap(),
            Some(5),
            RideStatus::Operating,
            Some(true),
        ));

        let summary = fx.verifier().backfill_audit(june1(), 2).await.unwrap();
        assert!(!summary.overall_passed);
        assert!(summary.critical_failures > 0);
    }
}
