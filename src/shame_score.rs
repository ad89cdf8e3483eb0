use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::Result;
use crate::models::snapshot::{ParkSnapshot, RideSnapshot, RideStatus};
use crate::snapshot_store::SnapshotStore;
use crate::stats_db::StatsDb;
use crate::time::park_local_day_utc;

/// One hour bucket of the day's shame series. `value` is `None` for hours
/// with no qualifying instant; distinct from a clean 0.0.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct HourlyShame {
    pub hour: u32,
    pub value: Option<f64>,
}

/// The single source of truth for the downtime shame score.
///
/// Per instant t: `shame(t) = clamp(down_weight(t) / total_weight(t) × 10, 0, 10)`
/// where weights come from the external tier classification. Every public
/// reading (time-averaged, hourly, instantaneous) goes through the same
/// per-instant scoring; no caller re-derives the formula.
pub struct ShameScoreCalculator {
    store: Arc<dyn SnapshotStore>,
    db: Arc<StatsDb>,
    default_tier_weight: i64,
}

/// Operator-aware down predicate. Operators that separate a scheduled
/// closure from a malfunction only shame the malfunction; operators that
/// report both the same way shame either. The flag is per-park data, not a
/// hardcoded rule.
pub fn is_down(status: RideStatus, separate_closed_status: bool) -> bool {
    match status {
        RideStatus::Down => true,
        RideStatus::Closed | RideStatus::Refurbishment => !separate_closed_status,
        RideStatus::Operating => false,
    }
}

/// Score a single instant from the snapshots recorded at that instant.
/// `None` when the instant carries no scoreable weight.
pub fn score_instant(
    snapshots: &[&RideSnapshot],
    weights: &HashMap<i64, i64>,
    default_weight: i64,
    separate_closed_status: bool,
) -> Option<f64> {
    let mut total = 0_i64;
    let mut down = 0_i64;
    for snap in snapshots {
        let weight = weights.get(&snap.ride_id).copied().unwrap_or(default_weight);
        total += weight;
        if is_down(snap.status, separate_closed_status) {
            down += weight;
        }
    }
    if total == 0 {
        return None;
    }
    let score = down as f64 / total as f64 * 10.0;
    Some(score.clamp(0.0, 10.0))
}

/// Build the per-instant score series for a window from pre-fetched data.
///
/// Instants are ride-snapshot timestamps that coincide with a park
/// snapshot where the park appears open (the collector writes both in the
/// same cycle, so timestamps line up). A park with zero classified rides
/// produces an empty series: with nothing tiered there is no denominator
/// worth normalizing against, and the score must read as unknown.
pub fn per_instant_scores(
    ride_snapshots: &[RideSnapshot],
    park_snapshots: &[ParkSnapshot],
    weights: &HashMap<i64, i64>,
    default_weight: i64,
    separate_closed_status: bool,
) -> Vec<(DateTime<Utc>, f64)> {
    if weights.is_empty() {
        return Vec::new();
    }

    let open_instants: BTreeSet<DateTime<Utc>> = park_snapshots
        .iter()
        .filter(|p| p.park_appears_open)
        .map(|p| p.recorded_at)
        .collect();

    let mut by_instant: BTreeMap<DateTime<Utc>, Vec<&RideSnapshot>> = BTreeMap::new();
    for snap in ride_snapshots {
        by_instant.entry(snap.recorded_at).or_default().push(snap);
    }

    by_instant
        .into_iter()
        .filter(|(t, _)| open_instants.contains(t))
        .filter_map(|(t, group)| {
            score_instant(&group, weights, default_weight, separate_closed_status)
                .map(|score| (t, score))
        })
        .collect()
}

impl ShameScoreCalculator {
    pub fn new(store: Arc<dyn SnapshotStore>, db: Arc<StatsDb>, default_tier_weight: i64) -> Self {
        Self {
            store,
            db,
            default_tier_weight,
        }
    }

    async fn window_scores(
        &self,
        park_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<(chrono_tz::Tz, Vec<(DateTime<Utc>, f64)>)>> {
        let Some(park) = self.db.get_park(park_id)? else {
            return Ok(None);
        };
        let tz = park.tz()?;
        let weights = self.db.ride_weights_for_park(park_id)?;
        let ride_snaps = self.store.park_ride_snapshots(park_id, start, end).await?;
        let park_snaps = self.store.park_snapshots(park_id, start, end).await?;
        let series = per_instant_scores(
            &ride_snaps,
            &park_snaps,
            &weights,
            self.default_tier_weight,
            park.separate_closed_status,
        );
        Ok(Some((tz, series)))
    }

    /// Mean per-instant score over instants where the park appeared open.
    ///
    /// `None`, never 0.0, when no qualifying instant exists: the park
    /// never opened in the window, nothing was classified, or there were
    /// no snapshots at all.
    pub async fn average(
        &self,
        park_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let Some((_, series)) = self.window_scores(park_id, start, end).await? else {
            return Ok(None);
        };
        if series.is_empty() {
            return Ok(None);
        }
        let sum: f64 = series.iter().map(|(_, s)| s).sum();
        Ok(Some(sum / series.len() as f64))
    }

    /// The day's series bucketed by park-local hour. Computed from the same
    /// per-instant series as [`average`], so with a steady snapshot cadence
    /// the unweighted mean of the non-null buckets equals the window
    /// average.
    pub async fn hourly_breakdown(
        &self,
        park_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<HourlyShame>> {
        let Some(park) = self.db.get_park(park_id)? else {
            return Ok(empty_hours());
        };
        let tz = park.tz()?;
        let (start, end) = park_local_day_utc(date, tz);
        let Some((tz, series)) = self
            .window_scores(park_id, start, end + Duration::seconds(1))
            .await?
        else {
            return Ok(empty_hours());
        };

        let mut sums = [0.0_f64; 24];
        let mut counts = [0_u32; 24];
        for (t, score) in &series {
            let hour = t.with_timezone(&tz).hour() as usize;
            sums[hour] += score;
            counts[hour] += 1;
        }

        Ok((0..24)
            .map(|h| HourlyShame {
                hour: h as u32,
                value: (counts[h as usize] > 0)
                    .then(|| sums[h as usize] / counts[h as usize] as f64),
            })
            .collect())
    }

    /// Score from only the single latest park snapshot; the live-display
    /// path. Deliberately separate from the time-averaged readings and
    /// never a substitute for them.
    pub async fn instantaneous(&self, park_id: i64) -> Result<Option<f64>> {
        let Some(park) = self.db.get_park(park_id)? else {
            return Ok(None);
        };
        let Some(latest) = self.store.latest_park_snapshot(park_id).await? else {
            return Ok(None);
        };
        if !latest.park_appears_open {
            return Ok(None);
        }
        let weights = self.db.ride_weights_for_park(park_id)?;
        if weights.is_empty() {
            return Ok(None);
        }
        let at = latest.recorded_at;
        let ride_snaps = self
            .store
            .park_ride_snapshots(park_id, at, at + Duration::seconds(1))
            .await?;
        let group: Vec<&RideSnapshot> = ride_snaps.iter().collect();
        Ok(score_instant(
            &group,
            &weights,
            self.default_tier_weight,
            park.separate_closed_status,
        ))
    }
}

fn empty_hours() -> Vec<HourlyShame> {
    (0..24).map(|hour| HourlyShame { hour, value: None }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::park::{Park, Ride, RideWeight};
    use crate::snapshot_store::memory::MemoryStore;
    use chrono::TimeZone;

    fn park(id: i64, separate_closed_status: bool) -> Park {
        Park {
            id,
            name: format!("Park {id}"),
            timezone: "UTC".into(),
            separate_closed_status,
            active: true,
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        db: Arc<StatsDb>,
    }

    impl Fixture {
        fn new(separate_closed_status: bool) -> Self {
            let store = Arc::new(MemoryStore::new());
            let db = Arc::new(StatsDb::open_in_memory().unwrap());
            db.upsert_park(&park(1, separate_closed_status)).unwrap();
            Self { store, db }
        }

        fn ride(&self, ride_id: i64, tier: i64, tier_weight: i64) {
            self.db
                .upsert_ride(&Ride {
                    id: ride_id,
                    park_id: 1,
                    name: format!("Ride {ride_id}"),
                    active: true,
                })
                .unwrap();
            self.db
                .upsert_ride_weight(&RideWeight {
                    ride_id,
                    tier,
                    tier_weight,
                })
                .unwrap();
        }

        fn observe(&self, at: DateTime<Utc>, rides: &[(i64, RideStatus)]) {
            for (ride_id, status) in rides {
                let (wait, open) = match status {
                    RideStatus::Operating => (Some(10), Some(true)),
                    _ => (Some(0), Some(false)),
                };
                self.store
                    .push_ride(RideSnapshot::new(*ride_id, 1, at, wait, *status, open));
            }
            let open_count = rides
                .iter()
                .filter(|(_, s)| *s == RideStatus::Operating)
                .count() as u32;
            self.store.push_park(ParkSnapshot {
                park_id: 1,
                recorded_at: at,
                park_appears_open: open_count > 0,
                rides_open: open_count,
                rides_total: rides.len() as u32,
            });
        }

        fn calculator(&self) -> ShameScoreCalculator {
            ShameScoreCalculator::new(self.store.clone(), self.db.clone(), 1)
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0).unwrap()
    }

    fn day_range() -> (DateTime<Utc>, DateTime<Utc>) {
        (at(0, 0), Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap())
    }

    #[test]
    fn down_predicate_follows_operator_flag() {
        assert!(is_down(RideStatus::Down, true));
        assert!(is_down(RideStatus::Down, false));
        assert!(!is_down(RideStatus::Closed, true));
        assert!(is_down(RideStatus::Closed, false));
        assert!(!is_down(RideStatus::Refurbishment, true));
        assert!(is_down(RideStatus::Refurbishment, false));
        assert!(!is_down(RideStatus::Operating, true));
        assert!(!is_down(RideStatus::Operating, false));
    }

    #[tokio::test]
    async fn weighted_score_reflects_tier_share() {
        let fx = Fixture::new(true);
        fx.ride(10, 1, 3);
        fx.ride(11, 3, 1);
        fx.observe(at(12, 0), &[(10, RideStatus::Down), (11, RideStatus::Operating)]);

        let (start, end) = day_range();
        let avg = fx.calculator().average(1, start, end).await.unwrap();
        assert_eq!(avg, Some(7.5));
    }

    #[tokio::test]
    async fn all_operating_is_zero_not_null() {
        let fx = Fixture::new(true);
        fx.ride(10, 2, 2);
        fx.observe(at(12, 0), &[(10, RideStatus::Operating)]);

        let (start, end) = day_range();
        let avg = fx.calculator().average(1, start, end).await.unwrap();
        assert_eq!(avg, Some(0.0));
    }

    #[tokio::test]
    async fn zero_classified_rides_yields_null() {
        let fx = Fixture::new(true);
        // Ride exists and reports, but the classifier never tiered it.
        fx.db
            .upsert_ride(&Ride {
                id: 10,
                park_id: 1,
                name: "Untiered".into(),
                active: true,
            })
            .unwrap();
        fx.observe(at(12, 0), &[(10, RideStatus::Down)]);

        let (start, end) = day_range();
        let avg = fx.calculator().average(1, start, end).await.unwrap();
        assert_eq!(avg, None);
    }

    #[tokio::test]
    async fn park_never_open_yields_null() {
        let fx = Fixture::new(false);
        fx.ride(10, 1, 3);
        // Everything closed, so the park never appears open.
        fx.observe(at(12, 0), &[(10, RideStatus::Closed)]);

        let (start, end) = day_range();
        let avg = fx.calculator().average(1, start, end).await.unwrap();
        assert_eq!(avg, None);
    }

    #[tokio::test]
    async fn scheduled_closure_only_shames_non_distinguishing_operators() {
        // Same observations, two operator types.
        for (separate, expect_zero) in [(true, true), (false, false)] {
            let fx = Fixture::new(separate);
            fx.ride(10, 1, 3);
            fx.ride(11, 2, 2);
            fx.observe(at(12, 0), &[(10, RideStatus::Operating), (11, RideStatus::Operating)]);
            fx.observe(at(12, 5), &[(10, RideStatus::Closed), (11, RideStatus::Operating)]);
            fx.observe(at(12, 10), &[(10, RideStatus::Operating), (11, RideStatus::Operating)]);

            let (start, end) = day_range();
            let avg = fx.calculator().average(1, start, end).await.unwrap().unwrap();
            if expect_zero {
                assert_eq!(avg, 0.0);
            } else {
                assert!(avg > 0.0, "closure should count as down, got {avg}");
            }
        }
    }

    #[tokio::test]
    async fn closed_park_instants_are_excluded() {
        let fx = Fixture::new(true);
        fx.ride(10, 1, 3);
        // Pre-open instant: ride down but park closed; must not count.
        fx.observe(at(8, 0), &[(10, RideStatus::Down)]);
        fx.observe(at(12, 0), &[(10, RideStatus::Operating)]);

        let (start, end) = day_range();
        let avg = fx.calculator().average(1, start, end).await.unwrap();
        assert_eq!(avg, Some(0.0));
    }

    #[tokio::test]
    async fn hourly_mean_matches_window_average() {
        let fx = Fixture::new(true);
        fx.ride(10, 1, 3);
        fx.ride(11, 3, 1);
        // Two full hours at a steady 12-per-hour cadence: one clean hour,
        // one hour with the headliner down.
        for m in (0..60).step_by(5) {
            fx.observe(at(12, m), &[(10, RideStatus::Operating), (11, RideStatus::Operating)]);
        }
        for m in (0..60).step_by(5) {
            fx.observe(at(13, m), &[(10, RideStatus::Down), (11, RideStatus::Operating)]);
        }

        let calc = fx.calculator();
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let hours = calc.hourly_breakdown(1, date).await.unwrap();
        assert_eq!(hours.len(), 24);
        assert_eq!(hours[12].value, Some(0.0));
        assert_eq!(hours[13].value, Some(7.5));
        assert_eq!(hours[14].value, None);

        let (start, end) = park_local_day_utc(date, chrono_tz::UTC);
        let average = calc
            .average(1, start, end + Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();

        let buckets: Vec<f64> = hours.iter().filter_map(|h| h.value).collect();
        let bucket_mean = buckets.iter().sum::<f64>() / buckets.len() as f64;
        assert!(
            (bucket_mean - average).abs() < 0.05,
            "bucket mean {bucket_mean} vs average {average}"
        );
    }

    #[tokio::test]
    async fn instantaneous_reads_only_latest_snapshot() {
        let fx = Fixture::new(true);
        fx.ride(10, 1, 3);
        // Earlier: down. Latest: operating.
        fx.observe(at(12, 0), &[(10, RideStatus::Down)]);
        fx.observe(at(12, 5), &[(10, RideStatus::Operating)]);

        let live = fx.calculator().instantaneous(1).await.unwrap();
        assert_eq!(live, Some(0.0));

        // Flip the order of freshness.
        fx.observe(at(12, 10), &[(10, RideStatus::Down)]);
        let live = fx.calculator().instantaneous(1).await.unwrap();
        assert_eq!(live, Some(10.0));
    }

    #[tokio::test]
    async fn instantaneous_closed_park_is_null() {
        let fx = Fixture::new(true);
        fx.ride(10, 1, 3);
        fx.observe(at(23, 55), &[(10, RideStatus::Closed)]);
        assert_eq!(fx.calculator().instantaneous(1).await.unwrap(), None);
    }
}
