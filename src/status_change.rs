use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::models::event::StatusChangeEvent;
use crate::models::park::Ride;
use crate::models::snapshot::RideSnapshot;
use crate::snapshot_store::SnapshotStore;

/// Downtime rollup for one ride over one window.
#[derive(Debug, Clone, PartialEq)]
pub struct DowntimeSummary {
    pub ride_id: i64,
    pub period_minutes: i64,
    pub downtime_event_count: i64,
    pub total_downtime_minutes: i64,
    pub uptime_percentage: f64,
}

/// Walks ordered snapshots and turns open/closed flips into transition
/// events.
pub struct StatusChangeDetector {
    store: Arc<dyn SnapshotStore>,
}

impl StatusChangeDetector {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// Detect transitions for one ride in `[start, end)`. Fewer than two
    /// snapshots means nothing can have changed; empty result, no error.
    pub async fn detect(
        &self,
        ride_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatusChangeEvent>> {
        let snapshots = self.store.ride_snapshots(ride_id, start, end).await?;
        Ok(detect_transitions(&snapshots))
    }

    /// Detect and persist in one go. Storage is idempotent under retry, so
    /// re-running a window re-asserts the same rows.
    pub async fn detect_and_store(
        &self,
        ride_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatusChangeEvent>> {
        let events = self.detect(ride_id, start, end).await?;
        self.store.insert_status_changes(&events).await?;
        Ok(events)
    }

    pub async fn summarize(
        &self,
        ride_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DowntimeSummary> {
        let events = self.detect(ride_id, start, end).await?;
        let period_minutes = (end - start).num_minutes();
        Ok(summarize_events(ride_id, &events, period_minutes))
    }

    /// Top-N outages by duration, optionally scoped to a park and window.
    pub async fn longest_events(
        &self,
        park_id: Option<i64>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<StatusChangeEvent>> {
        self.store
            .longest_status_changes(park_id, start, end, limit)
            .await
    }

    /// Batch detection across rides. A ride that errors is logged and
    /// skipped so one bad series cannot sink the whole batch.
    pub async fn detect_for_rides(
        &self,
        rides: &[Ride],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatusChangeEvent>> {
        let mut all = Vec::new();
        for ride in rides {
            match self.detect_and_store(ride.id, start, end).await {
                Ok(events) => all.extend(events),
                Err(e) => {
                    tracing::warn!("status change detection failed for ride {}: {e}", ride.id);
                }
            }
        }
        Ok(all)
    }
}

/// Pure transition walk over one ride's ascending snapshots.
///
/// An open→closed event is stamped at the last snapshot still observed
/// open; the matching closed→open event at the first snapshot observed
/// open again. The closed→open duration is the rounded minutes between the
/// two stamps, so it covers the whole outage including the unobserved gap
/// before the first closed reading. A reopen with no closure inside the
/// window keeps `None`; the outage began before the data we can see.
pub fn detect_transitions(snapshots: &[RideSnapshot]) -> Vec<StatusChangeEvent> {
    if snapshots.len() < 2 {
        return Vec::new();
    }

    let mut events = Vec::new();
    let mut last_closed_at: Option<DateTime<Utc>> = None;

    for pair in snapshots.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        if prev.computed_is_open == curr.computed_is_open {
            continue;
        }

        if curr.computed_is_open {
            let duration = last_closed_at.map(|closed_at| {
                let secs = (curr.recorded_at - closed_at).num_seconds();
                ((secs as f64) / 60.0).round() as i64
            });
            events.push(StatusChangeEvent {
                ride_id: curr.ride_id,
                park_id: curr.park_id,
                changed_at: curr.recorded_at,
                previous_status: prev.status,
                new_status: curr.status,
                new_is_open: true,
                downtime_duration_minutes: duration,
            });
            last_closed_at = None;
        } else {
            events.push(StatusChangeEvent {
                ride_id: curr.ride_id,
                park_id: curr.park_id,
                changed_at: prev.recorded_at,
                previous_status: prev.status,
                new_status: curr.status,
                new_is_open: false,
                downtime_duration_minutes: None,
            });
            last_closed_at = Some(prev.recorded_at);
        }
    }

    events
}

pub fn summarize_events(
    ride_id: i64,
    events: &[StatusChangeEvent],
    period_minutes: i64,
) -> DowntimeSummary {
    let downtime_event_count = events.iter().filter(|e| e.is_closure()).count() as i64;
    let total_downtime_minutes: i64 = events
        .iter()
        .filter_map(|e| e.downtime_duration_minutes)
        .sum();
    let uptime_percentage = if period_minutes == 0 {
        0.0
    } else {
        (period_minutes - total_downtime_minutes) as f64 / period_minutes as f64 * 100.0
    };
    DowntimeSummary {
        ride_id,
        period_minutes,
        downtime_event_count,
        total_downtime_minutes,
        uptime_percentage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::snapshot::RideStatus;
    use crate::snapshot_store::memory::MemoryStore;
    use chrono::TimeZone;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    fn snap(minutes: i64, status: RideStatus) -> RideSnapshot {
        let (wait, open) = match status {
            RideStatus::Operating => (Some(20), Some(true)),
            _ => (Some(0), Some(false)),
        };
        RideSnapshot::new(10, 1, at(minutes), wait, status, open)
    }

    fn down_then_up_sequence() -> Vec<RideSnapshot> {
        // OPERATING@10:00, DOWN@10:05..11:00 on a 5-minute cadence,
        // OPERATING@11:05.
        let mut s = vec![snap(0, RideStatus::Operating)];
        for m in (5..=60).step_by(5) {
            s.push(snap(m, RideStatus::Down));
        }
        s.push(snap(65, RideStatus::Operating));
        s
    }

    #[test]
    fn single_outage_emits_two_events_with_full_duration() {
        let events = detect_transitions(&down_then_up_sequence());
        assert_eq!(events.len(), 2);

        assert!(events[0].is_closure());
        assert_eq!(events[0].changed_at, at(0));
        assert_eq!(events[0].previous_status, RideStatus::Operating);
        assert_eq!(events[0].new_status, RideStatus::Down);
        assert_eq!(events[0].downtime_duration_minutes, None);

        assert!(!events[1].is_closure());
        assert_eq!(events[1].changed_at, at(65));
        assert_eq!(events[1].downtime_duration_minutes, Some(65));
    }

    #[test]
    fn fewer_than_two_snapshots_is_empty() {
        assert!(detect_transitions(&[]).is_empty());
        assert!(detect_transitions(&[snap(0, RideStatus::Operating)]).is_empty());
    }

    #[test]
    fn stable_sequences_emit_nothing() {
        let all_open: Vec<_> = (0..6).map(|i| snap(i * 5, RideStatus::Operating)).collect();
        assert!(detect_transitions(&all_open).is_empty());

        let all_down: Vec<_> = (0..6).map(|i| snap(i * 5, RideStatus::Down)).collect();
        assert!(detect_transitions(&all_down).is_empty());
    }

    #[test]
    fn event_count_matches_flip_count() {
        let statuses = [
            RideStatus::Operating,
            RideStatus::Down,
            RideStatus::Operating,
            RideStatus::Operating,
            RideStatus::Closed,
            RideStatus::Operating,
            RideStatus::Down,
        ];
        let snapshots: Vec<_> = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| snap(i as i64 * 5, *s))
            .collect();
        let flips = snapshots
            .windows(2)
            .filter(|p| p[0].computed_is_open != p[1].computed_is_open)
            .count();
        let events = detect_transitions(&snapshots);
        assert_eq!(events.len(), flips);
        for e in &events {
            if let Some(d) = e.downtime_duration_minutes {
                assert!(d >= 0);
            }
        }
    }

    #[test]
    fn reopen_without_observed_closure_has_no_duration() {
        let snapshots = vec![snap(0, RideStatus::Down), snap(5, RideStatus::Operating)];
        let events = detect_transitions(&snapshots);
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_closure());
        assert_eq!(events[0].downtime_duration_minutes, None);
    }

    #[test]
    fn status_flip_without_raw_status_change_is_detected() {
        // OPERATING with a wait posted, then OPERATING with zero wait and a
        // closed raw flag: the raw status never changes but computed_is_open
        // does.
        let open = RideSnapshot::new(10, 1, at(0), Some(15), RideStatus::Operating, Some(true));
        let ghost = RideSnapshot::new(10, 1, at(5), Some(0), RideStatus::Operating, Some(false));
        let events = detect_transitions(&[open, ghost]);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_closure());
    }

    #[test]
    fn summarize_counts_closures_and_durations() {
        let events = detect_transitions(&down_then_up_sequence());
        let summary = summarize_events(10, &events, 785);
        assert_eq!(summary.downtime_event_count, 1);
        assert_eq!(summary.total_downtime_minutes, 65);
        assert!((summary.uptime_percentage - (720.0 / 785.0 * 100.0)).abs() < 1e-9);
    }

    #[test]
    fn summarize_zero_period_is_zero_uptime() {
        let summary = summarize_events(10, &[], 0);
        assert_eq!(summary.uptime_percentage, 0.0);
        assert_eq!(summary.total_downtime_minutes, 0);
    }

    #[tokio::test]
    async fn summarize_over_store_window() {
        let store = Arc::new(MemoryStore::new());
        for s in down_then_up_sequence() {
            store.push_ride(s);
        }
        let detector = StatusChangeDetector::new(store);

        let summary = detector.summarize(10, at(0), at(120)).await.unwrap();
        assert_eq!(summary.period_minutes, 120);
        assert_eq!(summary.downtime_event_count, 1);
        assert_eq!(summary.total_downtime_minutes, 65);
    }

    #[tokio::test]
    async fn batch_detection_accumulates_across_rides() {
        let store = Arc::new(MemoryStore::new());
        for s in down_then_up_sequence() {
            store.push_ride(s);
        }
        // A second ride with a stable day contributes no events.
        for m in (0..=65).step_by(5) {
            store.push_ride(RideSnapshot::new(
                11,
                1,
                at(m as i64),
                Some(30),
                RideStatus::Operating,
                Some(true),
            ));
        }
        let detector = StatusChangeDetector::new(store.clone());

        let rides = vec![
            Ride { id: 10, park_id: 1, name: "Ironwing".into(), active: true },
            Ride { id: 11, park_id: 1, name: "Seaspray".into(), active: true },
        ];
        let events = detector.detect_for_rides(&rides, at(0), at(70)).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.ride_id == 10));
        assert_eq!(store.stored_changes().len(), 2);
    }

    #[tokio::test]
    async fn detector_reads_store_and_persists() {
        let store = Arc::new(MemoryStore::new());
        for s in down_then_up_sequence() {
            store.push_ride(s);
        }
        let detector = StatusChangeDetector::new(store.clone());

        let events = detector
            .detect_and_store(10, at(0), at(70))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(store.stored_changes().len(), 2);

        // Retry: same rows again, no duplicates.
        detector.detect_and_store(10, at(0), at(70)).await.unwrap();
        assert_eq!(store.stored_changes().len(), 2);

        let longest = detector
            .longest_events(Some(1), None, None, 5)
            .await
            .unwrap();
        assert_eq!(longest.len(), 1);
        assert_eq!(longest[0].downtime_duration_minutes, Some(65));
    }
}
