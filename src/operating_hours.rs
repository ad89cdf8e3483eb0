use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use std::sync::Arc;

use crate::error::Result;
use crate::models::session::OperatingSession;
use crate::snapshot_store::SnapshotStore;
use crate::stats_db::StatsDb;
use crate::time::park_local_day_utc;

/// Infers a park's actual operating window for one park-local calendar day
/// from the first and last open ride snapshots.
pub struct OperatingHoursDetector {
    store: Arc<dyn SnapshotStore>,
    db: Arc<StatsDb>,
}

impl OperatingHoursDetector {
    pub fn new(store: Arc<dyn SnapshotStore>, db: Arc<StatsDb>) -> Self {
        Self { store, db }
    }

    /// Detect the session for `local_date` as that date reads in
    /// `park_timezone`. A park with no open snapshots that day has no
    /// session; `Ok(None)`, not an error.
    pub async fn detect(
        &self,
        park_id: i64,
        local_date: NaiveDate,
        park_timezone: Tz,
    ) -> Result<Option<OperatingSession>> {
        let (start, end) = park_local_day_utc(local_date, park_timezone);
        let summary = self
            .store
            .open_activity_summary(park_id, start, end + Duration::seconds(1))
            .await?;

        Ok(summary.map(|s| OperatingSession {
            park_id,
            session_date: local_date,
            session_start_utc: s.first_open,
            session_end_utc: s.last_open,
            operating_minutes: (s.last_open - s.first_open).num_minutes(),
            active_rides: s.active_rides,
            open_snapshots: s.open_snapshots,
        }))
    }

    pub fn save(&self, session: &OperatingSession) -> Result<()> {
        self.db.upsert_operating_session(session)
    }

    pub async fn detect_and_save(
        &self,
        park_id: i64,
        local_date: NaiveDate,
        park_timezone: Tz,
    ) -> Result<Option<OperatingSession>> {
        let session = self.detect(park_id, local_date, park_timezone).await?;
        if let Some(ref s) = session {
            self.save(s)?;
        }
        Ok(session)
    }

    /// Detect sessions for every active park, each against its **own**
    /// timezone. This per-park day boundary is the whole point: a single
    /// global clock would cut a west-coast park's evening in half.
    /// Per-park failures are logged and skipped.
    pub async fn detect_for_all_parks(&self, local_date: NaiveDate) -> Result<usize> {
        let parks = self.db.active_parks()?;
        let mut saved = 0;
        for park in parks {
            let tz = match park.tz() {
                Ok(tz) => tz,
                Err(e) => {
                    tracing::warn!("park {} has an unusable timezone: {e}", park.id);
                    continue;
                }
            };
            match self.detect_and_save(park.id, local_date, tz).await {
                Ok(Some(session)) => {
                    tracing::debug!(
                        "park {} session {}: {} minutes",
                        park.id,
                        session.session_date,
                        session.operating_minutes
                    );
                    saved += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("session detection failed for park {}: {e}", park.id);
                }
            }
        }
        Ok(saved)
    }

    /// Re-detect a range of dates, inclusive on both ends.
    pub async fn backfill(
        &self,
        park_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        park_timezone: Tz,
    ) -> Result<usize> {
        let mut saved = 0;
        let mut date = start_date;
        while date <= end_date {
            if self
                .detect_and_save(park_id, date, park_timezone)
                .await?
                .is_some()
            {
                saved += 1;
            }
            date += Duration::days(1);
        }
        Ok(saved)
    }
}
