use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{PipelineError, Result};
use crate::models::job::{AggregationJob, AggregationType, JobStatus, LastSuccessful};
use crate::models::park::{Park, Ride, RideWeight};
use crate::models::session::OperatingSession;
use crate::models::stats::{ParkStats, RideStats};

/// Relational store for everything mutable: reference entities, operating
/// sessions, the aggregation job log, and period statistics.
///
/// Raw snapshots never live here; they stay in the append-only snapshot
/// store. Every write in this file is an upsert keyed by the natural key,
/// so aggregation retries overwrite instead of duplicating.
pub struct StatsDb {
    conn: Mutex<Connection>,
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PipelineError::Decode(format!("bad timestamp '{raw}': {e}")))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| PipelineError::Decode(format!("bad date '{raw}': {e}")))
}

impl StatsDb {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS parks (
                id                     INTEGER PRIMARY KEY,
                name                   TEXT NOT NULL,
                timezone               TEXT NOT NULL,
                separate_closed_status INTEGER NOT NULL DEFAULT 0,
                active                 INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS rides (
                id      INTEGER PRIMARY KEY,
                park_id INTEGER NOT NULL REFERENCES parks(id),
                name    TEXT NOT NULL,
                active  INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_rides_park ON rides(park_id);

            CREATE TABLE IF NOT EXISTS ride_weights (
                ride_id     INTEGER PRIMARY KEY,
                tier        INTEGER NOT NULL CHECK(tier IN (1,2,3)),
                tier_weight INTEGER NOT NULL CHECK(tier_weight IN (1,2,3))
            );

            CREATE TABLE IF NOT EXISTS operating_sessions (
                park_id           INTEGER NOT NULL,
                session_date      TEXT NOT NULL,
                session_start_utc TEXT NOT NULL,
                session_end_utc   TEXT NOT NULL,
                operating_minutes INTEGER NOT NULL,
                active_rides      INTEGER NOT NULL,
                open_snapshots    INTEGER NOT NULL,
                updated_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                PRIMARY KEY (park_id, session_date)
            );

            CREATE TABLE IF NOT EXISTS aggregation_jobs (
                id                  TEXT PRIMARY KEY,
                aggregation_date    TEXT NOT NULL,
                aggregation_type    TEXT NOT NULL CHECK(aggregation_type IN ('hourly','daily','weekly','monthly','yearly')),
                status              TEXT NOT NULL CHECK(status IN ('running','success','failed')),
                started_at          TEXT NOT NULL,
                completed_at        TEXT,
                aggregated_until_ts TEXT,
                parks_processed     INTEGER NOT NULL DEFAULT 0,
                rides_processed     INTEGER NOT NULL DEFAULT 0,
                error_message       TEXT,
                UNIQUE(aggregation_date, aggregation_type)
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON aggregation_jobs(aggregation_type, status, aggregation_date DESC);

            CREATE TABLE IF NOT EXISTS ride_stats (
                ride_id           INTEGER NOT NULL,
                park_id           INTEGER NOT NULL,
                period_type       TEXT NOT NULL,
                period_key        TEXT NOT NULL,
                uptime_minutes    INTEGER NOT NULL,
                downtime_minutes  INTEGER NOT NULL,
                uptime_percentage REAL NOT NULL,
                avg_wait_time     REAL,
                peak_wait_time    INTEGER,
                status_changes    INTEGER NOT NULL,
                snapshot_count    INTEGER NOT NULL,
                PRIMARY KEY (ride_id, period_type, period_key)
            );
            CREATE INDEX IF NOT EXISTS idx_ride_stats_park ON ride_stats(park_id, period_type, period_key);

            CREATE TABLE IF NOT EXISTS park_stats (
                park_id           INTEGER NOT NULL,
                period_type       TEXT NOT NULL,
                period_key        TEXT NOT NULL,
                rides_total       INTEGER NOT NULL,
                rides_active      INTEGER NOT NULL,
                operating_minutes INTEGER NOT NULL,
                downtime_minutes  INTEGER NOT NULL,
                uptime_percentage REAL NOT NULL,
                avg_wait_time     REAL,
                peak_wait_time    INTEGER,
                status_changes    INTEGER NOT NULL,
                shame_score       REAL,
                PRIMARY KEY (park_id, period_type, period_key)
            );
            ",
        )?;
        Ok(())
    }

    // ── Park / ride catalog (maintained externally, read here) ──

    pub fn upsert_park(&self, park: &Park) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO parks (id, name, timezone, separate_closed_status, active) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, timezone = excluded.timezone, \
             separate_closed_status = excluded.separate_closed_status, active = excluded.active",
            params![
                park.id,
                park.name,
                park.timezone,
                park.separate_closed_status,
                park.active
            ],
        )?;
        Ok(())
    }

    pub fn upsert_ride(&self, ride: &Ride) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO rides (id, park_id, name, active) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET park_id = excluded.park_id, name = excluded.name, \
             active = excluded.active",
            params![ride.id, ride.park_id, ride.name, ride.active],
        )?;
        Ok(())
    }

    pub fn upsert_ride_weight(&self, weight: &RideWeight) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ride_weights (ride_id, tier, tier_weight) VALUES (?1, ?2, ?3) \
             ON CONFLICT(ride_id) DO UPDATE SET tier = excluded.tier, tier_weight = excluded.tier_weight",
            params![weight.ride_id, weight.tier, weight.tier_weight],
        )?;
        Ok(())
    }

    pub fn get_park(&self, id: i64) -> Result<Option<Park>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, timezone, separate_closed_status, active FROM parks WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| {
            Ok(Park {
                id: row.get(0)?,
                name: row.get(1)?,
                timezone: row.get(2)?,
                separate_closed_status: row.get(3)?,
                active: row.get(4)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }

    pub fn active_parks(&self) -> Result<Vec<Park>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, timezone, separate_closed_status, active FROM parks \
             WHERE active = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Park {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    timezone: row.get(2)?,
                    separate_closed_status: row.get(3)?,
                    active: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn rides_for_park(&self, park_id: i64) -> Result<Vec<Ride>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, park_id, name, active FROM rides WHERE park_id = ?1 AND active = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![park_id], |row| {
                Ok(Ride {
                    id: row.get(0)?,
                    park_id: row.get(1)?,
                    name: row.get(2)?,
                    active: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Tier weights for every classified ride of a park.
    pub fn ride_weights_for_park(&self, park_id: i64) -> Result<HashMap<i64, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT w.ride_id, w.tier_weight FROM ride_weights w \
             JOIN rides r ON r.id = w.ride_id WHERE r.park_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![park_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().collect())
    }

    // ── Operating sessions ──

    pub fn upsert_operating_session(&self, session: &OperatingSession) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO operating_sessions \
             (park_id, session_date, session_start_utc, session_end_utc, operating_minutes, \
             active_rides, open_snapshots) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(park_id, session_date) DO UPDATE SET \
             session_start_utc = excluded.session_start_utc, \
             session_end_utc = excluded.session_end_utc, \
             operating_minutes = excluded.operating_minutes, \
             active_rides = excluded.active_rides, \
             open_snapshots = excluded.open_snapshots, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')",
            params![
                session.park_id,
                session.session_date.to_string(),
                fmt_ts(session.session_start_utc),
                fmt_ts(session.session_end_utc),
                session.operating_minutes,
                session.active_rides,
                session.open_snapshots,
            ],
        )?;
        Ok(())
    }

    pub fn get_operating_session(
        &self,
        park_id: i64,
        date: NaiveDate,
    ) -> Result<Option<OperatingSession>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT park_id, session_date, session_start_utc, session_end_utc, \
             operating_minutes, active_rides, open_snapshots \
             FROM operating_sessions WHERE park_id = ?1 AND session_date = ?2",
        )?;
        let mut rows = stmt.query_map(params![park_id, date.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;
        let Some(raw) = rows.next().transpose()? else {
            return Ok(None);
        };
        Ok(Some(OperatingSession {
            park_id: raw.0,
            session_date: parse_date(&raw.1)?,
            session_start_utc: parse_ts(&raw.2)?,
            session_end_utc: parse_ts(&raw.3)?,
            operating_minutes: raw.4,
            active_rides: raw.5,
            open_snapshots: raw.6,
        }))
    }

    // ── Aggregation job log ──

    pub fn find_job(
        &self,
        date: NaiveDate,
        agg_type: AggregationType,
    ) -> Result<Option<AggregationJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, aggregation_date, aggregation_type, status, started_at, completed_at, \
             aggregated_until_ts, parks_processed, rides_processed, error_message \
             FROM aggregation_jobs WHERE aggregation_date = ?1 AND aggregation_type = ?2",
        )?;
        let mut rows = stmt.query_map(params![date.to_string(), agg_type.as_str()], job_row)?;
        let Some(raw) = rows.next().transpose()? else {
            return Ok(None);
        };
        Some(raw_job_to_model(raw)).transpose()
    }

    /// Claim the (date, type) slot for a new attempt. Overwrites whatever
    /// row occupied the slot; callers decide beforehand whether the
    /// existing row may be reclaimed.
    pub fn upsert_running_job(
        &self,
        id: &str,
        date: NaiveDate,
        agg_type: AggregationType,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO aggregation_jobs (id, aggregation_date, aggregation_type, status, started_at) \
             VALUES (?1, ?2, ?3, 'running', ?4) \
             ON CONFLICT(aggregation_date, aggregation_type) DO UPDATE SET \
             id = excluded.id, status = 'running', started_at = excluded.started_at, \
             completed_at = NULL, aggregated_until_ts = NULL, parks_processed = 0, \
             rides_processed = 0, error_message = NULL",
            params![id, date.to_string(), agg_type.as_str(), fmt_ts(started_at)],
        )?;
        Ok(())
    }

    pub fn mark_job_success(
        &self,
        id: &str,
        completed_at: DateTime<Utc>,
        aggregated_until_ts: Option<DateTime<Utc>>,
        parks_processed: i64,
        rides_processed: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE aggregation_jobs SET status = 'success', completed_at = ?2, \
             aggregated_until_ts = ?3, parks_processed = ?4, rides_processed = ?5, \
             error_message = NULL WHERE id = ?1",
            params![
                id,
                fmt_ts(completed_at),
                aggregated_until_ts.map(fmt_ts),
                parks_processed,
                rides_processed,
            ],
        )?;
        Ok(())
    }

    pub fn mark_job_failed(
        &self,
        id: &str,
        completed_at: DateTime<Utc>,
        error_message: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE aggregation_jobs SET status = 'failed', completed_at = ?2, \
             error_message = ?3 WHERE id = ?1",
            params![id, fmt_ts(completed_at), error_message],
        )?;
        Ok(())
    }

    /// The newest successful job of a type; the cleanup consumer's sole
    /// contract with this pipeline.
    pub fn last_successful(&self, agg_type: AggregationType) -> Result<Option<LastSuccessful>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT aggregation_date, aggregated_until_ts, parks_processed, rides_processed \
             FROM aggregation_jobs WHERE aggregation_type = ?1 AND status = 'success' \
             ORDER BY aggregation_date DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![agg_type.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let Some(raw) = rows.next().transpose()? else {
            return Ok(None);
        };
        Ok(Some(LastSuccessful {
            aggregation_date: parse_date(&raw.0)?,
            aggregated_until_ts: raw.1.as_deref().map(parse_ts).transpose()?,
            parks_processed: raw.2,
            rides_processed: raw.3,
        }))
    }

    // ── Period statistics ──

    pub fn upsert_ride_stats(&self, stats: &RideStats) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ride_stats (ride_id, park_id, period_type, period_key, uptime_minutes, \
             downtime_minutes, uptime_percentage, avg_wait_time, peak_wait_time, status_changes, \
             snapshot_count) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(ride_id, period_type, period_key) DO UPDATE SET \
             park_id = excluded.park_id, uptime_minutes = excluded.uptime_minutes, \
             downtime_minutes = excluded.downtime_minutes, \
             uptime_percentage = excluded.uptime_percentage, \
             avg_wait_time = excluded.avg_wait_time, peak_wait_time = excluded.peak_wait_time, \
             status_changes = excluded.status_changes, snapshot_count = excluded.snapshot_count",
            params![
                stats.ride_id,
                stats.park_id,
                stats.period_type.as_str(),
                stats.period_key,
                stats.uptime_minutes,
                stats.downtime_minutes,
                stats.uptime_percentage,
                stats.avg_wait_time,
                stats.peak_wait_time,
                stats.status_changes,
                stats.snapshot_count,
            ],
        )?;
        Ok(())
    }

    pub fn get_ride_stats(
        &self,
        ride_id: i64,
        period_type: AggregationType,
        period_key: &str,
    ) -> Result<Option<RideStats>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT ride_id, park_id, period_type, period_key, uptime_minutes, downtime_minutes, \
             uptime_percentage, avg_wait_time, peak_wait_time, status_changes, snapshot_count \
             FROM ride_stats WHERE ride_id = ?1 AND period_type = ?2 AND period_key = ?3",
        )?;
        let mut rows = stmt.query_map(
            params![ride_id, period_type.as_str(), period_key],
            ride_stats_row,
        )?;
        rows.next()
            .transpose()
            .map_err(PipelineError::from)?
            .map(raw_ride_stats_to_model)
            .transpose()
    }

    pub fn ride_stats_for_park(
        &self,
        park_id: i64,
        period_type: AggregationType,
        period_key: &str,
    ) -> Result<Vec<RideStats>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT ride_id, park_id, period_type, period_key, uptime_minutes, downtime_minutes, \
             uptime_percentage, avg_wait_time, peak_wait_time, status_changes, snapshot_count \
             FROM ride_stats WHERE park_id = ?1 AND period_type = ?2 AND period_key = ?3 \
             ORDER BY ride_id",
        )?;
        let rows = stmt
            .query_map(
                params![park_id, period_type.as_str(), period_key],
                ride_stats_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(raw_ride_stats_to_model).collect()
    }

    pub fn upsert_park_stats(&self, stats: &ParkStats) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO park_stats (park_id, period_type, period_key, rides_total, rides_active, \
             operating_minutes, downtime_minutes, uptime_percentage, avg_wait_time, \
             peak_wait_time, status_changes, shame_score) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT(park_id, period_type, period_key) DO UPDATE SET \
             rides_total = excluded.rides_total, rides_active = excluded.rides_active, \
             operating_minutes = excluded.operating_minutes, \
             downtime_minutes = excluded.downtime_minutes, \
             uptime_percentage = excluded.uptime_percentage, \
             avg_wait_time = excluded.avg_wait_time, peak_wait_time = excluded.peak_wait_time, \
             status_changes = excluded.status_changes, shame_score = excluded.shame_score",
            params![
                stats.park_id,
                stats.period_type.as_str(),
                stats.period_key,
                stats.rides_total,
                stats.rides_active,
                stats.operating_minutes,
                stats.downtime_minutes,
                stats.uptime_percentage,
                stats.avg_wait_time,
                stats.peak_wait_time,
                stats.status_changes,
                stats.shame_score,
            ],
        )?;
        Ok(())
    }

    pub fn get_park_stats(
        &self,
        park_id: i64,
        period_type: AggregationType,
        period_key: &str,
    ) -> Result<Option<ParkStats>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT park_id, period_type, period_key, rides_total, rides_active, \
             operating_minutes, downtime_minutes, uptime_percentage, avg_wait_time, \
             peak_wait_time, status_changes, shame_score \
             FROM park_stats WHERE park_id = ?1 AND period_type = ?2 AND period_key = ?3",
        )?;
        let mut rows = stmt.query_map(
            params![park_id, period_type.as_str(), period_key],
            park_stats_row,
        )?;
        rows.next()
            .transpose()
            .map_err(PipelineError::from)?
            .map(raw_park_stats_to_model)
            .transpose()
    }

    /// Roll daily ride rows up into a coarser period with plain SQL
    /// aggregation. Daily period keys are ISO dates, so a lexicographic
    /// BETWEEN covers the date range.
    pub fn rollup_ride_stats(
        &self,
        period_type: AggregationType,
        period_key: &str,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<Vec<RideStats>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT ride_id, park_id, SUM(uptime_minutes), SUM(downtime_minutes), \
             AVG(uptime_percentage), AVG(avg_wait_time), MAX(peak_wait_time), \
             SUM(status_changes), SUM(snapshot_count) \
             FROM ride_stats WHERE period_type = 'daily' \
             AND period_key BETWEEN ?1 AND ?2 \
             GROUP BY ride_id ORDER BY ride_id",
        )?;
        let rows = stmt
            .query_map(
                params![from_date.to_string(), to_date.to_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                        row.get::<_, Option<i32>>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, i64>(8)?,
                    ))
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|raw| RideStats {
                ride_id: raw.0,
                park_id: raw.1,
                period_type,
                period_key: period_key.to_string(),
                uptime_minutes: raw.2,
                downtime_minutes: raw.3,
                uptime_percentage: raw.4,
                avg_wait_time: raw.5,
                peak_wait_time: raw.6,
                status_changes: raw.7,
                snapshot_count: raw.8,
            })
            .collect())
    }

    /// Same rollup for park rows. `AVG(shame_score)` skips NULL days, and a
    /// period whose days are all NULL stays NULL; "no data" never decays
    /// to a zero score.
    pub fn rollup_park_stats(
        &self,
        period_type: AggregationType,
        period_key: &str,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<Vec<ParkStats>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT park_id, MAX(rides_total), MAX(rides_active), SUM(operating_minutes), \
             SUM(downtime_minutes), AVG(uptime_percentage), AVG(avg_wait_time), \
             MAX(peak_wait_time), SUM(status_changes), AVG(shame_score) \
             FROM park_stats WHERE period_type = 'daily' \
             AND period_key BETWEEN ?1 AND ?2 \
             GROUP BY park_id ORDER BY park_id",
        )?;
        let rows = stmt
            .query_map(
                params![from_date.to_string(), to_date.to_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, Option<f64>>(6)?,
                        row.get::<_, Option<i32>>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, Option<f64>>(9)?,
                    ))
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|raw| ParkStats {
                park_id: raw.0,
                period_type,
                period_key: period_key.to_string(),
                rides_total: raw.1,
                rides_active: raw.2,
                operating_minutes: raw.3,
                downtime_minutes: raw.4,
                uptime_percentage: raw.5,
                avg_wait_time: raw.6,
                peak_wait_time: raw.7,
                status_changes: raw.8,
                shame_score: raw.9,
            })
            .collect())
    }
}

type RawJob = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    i64,
    Option<String>,
);

fn job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawJob> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn raw_job_to_model(raw: RawJob) -> Result<AggregationJob> {
    Ok(AggregationJob {
        id: raw.0,
        aggregation_date: parse_date(&raw.1)?,
        aggregation_type: raw.2.parse().map_err(PipelineError::Decode)?,
        status: raw.3.parse().map_err(PipelineError::Decode)?,
        started_at: parse_ts(&raw.4)?,
        completed_at: raw.5.as_deref().map(parse_ts).transpose()?,
        aggregated_until_ts: raw.6.as_deref().map(parse_ts).transpose()?,
        parks_processed: raw.7,
        rides_processed: raw.8,
        error_message: raw.9,
    })
}

type RawRideStats = (
    i64,
    i64,
    String,
    String,
    i64,
    i64,
    f64,
    Option<f64>,
    Option<i32>,
    i64,
    i64,
);

fn ride_stats_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRideStats> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn raw_ride_stats_to_model(raw: RawRideStats) -> Result<RideStats> {
    Ok(RideStats {
        ride_id: raw.0,
        park_id: raw.1,
        period_type: raw.2.parse().map_err(PipelineError::Decode)?,
        period_key: raw.3,
        uptime_minutes: raw.4,
        downtime_minutes: raw.5,
        uptime_percentage: raw.6,
        avg_wait_time: raw.7,
        peak_wait_time: raw.8,
        status_changes: raw.9,
        snapshot_count: raw.10,
    })
}

type RawParkStats = (
    i64,
    String,
    String,
    i64,
    i64,
    i64,
    i64,
    f64,
    Option<f64>,
    Option<i32>,
    i64,
    Option<f64>,
);

fn park_stats_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawParkStats> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn raw_park_stats_to_model(raw: RawParkStats) -> Result<ParkStats> {
    Ok(ParkStats {
        park_id: raw.0,
        period_type: raw.1.parse().map_err(PipelineError::Decode)?,
        period_key: raw.2,
        rides_total: raw.3,
        rides_active: raw.4,
        operating_minutes: raw.5,
        downtime_minutes: raw.6,
        uptime_percentage: raw.7,
        avg_wait_time: raw.8,
        peak_wait_time: raw.9,
        status_changes: raw.10,
        shame_score: raw.11,
    })
}
