use chrono::{Datelike, Duration, NaiveDate};
use chrono_tz::Tz;
use std::sync::Arc;

use crate::aggregation::AggregationService;
use crate::config::SchedulerConfig;
use crate::models::job::AggregationType;
use crate::retry::RetryPolicy;
use crate::time::{Clock, reporting_day_utc};

/// Spawn the rollup scheduler as a background task (fire-and-forget).
///
/// After each day rolls over in the reporting timezone, the previous day's
/// daily aggregation is attempted at the policy's fixed offsets. Each
/// attempt just calls `run`, which is retry-safe, so an attempt that finds
/// prior success costs one job-log read.
pub fn spawn_rollup_scheduler(
    service: Arc<AggregationService>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    reporting_tz: Tz,
) {
    if !config.enabled {
        tracing::info!("rollup scheduler: disabled by config");
        return;
    }

    let policy = RetryPolicy::from_offsets_minutes(&config.retry_offsets_minutes);
    let poll = std::time::Duration::from_secs(config.poll_interval_secs);

    tokio::spawn(async move {
        tracing::info!(
            "rollup scheduler: started ({} attempts per day, poll every {}s)",
            policy.max_attempts(),
            config.poll_interval_secs
        );
        let mut last_fired: Option<(NaiveDate, usize)> = None;
        let mut interval = tokio::time::interval(poll);
        loop {
            interval.tick().await;
            if let Err(e) = tick(&service, &clock, &policy, reporting_tz, &mut last_fired).await {
                tracing::error!("rollup scheduler error: {e}");
            }
        }
    });
}

async fn tick(
    service: &AggregationService,
    clock: &Arc<dyn Clock>,
    policy: &RetryPolicy,
    reporting_tz: Tz,
    last_fired: &mut Option<(NaiveDate, usize)>,
) -> anyhow::Result<()> {
    let now = clock.now_utc();
    let today = now.with_timezone(&reporting_tz).date_naive();
    let yesterday = today - Duration::days(1);
    let (rollover, _) = reporting_day_utc(today, reporting_tz);

    let Some(attempt) = policy.due_attempt(rollover, now) else {
        return Ok(());
    };
    if !should_fire(*last_fired, yesterday, attempt) {
        return Ok(());
    }
    *last_fired = Some((yesterday, attempt));

    tracing::info!("rollup scheduler: attempt {attempt} for {yesterday}");
    // On failure the error propagates to the engine loop; the next
    // scheduled offset retries, since the attempt is already recorded.
    let outcome = service
        .run(yesterday, AggregationType::Daily, None, false)
        .await?;
    tracing::info!(
        "rollup scheduler: daily {yesterday} -> {:?} ({} parks, {} rides)",
        outcome.status,
        outcome.parks_processed,
        outcome.rides_processed
    );
    for agg_type in cascade_types(yesterday) {
        if let Err(e) = service.run(yesterday, agg_type, None, false).await {
            tracing::warn!("rollup scheduler: {agg_type} for {yesterday} failed: {e}");
        }
    }
    Ok(())
}

fn should_fire(last: Option<(NaiveDate, usize)>, yesterday: NaiveDate, attempt: usize) -> bool {
    match last {
        None => true,
        Some((date, fired)) => date != yesterday || fired < attempt,
    }
}

/// Coarser periods that close when `completed_date` was their last day.
/// They read persisted daily rows, so they run right after the daily pass.
fn cascade_types(completed_date: NaiveDate) -> Vec<AggregationType> {
    let mut types = vec![AggregationType::Hourly];
    if completed_date.weekday() == chrono::Weekday::Sun {
        types.push(AggregationType::Weekly);
    }
    let next = completed_date + Duration::days(1);
    if next.month() != completed_date.month() {
        types.push(AggregationType::Monthly);
    }
    if next.year() != completed_date.year() {
        types.push(AggregationType::Yearly);
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn fires_each_attempt_once_per_day() {
        let yesterday = date(2025, 6, 1);
        assert!(should_fire(None, yesterday, 0));
        assert!(!should_fire(Some((yesterday, 0)), yesterday, 0));
        assert!(should_fire(Some((yesterday, 0)), yesterday, 1));
        assert!(should_fire(Some((yesterday, 2)), date(2025, 6, 2), 0));
    }

    #[test]
    fn cascades_close_at_period_boundaries() {
        // Midweek day: only the hourly follow-up.
        assert_eq!(cascade_types(date(2025, 6, 4)), vec![AggregationType::Hourly]);
        // Sunday closes the ISO week.
        assert!(cascade_types(date(2025, 6, 8)).contains(&AggregationType::Weekly));
        // Month end.
        assert!(cascade_types(date(2025, 6, 30)).contains(&AggregationType::Monthly));
        // Year end closes month and year.
        let eoy = cascade_types(date(2025, 12, 31));
        assert!(eoy.contains(&AggregationType::Monthly));
        assert!(eoy.contains(&AggregationType::Yearly));
    }
}
