use chrono::{DateTime, Duration, Utc};

/// Fixed-offset retry schedule for daily rollups, held as a value instead
/// of being baked into scheduling code.
///
/// Attempt N fires `offsets[N]` after the day-rollover instant. Every
/// attempt just calls `AggregationService::run`, which short-circuits on
/// prior success, so firing an attempt that turns out to be unnecessary is
/// harmless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    offsets: Vec<Duration>,
}

impl RetryPolicy {
    pub fn from_offsets_minutes(minutes: &[i64]) -> Self {
        Self {
            offsets: minutes.iter().map(|m| Duration::minutes(*m)).collect(),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.offsets.len()
    }

    pub fn offset_for_attempt(&self, attempt: usize) -> Option<Duration> {
        self.offsets.get(attempt).copied()
    }

    /// When the given attempt becomes due, measured from the rollover
    /// instant. `None` once the schedule is exhausted.
    pub fn attempt_due_at(&self, rollover: DateTime<Utc>, attempt: usize) -> Option<DateTime<Utc>> {
        self.offset_for_attempt(attempt).map(|off| rollover + off)
    }

    /// The first attempt index that is due at `now` but would not have
    /// been due one poll earlier, or simply the latest due attempt.
    pub fn due_attempt(&self, rollover: DateTime<Utc>, now: DateTime<Utc>) -> Option<usize> {
        self.offsets
            .iter()
            .enumerate()
            .filter(|(_, off)| rollover + **off <= now)
            .map(|(i, _)| i)
            .last()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_offsets_minutes(&[10, 70, 130])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn offsets_resolve_to_due_times() {
        let policy = RetryPolicy::default();
        let rollover = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        assert_eq!(
            policy.attempt_due_at(rollover, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 0, 10, 0).unwrap()
        );
        assert_eq!(
            policy.attempt_due_at(rollover, 2).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 2, 10, 0).unwrap()
        );
        assert!(policy.attempt_due_at(rollover, 3).is_none());
    }

    #[test]
    fn due_attempt_tracks_elapsed_offsets() {
        let policy = RetryPolicy::default();
        let rollover = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        let at = |h, m| Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap();
        assert_eq!(policy.due_attempt(rollover, at(0, 5)), None);
        assert_eq!(policy.due_attempt(rollover, at(0, 15)), Some(0));
        assert_eq!(policy.due_attempt(rollover, at(1, 30)), Some(1));
        assert_eq!(policy.due_attempt(rollover, at(5, 0)), Some(2));
    }
}
