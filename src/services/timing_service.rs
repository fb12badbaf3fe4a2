use chrono::{DateTime, Duration, Utc};

use crate::models::assessment::Assessment;
use crate::utils::time::{ceil_minutes, floor_minutes};

/// Outcome of evaluating an attempt's clock at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingCheck {
    pub deadline: DateTime<Utc>,
    pub time_remaining_minutes: i32,
    pub expired: bool,
}

/// Expiry is a value computed on every access, never a scheduled event.
pub struct TimingService;

impl TimingService {
    /// The earlier of the attempt's own duration and the schedule cutoff.
    pub fn deadline(started_at: DateTime<Utc>, assessment: &Assessment) -> DateTime<Utc> {
        let by_duration =
            started_at + Duration::minutes(assessment.config.duration_minutes.max(0) as i64);
        by_duration.min(assessment.schedule.cutoff())
    }

    pub fn check(
        started_at: DateTime<Utc>,
        assessment: &Assessment,
        now: DateTime<Utc>,
    ) -> TimingCheck {
        let deadline = Self::deadline(started_at, assessment);
        TimingCheck {
            deadline,
            time_remaining_minutes: ceil_minutes(deadline - now),
            expired: now >= deadline,
        }
    }

    /// Minutes charged to an attempt that ran out of time.
    pub fn expired_time_taken(started_at: DateTime<Utc>, assessment: &Assessment) -> i32 {
        floor_minutes(Self::deadline(started_at, assessment) - started_at)
    }

    pub fn elapsed_minutes(started_at: DateTime<Utc>, at: DateTime<Utc>) -> i32 {
        floor_minutes(at - started_at)
    }
}
