//! "Since last run" windowing.
//!
//! Each awarder rescans a trailing slice of already-seen time (the overlap
//! buffer) so content that became visible late is not missed; the award
//! guards make re-evaluating those items harmless.

use badgeflow_core::error::{AutomationError, Result};
use chrono::{DateTime, Duration, Utc};

/// Where the lookback is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAnchor {
    /// From the previous run, or from now on the first run.
    LastRun,
    /// Always from now.
    Now,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRule {
    pub lookback: Duration,
    pub overlap: Duration,
    pub anchor: WindowAnchor,
}

/// The closed range `[since, until]` scanned by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl Window {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.since <= at && at <= self.until
    }
}

/// Overlap re-scanned by the content and first-post awarders.
pub fn default_overlap() -> Duration {
    Duration::minutes(15)
}

/// `action_config.lookback_hours` as a duration. Must be positive and representable.
pub fn lookback_hours(hours: i64) -> Result<Duration> {
    if hours <= 0 {
        return Err(AutomationError::InvalidConfig("lookback_hours must be positive".into()));
    }
    Duration::try_hours(hours)
        .ok_or_else(|| AutomationError::InvalidConfig(format!("lookback_hours {hours} is out of range")))
}

impl WindowRule {
    pub fn from_last_run(lookback: Duration) -> Self {
        Self {
            lookback,
            overlap: default_overlap(),
            anchor: WindowAnchor::LastRun,
        }
    }

    /// Thread-participation scans: 7.5 days back from now, no overlap needed.
    pub fn weekly_thread() -> Self {
        Self {
            lookback: Duration::days(7) + Duration::hours(12),
            overlap: Duration::zero(),
            anchor: WindowAnchor::Now,
        }
    }

    /// Fails when the lookback reaches past the representable calendar.
    pub fn since_time(&self, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let from = match (self.anchor, last_run_at) {
            (WindowAnchor::LastRun, Some(last)) => last,
            _ => now,
        };
        self.lookback
            .checked_add(&self.overlap)
            .and_then(|span| from.checked_sub_signed(span))
            .ok_or_else(|| {
                AutomationError::InvalidConfig(format!(
                    "lookback of {} hours is out of range",
                    self.lookback.num_hours()
                ))
            })
    }

    pub fn window(&self, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<Window> {
        Ok(Window {
            since: self.since_time(last_run_at, now)?,
            until: now,
        })
    }
}
