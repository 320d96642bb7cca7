//! Next-run computation for automation cadences.
//! Cron expressions: "MIN HOUR DOM MON DOW" (5-field, no seconds).
//! Wildcards: *, */N, N, a,b,c for minute, hour and day-of-week (0 = Sunday).
//! Day-of-month and month only accept `*`.

use badgeflow_core::error::{AutomationError, Result};
use badgeflow_core::types::Cadence;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

/// Longest gap between two cron matches: one week plus slack.
const CRON_SEARCH_MINUTES: i64 = 8 * 24 * 60;

/// First instant strictly after `after` at which `cadence` fires.
pub fn next_run_after(cadence: &Cadence, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    match cadence {
        Cadence::Hourly { minute } => {
            check_range("minute", *minute, 59)?;
            let candidate = at_time(after, after.hour(), *minute)?;
            Ok(if candidate > after {
                candidate
            } else {
                candidate + Duration::hours(1)
            })
        }
        Cadence::Daily { hour, minute } => {
            check_range("hour", *hour, 23)?;
            check_range("minute", *minute, 59)?;
            let candidate = at_time(after, *hour, *minute)?;
            Ok(if candidate > after {
                candidate
            } else {
                candidate + Duration::days(1)
            })
        }
        Cadence::Weekly {
            weekday,
            hour,
            minute,
        } => {
            check_range("hour", *hour, 23)?;
            check_range("minute", *minute, 59)?;
            let days_ahead = (weekday.num_days_from_monday() + 7
                - after.weekday().num_days_from_monday())
                % 7;
            let candidate = at_time(after, *hour, *minute)? + Duration::days(days_ahead as i64);
            Ok(if candidate > after {
                candidate
            } else {
                candidate + Duration::weeks(1)
            })
        }
        Cadence::Interval { every_secs } => {
            if *every_secs == 0 {
                return Err(AutomationError::InvalidConfig(
                    "interval must be at least one second".into(),
                ));
            }
            i64::try_from(*every_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|every| after.checked_add_signed(every))
                .ok_or_else(|| {
                    AutomationError::InvalidConfig(format!(
                        "interval of {every_secs} seconds is out of range"
                    ))
                })
        }
        Cadence::Cron { expression } => next_run_from_cron(expression, after),
    }
}

/// `after`'s date at `hour:minute:00`.
fn at_time(after: DateTime<Utc>, hour: u32, minute: u32) -> Result<DateTime<Utc>> {
    Utc.with_ymd_and_hms(after.year(), after.month(), after.day(), hour, minute, 0)
        .single()
        .ok_or_else(|| AutomationError::InvalidConfig(format!("invalid time {hour}:{minute}")))
}

fn check_range(name: &str, value: u32, max: u32) -> Result<()> {
    if value > max {
        return Err(AutomationError::InvalidConfig(format!(
            "{name} must be between 0 and {max}, got {value}"
        )));
    }
    Ok(())
}

/// Parse a cron expression and compute the next run time.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let invalid = || {
        AutomationError::InvalidConfig(format!(
            "invalid cron expression '{expression}' (need MIN HOUR DOM MON DOW)"
        ))
    };

    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(invalid());
    }
    if parts[2] != "*" || parts[3] != "*" {
        return Err(AutomationError::InvalidConfig(format!(
            "cron '{expression}': day-of-month and month must be '*'"
        )));
    }

    let minutes = parse_field(parts[0], 0, 59).ok_or_else(invalid)?;
    let hours = parse_field(parts[1], 0, 23).ok_or_else(invalid)?;
    let weekdays = parse_field(parts[4], 0, 6).ok_or_else(invalid)?;

    let mut candidate = after + Duration::minutes(1);
    candidate = candidate
        .with_second(0)
        .and_then(|c| c.with_nanosecond(0))
        .unwrap_or(candidate);

    for _ in 0..CRON_SEARCH_MINUTES {
        if minutes.contains(&candidate.minute())
            && hours.contains(&candidate.hour())
            && weekdays.contains(&candidate.weekday().num_days_from_sunday())
        {
            return Ok(candidate);
        }
        candidate += Duration::minutes(1);
    }

    Err(invalid())
}

/// Parse a cron field into a list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    if field.contains(',') {
        let vals: Vec<u32> = field
            .split(',')
            .map(|s| s.trim().parse::<u32>())
            .collect::<std::result::Result<_, _>>()
            .ok()?;
        let vals: Vec<u32> = vals.into_iter().filter(|x| *x >= min && *x <= max).collect();
        return if vals.is_empty() { None } else { Some(vals) };
    }

    let n: u32 = field.parse().ok()?;
    (min..=max).contains(&n).then(|| vec![n])
}
