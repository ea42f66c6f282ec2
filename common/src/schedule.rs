// Fire-time calculation for cron and interval schedules.
//
// Everything here is pure: given a schedule and a reference time the result
// is fully determined, so the math is unit-testable without a running
// scheduler. The store owns when these functions are called and with what
// reference time.

use crate::errors::ScheduleError;
use crate::models::Schedule;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// Parse and validate a Quartz-syntax cron expression (seconds precision).
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expression).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

impl Schedule {
    /// Validate the schedule specification without computing anything.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            Schedule::Cron { expression, .. } => {
                parse_cron_expression(expression)?;
                Ok(())
            }
            Schedule::Interval {
                start_at,
                interval_seconds,
                end_at,
                ..
            } => {
                if *interval_seconds == 0 {
                    return Err(ScheduleError::InvalidConfiguration(
                        "interval_seconds must be greater than 0".to_string(),
                    ));
                }
                if let Some(end) = end_at {
                    if end < start_at {
                        return Err(ScheduleError::InvalidConfiguration(
                            "end_at precedes start_at".to_string(),
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    /// Smallest fire time strictly greater than `after`, or None when the
    /// schedule is exhausted (end time passed or repeat count consumed).
    ///
    /// The cron variant delegates month-length, leap-year, and
    /// day-of-month/day-of-week handling to the cron crate's iterator; the
    /// interval variant is plain arithmetic on the slot index so repeated
    /// advancement never drifts.
    pub fn next_fire_time(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match self {
            Schedule::Cron {
                expression,
                timezone,
                end_at,
            } => {
                let schedule = parse_cron_expression(expression)?;
                let after_tz = after.with_timezone(timezone);
                let next = schedule
                    .after(&after_tz)
                    .next()
                    .map(|t| t.with_timezone(&Utc));
                Ok(cap_end(next, *end_at))
            }
            Schedule::Interval {
                start_at,
                interval_seconds,
                repeat_count,
                end_at,
            } => {
                let interval_ms = interval_millis(*interval_seconds)?;
                let slot = if after < *start_at {
                    0
                } else {
                    (after - *start_at).num_milliseconds() / interval_ms + 1
                };
                Ok(interval_slot_time(
                    *start_at,
                    interval_ms,
                    slot,
                    *repeat_count,
                    *end_at,
                ))
            }
        }
    }

    /// First fire time at or after `from` — the initial `next_fire_at` of a
    /// freshly stored trigger. Unlike [`next_fire_time`](Self::next_fire_time)
    /// this is inclusive, so a trigger whose start coincides with insertion
    /// time fires at its start.
    pub fn first_fire_time(
        &self,
        from: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match self {
            Schedule::Cron {
                expression,
                timezone,
                end_at,
            } => {
                let schedule = parse_cron_expression(expression)?;
                if schedule.includes(from.with_timezone(timezone)) {
                    return Ok(cap_end(Some(from), *end_at));
                }
                self.next_fire_time(from)
            }
            Schedule::Interval {
                start_at,
                interval_seconds,
                repeat_count,
                end_at,
            } => {
                let interval_ms = interval_millis(*interval_seconds)?;
                let slot = if from <= *start_at {
                    0
                } else {
                    let elapsed_ms = (from - *start_at).num_milliseconds();
                    let whole = elapsed_ms / interval_ms;
                    if elapsed_ms % interval_ms == 0 {
                        whole
                    } else {
                        whole + 1
                    }
                };
                Ok(interval_slot_time(
                    *start_at,
                    interval_ms,
                    slot,
                    *repeat_count,
                    *end_at,
                ))
            }
        }
    }
}

fn interval_millis(interval_seconds: u64) -> Result<i64, ScheduleError> {
    if interval_seconds == 0 {
        return Err(ScheduleError::InvalidConfiguration(
            "interval_seconds must be greater than 0".to_string(),
        ));
    }
    Ok(interval_seconds as i64 * 1000)
}

/// Fire time of interval slot `slot` (0-based), None once the repeat count
/// or end time is exhausted.
fn interval_slot_time(
    start_at: DateTime<Utc>,
    interval_ms: i64,
    slot: i64,
    repeat_count: Option<u32>,
    end_at: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    if let Some(repeat) = repeat_count {
        if slot > repeat as i64 {
            return None;
        }
    }
    let candidate = start_at + Duration::milliseconds(slot * interval_ms);
    cap_end(Some(candidate), end_at)
}

fn cap_end(
    candidate: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (candidate, end_at) {
        (Some(t), Some(end)) if t > end => None,
        (other, _) => other,
    }
}
