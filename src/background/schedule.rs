//! Recurrence schedules and clocks.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::error::{DiError, DiResult};

/// Something that knows when it next occurs.
pub trait Schedule: Send + Sync + fmt::Debug {
    /// First occurrence strictly after `after`, or `None` once exhausted.
    fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// A cron expression.
///
/// Standard five-field expressions (`minute hour day-of-month month
/// day-of-week`, Sunday = 0) are accepted, as are six and seven field forms
/// with leading seconds and trailing year.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use reinject::{CronSchedule, Schedule};
///
/// let weekdays = CronSchedule::parse("30 9 * * 1-5").unwrap();
/// // Saturday 2024-06-01 -> Monday 2024-06-03 09:30
/// let next = weekdays
///     .next_occurrence(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
///     .unwrap();
/// assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 3, 9, 30, 0).unwrap());
/// ```
#[derive(Clone)]
pub struct CronSchedule {
    expression: String,
    inner: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> DiResult<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => {
                let day_of_week = translate_day_of_week(fields[4]).map_err(|reason| {
                    DiError::InvalidSchedule {
                        expression: expression.to_string(),
                        reason,
                    }
                })?;
                format!(
                    "0 {} {} {} {} {}",
                    fields[0], fields[1], fields[2], fields[3], day_of_week
                )
            }
            6 | 7 => fields.join(" "),
            n => {
                return Err(DiError::InvalidSchedule {
                    expression: expression.to_string(),
                    reason: format!("expected 5 to 7 fields, found {}", n),
                })
            }
        };

        let inner = cron::Schedule::from_str(&normalized).map_err(|e| DiError::InvalidSchedule {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            expression: expression.to_string(),
            inner,
        })
    }

    /// The expression as given.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl FromStr for CronSchedule {
    type Err = DiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Schedule for CronSchedule {
    fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&after).next()
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expression).finish()
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

// The cron crate numbers weekdays 1-7 from Sunday; standard cron uses 0-6
// with 7 as a second Sunday. Anything other than `*` steps is expanded into
// an explicit list so ranges and steps touching Sunday survive the shift.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    let mut passthrough = Vec::new();
    let mut days = BTreeSet::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        if range == "*" || range == "?" {
            passthrough.push(item.to_string());
            continue;
        }

        let step = match step {
            Some(step) => step
                .parse::<usize>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| format!("invalid step {:?}", step))?,
            None => 1,
        };
        let (from, to) = match range.split_once('-') {
            Some((from, to)) => (day_number(from)?, day_number(to)?),
            // `n/s` runs to the end of the week
            None if step > 1 => (day_number(range)?, 6),
            None => {
                let day = day_number(range)?;
                (day, day)
            }
        };
        if from > to {
            return Err(format!("day of week range {:?} runs backwards", range));
        }
        days.extend((from..=to).step_by(step).map(|day| day % 7 + 1));
    }

    passthrough.extend(days.into_iter().map(|day| day.to_string()));
    Ok(passthrough.join(","))
}

// Standard cron numbering, Sunday = 0 or 7.
fn day_number(token: &str) -> Result<u32, String> {
    if let Ok(n) = token.parse::<u32>() {
        return match n {
            0..=7 => Ok(n),
            _ => Err(format!("day of week {} out of range", n)),
        };
    }
    match token.to_ascii_uppercase().as_str() {
        "SUN" => Ok(0),
        "MON" => Ok(1),
        "TUE" => Ok(2),
        "WED" => Ok(3),
        "THU" => Ok(4),
        "FRI" => Ok(5),
        "SAT" => Ok(6),
        _ => Err(format!("unknown day of week {:?}", token)),
    }
}

/// Source of the current instant for scheduling decisions.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock driven by tokio's time source.
///
/// Anchored to the wall clock at creation and advanced by tokio's monotonic
/// clock afterwards, so it follows `tokio::time::pause`/`advance` in tests.
/// Create it inside the runtime whose clock it should follow.
#[derive(Debug, Clone)]
pub struct TokioClock {
    base: DateTime<Utc>,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Clock reading `base` right now.
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.anchor);
        self.base + ChronoDuration::from_std(elapsed).unwrap_or_else(|_| ChronoDuration::zero())
    }
}
