//! Recurring schedules and the background tasks they drive
//!
//! Schedule syntax:
//! - five cron fields `minute hour day-of-month month day-of-week`, each
//!   `*`, a value, a range `a-b`, a step `*/n` or `a-b/n`, or a comma list
//! - `@hourly`, `@daily` (`@midnight`), `@weekly`, `@monthly`, `@yearly`
//! - `@every <n>s|m|h`
//!
//! All times are UTC.

use crate::error::{MailError, Result};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Timelike, Utc};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Years searched ahead before declaring that a cron expression never fires
const SEARCH_YEARS: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Cron(CronSpec),
    Every(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    minutes: u64,
    hours: u64,
    days: u64,
    months: u64,
    weekdays: u64,
    /// Whether day-of-month / day-of-week were written as something other
    /// than `*`; when both are, a day matching either one fires.
    days_restricted: bool,
    weekdays_restricted: bool,
}

impl Schedule {
    /// First fire time strictly after `after`, `None` if there is none
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Every(period) => ChronoDuration::from_std(*period)
                .ok()
                .and_then(|p| after.checked_add_signed(p)),
            Schedule::Cron(spec) => spec.next_after(after),
        }
    }
}

impl FromStr for Schedule {
    type Err = MailError;

    fn from_str(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let cron = match expr {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            _ => {
                if let Some(period) = expr.strip_prefix("@every") {
                    return parse_period(period.trim()).map(Schedule::Every);
                }
                expr
            }
        };
        CronSpec::parse(cron).map(Schedule::Cron)
    }
}

fn parse_period(raw: &str) -> Result<Duration> {
    let invalid = || MailError::Schedule(format!("invalid period: {:?}", raw));

    let split = raw.len().checked_sub(1).ok_or_else(invalid)?;
    if !raw.is_char_boundary(split) {
        return Err(invalid());
    }
    let (value, unit) = raw.split_at(split);
    let value: u64 = value.parse().map_err(|_| invalid())?;
    let seconds = match unit {
        "s" => Some(value),
        "m" => value.checked_mul(60),
        "h" => value.checked_mul(60 * 60),
        _ => None,
    }
    .ok_or_else(invalid)?;
    if seconds == 0 {
        return Err(invalid());
    }
    Ok(Duration::from_secs(seconds))
}

impl CronSpec {
    fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = fields.as_slice() else {
            return Err(MailError::Schedule(format!(
                "expected 5 fields, got {}: {:?}",
                fields.len(),
                expr
            )));
        };

        // Sunday may be written as 7
        let mut weekdays = parse_field(weekday, 0, 7)?;
        if weekdays & (1 << 7) != 0 {
            weekdays = (weekdays | 1) & !(1 << 7);
        }

        Ok(Self {
            minutes: parse_field(minute, 0, 59)?,
            hours: parse_field(hour, 0, 23)?,
            days: parse_field(day, 1, 31)?,
            months: parse_field(month, 1, 12)?,
            weekdays,
            days_restricted: !day.starts_with('*'),
            weekdays_restricted: !weekday.starts_with('*'),
        })
    }

    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + ChronoDuration::minutes(1);
        let last_year = start.year() + SEARCH_YEARS;
        let mut t = start;

        while t.year() <= last_year {
            if !has(self.months, t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(t.date_naive()) {
                let next = t.date_naive().succ_opt()?;
                t = Utc.from_utc_datetime(&next.and_hms_opt(0, 0, 0)?);
                continue;
            }
            if !has(self.hours, t.hour()) {
                t = (t + ChronoDuration::hours(1)).with_minute(0)?;
                continue;
            }
            if !has(self.minutes, t.minute()) {
                t += ChronoDuration::minutes(1);
                continue;
            }
            return Some(t);
        }

        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let day = has(self.days, date.day());
        let weekday = has(self.weekdays, date.weekday().num_days_from_sunday());

        if self.days_restricted && self.weekdays_restricted {
            day || weekday
        } else {
            day && weekday
        }
    }
}

fn has(set: u64, value: u32) -> bool {
    set & (1 << value) != 0
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<u64> {
    let invalid = |reason: &str| MailError::Schedule(format!("{:?}: {}", field, reason));
    let number = |raw: &str| -> Result<u32> {
        let value: u32 = raw.parse().map_err(|_| invalid("not a number"))?;
        if value < min || value > max {
            return Err(invalid(&format!("{} outside {}-{}", value, min, max)));
        }
        Ok(value)
    };

    let mut set = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid("bad step"))?;
                if step == 0 {
                    return Err(invalid("step must be positive"));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (low, high) = if range == "*" {
            (min, max)
        } else if let Some((low, high)) = range.split_once('-') {
            (number(low)?, number(high)?)
        } else {
            let value = number(range)?;
            // `a/n` runs from a to the end of the range
            if part.contains('/') {
                (value, max)
            } else {
                (value, value)
            }
        };
        if low > high {
            return Err(invalid("range is reversed"));
        }

        for value in (low..=high).step_by(step as usize) {
            set |= 1 << value;
        }
    }

    Ok(set)
}

/// Handle to a task firing a job on a [`Schedule`]
///
/// Cancellation only takes effect between runs; a job that has started
/// always runs to completion.
pub struct ScheduledTask {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn spawn<F, Fut>(name: impl Into<String>, schedule: Schedule, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();

        let task_name = name.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            info!(task = %task_name, "Scheduled task started");
            loop {
                let now = Utc::now();
                let Some(next) = schedule.next_after(now) else {
                    warn!(task = %task_name, "Schedule has no further fire times");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(task = %task_name, next = %next, "Waiting for next run");

                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                job().await;
            }
            info!(task = %task_name, "Scheduled task stopped");
        });

        Self { name, token, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop firing; a run in progress is left to finish
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait for the task to exit
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            error!(task = %self.name, "Scheduled task panicked: {}", e);
        }
    }
}
