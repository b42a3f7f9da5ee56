//! Next-fire computation for schedule rules.
//!
//! Wall-clock rules are evaluated in the configured zone. An ambiguous local
//! time (clocks going back) resolves to the earlier instant; a local time that
//! does not exist (clocks going forward) is pushed one hour later.

use chrono::{DateTime, Datelike, Duration, Local, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use crate::config::TimezoneMode;
use crate::errors::MalsiftError;
use crate::models::ScheduleRule;

pub fn next_run(rule: &ScheduleRule, now: DateTime<Utc>, zone: TimezoneMode) -> Result<DateTime<Utc>, MalsiftError> {
    match zone {
        TimezoneMode::Local => next_run_in(rule, now, &Local),
        TimezoneMode::Utc => next_run_in(rule, now, &Utc),
    }
}

pub fn next_run_in<Tz: TimeZone>(
    rule: &ScheduleRule,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Result<DateTime<Utc>, MalsiftError> {
    let (at, days): (NaiveTime, Option<&[u8]>) = match rule {
        ScheduleRule::Interval { hours } => return after(now, Duration::hours(i64::from(*hours))),
        ScheduleRule::Daily { at } => (*at, None),
        ScheduleRule::Weekly { at, days } => (*at, Some(days.as_slice())),
    };

    let today = now.with_timezone(tz).date_naive();
    for offset in 0..=7 {
        let Some(date) = today.checked_add_signed(Duration::days(offset)) else { break };
        if let Some(days) = days {
            if !days.contains(&(date.weekday().num_days_from_monday() as u8)) {
                continue;
            }
        }
        if let Some(instant) = wall_clock(tz, date, at) {
            if instant > now {
                return Ok(instant);
            }
        }
    }
    // Only reachable for an empty weekday set, which validation rejects.
    after(now, Duration::days(1))
}

fn after(now: DateTime<Utc>, delta: Duration) -> Result<DateTime<Utc>, MalsiftError> {
    now.checked_add_signed(delta)
        .ok_or_else(|| MalsiftError::Config(format!("next run {} after {} is out of range", delta, now)))
}

fn wall_clock<Tz: TimeZone>(tz: &Tz, date: NaiveDate, at: NaiveTime) -> Option<DateTime<Utc>> {
    let local = date.and_time(at);
    resolve(tz.from_local_datetime(&local), || tz.from_local_datetime(&(local + Duration::hours(1))))
        .map(|t| t.with_timezone(&Utc))
}

/// Apply the DST policy to one local-time lookup.
fn resolve<T: Ord>(found: LocalResult<T>, shifted: impl FnOnce() -> LocalResult<T>) -> Option<T> {
    match found {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(a, b) => Some(a.min(b)),
        LocalResult::None => shifted().earliest(),
    }
}
