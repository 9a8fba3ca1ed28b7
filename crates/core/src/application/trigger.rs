// Trigger Translation
//
// Turns a stored Recurrence into something that can answer "when does this
// fire next". Preset recurrences (daily/weekly/monthly) expand to cron
// fields; raw cron expressions pass through. Translation is total but
// fallible: malformed input yields None and the schedule simply stays
// unregistered, it never falls back to a default cadence.

use crate::domain::Recurrence;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use tracing::warn;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A registered schedule's fire-time source
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fires exactly once at the given instant
    Once(DateTime<Utc>),
    /// Fires on a cron cadence evaluated in the schedule's timezone
    Cron { schedule: CronSchedule, tz: Tz },
}

impl Trigger {
    /// Next fire time strictly after `after`, None when exhausted
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Once(at) => (*at > after).then_some(*at),
            Trigger::Cron { schedule, tz } => {
                let local = after.with_timezone(tz);
                schedule
                    .after(&local)
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        }
    }

    /// Up to `count` upcoming fire times strictly after `after`
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        match self {
            Trigger::Once(at) => {
                if count > 0 && *at > after {
                    vec![*at]
                } else {
                    Vec::new()
                }
            }
            Trigger::Cron { schedule, tz } => {
                let local = after.with_timezone(tz);
                schedule
                    .after(&local)
                    .take(count)
                    .map(|dt| dt.with_timezone(&Utc))
                    .collect()
            }
        }
    }
}

/// Translate a recurrence into a trigger. Returns None when the recurrence
/// cannot fire: malformed cron expression, unknown timezone, out-of-range
/// time fields, or a one-time schedule without a datetime.
pub fn build_trigger(recurrence: &Recurrence) -> Option<Trigger> {
    match recurrence {
        Recurrence::OneTime { scheduled_at } => {
            let ms = (*scheduled_at)?;
            match Utc.timestamp_millis_opt(ms).single() {
                Some(at) => Some(Trigger::Once(at)),
                None => {
                    warn!(scheduled_at = ms, "One-time schedule has invalid timestamp");
                    None
                }
            }
        }
        Recurrence::Cron {
            expression,
            timezone,
        } => cron_trigger(expression, timezone),
        Recurrence::Daily { time, timezone } => {
            let (hour, minute) = parse_hhmm(time)?;
            cron_trigger(&format!("0 {} {} * * * *", minute, hour), timezone)
        }
        Recurrence::Weekly {
            time,
            day_of_week,
            timezone,
        } => {
            let (hour, minute) = parse_hhmm(time)?;
            let day = DAY_NAMES.get(*day_of_week as usize)?;
            cron_trigger(&format!("0 {} {} * * {} *", minute, hour, day), timezone)
        }
        Recurrence::Monthly {
            time,
            day_of_month,
            timezone,
        } => {
            if !(1..=31).contains(day_of_month) {
                warn!(day_of_month = day_of_month, "Monthly schedule day out of range");
                return None;
            }
            let (hour, minute) = parse_hhmm(time)?;
            cron_trigger(
                &format!("0 {} {} {} * * *", minute, hour, day_of_month),
                timezone,
            )
        }
    }
}

fn cron_trigger(expression: &str, timezone: &str) -> Option<Trigger> {
    let schedule = match CronSchedule::from_str(expression) {
        Ok(s) => s,
        Err(e) => {
            warn!(expression = expression, error = %e, "Invalid cron expression");
            return None;
        }
    };
    let tz = match timezone.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = timezone, "Unknown timezone");
            return None;
        }
    };
    Some(Trigger::Cron { schedule, tz })
}

/// Parse "HH:MM" wall-clock time
fn parse_hhmm(time: &str) -> Option<(u8, u8)> {
    let (h, m) = time.split_once(':')?;
    let hour: u8 = h.parse().ok()?;
    let minute: u8 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        warn!(time = time, "Schedule time out of range");
        return None;
    }
    Some((hour, minute))
}
