use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use chrono_tz::Tz;
use swarmcron_core::duration::parse_duration;

use crate::error::{Result, SchedulerError};

/// A parsed schedule expression.
///
/// Calendar expressions are evaluated in a caller-supplied zone, so `0 3 * * *`
/// means 03:00 local time on both sides of a daylight-saving change.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Calendar expression, normalised to the `cron` crate's 6-field form.
    Cron(Box<cron::Schedule>),
    /// `@every <duration>`: fixed interval, whole seconds, at least one.
    Every(Duration),
}

impl Schedule {
    /// Parse a second-optional cron expression or a descriptor.
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(invalid(expr, "empty schedule"));
        }

        if let Some(rest) = trimmed.strip_prefix("@every") {
            if !rest.starts_with(char::is_whitespace) {
                return Err(invalid(expr, "unknown descriptor"));
            }
            let every = parse_duration(rest).map_err(|e| invalid(expr, &e.to_string()))?;
            if every.is_zero() {
                return Err(invalid(expr, "interval must be positive"));
            }
            let secs = every.as_secs().max(1);
            return Ok(Schedule::Every(Duration::from_secs(secs)));
        }

        let normalized = if trimmed.starts_with('@') {
            descriptor(trimmed).ok_or_else(|| invalid(expr, "unknown descriptor"))?
        } else {
            normalize_cron(trimmed).map_err(|reason| invalid(expr, &reason))?
        };

        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| invalid(expr, &e.to_string()))?;
        Ok(Schedule::Cron(Box::new(schedule)))
    }

    /// First firing strictly after `after`, with calendar fields read in `tz`.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(schedule) => schedule
                .after(&after.with_timezone(&tz))
                .next()
                .map(|next| next.with_timezone(&Utc)),
            Schedule::Every(every) => {
                let step = TimeDelta::from_std(*every).ok()?;
                let base = after
                    .duration_trunc(TimeDelta::seconds(1))
                    .unwrap_or(after);
                base.checked_add_signed(step)
            }
        }
    }
}

fn invalid(expr: &str, reason: &str) -> SchedulerError {
    SchedulerError::InvalidSchedule {
        expr: expr.to_string(),
        reason: reason.to_string(),
    }
}

/// Named descriptors as explicit 6-field expressions.
fn descriptor(name: &str) -> Option<String> {
    let expr = match name {
        "@yearly" | "@annually" => "0 0 0 1 1 *",
        "@monthly" => "0 0 0 1 * *",
        "@weekly" => "0 0 0 * * 1",
        "@daily" | "@midnight" => "0 0 0 * * *",
        "@hourly" => "0 0 * * * *",
        _ => return None,
    };
    Some(expr.to_string())
}

/// Normalise 5- or 6-field classic cron to the `cron` crate's 6-field form.
///
/// A 5-field expression gets a leading `0` seconds field. Numeric weekdays
/// are shifted from classic numbering (0/7 = Sunday) to the crate's 1 = Sunday.
fn normalize_cron(expr: &str) -> std::result::Result<String, String> {
    let mut fields: Vec<String> = expr.split_whitespace().map(str::to_string).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 => {}
        n => return Err(format!("expected 5 or 6 fields, found {n}")),
    }
    fields[5] = shift_weekdays(&fields[5]);
    Ok(fields.join(" "))
}

fn shift_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(shift_weekday_item)
        .collect::<Vec<_>>()
        .join(",")
}

fn shift_weekday_item(item: &str) -> String {
    let (range, step) = match item.split_once('/') {
        Some((r, s)) => (r, Some(s)),
        None => (item, None),
    };

    let mapped = match range.split_once('-') {
        Some((a, b)) => match (a.parse::<u8>(), b.parse::<u8>()) {
            // A range ending on Sunday-as-7 wraps past the crate's Saturday.
            (Ok(0), Ok(7)) => "1-7".to_string(),
            (Ok(a), Ok(7)) if step.is_none() => format!("{}-7,1", shift(a)),
            (Ok(a), Ok(7)) => format!("{}-7", shift(a)),
            (Ok(a), Ok(b)) => format!("{}-{}", shift(a), shift(b)),
            _ => range.to_string(),
        },
        None => match range.parse::<u8>() {
            Ok(n) => shift(n).to_string(),
            Err(_) => range.to_string(),
        },
    };

    match step {
        Some(s) => format!("{mapped}/{s}"),
        None => mapped,
    }
}

fn shift(day: u8) -> u8 {
    match day {
        0..=6 => day + 1,
        7 => 1,
        // Out of range; left for the cron parser to reject.
        other => other,
    }
}
