//! Schedule trigger evaluation
//!
//! Decides whether a schedule trigger fires at a given minute tick.
//! Ticks arrive in UTC; each schedule carries a UTC-offset timezone
//! string and is evaluated in that local time.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use flowline_core::ScheduleFrequency;

/// Errors from schedule configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid timezone offset '{0}'; expected \"UTC\" or \"+HH:MM\"")]
    InvalidTimezone(String),

    #[error("invalid time '{0}'; expected HH:MM")]
    InvalidTime(String),

    #[error("invalid cron expression '{0}': {1}")]
    InvalidCron(String, String),
}

/// Parse a UTC-offset timezone string: "UTC", "+02:00", "-0530", "+05"
pub fn parse_offset(tz: &str) -> Result<FixedOffset, ScheduleError> {
    let invalid = || ScheduleError::InvalidTimezone(tz.to_string());

    if tz.eq_ignore_ascii_case("utc") || tz == "Z" || tz == "+00:00" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match tz.as_bytes().first() {
        Some(b'+') => (1i32, &tz[1..]),
        Some(b'-') => (-1i32, &tz[1..]),
        _ => return Err(invalid()),
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().map_err(|_| invalid())?, 0),
        4 => {
            let h = digits[..2].parse::<i32>().map_err(|_| invalid())?;
            let m = digits[2..].parse::<i32>().map_err(|_| invalid())?;
            (h, m)
        }
        _ => return Err(invalid()),
    };
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn parse_hhmm(time: &str) -> Result<(u32, u32), ScheduleError> {
    let invalid = || ScheduleError::InvalidTime(time.to_string());
    let (h, m) = time.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.parse().map_err(|_| invalid())?;
    let minute: u32 = m.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// Whether `frequency` fires at the minute containing `tick`
///
/// The tick is truncated to the minute before matching, so any tick within
/// the scheduled minute fires. Monthly schedules on day 29-31 simply do not
/// fire in months without that day.
pub fn is_due(
    frequency: &ScheduleFrequency,
    timezone: &str,
    tick: DateTime<Utc>,
) -> Result<bool, ScheduleError> {
    let offset = parse_offset(timezone)?;
    let local = tick.with_timezone(&offset);

    match frequency {
        ScheduleFrequency::Daily { time } => {
            let (hour, minute) = parse_hhmm(time)?;
            Ok(local.hour() == hour && local.minute() == minute)
        }
        ScheduleFrequency::Weekly { day_of_week, time } => {
            let (hour, minute) = parse_hhmm(time)?;
            // 0 = Sunday through 6 = Saturday
            let dow = local.weekday().num_days_from_sunday() as u8;
            Ok(dow == *day_of_week && local.hour() == hour && local.minute() == minute)
        }
        ScheduleFrequency::Monthly { day_of_month, time } => {
            let (hour, minute) = parse_hhmm(time)?;
            Ok(local.day() == *day_of_month
                && local.hour() == hour
                && local.minute() == minute)
        }
        ScheduleFrequency::Cron { cron } => {
            let expr = CronExpr::parse(cron)?;
            Ok(expr.matches(&local))
        }
    }
}

// =============================================================================
// Cron
// =============================================================================

/// A parsed five-field cron expression: minute, hour, day-of-month, month,
/// day-of-week
///
/// Supports `*`, lists (`1,15`), ranges (`1-5`), and steps (`*/10`, `0-30/5`).
/// Day-of-week accepts 0-7 with both 0 and 7 meaning Sunday. Day-of-month and
/// day-of-week combine with OR when both are restricted, as in classic cron.
#[derive(Debug, Clone, PartialEq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

#[derive(Debug, Clone, PartialEq)]
enum CronField {
    Any,
    /// Sorted allowed values
    Values(Vec<u32>),
}

impl CronField {
    fn matches(&self, value: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Values(values) => values.binary_search(&value).is_ok(),
        }
    }

    fn is_restricted(&self) -> bool {
        matches!(self, Self::Values(_))
    }
}

fn parse_field(spec: &str, min: u32, max: u32) -> Result<CronField, String> {
    if spec == "*" {
        return Ok(CronField::Any);
    }

    let mut values = Vec::new();
    for part in spec.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s.parse().map_err(|_| format!("bad step '{s}'"))?;
                if step == 0 {
                    return Err("step must be positive".to_string());
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let lo: u32 = a.parse().map_err(|_| format!("bad value '{a}'"))?;
            let hi: u32 = b.parse().map_err(|_| format!("bad value '{b}'"))?;
            (lo, hi)
        } else {
            let v: u32 = range.parse().map_err(|_| format!("bad value '{range}'"))?;
            (v, v)
        };

        if lo > hi || lo < min || hi > max {
            return Err(format!("value out of range {min}-{max}: '{part}'"));
        }
        values.extend((lo..=hi).step_by(step as usize));
    }

    values.sort_unstable();
    values.dedup();
    Ok(CronField::Values(values))
}

impl CronExpr {
    /// Parse a five-field cron expression
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let err = |msg: String| ScheduleError::InvalidCron(expr.to_string(), msg);

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(err(format!("expected 5 fields, found {}", fields.len())));
        }

        let minute = parse_field(fields[0], 0, 59).map_err(err)?;
        let hour = parse_field(fields[1], 0, 23).map_err(err)?;
        let day_of_month = parse_field(fields[2], 1, 31).map_err(err)?;
        let month = parse_field(fields[3], 1, 12).map_err(err)?;
        let mut day_of_week = parse_field(fields[4], 0, 7).map_err(err)?;

        // Fold 7 into 0 so both mean Sunday
        if let CronField::Values(values) = &mut day_of_week {
            if let Some(pos) = values.iter().position(|v| *v == 7) {
                values.remove(pos);
                if !values.contains(&0) {
                    values.insert(0, 0);
                }
            }
        }

        Ok(Self {
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        })
    }

    /// Whether the expression matches the given local time's minute
    pub fn matches(&self, at: &DateTime<FixedOffset>) -> bool {
        if !self.minute.matches(at.minute())
            || !self.hour.matches(at.hour())
            || !self.month.matches(at.month())
        {
            return false;
        }

        let dom = self.day_of_month.matches(at.day());
        let dow = self
            .day_of_week
            .matches(at.weekday().num_days_from_sunday());

        // Classic cron: both restricted means either may match
        match (
            self.day_of_month.is_restricted(),
            self.day_of_week.is_restricted(),
        ) {
            (true, true) => dom || dow,
            _ => dom && dow,
        }
    }
}
