//! Five-field cron expression handling.
//!
//! Job schedules are canonical five-field expressions
//! (`minute hour day-of-month month day-of-week`) with standard numbering:
//! day-of-week 0-7 where both 0 and 7 mean Sunday. The underlying schedule
//! engine expects a seconds field and Quartz-style day numbering, so
//! expressions are normalized before parsing: a `0` seconds field is
//! prepended and numeric day-of-week values are expanded to day names.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::SchedulerError;

const DOW_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Validate a five-field cron expression.
pub fn validate(expr: &str) -> Result<(), SchedulerError> {
    schedule_for(expr).map(|_| ())
}

/// The first firing strictly after `after`.
pub fn next_after(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
    let schedule = schedule_for(expr)?;
    schedule
        .after(&after)
        .find(|t| *t > after)
        .ok_or_else(|| invalid(expr, "no future firing"))
}

fn invalid(expr: &str, reason: impl Into<String>) -> SchedulerError {
    SchedulerError::InvalidCron {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

fn schedule_for(expr: &str) -> Result<cron::Schedule, SchedulerError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid(
            expr,
            format!("expected 5 fields, got {}", fields.len()),
        ));
    }

    let dow = normalize_dow(fields[4]).map_err(|reason| invalid(expr, reason))?;
    let six_field = format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], dow
    );
    cron::Schedule::from_str(&six_field).map_err(|e| invalid(expr, e.to_string()))
}

/// Rewrite a numeric day-of-week field into day names.
///
/// Fields already using names (MON, TUE-FRI) pass through unchanged.
/// Numeric items, ranges, and steps are expanded into the explicit set of
/// matching days, with 7 treated as Sunday.
fn normalize_dow(field: &str) -> Result<String, String> {
    if field == "*" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (range_part, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid step {step:?} in day-of-week"))?;
                if step == 0 {
                    return Err("day-of-week step must be >= 1".to_string());
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (start, end) = if range_part == "*" {
            (0, 6)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let start = parse_day(a)?;
            let end = parse_day(b)?;
            if start > end {
                return Err(format!("inverted day-of-week range {range_part:?}"));
            }
            (start, end)
        } else {
            let day = parse_day(range_part)?;
            // N/step means N through Saturday, per Vixie cron.
            if item.contains('/') {
                (day, 7)
            } else {
                (day, day)
            }
        };

        for day in (start..=end).step_by(step) {
            days[day % 7] = true;
        }
    }

    if days.iter().all(|d| *d) {
        return Ok("*".to_string());
    }
    let names: Vec<&str> = days
        .iter()
        .enumerate()
        .filter(|(_, set)| **set)
        .map(|(i, _)| DOW_NAMES[i])
        .collect();
    if names.is_empty() {
        return Err("empty day-of-week set".to_string());
    }
    Ok(names.join(","))
}

fn parse_day(s: &str) -> Result<usize, String> {
    let day: usize = s
        .parse()
        .map_err(|_| format!("invalid day-of-week value {s:?}"))?;
    if day > 7 {
        return Err(format!("day-of-week value {day} out of range 0-7"));
    }
    Ok(day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn every_15_minutes() {
        let next = next_after("*/15 * * * *", at("2025-01-01T10:07:30Z")).unwrap();
        assert_eq!(next, at("2025-01-01T10:15:00Z"));
    }

    #[test]
    fn next_is_strictly_after_exact_fire_time() {
        let next = next_after("*/15 * * * *", at("2025-01-01T10:15:00Z")).unwrap();
        assert_eq!(next, at("2025-01-01T10:30:00Z"));
    }

    #[test]
    fn monday_nine_am_uses_standard_numbering() {
        // 2025-01-05 is a Sunday.
        let next = next_after("0 9 * * 1", at("2025-01-05T12:00:00Z")).unwrap();
        assert_eq!(next, at("2025-01-06T09:00:00Z"));
        assert_eq!(next.format("%A").to_string(), "Monday");
    }

    #[test]
    fn sunday_accepts_both_zero_and_seven() {
        let from = at("2025-01-01T00:00:00Z");
        let zero = next_after("30 6 * * 0", from).unwrap();
        let seven = next_after("30 6 * * 7", from).unwrap();
        assert_eq!(zero, seven);
        assert_eq!(zero.format("%A").to_string(), "Sunday");
    }

    #[test]
    fn weekday_range_is_rewritten() {
        // 2025-01-03 is a Friday; the next 1-5 fire after Friday 10:00 is Monday.
        let next = next_after("0 9 * * 1-5", at("2025-01-03T10:00:00Z")).unwrap();
        assert_eq!(next, at("2025-01-06T09:00:00Z"));
    }

    #[test]
    fn named_days_pass_through() {
        let next = next_after("0 9 * * MON-FRI", at("2025-01-03T10:00:00Z")).unwrap();
        assert_eq!(next, at("2025-01-06T09:00:00Z"));
    }

    #[test]
    fn strict_monotonicity() {
        let t0 = at("2025-03-01T00:00:01Z");
        for expr in ["*/15 * * * *", "0 9 * * 1", "30 2 1 * *", "0 0 1 1 *"] {
            let t1 = next_after(expr, t0).unwrap();
            let t2 = next_after(expr, t1).unwrap();
            assert!(t1 > t0, "{expr}: first fire not after start");
            assert!(t2 > t1, "{expr}: second fire not after first");
        }
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(validate("* * * *").is_err());
        assert!(validate("0 * * * * *").is_err());
        assert!(validate("").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(validate("not a cron at all").is_err());
        assert!(validate("61 * * * *").is_err());
        assert!(validate("* * * * 9").is_err());
    }

    #[test]
    fn accepts_common_forms() {
        for expr in [
            "* * * * *",
            "*/5 * * * *",
            "0 9 * * 1-5",
            "0 9,17 * * *",
            "30 2 1 * *",
            "0 0 1 1 *",
            "15 */2 * * 0",
        ] {
            assert!(validate(expr).is_ok(), "{expr} should be valid");
        }
    }

    #[test]
    fn dow_normalization_forms() {
        assert_eq!(normalize_dow("*").unwrap(), "*");
        assert_eq!(normalize_dow("1").unwrap(), "MON");
        assert_eq!(normalize_dow("0").unwrap(), "SUN");
        assert_eq!(normalize_dow("7").unwrap(), "SUN");
        assert_eq!(normalize_dow("1-5").unwrap(), "MON,TUE,WED,THU,FRI");
        assert_eq!(normalize_dow("0,6").unwrap(), "SUN,SAT");
        assert_eq!(normalize_dow("*/2").unwrap(), "SUN,TUE,THU,SAT");
        assert_eq!(normalize_dow("MON-FRI").unwrap(), "MON-FRI");
        assert_eq!(normalize_dow("0-7").unwrap(), "*");
        assert!(normalize_dow("8").is_err());
        assert!(normalize_dow("5-2").is_err());
    }

    #[test]
    fn fires_at_minute_boundaries_only() {
        let next = next_after("0 9 * * 1", Utc.with_ymd_and_hms(2025, 6, 2, 8, 59, 59).unwrap())
            .unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap());
    }
}
