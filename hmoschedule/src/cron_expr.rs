//! Cron expression parsing.
//!
//! Accepts classic 5-field crontab lines (`min hour dom month dow`, Sunday
//! being `0` or `7`) as well as the 6/7-field form with seconds understood
//! by the `cron` crate.

use std::str::FromStr;

use chrono::{DateTime, Local};
use cron::Schedule;

use crate::error::{Result, ScheduleError};

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

fn day_name(token: &str) -> String {
    match token.parse::<usize>() {
        Ok(n) if n <= 7 => DAY_NAMES[n % 7].to_string(),
        _ => token.to_string(),
    }
}

/// Lists the days of a numeric range reaching Sunday as `7`. The `cron`
/// crate puts Sunday first, so `FRI-SUN` would read as an inverted range.
fn expand_to_sunday(range: &str, step: Option<&str>) -> Option<String> {
    let (start, end) = range.split_once('-')?;
    let (start, end) = (start.parse::<usize>().ok()?, end.parse::<usize>().ok()?);
    let step = match step {
        Some(step) => step.parse::<usize>().ok().filter(|s| *s > 0)?,
        None => 1,
    };
    if end != 7 || start > end {
        return None;
    }

    let mut days: Vec<&str> = Vec::new();
    for n in (start..=end).step_by(step) {
        let name = DAY_NAMES[n % 7];
        if !days.contains(&name) {
            days.push(name);
        }
    }
    Some(days.join(","))
}

/// Rewrites numeric crontab weekdays as names so they are not read with
/// the `cron` crate's own numbering.
fn normalize_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            if let Some(days) = expand_to_sunday(range, step) {
                return days;
            }
            let range = range.split('-').map(day_name).collect::<Vec<_>>().join("-");
            match step {
                Some(step) => format!("{}/{}", range, step),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Turns a user supplied expression into the 6/7-field form.
pub fn normalize_expression(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!(
            "0 {} {} {} {} {}",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            normalize_day_of_week(fields[4])
        )),
        6 | 7 => Ok(fields.join(" ")),
        n => Err(ScheduleError::InvalidCron(
            expression.to_string(),
            format!("expected 5, 6 or 7 fields, got {}", n),
        )),
    }
}

/// Parses an expression into a schedule evaluated in local time.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let normalized = normalize_expression(expression)?;
    let schedule = Schedule::from_str(&normalized)
        .map_err(|e| ScheduleError::InvalidCron(expression.to_string(), e.to_string()))?;

    if schedule.upcoming(Local).next().is_none() {
        return Err(ScheduleError::NeverFires(expression.to_string()));
    }

    Ok(schedule)
}

/// Next firing strictly after `after`.
pub fn next_fire(schedule: &Schedule, after: &DateTime<Local>) -> Option<DateTime<Local>> {
    schedule.after(after).next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn five_fields_get_a_seconds_column() {
        assert_eq!(normalize_expression("30 7 * * *").unwrap(), "0 30 7 * * *");
    }

    #[test]
    fn numeric_weekdays_follow_crontab() {
        assert_eq!(normalize_expression("0 7 * * 1-5").unwrap(), "0 0 7 * * MON-FRI");
        assert_eq!(normalize_expression("0 7 * * 0,6").unwrap(), "0 0 7 * * SUN,SAT");
        assert_eq!(normalize_expression("0 7 * * 7").unwrap(), "0 0 7 * * SUN");
        assert_eq!(normalize_expression("0 7 * * */2").unwrap(), "0 0 7 * * */2");
        assert_eq!(normalize_expression("0 7 * * 5-7").unwrap(), "0 0 7 * * FRI,SAT,SUN");
        assert_eq!(normalize_expression("0 7 * * 6-7").unwrap(), "0 0 7 * * SAT,SUN");
        assert_eq!(
            normalize_expression("0 7 * * 1-7").unwrap(),
            "0 0 7 * * MON,TUE,WED,THU,FRI,SAT,SUN"
        );
        assert_eq!(
            normalize_expression("0 7 * * 0-7").unwrap(),
            "0 0 7 * * SUN,MON,TUE,WED,THU,FRI,SAT"
        );
        assert_eq!(normalize_expression("0 7 * * 1-7/2").unwrap(), "0 0 7 * * MON,WED,FRI,SUN");
    }

    #[test]
    fn ranges_ending_on_sunday_parse() {
        for expression in ["0 7 * * 5-7", "0 7 * * 1-7", "0 7 * * 6-7", "0 7 * * 1-3,6-7"] {
            assert!(parse_cron(expression).is_ok(), "{expression} rejected");
        }

        let schedule = parse_cron("30 7 * * 5-7").unwrap();
        // Monday 2026-10-19 12:00
        let monday = Local.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let friday = next_fire(&schedule, &monday).unwrap();
        assert_eq!(friday.weekday(), Weekday::Fri);
        let saturday = next_fire(&schedule, &friday).unwrap();
        assert_eq!(saturday.weekday(), Weekday::Sat);
        let sunday = next_fire(&schedule, &saturday).unwrap();
        assert_eq!(sunday.weekday(), Weekday::Sun);
        let next_friday = next_fire(&schedule, &sunday).unwrap();
        assert_eq!(next_friday.weekday(), Weekday::Fri);
    }

    #[test]
    fn six_fields_pass_through() {
        assert_eq!(normalize_expression("*/5  * * * * *").unwrap(), "*/5 * * * * *");
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(parse_cron("").is_err());
        assert!(parse_cron("every morning").is_err());
        assert!(parse_cron("61 7 * * *").is_err());
    }

    #[test]
    fn weekday_schedule_lands_on_weekdays() {
        let schedule = parse_cron("30 7 * * 1-5").unwrap();
        // Saturday 2026-10-17 12:00
        let saturday = Local.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap();
        let next = next_fire(&schedule, &saturday).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!((next.hour(), next.minute()), (7, 30));
    }
}
