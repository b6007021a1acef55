//! Date parsing and human-readable age helpers.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

/// Days-until-EOL threshold at or below which an EOL notice is raised.
pub const EOL_NOTICE_HORIZON_DAYS: i64 = 90;

/// Parse a timestamp given either as RFC 3339 or as a bare `YYYY-MM-DD`
/// date (taken as midnight UTC). Returns `None` for anything else.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Whole days from `now` until `date`, truncated toward zero. Negative once
/// the date has passed.
#[must_use]
pub fn days_until(date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (date - now).num_days()
}

/// Whole days elapsed since `date`.
#[must_use]
pub fn days_since(date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - date).num_days()
}

/// Whether a days-until-EOL value falls inside the notice horizon.
#[must_use]
pub fn is_eol_approaching(days_until_eol: i64) -> bool {
    (0..=EOL_NOTICE_HORIZON_DAYS).contains(&days_until_eol)
}

/// Render an age as `"less than a day"`, `"12 days"`, `"3 months"`,
/// `"1 year 2 months"` and so on, using 30-day months.
#[must_use]
pub fn format_image_age(age: TimeDelta) -> String {
    let days = age.num_days();
    if days < 1 {
        return "less than a day".to_owned();
    }
    if days < 30 {
        return plural(days, "day");
    }
    let months = days / 30;
    if months < 12 {
        return plural(months, "month");
    }
    let years = months / 12;
    let remaining = months % 12;
    if remaining == 0 {
        plural(years, "year")
    } else {
        format!("{} {}", plural(years, "year"), plural(remaining, "month"))
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_rfc3339_and_plain_dates() {
        let rfc = parse_timestamp("2024-03-01T12:30:00Z").unwrap();
        assert_eq!(rfc, Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());

        let offset = parse_timestamp("2024-03-01T12:30:00+02:00").unwrap();
        assert_eq!(offset, Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap());

        let plain = parse_timestamp("2025-06-30").unwrap();
        assert_eq!(plain, Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap());

        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("next tuesday"), None);
    }

    #[test]
    fn days_until_truncates_toward_zero() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(days_until(now + TimeDelta::hours(47), now), 1);
        assert_eq!(days_until(now + TimeDelta::days(90), now), 90);
        assert_eq!(days_until(now - TimeDelta::days(3), now), -3);
        assert_eq!(days_since(now - TimeDelta::days(3), now), 3);
    }

    #[test]
    fn eol_horizon_is_inclusive() {
        assert!(is_eol_approaching(0));
        assert!(is_eol_approaching(90));
        assert!(!is_eol_approaching(91));
        assert!(!is_eol_approaching(-1));
    }

    #[test]
    fn age_formatting() {
        let cases = [
            (TimeDelta::hours(5), "less than a day"),
            (TimeDelta::days(1), "1 day"),
            (TimeDelta::days(12), "12 days"),
            (TimeDelta::days(30), "1 month"),
            (TimeDelta::days(95), "3 months"),
            (TimeDelta::days(360), "1 year"),
            (TimeDelta::days(400), "1 year 1 month"),
            (TimeDelta::days(460), "1 year 3 months"),
            (TimeDelta::days(730), "2 years"),
            (TimeDelta::days(800), "2 years 2 months"),
        ];
        for (age, expected) in cases {
            assert_eq!(format_image_age(age), expected, "{age:?}");
        }
    }
}
