//! Simulation clock units

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub const SECOND: i64 = 1_000;
pub const MINUTE: i64 = 60 * SECOND;
pub const HOUR: i64 = 60 * MINUTE;
pub const DAY: i64 = 24 * HOUR;
pub const WEEK: i64 = 7 * DAY;

/// Units accepted wherever a definition names a duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Years,
    Months,
    Weeks,
    Days,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    /// Length of one unit in milliseconds; a year is 365.25 days and a month 30.
    #[allow(clippy::cast_precision_loss)]
    pub fn millis(self) -> f64 {
        match self {
            Self::Years => 365.25 * DAY as f64,
            Self::Months => 30.0 * DAY as f64,
            Self::Weeks => WEEK as f64,
            Self::Days => DAY as f64,
            Self::Hours => HOUR as f64,
            Self::Minutes => MINUTE as f64,
            Self::Seconds => SECOND as f64,
            Self::Milliseconds => 1.0,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn to_millis(self, quantity: f64) -> i64 {
        (quantity * self.millis()).round() as i64
    }
}

/// Calendar date of a timestamp, clamped to chrono's representable range.
pub fn date_of(time: Timestamp) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(time).unwrap_or(if time < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

pub fn year_of(time: Timestamp) -> i32 {
    date_of(time).year()
}

/// Whole calendar months elapsed from `birth` to `time`.
pub fn months_between(birth: Timestamp, time: Timestamp) -> i64 {
    let (from, to) = (date_of(birth), date_of(time));
    let mut months = i64::from(to.year() - from.year()) * 12
        + i64::from(to.month()) - i64::from(from.month());
    if to.day() < from.day() {
        months -= 1;
    }
    months.max(0)
}

/// Whole calendar years elapsed from `birth` to `time`.
pub fn years_between(birth: Timestamp, time: Timestamp) -> i64 {
    months_between(birth, time) / 12
}

/// Timestamp of midnight UTC on the first of January of `year`.
pub fn start_of_year(year: i32) -> Timestamp {
    chrono::NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(0, |dt| dt.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_lengths() {
        assert_eq!(TimeUnit::Days.to_millis(10.0), 10 * DAY);
        assert_eq!(TimeUnit::Weeks.to_millis(1.0), WEEK);
        assert_eq!(TimeUnit::Months.to_millis(1.0), 30 * DAY);
        assert_eq!(TimeUnit::Years.to_millis(4.0), 1461 * DAY);
        assert_eq!(TimeUnit::Hours.to_millis(1.5), 90 * MINUTE);
    }

    #[test]
    fn calendar_age() {
        let birth = start_of_year(2000) + 14 * DAY; // Jan 15 2000
        let before_birthday = start_of_year(2010) + 10 * DAY;
        let after_birthday = start_of_year(2010) + 20 * DAY;
        assert_eq!(years_between(birth, before_birthday), 9);
        assert_eq!(years_between(birth, after_birthday), 10);
        assert_eq!(months_between(birth, after_birthday), 120);
        assert_eq!(months_between(after_birthday, birth), 0);
    }

    #[test]
    fn year_lookup() {
        assert_eq!(year_of(0), 1970);
        assert_eq!(year_of(start_of_year(2024) + DAY), 2024);
    }
}
