//! Leaderboard periods - calendar windows and their period keys.
//!
//! All periods are computed in UTC. A period is the half-open window
//! `[start, end)` plus the key that identifies it: `YYYY-MM-DD` for a day and
//! `YYYY-MM` for a month.

use crate::{
    entities::RewardType,
    errors::{Error, Result},
};
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};

/// A rewardable leaderboard window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    /// Cadence of the period
    pub reward_type: RewardType,
    /// `YYYY-MM-DD` or `YYYY-MM`
    pub key: String,
    /// Inclusive start of the window
    pub start: DateTime<Utc>,
    /// Exclusive end of the window
    pub end: DateTime<Utc>,
}

impl Period {
    /// The calendar day `date`.
    pub fn day(date: NaiveDate) -> Result<Self> {
        let next = date.checked_add_days(Days::new(1)).ok_or_else(|| out_of_range(date))?;
        Ok(Self {
            reward_type: RewardType::Daily,
            key: date.format("%Y-%m-%d").to_string(),
            start: midnight(date),
            end: midnight(next),
        })
    }

    /// The calendar month `month` of `year`.
    pub fn month(year: i32, month: u32) -> Result<Self> {
        let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| Error::InvalidInput {
            message: format!("invalid month {year}-{month:02}"),
        })?;
        let next = first
            .checked_add_months(Months::new(1))
            .ok_or_else(|| out_of_range(first))?;
        Ok(Self {
            reward_type: RewardType::Monthly,
            key: first.format("%Y-%m").to_string(),
            start: midnight(first),
            end: midnight(next),
        })
    }

    /// The day before the one containing `now`.
    pub fn previous_day(now: DateTime<Utc>) -> Result<Self> {
        let today = now.date_naive();
        let yesterday = today
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| out_of_range(today))?;
        Self::day(yesterday)
    }

    /// The month before the one containing `now`.
    pub fn previous_month(now: DateTime<Utc>) -> Result<Self> {
        let today = now.date_naive();
        let last_month = today
            .checked_sub_months(Months::new(1))
            .ok_or_else(|| out_of_range(today))?;
        Self::month(last_month.year(), last_month.month())
    }

    /// The period of `reward_type` that just ended at `now`.
    pub fn previous(reward_type: RewardType, now: DateTime<Utc>) -> Result<Self> {
        match reward_type {
            RewardType::Daily => Self::previous_day(now),
            RewardType::Monthly => Self::previous_month(now),
        }
    }

    /// The period of `reward_type` that contains `now`.
    pub fn current(reward_type: RewardType, now: DateTime<Utc>) -> Result<Self> {
        let today = now.date_naive();
        match reward_type {
            RewardType::Daily => Self::day(today),
            RewardType::Monthly => Self::month(today.year(), today.month()),
        }
    }

    /// Parses a period key of the given cadence.
    ///
    /// # Errors
    /// Returns `Error::InvalidInput` when the key is not a valid date (daily) or
    /// year-month (monthly).
    pub fn parse(reward_type: RewardType, key: &str) -> Result<Self> {
        match reward_type {
            RewardType::Daily => {
                let date = NaiveDate::parse_from_str(key, "%Y-%m-%d").map_err(|e| {
                    Error::InvalidInput {
                        message: format!("invalid daily period key '{key}': {e}"),
                    }
                })?;
                Self::day(date)
            }
            RewardType::Monthly => {
                let date = NaiveDate::parse_from_str(&format!("{key}-01"), "%Y-%m-%d").map_err(
                    |e| Error::InvalidInput {
                        message: format!("invalid monthly period key '{key}': {e}"),
                    },
                )?;
                Self::month(date.year(), date.month())
            }
        }
    }
}

/// 00:00 UTC on `date`.
pub(crate) fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn out_of_range(date: NaiveDate) -> Error {
    Error::InvalidInput {
        message: format!("date out of range: {date}"),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_previous_day_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 5, 0).unwrap();
        let period = Period::previous_day(now).unwrap();

        assert_eq!(period.reward_type, RewardType::Daily);
        assert_eq!(period.key, "2024-02-29");
        assert_eq!(period.start, Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap());
        assert_eq!(period.end, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_previous_month_crosses_year() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 10, 0).unwrap();
        let period = Period::previous_month(now).unwrap();

        assert_eq!(period.reward_type, RewardType::Monthly);
        assert_eq!(period.key, "2024-12");
        assert_eq!(period.start, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(period.end, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_previous_month_from_end_of_month() {
        // March 31st minus one month clamps to February; the key is still February
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 23, 0, 0).unwrap();
        let period = Period::previous_month(now).unwrap();
        assert_eq!(period.key, "2024-02");
        assert_eq!(period.end, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_round_trips_key() {
        let daily = Period::parse(RewardType::Daily, "2024-07-15").unwrap();
        assert_eq!(daily, Period::day(NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()).unwrap());

        let monthly = Period::parse(RewardType::Monthly, "2024-07").unwrap();
        assert_eq!(monthly.key, "2024-07");
        assert_eq!(monthly.end, Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Period::parse(RewardType::Daily, "2024-13-01"),
            Err(Error::InvalidInput { .. })
        ));
        assert!(matches!(
            Period::parse(RewardType::Monthly, "july"),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_current_period() {
        let now = Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap();
        assert_eq!(Period::current(RewardType::Daily, now).unwrap().key, "2024-07-15");
        assert_eq!(Period::current(RewardType::Monthly, now).unwrap().key, "2024-07");
    }
}
