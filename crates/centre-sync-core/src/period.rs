//! Calendar-month report periods

use chrono::{Datelike, NaiveDate};

/// A single calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthPeriod {
    year: i32,
    month: u32,
}

impl MonthPeriod {
    /// Returns None unless `month` is 1..=12 and the year is representable
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)?;
        Some(Self { year, month })
    }

    /// All twelve months of a year
    pub fn year(year: i32) -> Vec<Self> {
        (1..=12).filter_map(|m| Self::new(year, m)).collect()
    }

    pub fn year_number(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Day 0 of the next month
    pub fn last_day(&self) -> NaiveDate {
        let (next_year, next_month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    /// `fromDate` query value
    pub fn from_date(&self) -> String {
        self.first_day().format("%Y-%m-%d").to_string()
    }

    /// `toDate` query value
    pub fn to_date(&self) -> String {
        self.last_day().format("%Y-%m-%d").to_string()
    }

    /// Aggregate key for this month (`YYYY-MM-01`)
    pub fn key(&self) -> String {
        self.from_date()
    }
}

impl std::fmt::Display for MonthPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.first_day().format("%b %Y"))
    }
}

/// Number of days in a month, or None for an invalid month
pub fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    MonthPeriod::new(year, month).map(|p| p.last_day().day())
}

/// Month key (`YYYY-MM-01`) for a year/month pair
pub fn month_key(year: i32, month: u32) -> Option<String> {
    MonthPeriod::new(year, month).map(|p| p.key())
}
