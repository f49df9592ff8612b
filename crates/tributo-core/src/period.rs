//! # Tax Periods
//!
//! A tax period is a calendar month. It is the sharding unit for document
//! ingestion (`YYYYMM` compact form on portal calls) and the scheduling
//! unit for monthly declarations (`"YYYY-MM"` dashed form in process
//! configuration). Annual forms use the bare year; quarterly forms use the
//! quarter's closing month.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when interpreting a tax period.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    /// Input matched neither `YYYYMM` nor `YYYY-MM`.
    #[error("unrecognised period \"{0}\" (expected YYYYMM or YYYY-MM)")]
    Unrecognised(String),

    /// The month component was outside 1..=12.
    #[error("month {0} out of range")]
    MonthOutOfRange(u32),
}

/// One calendar month, the unit of period-sharded ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaxPeriod {
    year: i32,
    month: u32,
}

impl TaxPeriod {
    /// Construct from parts. `month` must be in 1..=12.
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::MonthOutOfRange(month));
        }
        Ok(Self { year, month })
    }

    /// The period containing the given calendar date.
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Parse either the compact `YYYYMM` or dashed `YYYY-MM` rendering.
    pub fn parse(input: &str) -> Result<Self, PeriodError> {
        let trimmed = input.trim();
        let (year_part, month_part) = if let Some((y, m)) = trimmed.split_once('-') {
            (y, m)
        } else if trimmed.len() == 6 {
            trimmed.split_at(4)
        } else {
            return Err(PeriodError::Unrecognised(trimmed.to_string()));
        };

        let year: i32 = year_part
            .parse()
            .map_err(|_| PeriodError::Unrecognised(trimmed.to_string()))?;
        let month: u32 = month_part
            .parse()
            .map_err(|_| PeriodError::Unrecognised(trimmed.to_string()))?;
        Self::new(year, month)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Compact form used on portal calls, e.g. `"202401"`.
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    /// Dashed form used in process configuration, e.g. `"2024-01"`.
    pub fn dashed(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    /// The first day of the period.
    pub fn first_day(&self) -> NaiveDate {
        // Month is validated at construction, so this cannot fail.
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .unwrap_or(NaiveDate::MIN)
    }

    /// The following month, with year overflow.
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// The calendar quarter (1..=4) this period falls in.
    pub fn quarter(&self) -> u32 {
        (self.month - 1) / 3 + 1
    }

    /// The first period of the following quarter.
    pub fn next_quarter_start(&self) -> Self {
        let mut p = self.next();
        while p.quarter() == self.quarter() && p.year == self.year {
            p = p.next();
        }
        p
    }

    /// Enumerate the periods from `from` to `to`, inclusive at both ends,
    /// each normalised to the first day of its month. Chronological order.
    pub fn enumerate(from: NaiveDate, to: NaiveDate) -> Vec<TaxPeriod> {
        let mut periods = Vec::new();
        let mut current = TaxPeriod::containing(from);
        let last = TaxPeriod::containing(to);
        while current <= last {
            periods.push(current);
            current = current.next();
        }
        periods
    }
}

impl std::fmt::Display for TaxPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dashed())
    }
}

impl std::str::FromStr for TaxPeriod {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_both_renderings() {
        assert_eq!(TaxPeriod::parse("202401").unwrap(), TaxPeriod::new(2024, 1).unwrap());
        assert_eq!(TaxPeriod::parse("2024-01").unwrap(), TaxPeriod::new(2024, 1).unwrap());
    }

    #[test]
    fn rejects_bad_months() {
        assert!(TaxPeriod::parse("202413").is_err());
        assert!(TaxPeriod::parse("2024-00").is_err());
        assert!(TaxPeriod::parse("garbage").is_err());
    }

    #[test]
    fn next_overflows_year() {
        let dec = TaxPeriod::new(2023, 12).unwrap();
        assert_eq!(dec.next(), TaxPeriod::new(2024, 1).unwrap());
    }

    #[test]
    fn enumerate_is_inclusive_and_chronological() {
        let periods = TaxPeriod::enumerate(d(2023, 11, 15), d(2024, 2, 3));
        let compact: Vec<String> = periods.iter().map(|p| p.compact()).collect();
        assert_eq!(compact, vec!["202311", "202312", "202401", "202402"]);
    }

    #[test]
    fn enumerate_single_month() {
        let periods = TaxPeriod::enumerate(d(2024, 1, 1), d(2024, 1, 31));
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].compact(), "202401");
    }

    #[test]
    fn quarter_boundaries() {
        assert_eq!(TaxPeriod::new(2024, 3).unwrap().quarter(), 1);
        assert_eq!(TaxPeriod::new(2024, 4).unwrap().quarter(), 2);
        let q1 = TaxPeriod::new(2024, 2).unwrap();
        assert_eq!(q1.next_quarter_start(), TaxPeriod::new(2024, 4).unwrap());
        let q4 = TaxPeriod::new(2024, 11).unwrap();
        assert_eq!(q4.next_quarter_start(), TaxPeriod::new(2025, 1).unwrap());
    }

    #[test]
    fn display_uses_dashed_form() {
        assert_eq!(TaxPeriod::new(2024, 7).unwrap().to_string(), "2024-07");
    }
}
