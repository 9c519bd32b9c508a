//! Calendar value types shared by the extraction and decision pipeline.
//!
//! Dates are kept as [`NaiveDate`] internally and exposed in the zero-padded
//! `YYYY-MM-DD` form. For four-digit years the derived ordering is identical to
//! the lexicographic ordering of that string form, which the persisted history
//! and the range checks rely on.

pub mod analyzer;
pub mod label;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A single calendar day, serialized as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    pub fn naive(&self) -> NaiveDate {
        self.0
    }

    /// Whole days from `self` until `other`; negative when `other` is earlier.
    pub fn days_until(&self, other: CalendarDate) -> i64 {
        (other.0 - self.0).num_days()
    }

    pub fn add_days(&self, days: u64) -> Self {
        Self(self.0.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX))
    }

    pub fn sub_days(&self, days: u64) -> Self {
        Self(self.0.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN))
    }

    /// The Monday starting the ISO week that contains this date.
    pub fn week_monday(&self) -> Self {
        let offset = self.0.weekday().num_days_from_monday();
        self.sub_days(u64::from(offset))
    }
}

impl From<NaiveDate> for CalendarDate {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid calendar date '{0}', expected YYYY-MM-DD")]
pub struct InvalidDate(pub String);

impl FromStr for CalendarDate {
    type Err = InvalidDate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| InvalidDate(s.to_string()))
    }
}

/// A calendar month, used to request one page of the booking calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn of(date: CalendarDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> Option<CalendarDate> {
        CalendarDate::from_ymd(self.year, self.month, 1)
    }

    /// The month `months` after this one.
    pub fn offset(&self, months: u32) -> Self {
        let index = self.year * 12 + self.month as i32 - 1 + months as i32;
        Self {
            year: index.div_euclid(12),
            month: index.rem_euclid(12) as u32 + 1,
        }
    }

    /// Year to attach to a label naming `label_month` on this month's page.
    ///
    /// Month views may show trailing days of adjacent months; a January label
    /// on a December page belongs to the following year and vice versa.
    pub fn resolve_year(&self, label_month: u32) -> i32 {
        let diff = label_month as i32 - self.month as i32;
        if diff > 6 {
            self.year - 1
        } else if diff < -6 {
            self.year + 1
        } else {
            self.year
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// An inclusive `[start, end]` range of dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: CalendarDate,
    pub end: CalendarDate,
}

impl DateRange {
    /// Returns `None` when `end` precedes `start`.
    pub fn new(start: CalendarDate, end: CalendarDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// The Monday–Sunday week that contains `date`.
    pub fn week_of(date: CalendarDate) -> Self {
        let start = date.week_monday();
        Self {
            start,
            end: start.add_days(6),
        }
    }

    pub fn contains(&self, date: CalendarDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// A deduplicated set of available days, always iterated in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AvailableDateSet(BTreeSet<CalendarDate>);

impl AvailableDateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the date was not already present.
    pub fn insert(&mut self, date: CalendarDate) -> bool {
        self.0.insert(date)
    }

    pub fn merge(&mut self, other: AvailableDateSet) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, date: CalendarDate) -> bool {
        self.0.contains(&date)
    }

    pub fn first(&self) -> Option<CalendarDate> {
        self.0.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = CalendarDate> + '_ {
        self.0.iter().copied()
    }

    /// Dates inside `range`, inclusive on both ends.
    pub fn within(&self, range: &DateRange) -> AvailableDateSet {
        self.0.range(range.start..=range.end).copied().collect()
    }

    /// Dates outside `range`.
    pub fn excluding(&self, range: &DateRange) -> AvailableDateSet {
        self.iter().filter(|d| !range.contains(*d)).collect()
    }

    /// Dates on or after `date`.
    pub fn on_or_after(&self, date: CalendarDate) -> AvailableDateSet {
        self.0.range(date..).copied().collect()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.iter().map(|d| d.to_string()).collect()
    }
}

impl FromIterator<CalendarDate> for AvailableDateSet {
    fn from_iter<I: IntoIterator<Item = CalendarDate>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<CalendarDate> for AvailableDateSet {
    fn extend<I: IntoIterator<Item = CalendarDate>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for AvailableDateSet {
    type Item = CalendarDate;
    type IntoIter = std::collections::btree_set::IntoIter<CalendarDate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for AvailableDateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.to_strings().join(", "))
    }
}

#[cfg(test)]
pub(crate) fn date(s: &str) -> CalendarDate {
    s.parse().unwrap()
}
