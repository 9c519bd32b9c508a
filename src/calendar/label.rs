//! Accessibility-label parsing for calendar day controls.
//!
//! Booking calendars label each day button with something like
//! `"Thursday, August 14 - beschikbare tijden"`. The wording is site and
//! locale specific, so everything page-dependent lives behind [`LabelParser`].

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

use super::{CalendarDate, YearMonth};

/// Positive markers recognised out of the box (Dutch and English Calendly).
pub const DEFAULT_AVAILABLE_MARKERS: &[&str] =
    &["beschikbare tijden", "times available", "available times"];

/// Negative markers. Each one contains a positive marker as a substring.
pub const DEFAULT_UNAVAILABLE_MARKERS: &[&str] = &[
    "geen beschikbare tijden",
    "no times available",
    "no available times",
];

const ENGLISH_MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const DUTCH_MONTHS: [&str; 12] = [
    "januari",
    "februari",
    "maart",
    "april",
    "mei",
    "juni",
    "juli",
    "augustus",
    "september",
    "oktober",
    "november",
    "december",
];

/// Why a label did not produce a date.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelRejection {
    #[error("day has no open slots")]
    NoSlots,
    #[error("label carries no availability marker")]
    Unmarked,
    #[error("label does not match the expected day shape")]
    Malformed,
    #[error("unknown month name '{0}'")]
    UnknownMonth(String),
    #[error("day {day} does not exist in {year}-{month:02}")]
    InvalidDate { year: i32, month: u32, day: u32 },
}

/// Month and day read from a label, before a year is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

/// Turns one raw label into a date.
pub trait LabelParser: Send + Sync {
    /// Extract month and day, rejecting labels of unavailable days.
    fn month_day(&self, label: &str) -> Result<MonthDay, LabelRejection>;

    /// Parse `label` as a date in `year`.
    fn parse(&self, label: &str, year: i32) -> Result<CalendarDate, LabelRejection> {
        let MonthDay { month, day } = self.month_day(label)?;
        CalendarDate::from_ymd(year, month, day)
            .ok_or(LabelRejection::InvalidDate { year, month, day })
    }

    /// Parse `label` as shown on the page for `requested`, resolving the year
    /// from the requested month.
    fn parse_for_month(
        &self,
        label: &str,
        requested: YearMonth,
    ) -> Result<CalendarDate, LabelRejection> {
        let MonthDay { month, day } = self.month_day(label)?;
        let year = requested.resolve_year(month);
        CalendarDate::from_ymd(year, month, day)
            .ok_or(LabelRejection::InvalidDate { year, month, day })
    }
}

/// Month-name lookup across the primary (English) and secondary (Dutch)
/// vocabularies. Exact spelling is tried before the lowercase fallback.
#[derive(Debug, Clone)]
pub struct MonthVocabulary {
    exact: HashMap<String, u32>,
    folded: HashMap<String, u32>,
}

impl MonthVocabulary {
    pub fn new<'a>(vocabularies: impl IntoIterator<Item = &'a [&'a str; 12]>) -> Self {
        let mut exact = HashMap::new();
        let mut folded = HashMap::new();
        for names in vocabularies {
            for (index, name) in names.iter().enumerate() {
                let number = index as u32 + 1;
                exact.insert((*name).to_string(), number);
                folded.entry(name.to_lowercase()).or_insert(number);
            }
        }
        Self { exact, folded }
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.exact
            .get(name)
            .or_else(|| self.folded.get(&name.to_lowercase()))
            .copied()
    }
}

impl Default for MonthVocabulary {
    fn default() -> Self {
        Self::new([&ENGLISH_MONTHS, &DUTCH_MONTHS])
    }
}

static DEFAULT_PARSER: LazyLock<MarkerLabelParser> = LazyLock::new(|| {
    MarkerLabelParser::new(DEFAULT_AVAILABLE_MARKERS, DEFAULT_UNAVAILABLE_MARKERS)
        .expect("default markers form a valid pattern")
});

/// Marker-based parser for `"<weekday>, <month> <day> - <marker>"` labels.
#[derive(Debug, Clone)]
pub struct MarkerLabelParser {
    available: Vec<String>,
    unavailable: Vec<String>,
    shape: Regex,
    months: MonthVocabulary,
}

impl MarkerLabelParser {
    /// Markers are matched case-insensitively.
    pub fn new<S: AsRef<str>>(available: &[S], unavailable: &[S]) -> Result<Self, regex::Error> {
        let available: Vec<String> = available
            .iter()
            .map(|m| m.as_ref().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        let unavailable: Vec<String> = unavailable
            .iter()
            .map(|m| m.as_ref().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();

        let alternation = available
            .iter()
            .map(|m| regex::escape(m))
            .collect::<Vec<_>>()
            .join("|");
        let shape = Regex::new(&format!(
            r"(?i)(\p{{L}}+),\s*(\p{{L}}+)\s+(\d{{1,2}})\s*[-–—]\s*(?:{alternation})"
        ))?;

        Ok(Self {
            available,
            unavailable,
            shape,
            months: MonthVocabulary::default(),
        })
    }
}

impl Default for MarkerLabelParser {
    fn default() -> Self {
        DEFAULT_PARSER.clone()
    }
}

impl LabelParser for MarkerLabelParser {
    fn month_day(&self, label: &str) -> Result<MonthDay, LabelRejection> {
        let lowered = label.to_lowercase();

        // Negative markers contain the positive text, so they must win.
        if self.unavailable.iter().any(|m| lowered.contains(m.as_str())) {
            return Err(LabelRejection::NoSlots);
        }
        if !self.available.iter().any(|m| lowered.contains(m.as_str())) {
            return Err(LabelRejection::Unmarked);
        }

        let caps = self.shape.captures(label).ok_or(LabelRejection::Malformed)?;
        let month_name = &caps[2];
        let month = self
            .months
            .lookup(month_name)
            .ok_or_else(|| LabelRejection::UnknownMonth(month_name.to_string()))?;
        let day: u32 = caps[3].parse().map_err(|_| LabelRejection::Malformed)?;

        Ok(MonthDay { month, day })
    }
}

/// Per-reason counters for one extraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelStats {
    pub examined: usize,
    pub accepted: usize,
    pub no_slots: usize,
    pub unmarked: usize,
    pub malformed: usize,
    pub unknown_month: usize,
    pub invalid_date: usize,
}

impl LabelStats {
    pub fn record(&mut self, outcome: &Result<CalendarDate, LabelRejection>) {
        self.examined += 1;
        match outcome {
            Ok(_) => self.accepted += 1,
            Err(LabelRejection::NoSlots) => self.no_slots += 1,
            Err(LabelRejection::Unmarked) => self.unmarked += 1,
            Err(LabelRejection::Malformed) => self.malformed += 1,
            Err(LabelRejection::UnknownMonth(_)) => self.unknown_month += 1,
            Err(LabelRejection::InvalidDate { .. }) => self.invalid_date += 1,
        }
    }

    /// Labels that carried an availability marker but could not be read.
    pub fn skipped(&self) -> usize {
        self.malformed + self.unknown_month + self.invalid_date
    }
}
