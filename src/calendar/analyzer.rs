//! Availability analysis over a scanned date set.
//!
//! Everything here is a pure function of the available dates, "today", and the
//! caller's policy, so the decision engine can be tested without a page.

use serde::{Deserialize, Serialize};

use super::{AvailableDateSet, CalendarDate, DateRange};

/// The window of dates the caller most wants a slot in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TargetWindow {
    /// The Monday–Sunday week around a reference date.
    Week { reference: CalendarDate },
    /// An explicit inclusive range.
    Range {
        start: CalendarDate,
        end: CalendarDate,
    },
    /// A sliding range measured in weeks from today, e.g. 4 to 6 weeks out.
    WeeksAhead { from_weeks: u32, to_weeks: u32 },
}

impl Default for TargetWindow {
    fn default() -> Self {
        Self::WeeksAhead {
            from_weeks: 4,
            to_weeks: 6,
        }
    }
}

impl TargetWindow {
    /// Concrete bounds of the window as seen on `today`.
    pub fn bounds(&self, today: CalendarDate) -> DateRange {
        match *self {
            Self::Week { reference } => DateRange::week_of(reference),
            Self::Range { start, end } => DateRange {
                start: start.min(end),
                end: start.max(end),
            },
            Self::WeeksAhead {
                from_weeks,
                to_weeks,
            } => {
                let (near, far) = (from_weeks.min(to_weeks), from_weeks.max(to_weeks));
                DateRange {
                    start: today.add_days(u64::from(near) * 7),
                    end: today.add_days(u64::from(far) * 7),
                }
            }
        }
    }
}

/// Inputs that shape the analysis beyond the raw dates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisPolicy {
    pub target: TargetWindow,
    /// Dates in this range are treated as unavailable.
    pub holiday: Option<DateRange>,
    /// The appointment already booked, if any.
    pub next_appointment: Option<CalendarDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Earliest {
    pub date: CalendarDate,
    pub days_from_now: i64,
}

/// A free day strictly before the appointment that is already booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BetterSlot {
    pub available: CalendarDate,
    pub current: CalendarDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    /// Available dates after holiday exclusion, past dates included.
    pub available: AvailableDateSet,
    /// Size of the scanned set before holiday exclusion.
    pub scanned_count: usize,
    pub excluded_by_holiday: usize,
    pub earliest: Option<Earliest>,
    pub total_future_count: usize,
    /// The first few future dates, for messages.
    pub upcoming: Vec<CalendarDate>,
    pub target_window: DateRange,
    pub target_window_dates: AvailableDateSet,
    pub better_slot: Option<BetterSlot>,
}

impl Analysis {
    pub fn target_window_available(&self) -> bool {
        !self.target_window_dates.is_empty()
    }
}

const UPCOMING_PREVIEW: usize = 10;

/// Run every availability computation over `dates` as seen on `today`.
pub fn analyze(dates: &AvailableDateSet, today: CalendarDate, policy: &AnalysisPolicy) -> Analysis {
    let available = match &policy.holiday {
        Some(holiday) => dates.excluding(holiday),
        None => dates.clone(),
    };

    let future = available.on_or_after(today);
    let earliest = future.first().map(|date| Earliest {
        date,
        days_from_now: today.days_until(date),
    });

    let target_window = policy.target.bounds(today);
    let target_window_dates = available.within(&target_window);

    let better_slot = match (earliest, policy.next_appointment) {
        (Some(earliest), Some(current)) if earliest.date < current => Some(BetterSlot {
            available: earliest.date,
            current,
        }),
        _ => None,
    };

    Analysis {
        scanned_count: dates.len(),
        excluded_by_holiday: dates.len() - available.len(),
        total_future_count: future.len(),
        upcoming: future.iter().take(UPCOMING_PREVIEW).collect(),
        earliest,
        target_window,
        target_window_dates,
        better_slot,
        available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::date;

    fn set(dates: &[&str]) -> AvailableDateSet {
        dates.iter().map(|d| date(d)).collect()
    }

    fn range(start: &str, end: &str) -> TargetWindow {
        TargetWindow::Range {
            start: date(start),
            end: date(end),
        }
    }

    #[test]
    fn earliest_future_skips_past_dates() {
        let policy = AnalysisPolicy::default();
        let a = analyze(&set(&["2025-08-01", "2025-08-05"]), date("2025-08-03"), &policy);
        assert_eq!(
            a.earliest,
            Some(Earliest {
                date: date("2025-08-05"),
                days_from_now: 2
            })
        );
        assert_eq!(a.total_future_count, 1);
    }

    #[test]
    fn today_counts_as_future() {
        let a = analyze(
            &set(&["2025-08-03"]),
            date("2025-08-03"),
            &AnalysisPolicy::default(),
        );
        assert_eq!(a.earliest.map(|e| e.days_from_now), Some(0));
    }

    #[test]
    fn all_past_is_unavailable_but_counted() {
        let a = analyze(
            &set(&["2025-07-01", "2025-07-02"]),
            date("2025-08-03"),
            &AnalysisPolicy::default(),
        );
        assert_eq!(a.earliest, None);
        assert_eq!(a.total_future_count, 0);
        assert_eq!(a.scanned_count, 2);
        assert_eq!(a.available.len(), 2);
    }

    #[test]
    fn target_window_end_is_inclusive() {
        let policy = AnalysisPolicy {
            target: range("2025-08-10", "2025-08-20"),
            ..Default::default()
        };
        let a = analyze(
            &set(&["2025-08-09", "2025-08-20", "2025-08-21"]),
            date("2025-08-01"),
            &policy,
        );
        assert_eq!(a.target_window_dates, set(&["2025-08-20"]));
        assert!(a.target_window_available());
    }

    #[test]
    fn week_target_covers_monday_to_sunday() {
        let policy = AnalysisPolicy {
            target: TargetWindow::Week {
                reference: date("2025-07-17"),
            },
            ..Default::default()
        };
        let a = analyze(
            &set(&["2025-07-13", "2025-07-14", "2025-07-20", "2025-07-21"]),
            date("2025-07-01"),
            &policy,
        );
        assert_eq!(a.target_window_dates, set(&["2025-07-14", "2025-07-20"]));
    }

    #[test]
    fn weeks_ahead_window_slides_with_today() {
        let bounds = TargetWindow::default().bounds(date("2025-07-17"));
        assert_eq!(bounds.start, date("2025-08-14"));
        assert_eq!(bounds.end, date("2025-08-28"));
    }

    #[test]
    fn holiday_exclusion_is_inclusive_and_runs_first() {
        let policy = AnalysisPolicy {
            target: range("2025-09-01", "2025-09-30"),
            holiday: Some(DateRange::new(date("2025-09-02"), date("2025-09-15")).unwrap()),
            next_appointment: None,
        };
        let a = analyze(
            &set(&["2025-09-01", "2025-09-02", "2025-09-10", "2025-09-15", "2025-09-16"]),
            date("2025-09-01"),
            &policy,
        );
        assert_eq!(a.available, set(&["2025-09-01", "2025-09-16"]));
        assert_eq!(a.excluded_by_holiday, 3);
        assert_eq!(a.target_window_dates, set(&["2025-09-01", "2025-09-16"]));
    }

    #[test]
    fn holiday_can_remove_the_earliest_date() {
        let policy = AnalysisPolicy {
            holiday: Some(DateRange::new(date("2025-08-04"), date("2025-08-06")).unwrap()),
            ..Default::default()
        };
        let a = analyze(&set(&["2025-08-05", "2025-08-12"]), date("2025-08-01"), &policy);
        assert_eq!(a.earliest.map(|e| e.date), Some(date("2025-08-12")));
    }

    #[test]
    fn better_slot_requires_strictly_earlier_date() {
        let dates = set(&["2025-08-12"]);
        let today = date("2025-08-01");

        let earlier = AnalysisPolicy {
            next_appointment: Some(date("2025-08-20")),
            ..Default::default()
        };
        assert_eq!(
            analyze(&dates, today, &earlier).better_slot,
            Some(BetterSlot {
                available: date("2025-08-12"),
                current: date("2025-08-20")
            })
        );

        let same_day = AnalysisPolicy {
            next_appointment: Some(date("2025-08-12")),
            ..Default::default()
        };
        assert_eq!(analyze(&dates, today, &same_day).better_slot, None);

        let none_booked = AnalysisPolicy::default();
        assert_eq!(analyze(&dates, today, &none_booked).better_slot, None);
    }

    #[test]
    fn target_window_deserializes_from_tagged_config() {
        let window: TargetWindow =
            serde_json::from_str(r#"{"mode":"weeks_ahead","from_weeks":2,"to_weeks":3}"#)
                .unwrap();
        assert_eq!(
            window,
            TargetWindow::WeeksAhead {
                from_weeks: 2,
                to_weeks: 3
            }
        );
        let window: TargetWindow =
            serde_json::from_str(r#"{"mode":"week","reference":"2025-07-17"}"#).unwrap();
        assert_eq!(
            window,
            TargetWindow::Week {
                reference: date("2025-07-17")
            }
        );
    }
}
