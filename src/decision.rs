//! Notification decision engine.
//!
//! At most one push per check cycle, chosen by strict priority. Every cycle
//! leaves at least one record in the history so the cooldown lookups and the
//! `status` command can see what happened.

use chrono::{DateTime, TimeDelta, Utc};
use std::fmt::Write as _;

use crate::calendar::analyzer::Analysis;
use crate::store::{AppointmentState, NotificationKind, NotificationRecord, Priority, RecordDetails};

/// A notification ready to hand to the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub priority: Priority,
}

impl Message {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            priority,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecisionSettings {
    /// An earliest date at most this many days out counts as imminent.
    pub imminent_days: i64,
    /// Minimum gap between two imminent pushes for the same date.
    pub imminent_cooldown: TimeDelta,
    /// Minimum gap between two routine status pushes.
    pub status_cooldown: TimeDelta,
    /// Appended to every push so the reader can book straight away.
    pub booking_url: String,
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            imminent_days: 7,
            imminent_cooldown: TimeDelta::hours(4),
            status_cooldown: TimeDelta::hours(12),
            booking_url: String::new(),
        }
    }
}

/// Which branch of the priority chain matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    TargetRange,
    BetterSlot,
    /// `notify` is false when the same date was already pushed recently.
    EarliestSoon { notify: bool },
    Routine { status_update: bool },
}

/// What one cycle should push and record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub outcome: Outcome,
    pub push: Option<Message>,
    record: NotificationRecord,
}

impl Decision {
    /// The primary history record, before the delivery outcome is known.
    pub fn record(&self) -> &NotificationRecord {
        &self.record
    }

    /// History records to append once delivery of `push` has been attempted.
    pub fn into_records(self, delivered: bool, now: DateTime<Utc>) -> Vec<NotificationRecord> {
        let delivered = delivered && self.push.is_some();
        let mut record = self.record;
        record.details.notification_sent = Some(delivered);

        let mut records = vec![record];
        if let (Outcome::Routine { .. }, Some(push), true) = (self.outcome, &self.push, delivered) {
            records.push(
                NotificationRecord::new(NotificationKind::StatusUpdate, push.body.clone(), now)
                    .with_priority(push.priority)
                    .with_details(RecordDetails {
                        notification_sent: Some(true),
                        ..Default::default()
                    }),
            );
        }
        records
    }
}

/// Choose this cycle's notification, first match wins:
/// target window, better slot, imminent earliest, routine.
pub fn decide(
    analysis: &Analysis,
    state: &AppointmentState,
    now: DateTime<Utc>,
    settings: &DecisionSettings,
) -> Decision {
    let window = analysis.target_window;
    let summary = RecordDetails {
        target_range: Some(window.to_string()),
        earliest_available: analysis.earliest.map(|e| e.date),
        earliest_days_from_now: analysis.earliest.map(|e| e.days_from_now),
        total_available: Some(analysis.total_future_count),
        ..Default::default()
    };

    if analysis.target_window_available() {
        let dates = &analysis.target_window_dates;
        let title = "Appointment available in target window";
        let mut body = format!("{} day(s) open between {window}: {dates}", dates.len());
        push_booking_line(&mut body, settings);
        return Decision {
            outcome: Outcome::TargetRange,
            push: Some(Message::new(
                NotificationKind::TargetRangeAvailable,
                title,
                body.clone(),
                Priority::High,
            )),
            record: NotificationRecord::new(NotificationKind::TargetRangeAvailable, body, now)
                .with_priority(Priority::High)
                .with_details(RecordDetails {
                    available_dates: Some(dates.iter().collect()),
                    available_dates_count: Some(dates.len()),
                    ..summary
                }),
        };
    }

    if let Some(better) = analysis.better_slot {
        let gained = better.available.days_until(better.current);
        let mut body = format!(
            "{} is open, {} day(s) before your appointment on {}",
            better.available, gained, better.current
        );
        push_booking_line(&mut body, settings);
        return Decision {
            outcome: Outcome::BetterSlot,
            push: Some(Message::new(
                NotificationKind::BetterSlotAvailable,
                "Earlier appointment available",
                body.clone(),
                Priority::High,
            )),
            record: NotificationRecord::new(NotificationKind::BetterSlotAvailable, body, now)
                .with_priority(Priority::High)
                .with_details(RecordDetails {
                    current_appointment: Some(better.current),
                    ..summary
                }),
        };
    }

    if let Some(earliest) = analysis
        .earliest
        .filter(|e| e.days_from_now <= settings.imminent_days)
    {
        let recent_same_date = state
            .last_delivered(NotificationKind::EarliestSoon)
            .is_some_and(|last| {
                last.details.earliest_available == Some(earliest.date)
                    && now.signed_duration_since(last.timestamp) < settings.imminent_cooldown
            });
        let notify = !recent_same_date;

        let mut body = format!(
            "Earliest open day is {} ({} day(s) from now), outside the target window {}",
            earliest.date, earliest.days_from_now, window
        );
        let record = NotificationRecord::new(NotificationKind::EarliestSoon, body.clone(), now)
            .with_priority(Priority::Medium)
            .with_details(summary);
        push_booking_line(&mut body, settings);

        return Decision {
            outcome: Outcome::EarliestSoon { notify },
            push: notify.then(|| {
                Message::new(
                    NotificationKind::EarliestSoon,
                    "Appointment available soon",
                    body,
                    Priority::Medium,
                )
            }),
            record,
        };
    }

    let status_update =
        !state.delivered_within(NotificationKind::StatusUpdate, settings.status_cooldown, now);
    let mut body = format!("No open days in the target window {window}. ");
    match analysis.earliest {
        Some(e) => {
            let _ = write!(
                body,
                "Earliest open day is {} ({} day(s) from now), {} open in total.",
                e.date, e.days_from_now, analysis.total_future_count
            );
        }
        None => body.push_str("No open days found at all."),
    }
    let record = NotificationRecord::new(NotificationKind::NotAvailable, body.clone(), now)
        .with_priority(Priority::Low)
        .with_details(summary);
    push_booking_line(&mut body, settings);

    Decision {
        outcome: Outcome::Routine { status_update },
        push: status_update.then(|| {
            Message::new(
                NotificationKind::StatusUpdate,
                "Appointment monitor status",
                body,
                Priority::Low,
            )
        }),
        record,
    }
}

fn push_booking_line(body: &mut String, settings: &DecisionSettings) {
    if !settings.booking_url.is_empty() {
        let _ = write!(body, "\n\nBook: {}", settings.booking_url);
    }
}

/// Counts consecutive failed cycles and escalates once a threshold is reached.
#[derive(Debug, Clone)]
pub struct ErrorTracker {
    consecutive: u32,
    threshold: u32,
}

/// The push and history record for one failed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDecision {
    pub consecutive: u32,
    pub push: Option<Message>,
    record: NotificationRecord,
}

impl ErrorDecision {
    pub fn into_record(self, delivered: bool) -> NotificationRecord {
        let mut record = self.record;
        record.details.notification_sent = Some(delivered && self.push.is_some());
        record
    }
}

impl ErrorTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn record_failure(&mut self, error: &str, now: DateTime<Utc>) -> ErrorDecision {
        self.consecutive = self.consecutive.saturating_add(1);
        let message = format!(
            "Availability check failed ({} in a row): {error}",
            self.consecutive
        );

        let push = (self.consecutive >= self.threshold).then(|| {
            Message::new(
                NotificationKind::Error,
                "Appointment monitor failing",
                message.clone(),
                Priority::High,
            )
        });

        ErrorDecision {
            consecutive: self.consecutive,
            push,
            record: NotificationRecord::new(NotificationKind::Error, message, now)
                .with_priority(Priority::High)
                .with_details(RecordDetails {
                    error: Some(error.to_string()),
                    consecutive_errors: Some(self.consecutive),
                    ..Default::default()
                }),
        }
    }

    /// Reset the counter, returning how many failures preceded this success.
    pub fn record_success(&mut self) -> u32 {
        std::mem::take(&mut self.consecutive)
    }
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(2)
    }
}
