//! End-to-end check cycles against a scripted calendar and a temp state file.

mod helpers;

use chrono::TimeDelta;
use helpers::{Harness, HarnessOptions, date, utc};
use slotwatch::calendar::DateRange;
use slotwatch::decision::Outcome;
use slotwatch::monitor::CheckError;
use slotwatch::scraper::errors::ScanError;
use slotwatch::store::{AppointmentState, NotificationKind, StoreError};
use std::sync::atomic::Ordering;

#[tokio::test(start_paused = true)]
async fn target_window_slot_is_pushed_and_persisted() {
    let mut h = Harness::new(Some(AppointmentState::default())).await;
    h.renderer.open_days("2025-07", &["Saturday, July 19"]);
    h.renderer
        .open_days("2025-08", &["Wednesday, August 20", "Thursday, August 21"]);
    let now = utc(2025, 7, 17, 10);

    let summary = h.monitor.check_at(now).await.unwrap();
    assert_eq!(summary.outcome, Outcome::TargetRange);
    assert_eq!(
        summary.analysis.target_window_dates.to_strings(),
        vec!["2025-08-20", "2025-08-21"]
    );
    assert_eq!(summary.analysis.earliest.map(|e| e.days_from_now), Some(2));

    let messages = h.sink.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind, NotificationKind::TargetRangeAvailable);
    assert!(messages[0].body.contains(helpers::CALENDAR_URL));

    let state = h.state().await;
    assert_eq!(state.last_checked, Some(now));
    let record = state.notifications.last().unwrap();
    assert_eq!(record.kind, NotificationKind::TargetRangeAvailable);
    assert_eq!(record.details.notification_sent, Some(true));
    assert_eq!(record.details.available_dates_count, Some(2));
}

#[tokio::test(start_paused = true)]
async fn imminent_slot_is_pushed_once_per_cooldown() {
    let mut h = Harness::new(Some(AppointmentState::default())).await;
    h.renderer.open_days("2025-07", &["Saturday, July 19"]);
    let start = utc(2025, 7, 17, 10);

    h.monitor.check_at(start).await.unwrap();
    let again = h.monitor.check_at(start + TimeDelta::hours(1)).await.unwrap();
    assert_eq!(again.outcome, Outcome::EarliestSoon { notify: false });
    assert_eq!(h.sink.messages().len(), 1);

    // A different earliest date is news even inside the cooldown
    h.renderer
        .open_days("2025-07", &["Friday, July 18", "Saturday, July 19"]);
    let moved = h.monitor.check_at(start + TimeDelta::hours(2)).await.unwrap();
    assert_eq!(moved.outcome, Outcome::EarliestSoon { notify: true });
    assert_eq!(h.sink.messages().len(), 2);

    // Same date again once the cooldown has elapsed
    let later = h.monitor.check_at(start + TimeDelta::hours(6)).await.unwrap();
    assert_eq!(later.outcome, Outcome::EarliestSoon { notify: true });
    assert_eq!(h.sink.messages().len(), 3);

    let state = h.state().await;
    let sent: Vec<_> = state
        .notifications
        .iter()
        .filter(|r| r.kind == NotificationKind::EarliestSoon)
        .map(|r| r.details.notification_sent)
        .collect();
    assert_eq!(sent, vec![Some(true), Some(false), Some(true), Some(true)]);
}

#[tokio::test(start_paused = true)]
async fn errors_escalate_on_second_failure_and_reset_after_success() {
    let mut h = Harness::new(Some(AppointmentState::default())).await;
    h.renderer.launch_fails.store(true, Ordering::SeqCst);
    let start = utc(2025, 7, 17, 10);

    let err = h.monitor.check_at(start).await.unwrap_err();
    assert!(matches!(
        err,
        CheckError::Scan(ScanError::RendererUnavailable(_))
    ));
    assert!(h.sink.messages().is_empty());

    h.monitor.check_at(start + TimeDelta::hours(1)).await.unwrap_err();
    let messages = h.sink.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind, NotificationKind::Error);
    assert_eq!(h.monitor.consecutive_errors(), 2);

    let state = h.state().await;
    let errors: Vec<_> = state
        .notifications
        .iter()
        .map(|r| (r.kind, r.details.consecutive_errors))
        .collect();
    assert_eq!(
        errors,
        vec![
            (NotificationKind::Error, Some(1)),
            (NotificationKind::Error, Some(2))
        ]
    );
    // Failed cycles do not count as checks
    assert_eq!(state.last_checked, None);
    assert_eq!(h.renderer.renders.load(Ordering::SeqCst), 0);

    h.renderer.launch_fails.store(false, Ordering::SeqCst);
    h.monitor.check_at(start + TimeDelta::hours(2)).await.unwrap();
    assert_eq!(h.monitor.consecutive_errors(), 0);

    // Counter starts over, so the next single failure stays quiet
    h.renderer.launch_fails.store(true, Ordering::SeqCst);
    let before = h.sink.messages().len();
    h.monitor.check_at(start + TimeDelta::hours(3)).await.unwrap_err();
    assert_eq!(h.sink.messages().len(), before);
}

#[tokio::test(start_paused = true)]
async fn unreachable_calendar_is_a_routine_check() {
    let mut h = Harness::new(Some(AppointmentState::default())).await;
    h.renderer.offline.store(true, Ordering::SeqCst);
    let now = utc(2025, 7, 17, 10);

    for hours in 0..2 {
        let summary = h.monitor.check_at(now + TimeDelta::hours(hours)).await.unwrap();
        assert!(matches!(summary.outcome, Outcome::Routine { .. }));
        assert!(summary.analysis.earliest.is_none());
    }
    assert_eq!(h.monitor.consecutive_errors(), 0);
    // Two months, three attempts each, two cycles
    assert_eq!(h.renderer.renders.load(Ordering::SeqCst), 2 * 3 * 2);

    let state = h.state().await;
    assert_eq!(state.last_checked, Some(now + TimeDelta::hours(1)));
    let kinds: Vec<_> = state.notifications.iter().map(|r| r.kind).collect();
    assert!(!kinds.contains(&NotificationKind::Error), "{kinds:?}");
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == NotificationKind::NotAvailable)
            .count(),
        2
    );
    assert!(
        h.sink
            .messages()
            .iter()
            .all(|m| m.kind != NotificationKind::Error)
    );
}

#[tokio::test(start_paused = true)]
async fn failed_save_leaves_previous_state_untouched() {
    let mut h = Harness::new(Some(AppointmentState::new(
        Some(date("2025-09-10")),
        None,
    )))
    .await;
    h.renderer.open_days("2025-08", &["Wednesday, August 20"]);
    let before = std::fs::read(h.store.path()).unwrap();

    // A directory squatting on the temp path makes the write fail
    let tmp = h.store.path().with_file_name("appointments.json.tmp");
    std::fs::create_dir(&tmp).unwrap();

    let err = h.monitor.check_at(utc(2025, 7, 17, 10)).await.unwrap_err();
    assert!(
        matches!(err, CheckError::Store(StoreError::Write { .. })),
        "{err:?}"
    );
    assert_eq!(std::fs::read(h.store.path()).unwrap(), before);
    assert_eq!(h.monitor.consecutive_errors(), 1);

    std::fs::remove_dir(&tmp).unwrap();
    h.monitor.check_at(utc(2025, 7, 17, 11)).await.unwrap();
    assert_ne!(std::fs::read(h.store.path()).unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn missing_state_aborts_without_creating_the_file() {
    let mut h = Harness::new(None).await;
    h.renderer.open_days("2025-08", &["Wednesday, August 20"]);

    let err = h.monitor.check_at(utc(2025, 7, 17, 10)).await.unwrap_err();
    assert!(matches!(err, CheckError::Store(StoreError::Missing { .. })));
    assert!(!h.store.path().exists());
    assert_eq!(h.renderer.renders.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn past_appointment_rolls_over_and_better_slot_uses_the_new_one() {
    let state = AppointmentState::new(Some(date("2025-07-10")), None);
    let mut h = Harness::new(Some(state)).await;
    h.renderer.open_days("2025-07", &["Saturday, July 26"]);

    let summary = h.monitor.check_at(utc(2025, 7, 17, 10)).await.unwrap();
    assert_eq!(summary.rolled_over, Some(date("2025-07-10")));
    // No booked appointment remains, so a 9-day-out slot is routine
    assert!(matches!(summary.outcome, Outcome::Routine { .. }));

    let state = h.state().await;
    assert_eq!(state.last_appointment, Some(date("2025-07-10")));
    assert_eq!(state.next_appointment, None);
}

#[tokio::test(start_paused = true)]
async fn better_slot_before_booked_appointment() {
    let state = AppointmentState::new(Some(date("2025-08-05")), None);
    let mut h = Harness::new(Some(state)).await;
    h.renderer.open_days("2025-07", &["Saturday, July 26"]);

    let summary = h.monitor.check_at(utc(2025, 7, 17, 10)).await.unwrap();
    assert_eq!(summary.outcome, Outcome::BetterSlot);
    let record = h.state().await.notifications.pop().unwrap();
    assert_eq!(record.kind, NotificationKind::BetterSlotAvailable);
    assert_eq!(record.details.current_appointment, Some(date("2025-08-05")));
}

#[tokio::test(start_paused = true)]
async fn holiday_dates_never_trigger_notifications() {
    let options = HarnessOptions {
        holiday: Some(DateRange::new(date("2025-08-14"), date("2025-08-28")).unwrap()),
        ..Default::default()
    };
    let mut h = Harness::with_options(Some(AppointmentState::default()), options).await;
    h.renderer.open_days("2025-08", &["Wednesday, August 20"]);

    let summary = h.monitor.check_at(utc(2025, 7, 17, 10)).await.unwrap();
    assert!(matches!(summary.outcome, Outcome::Routine { .. }));
    assert_eq!(summary.analysis.excluded_by_holiday, 1);
    assert!(summary.analysis.earliest.is_none());
}

#[tokio::test(start_paused = true)]
async fn earliest_reads_without_writing() {
    let h = Harness::new(Some(AppointmentState::default())).await;
    h.renderer.open_days("2025-08", &["Tuesday, August 5"]);
    let before = std::fs::read_to_string(h.store.path()).unwrap();

    let analysis = h.monitor.earliest(utc(2025, 7, 17, 10)).await.unwrap();
    assert_eq!(analysis.earliest.map(|e| e.date), Some(date("2025-08-05")));
    assert_eq!(std::fs::read_to_string(h.store.path()).unwrap(), before);
    assert!(h.sink.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn state_target_overrides_configured_window() {
    let state = AppointmentState::new(
        None,
        Some(slotwatch::calendar::analyzer::TargetWindow::Week {
            reference: date("2025-08-06"),
        }),
    );
    let mut h = Harness::new(Some(state)).await;
    h.renderer.open_days("2025-08", &["Tuesday, August 5"]);

    let summary = h.monitor.check_at(utc(2025, 7, 17, 10)).await.unwrap();
    assert_eq!(summary.outcome, Outcome::TargetRange);
    assert_eq!(summary.analysis.target_window.start, date("2025-08-04"));
}
