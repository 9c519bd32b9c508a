//! One availability check, end to end.
//!
//! load state → roll over a past appointment → scan → analyze → decide →
//! notify → append history → save. Failures go through the error tracker so
//! sustained outages are escalated.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::calendar::analyzer::{Analysis, AnalysisPolicy, TargetWindow, analyze};
use crate::calendar::{CalendarDate, DateRange};
use crate::decision::{DecisionSettings, ErrorTracker, Message, Outcome, decide};
use crate::notify::{DeliveryReport, Notifier};
use crate::scraper::aggregator::MonthAggregator;
use crate::scraper::errors::ScanError;
use crate::scraper::renderer::Renderer;
use crate::store::{
    AppointmentState, JsonStateStore, NotificationKind, NotificationRecord, Priority,
    RecordDetails, StoreError,
};
use crate::utils::fmt_duration;

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scan(#[from] ScanError),
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub timezone: Tz,
    /// Used unless the state file carries its own target.
    pub target: TargetWindow,
    pub holiday: Option<DateRange>,
    pub decision: DecisionSettings,
    pub error_threshold: u32,
    /// Shown in the startup announcement.
    pub description: String,
}

/// What a successful check found and did.
#[derive(Debug, Clone)]
pub struct CheckSummary {
    pub analysis: Analysis,
    pub outcome: Outcome,
    pub delivered: bool,
    pub rolled_over: Option<CalendarDate>,
}

pub struct Monitor {
    renderer: Arc<dyn Renderer>,
    aggregator: MonthAggregator,
    store: JsonStateStore,
    notifier: Notifier,
    settings: MonitorSettings,
    errors: ErrorTracker,
}

impl Monitor {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        aggregator: MonthAggregator,
        store: JsonStateStore,
        notifier: Notifier,
        settings: MonitorSettings,
    ) -> Self {
        let errors = ErrorTracker::new(settings.error_threshold);
        Self {
            renderer,
            aggregator,
            store,
            notifier,
            settings,
            errors,
        }
    }

    pub fn store(&self) -> &JsonStateStore {
        &self.store
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.errors.consecutive()
    }

    /// The calendar day `now` falls on in the configured zone.
    pub fn today(&self, now: DateTime<Utc>) -> CalendarDate {
        now.with_timezone(&self.settings.timezone).date_naive().into()
    }

    pub async fn check(&mut self) -> Result<CheckSummary, CheckError> {
        self.check_at(Utc::now()).await
    }

    /// Run one full check as of `now`.
    #[tracing::instrument(skip_all, fields(today = %self.today(now)))]
    pub async fn check_at(&mut self, now: DateTime<Utc>) -> Result<CheckSummary, CheckError> {
        let start = Instant::now();

        let mut state = match self.store.load().await {
            Ok(state) => state,
            Err(e) => {
                let e = CheckError::from(e);
                self.escalate(&e, now, None).await;
                return Err(e);
            }
        };

        let summary = match self.run_cycle(&mut state, now).await {
            Ok(summary) => summary,
            Err(e) => {
                self.escalate(&e, now, Some(&mut state)).await;
                if let Err(save_err) = self.store.save(&state).await {
                    warn!(error = %save_err, "Failed to record check failure");
                }
                return Err(e);
            }
        };

        state.last_checked = Some(now);
        if let Err(e) = self.store.save(&state).await {
            let e = CheckError::from(e);
            self.escalate(&e, now, None).await;
            return Err(e);
        }

        let recovered = self.errors.record_success();
        if recovered > 0 {
            info!(failures = recovered, "Check recovered after failures");
        }
        info!(
            outcome = ?summary.outcome,
            delivered = summary.delivered,
            earliest = ?summary.analysis.earliest.map(|e| e.date.to_string()),
            in_window = summary.analysis.target_window_dates.len(),
            duration = fmt_duration(start.elapsed()),
            "Check complete"
        );
        Ok(summary)
    }

    async fn run_cycle(
        &self,
        state: &mut AppointmentState,
        now: DateTime<Utc>,
    ) -> Result<CheckSummary, CheckError> {
        let today = self.today(now);

        let rolled_over = state.roll_over(today);
        if let Some(past) = rolled_over {
            info!(appointment = %past, "Appointment has passed, moved to last appointment");
        }

        let report = self.aggregator.scan(today).await?;
        let analysis = analyze(&report.dates, today, &self.policy(state));
        debug!(
            scanned = analysis.scanned_count,
            holiday_excluded = analysis.excluded_by_holiday,
            future = analysis.total_future_count,
            window = %analysis.target_window,
            "Availability analyzed"
        );

        let decision = decide(&analysis, state, now, &self.settings.decision);
        let delivered = match &decision.push {
            Some(message) => self.notifier.notify(message).await.any_delivered(),
            None => false,
        };
        let outcome = decision.outcome;
        for record in decision.into_records(delivered, now) {
            state.push(record);
        }

        Ok(CheckSummary {
            analysis,
            outcome,
            delivered,
            rolled_over,
        })
    }

    /// Count a failed check, push an alert once the threshold is reached and
    /// record the failure in `state` when one is available.
    async fn escalate(
        &mut self,
        err: &CheckError,
        now: DateTime<Utc>,
        state: Option<&mut AppointmentState>,
    ) {
        let decision = self.errors.record_failure(&err.to_string(), now);
        error!(
            error = %err,
            consecutive = decision.consecutive,
            escalated = decision.push.is_some(),
            "Check failed"
        );

        let delivered = match &decision.push {
            Some(message) => self.notifier.notify(message).await.any_delivered(),
            None => false,
        };
        if let Some(state) = state {
            state.push(decision.into_record(delivered));
        }
    }

    /// Scan and analyze without writing anything.
    pub async fn earliest(&self, now: DateTime<Utc>) -> Result<Analysis, CheckError> {
        let state = match self.store.load().await {
            Ok(state) => state,
            Err(StoreError::Missing { .. }) => AppointmentState::default(),
            Err(e) => return Err(e.into()),
        };
        let today = self.today(now);
        let report = self.aggregator.scan(today).await?;
        Ok(analyze(&report.dates, today, &self.policy(&state)))
    }

    /// Send the startup announcement and record it when a state file exists.
    pub async fn announce_start(&self, now: DateTime<Utc>) -> DeliveryReport {
        let target = self
            .store
            .load()
            .await
            .ok()
            .and_then(|s| s.target_override())
            .unwrap_or(self.settings.target);
        let body = format!(
            "{}\nTarget window: {}",
            self.settings.description,
            target.bounds(self.today(now))
        );
        let message = Message::new(
            NotificationKind::Startup,
            "Appointment monitor started",
            body,
            Priority::Low,
        );
        self.send_and_record(&message, now).await
    }

    /// Push a test notification through every sink.
    pub async fn send_test(&self, now: DateTime<Utc>) -> DeliveryReport {
        let message = Message::new(
            NotificationKind::Test,
            "Test notification",
            format!(
                "Notification channels are working: {}",
                self.notifier.sink_names().join(", ")
            ),
            Priority::Low,
        );
        self.send_and_record(&message, now).await
    }

    async fn send_and_record(&self, message: &Message, now: DateTime<Utc>) -> DeliveryReport {
        let report = self.notifier.notify(message).await;

        match self.store.load().await {
            Ok(mut state) => {
                state.push(
                    NotificationRecord::new(message.kind, message.body.clone(), now)
                        .with_priority(message.priority)
                        .with_details(RecordDetails {
                            notification_sent: Some(report.any_delivered()),
                            ..Default::default()
                        }),
                );
                if let Err(e) = self.store.save(&state).await {
                    warn!(error = %e, kind = %message.kind, "Failed to record notification");
                }
            }
            Err(e) => debug!(error = %e, kind = %message.kind, "Notification not recorded"),
        }
        report
    }

    /// Release the renderer.
    pub async fn shutdown(&self) {
        self.renderer.shutdown().await;
    }

    fn policy(&self, state: &AppointmentState) -> AnalysisPolicy {
        AnalysisPolicy {
            target: state.target_override().unwrap_or(self.settings.target),
            holiday: self.settings.holiday,
            next_appointment: state.next_appointment,
        }
    }
}
