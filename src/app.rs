use crate::calendar::analyzer::{Analysis, TargetWindow};
use crate::calendar::label::MarkerLabelParser;
use crate::cli::Command;
use crate::config::{Config, RendererKind};
use crate::decision::{DecisionSettings, Outcome};
use crate::monitor::{Monitor, MonitorSettings};
use crate::notify::{
    ConnectivityProbe, DeliveryReport, EmailSink, LogSink, NotificationSink, Notifier,
    PushoverSink, WebhookSink,
};
use crate::scraper::aggregator::MonthAggregator;
use crate::scraper::browser::{BrowserRenderer, BrowserSettings};
use crate::scraper::extractor::{ExtractorSettings, PageExtractor};
use crate::scraper::renderer::{HttpRenderer, Renderer};
use crate::scraper::scheduler::Scheduler;
use crate::signals::cancel_on_shutdown_signal;
use crate::store::{AppointmentState, JsonStateStore};
use crate::utils::fmt_duration;
use anyhow::Context;
use chrono::Utc;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use yansi::Paint;

/// Wires configuration into the check pipeline and runs CLI commands.
pub struct App {
    config: Config,
    monitor: Monitor,
}

impl App {
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        let calendar_url = config
            .calendar_url
            .clone()
            .context("calendar_url is not configured")?;

        let renderer = Self::build_renderer(&config)?;
        let parser = MarkerLabelParser::new(
            config.scan.available_markers.as_slice(),
            config.scan.unavailable_markers.as_slice(),
        )
        .context("Failed to build label parser from configured markers")?;

        let extractor = PageExtractor::new(
            renderer.clone(),
            Arc::new(parser),
            ExtractorSettings {
                calendar_url: calendar_url.clone(),
                calendar_selector: config.scan.calendar_selector.clone(),
                day_selector: config.scan.day_selector.clone(),
                selector_timeout: config.scan.selector_timeout,
                settle_delay: config.scan.settle_delay,
                retry: config.scan.retry_policy(),
            },
        );
        let aggregator =
            MonthAggregator::new(extractor, config.scan.months, config.scan.politeness_delay);

        let notifier = Self::build_notifier(&config, calendar_url.as_str())?;

        let settings = MonitorSettings {
            timezone: config.timezone,
            target: config.target,
            holiday: config.holiday,
            decision: DecisionSettings {
                imminent_days: config.alerts.imminent_days,
                imminent_cooldown: config.alerts.imminent_cooldown_delta(),
                status_cooldown: config.alerts.status_cooldown_delta(),
                booking_url: calendar_url.to_string(),
            },
            error_threshold: config.alerts.error_threshold,
            description: format!(
                "Watching {calendar_url} every {}, {} month(s) ahead",
                fmt_duration(config.check_interval),
                config.scan.months
            ),
        };

        let monitor = Monitor::new(
            renderer,
            aggregator,
            JsonStateStore::new(&config.state_file),
            notifier,
            settings,
        );

        Ok(Self { config, monitor })
    }

    fn build_renderer(config: &Config) -> Result<Arc<dyn Renderer>, anyhow::Error> {
        let scan = &config.scan;
        let renderer: Arc<dyn Renderer> = match scan.renderer {
            RendererKind::Browser => Arc::new(BrowserRenderer::new(BrowserSettings {
                user_agent: scan.user_agent.clone(),
                navigation_timeout: scan.navigation_timeout,
                poll_interval: scan.poll_interval,
                chrome_executable: scan.chrome_executable.clone(),
            })),
            RendererKind::Http => Arc::new(
                HttpRenderer::new(&scan.user_agent, scan.navigation_timeout, scan.poll_interval)
                    .context("Failed to create page renderer")?,
            ),
        };
        info!(renderer = ?scan.renderer, "Page renderer configured");
        Ok(renderer)
    }

    fn build_notifier(config: &Config, booking_url: &str) -> Result<Notifier, anyhow::Error> {
        let notify = &config.notify;
        let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink)];

        if let Some(pushover) = &notify.pushover {
            let sink = PushoverSink::new(
                &pushover.token,
                &pushover.user,
                Some(booking_url.to_string()),
                notify.request_timeout,
            )
            .context("Failed to create Pushover sink")?;
            sinks.push(Arc::new(sink));
        }
        if let Some(email) = &notify.email {
            let sink = EmailSink::new(email, notify.request_timeout)
                .context("Failed to create email sink")?;
            sinks.push(Arc::new(sink));
        }
        if let Some(url) = &notify.webhook_url {
            let sink = WebhookSink::new(url.clone(), notify.request_timeout)
                .context("Failed to create webhook sink")?;
            sinks.push(Arc::new(sink));
        }

        let probe = (!notify.connectivity_probe.trim().is_empty()).then(|| ConnectivityProbe {
            target: notify.connectivity_probe.trim().to_string(),
            timeout: notify.probe_timeout,
        });

        let notifier = Notifier::new(sinks, notify.retry_policy(), probe);
        info!(sinks = ?notifier.sink_names(), "Notification channels configured");
        Ok(notifier)
    }

    /// Run one CLI command to completion.
    pub async fn run(self, command: Command) -> ExitCode {
        let result = match command {
            Command::Start => self.start().await,
            Command::Check => self.check().await,
            Command::Earliest => self.earliest().await,
            Command::Status { limit } => self.status(limit).await,
            Command::Test => self.test().await,
            Command::Init {
                next_appointment,
                target_week,
                force,
            } => {
                let target = target_week.map(|reference| TargetWindow::Week { reference });
                self.init(AppointmentState::new(next_appointment, target), force)
                    .await
            }
            Command::Reset => self.reset().await,
        };

        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = ?e, "Command failed");
                eprintln!("{} {e:#}", "error:".red().bold());
                ExitCode::FAILURE
            }
        }
    }

    async fn start(self) -> Result<(), anyhow::Error> {
        let shutdown = CancellationToken::new();
        let signals = cancel_on_shutdown_signal(shutdown.clone());

        let scheduler = Scheduler::new(
            self.monitor,
            self.config.check_interval,
            self.config.shutdown_timeout,
        );
        let result = scheduler.run(shutdown).await;
        signals.abort();
        result.context("Scheduler failed to run")
    }

    async fn check(mut self) -> Result<(), anyhow::Error> {
        let result = self.monitor.check().await;
        self.monitor.shutdown().await;
        let summary = result.context("Check failed")?;
        print_analysis(&summary.analysis);

        let outcome = match summary.outcome {
            Outcome::TargetRange => "target window slot found".green().bold().to_string(),
            Outcome::BetterSlot => "earlier slot than booked appointment".green().bold().to_string(),
            Outcome::EarliestSoon { notify: true } => "imminent slot".yellow().to_string(),
            Outcome::EarliestSoon { notify: false } => {
                "imminent slot (already notified)".yellow().dim().to_string()
            }
            Outcome::Routine { status_update } => {
                let suffix = if status_update { ", status sent" } else { "" };
                format!("nothing new{suffix}").dim().to_string()
            }
        };
        println!("Outcome:   {outcome}");
        if let Some(past) = summary.rolled_over {
            println!("Appointment {past} has passed and was moved to last appointment");
        }
        Ok(())
    }

    async fn earliest(self) -> Result<(), anyhow::Error> {
        let result = self.monitor.earliest(Utc::now()).await;
        self.monitor.shutdown().await;
        let analysis = result.context("Scan failed")?;
        print_analysis(&analysis);
        Ok(())
    }

    async fn status(self, limit: usize) -> Result<(), anyhow::Error> {
        let store = self.monitor.store();
        let state = store.load().await.context("Failed to load state")?;
        let today = self.monitor.today(Utc::now());
        let target = state.target_override().unwrap_or(self.config.target);

        let date_or_none = |d: Option<crate::calendar::CalendarDate>| {
            d.map(|d| d.to_string()).unwrap_or_else(|| "none".to_string())
        };
        println!("{}", "Appointment status".bold());
        println!("  State file:        {}", store.path().display());
        println!("  Next appointment:  {}", date_or_none(state.next_appointment).cyan());
        println!("  Last appointment:  {}", date_or_none(state.last_appointment));
        println!("  Target window:     {}", target.bounds(today));
        if let Some(holiday) = &self.config.holiday {
            println!("  Holiday:           {holiday}");
        }
        println!(
            "  Last checked:      {}",
            state
                .last_checked
                .map(|t| t
                    .with_timezone(&self.config.timezone)
                    .format("%Y-%m-%d %H:%M %Z")
                    .to_string())
                .unwrap_or_else(|| "never".to_string())
        );

        println!();
        println!(
            "{} ({} total)",
            "Recent notifications".bold(),
            state.notifications.len()
        );
        let skip = state.notifications.len().saturating_sub(limit);
        for record in state.notifications.iter().skip(skip) {
            let sent = match record.details.notification_sent {
                Some(true) => "sent".green().to_string(),
                Some(false) => "not sent".dim().to_string(),
                None => "-".dim().to_string(),
            };
            let first_line = record.message.lines().next().unwrap_or_default();
            println!(
                "  {}  {:<24} {:<9} {}",
                record
                    .timestamp
                    .with_timezone(&self.config.timezone)
                    .format("%Y-%m-%d %H:%M"),
                record.kind.to_string().cyan(),
                sent,
                first_line
            );
        }
        Ok(())
    }

    async fn test(self) -> Result<(), anyhow::Error> {
        let report = self.monitor.send_test(Utc::now()).await;
        print_delivery(&report);
        if report.any_delivered() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Test notification was not delivered"))
        }
    }

    async fn init(self, state: AppointmentState, force: bool) -> Result<(), anyhow::Error> {
        let store = self.monitor.store();
        store
            .init(&state, force)
            .await
            .context("Failed to initialize state")?;
        println!(
            "{} {}",
            "Created".green().bold(),
            store.path().display()
        );
        Ok(())
    }

    async fn reset(self) -> Result<(), anyhow::Error> {
        let state = self
            .monitor
            .store()
            .reset(Utc::now())
            .await
            .context("Failed to reset state")?;
        println!(
            "{} notification history; next appointment {}",
            "Cleared".green().bold(),
            state
                .next_appointment
                .map(|d| d.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(())
    }
}

fn print_analysis(analysis: &Analysis) {
    match analysis.earliest {
        Some(e) => println!(
            "Earliest:  {} ({} day(s) from now)",
            e.date.to_string().green().bold(),
            e.days_from_now
        ),
        None => println!("Earliest:  {}", "no open days".red()),
    }
    println!(
        "Open days: {} upcoming, {} scanned, {} excluded by holiday",
        analysis.total_future_count, analysis.scanned_count, analysis.excluded_by_holiday
    );
    if !analysis.upcoming.is_empty() {
        let upcoming: Vec<String> = analysis.upcoming.iter().map(|d| d.to_string()).collect();
        println!("Upcoming:  {}", upcoming.join(", "));
    }
    println!(
        "Window:    {} ({} open)",
        analysis.target_window,
        analysis.target_window_dates.len()
    );
}

fn print_delivery(report: &DeliveryReport) {
    for sink in &report.delivered {
        println!("  {} {sink}", "✓".green());
    }
    for (sink, error) in &report.failed {
        println!("  {} {sink}: {error}", "✗".red());
    }
}
