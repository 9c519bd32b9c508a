//! Shared fixtures: a scripted renderer, a recording sink and a monitor wired
//! to a temporary state file.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use slotwatch::calendar::analyzer::TargetWindow;
use slotwatch::calendar::label::MarkerLabelParser;
use slotwatch::calendar::{CalendarDate, DateRange};
use slotwatch::decision::{DecisionSettings, Message};
use slotwatch::monitor::{Monitor, MonitorSettings};
use slotwatch::notify::{NotificationSink, Notifier, NotifyError};
use slotwatch::retry::RetryPolicy;
use slotwatch::scraper::aggregator::MonthAggregator;
use slotwatch::scraper::errors::RenderError;
use slotwatch::scraper::extractor::{ExtractorSettings, PageExtractor};
use slotwatch::scraper::renderer::{ElementSnapshot, Page, Renderer};
use slotwatch::store::{AppointmentState, JsonStateStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

pub const CALENDAR_URL: &str = "https://calendar.example/team/30min";

pub fn date(s: &str) -> CalendarDate {
    s.parse().unwrap()
}

pub fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// Serves day labels per `month` query value; can be switched offline or made
/// unable to start.
#[derive(Default)]
pub struct ScriptedRenderer {
    pages: Mutex<HashMap<String, Vec<String>>>,
    pub offline: AtomicBool,
    pub launch_fails: AtomicBool,
    pub renders: AtomicU32,
    pub shutdowns: AtomicU32,
}

impl ScriptedRenderer {
    /// Replace the labels shown for `month` (`YYYY-MM`).
    pub fn set_month(&self, month: &str, labels: &[&str]) {
        self.pages.lock().unwrap().insert(
            month.to_string(),
            labels.iter().map(|l| l.to_string()).collect(),
        );
    }

    /// Mark `days` of `month` as available, e.g. `("2025-07", &["Saturday, July 19"])`.
    pub fn open_days(&self, month: &str, days: &[&str]) {
        let labels: Vec<String> = days
            .iter()
            .map(|d| format!("{d} - beschikbare tijden"))
            .collect();
        let refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        self.set_month(month, &refs);
    }
}

struct ScriptedPage {
    labels: Vec<String>,
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn launch(&self) -> Result<(), RenderError> {
        if self.launch_fails.load(Ordering::SeqCst) {
            return Err(RenderError::Launch {
                source: anyhow::anyhow!("could not start browser"),
            });
        }
        Ok(())
    }

    async fn render(&self, url: &Url) -> Result<Box<dyn Page>, RenderError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RenderError::Status {
                status: 503,
                url: url.to_string(),
            });
        }
        let month = url
            .query_pairs()
            .find(|(k, _)| k == "month")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        let labels = self
            .pages
            .lock()
            .unwrap()
            .get(&month)
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(ScriptedPage { labels }))
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Page for ScriptedPage {
    async fn wait_for_element(&mut self, _: &str, _: Duration) -> Result<(), RenderError> {
        Ok(())
    }

    async fn query_all(&mut self, _: &str) -> Result<Vec<ElementSnapshot>, RenderError> {
        let mut elements: Vec<ElementSnapshot> = self
            .labels
            .iter()
            .map(|label| ElementSnapshot {
                accessibility_label: Some(label.clone()),
                text: String::new(),
            })
            .collect();
        elements.push(ElementSnapshot {
            accessibility_label: Some("Go to next month".to_string()),
            text: ">".to_string(),
        });
        Ok(elements)
    }

    async fn close(&mut self) {}
}

#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<Message>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn needs_network(&self) -> bool {
        false
    }

    async fn send(&self, message: &Message) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub struct Harness {
    pub renderer: Arc<ScriptedRenderer>,
    pub sink: Arc<RecordingSink>,
    pub store: JsonStateStore,
    pub monitor: Monitor,
    _dir: TempDir,
}

pub struct HarnessOptions {
    pub months: u32,
    pub target: TargetWindow,
    pub holiday: Option<DateRange>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            months: 2,
            target: TargetWindow::Range {
                start: date("2025-08-14"),
                end: date("2025-08-28"),
            },
            holiday: None,
        }
    }
}

impl Harness {
    pub async fn new(state: Option<AppointmentState>) -> Self {
        Self::with_options(state, HarnessOptions::default()).await
    }

    pub async fn with_options(state: Option<AppointmentState>, options: HarnessOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("appointments.json"));
        if let Some(state) = state {
            store.init(&state, false).await.unwrap();
        }

        let renderer = Arc::new(ScriptedRenderer::default());
        let sink = Arc::new(RecordingSink::default());

        let extractor = PageExtractor::new(
            renderer.clone(),
            Arc::new(MarkerLabelParser::default()),
            ExtractorSettings {
                calendar_url: Url::parse(CALENDAR_URL).unwrap(),
                calendar_selector: r#"[data-testid="calendar"]"#.to_string(),
                day_selector: "button".to_string(),
                selector_timeout: Duration::from_secs(30),
                settle_delay: Duration::ZERO,
                retry: RetryPolicy::linear(3, Duration::from_secs(3)),
            },
        );
        let aggregator = MonthAggregator::new(extractor, options.months, Duration::ZERO);
        let notifier = Notifier::new(
            vec![sink.clone()],
            RetryPolicy::linear(3, Duration::from_secs(5)),
            None,
        );

        let monitor = Monitor::new(
            renderer.clone(),
            aggregator,
            store.clone(),
            notifier,
            MonitorSettings {
                timezone: chrono_tz::UTC,
                target: options.target,
                holiday: options.holiday,
                decision: DecisionSettings {
                    booking_url: CALENDAR_URL.to_string(),
                    ..Default::default()
                },
                error_threshold: 2,
                description: "test monitor".to_string(),
            },
        );

        Self {
            renderer,
            sink,
            store,
            monitor,
            _dir: dir,
        }
    }

    pub async fn state(&self) -> AppointmentState {
        self.store.load().await.unwrap()
    }
}
