//! Single-month extraction: render the month view, read day labels, keep the
//! days that show open slots.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::errors::RenderError;
use super::renderer::{ElementSnapshot, Page, Renderer};
use crate::calendar::label::{LabelParser, LabelRejection, LabelStats};
use crate::calendar::{AvailableDateSet, YearMonth};
use crate::retry::RetryPolicy;
use crate::utils::{fmt_duration, log_if_slow};

const SLOW_MONTH_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub calendar_url: Url,
    /// Marker element that exists once the calendar widget has mounted.
    pub calendar_selector: String,
    /// Elements whose accessibility label describes one day.
    pub day_selector: String,
    pub selector_timeout: Duration,
    /// Fixed wait after the container appears, for day controls that are
    /// populated asynchronously. Zero disables it.
    pub settle_delay: Duration,
    pub retry: RetryPolicy,
}

/// Outcome of extracting one month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthScan {
    pub month: YearMonth,
    pub dates: AvailableDateSet,
    pub stats: LabelStats,
    /// True when every attempt failed and `dates` is empty by necessity.
    pub failed: bool,
}

pub struct PageExtractor {
    renderer: Arc<dyn Renderer>,
    parser: Arc<dyn LabelParser>,
    settings: ExtractorSettings,
}

impl PageExtractor {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        parser: Arc<dyn LabelParser>,
        settings: ExtractorSettings,
    ) -> Self {
        Self {
            renderer,
            parser,
            settings,
        }
    }

    /// The calendar URL for `month`, replacing any `month` query already present.
    pub fn month_url(&self, month: YearMonth) -> Url {
        let mut url = self.settings.calendar_url.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "month")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("month", &month.to_string());
        url
    }

    /// Make sure the renderer is running before any month is requested.
    pub async fn prepare(&self) -> Result<(), RenderError> {
        self.renderer.launch().await
    }

    /// Extract the available days of `month`, retrying the whole page on failure.
    ///
    /// Never fails: once retries are exhausted the month is reported empty
    /// with `failed` set.
    #[tracing::instrument(skip_all, fields(month = %month))]
    pub async fn extract_month(&self, month: YearMonth) -> MonthScan {
        let start = Instant::now();
        let result = self
            .settings
            .retry
            .run("scrape_month", |attempt| {
                debug!(attempt, "Scraping month");
                self.scrape_once(month)
            })
            .await;
        log_if_slow(start, SLOW_MONTH_THRESHOLD, "month extraction");

        match result {
            Ok((dates, stats)) => {
                info!(
                    found = dates.len(),
                    labels = stats.examined,
                    skipped = stats.skipped(),
                    duration = fmt_duration(start.elapsed()),
                    "Month scraped"
                );
                if !dates.is_empty() {
                    debug!(dates = %dates, "Available dates");
                }
                MonthScan {
                    month,
                    dates,
                    stats,
                    failed: false,
                }
            }
            Err(e) => {
                warn!(error = %e, "Giving up on month after all attempts");
                MonthScan {
                    month,
                    dates: AvailableDateSet::new(),
                    stats: LabelStats::default(),
                    failed: true,
                }
            }
        }
    }

    async fn scrape_once(
        &self,
        month: YearMonth,
    ) -> Result<(AvailableDateSet, LabelStats), RenderError> {
        let url = self.month_url(month);
        let mut page = self.renderer.render(&url).await?;
        let result = self.read_page(page.as_mut(), month).await;
        page.close().await;
        result
    }

    async fn read_page(
        &self,
        page: &mut dyn Page,
        month: YearMonth,
    ) -> Result<(AvailableDateSet, LabelStats), RenderError> {
        page.wait_for_element(
            &self.settings.calendar_selector,
            self.settings.selector_timeout,
        )
        .await?;

        // Day controls are filled in after the container mounts.
        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }

        let elements = page.query_all(&self.settings.day_selector).await?;
        Ok(extract_dates(&elements, month, self.parser.as_ref()))
    }
}

/// Parse every labelled element, keeping the available days of the page.
pub fn extract_dates(
    elements: &[ElementSnapshot],
    month: YearMonth,
    parser: &dyn LabelParser,
) -> (AvailableDateSet, LabelStats) {
    let mut dates = AvailableDateSet::new();
    let mut stats = LabelStats::default();

    for label in elements
        .iter()
        .filter_map(|el| el.accessibility_label.as_deref())
    {
        let outcome = parser.parse_for_month(label, month);
        stats.record(&outcome);
        match outcome {
            Ok(date) => {
                dates.insert(date);
            }
            Err(LabelRejection::NoSlots | LabelRejection::Unmarked) => {}
            Err(reason) => debug!(label, %reason, "Skipping unreadable day label"),
        }
    }

    (dates, stats)
}
