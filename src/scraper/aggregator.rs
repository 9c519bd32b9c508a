//! Multi-month scan: walk consecutive months from the current one and merge
//! their available days.

use std::time::Duration;
use tracing::{info, warn};

use super::errors::ScanError;
use super::extractor::{MonthScan, PageExtractor};
use crate::calendar::{AvailableDateSet, CalendarDate, YearMonth};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub dates: AvailableDateSet,
    pub months: Vec<MonthScan>,
}

impl ScanReport {
    pub fn failed_months(&self) -> impl Iterator<Item = YearMonth> + '_ {
        self.months.iter().filter(|m| m.failed).map(|m| m.month)
    }
}

pub struct MonthAggregator {
    extractor: PageExtractor,
    months: u32,
    /// Pause between consecutive month requests to stay under the site's abuse defenses.
    politeness_delay: Duration,
}

impl MonthAggregator {
    pub fn new(extractor: PageExtractor, months: u32, politeness_delay: Duration) -> Self {
        Self {
            extractor,
            months,
            politeness_delay,
        }
    }

    /// Scan `months` consecutive months starting with the month of `today`.
    ///
    /// Month failures degrade to empty months, even when every month fails.
    /// Only a renderer that cannot be started fails the scan.
    pub async fn scan(&self, today: CalendarDate) -> Result<ScanReport, ScanError> {
        self.extractor
            .prepare()
            .await
            .map_err(ScanError::RendererUnavailable)?;

        let first = YearMonth::of(today);
        let mut dates = AvailableDateSet::new();
        let mut months = Vec::with_capacity(self.months as usize);

        info!(from = %first, months = self.months, "Scanning calendar");

        for offset in 0..self.months {
            let scan = self.extractor.extract_month(first.offset(offset)).await;
            dates.merge(scan.dates.clone());
            months.push(scan);

            if offset + 1 < self.months {
                tokio::time::sleep(self.politeness_delay).await;
            }
        }

        let report = ScanReport { dates, months };
        let failed: Vec<String> = report.failed_months().map(|m| m.to_string()).collect();
        if !report.months.is_empty() && failed.len() == report.months.len() {
            warn!(failed = ?failed, "No month could be scanned, treating the calendar as empty");
        } else if !failed.is_empty() {
            warn!(failed = ?failed, "Some months could not be scanned");
        }

        info!(
            total = report.dates.len(),
            months = report.months.len(),
            "Calendar scan complete"
        );
        Ok(report)
    }
}
