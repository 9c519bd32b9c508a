//! Page rendering capability consumed by the extractor.
//!
//! The extractor only needs "load a page, wait for an element, list matching
//! elements with their accessible text". [`HttpRenderer`] provides that over
//! plain HTTP with `scraper` for DOM queries, for server-rendered calendars.
//! Client-side calendars go through [`super::browser::BrowserRenderer`].

use anyhow::Context;
use async_trait::async_trait;
use html_scraper::{Html, Selector};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};
use url::Url;

use super::errors::RenderError;

/// What the extractor can read from one element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementSnapshot {
    /// The `aria-label` attribute, if present.
    pub accessibility_label: Option<String>,
    /// Visible text, whitespace-collapsed.
    pub text: String,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Start any long-lived rendering session. Called before every scan, so
    /// implementations must return quickly once started.
    async fn launch(&self) -> Result<(), RenderError> {
        Ok(())
    }

    async fn render(&self, url: &Url) -> Result<Box<dyn Page>, RenderError>;

    /// Release any long-lived rendering session before the process exits.
    async fn shutdown(&self) {}
}

#[async_trait]
pub trait Page: Send {
    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), RenderError>;

    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementSnapshot>, RenderError>;

    async fn close(&mut self);
}

fn parse_selector(selector: &str) -> Result<Selector, RenderError> {
    Selector::parse(selector).map_err(|_| RenderError::InvalidSelector(selector.to_string()))
}

/// Whether `body` contains at least one element matching `selector`.
pub fn document_contains(body: &str, selector: &str) -> Result<bool, RenderError> {
    let selector = parse_selector(selector)?;
    let html = Html::parse_document(body);
    Ok(html.select(&selector).next().is_some())
}

/// Snapshot every element in `body` matching `selector`.
pub fn snapshot_elements(body: &str, selector: &str) -> Result<Vec<ElementSnapshot>, RenderError> {
    let selector = parse_selector(selector)?;
    let html = Html::parse_document(body);
    Ok(html
        .select(&selector)
        .map(|el| ElementSnapshot {
            accessibility_label: el
                .attr("aria-label")
                .map(|label| label.trim().to_string())
                .filter(|label| !label.is_empty()),
            text: el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "),
        })
        .collect())
}

/// Renderer that fetches the page over HTTP and queries the returned markup.
pub struct HttpRenderer {
    http: reqwest::Client,
    poll_interval: Duration,
}

impl HttpRenderer {
    pub fn new(
        user_agent: &str,
        navigation_timeout: Duration,
        poll_interval: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(navigation_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            poll_interval,
        })
    }

    async fn fetch(http: &reqwest::Client, url: &Url) -> Result<String, RenderError> {
        let resp = http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| RenderError::Navigation {
                url: url.to_string(),
                source: e.into(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RenderError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        resp.text().await.map_err(|e| RenderError::Navigation {
            url: url.to_string(),
            source: e.into(),
        })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, url: &Url) -> Result<Box<dyn Page>, RenderError> {
        let body = Self::fetch(&self.http, url).await?;
        debug!(url = %url, bytes = body.len(), "Page loaded");
        Ok(Box::new(HttpPage {
            http: self.http.clone(),
            url: url.clone(),
            body,
            poll_interval: self.poll_interval,
        }))
    }
}

struct HttpPage {
    http: reqwest::Client,
    url: Url,
    body: String,
    poll_interval: Duration,
}

#[async_trait]
impl Page for HttpPage {
    /// Re-fetches the page until the element shows up or `timeout` elapses.
    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), RenderError> {
        let deadline = Instant::now() + timeout;
        loop {
            if document_contains(&self.body, selector)? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RenderError::SelectorTimeout {
                    selector: selector.to_string(),
                    timeout,
                });
            }
            trace!(selector, "Element not present yet, polling");
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            self.body = HttpRenderer::fetch(&self.http, &self.url).await?;
        }
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementSnapshot>, RenderError> {
        snapshot_elements(&self.body, selector)
    }

    async fn close(&mut self) {
        self.body.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALENDAR: &str = r#"
        <html><body>
          <div data-testid="calendar">
            <button aria-label="Go to previous month">&lt;</button>
            <button aria-label="Thursday, August 14 - beschikbare tijden">
              <span>14</span>
            </button>
            <button aria-label="Friday, August 15 - geen beschikbare tijden">15</button>
            <button>no label</button>
          </div>
        </body></html>
    "#;

    #[test]
    fn finds_calendar_container() {
        assert!(document_contains(CALENDAR, r#"[data-testid="calendar"]"#).unwrap());
        assert!(!document_contains(CALENDAR, "table.month").unwrap());
    }

    #[test]
    fn snapshots_labels_and_text() {
        let buttons = snapshot_elements(CALENDAR, "button").unwrap();
        assert_eq!(buttons.len(), 4);
        assert_eq!(
            buttons[1].accessibility_label.as_deref(),
            Some("Thursday, August 14 - beschikbare tijden")
        );
        assert_eq!(buttons[1].text, "14");
        assert_eq!(buttons[3].accessibility_label, None);
        assert_eq!(buttons[3].text, "no label");
    }

    #[test]
    fn invalid_selector_is_reported() {
        let err = snapshot_elements(CALENDAR, "button[").unwrap_err();
        assert!(matches!(err, RenderError::InvalidSelector(_)));
    }
}
