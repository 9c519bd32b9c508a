//! Headless Chromium renderer for calendars that are built client-side.
//!
//! One browser process is launched on first use and shared by every page
//! until [`Renderer::shutdown`]. Pages are snapshotted as rendered HTML and
//! queried with the same `scraper` helpers as [`super::renderer::HttpRenderer`].

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::errors::RenderError;
use super::renderer::{ElementSnapshot, Page, Renderer, document_contains, snapshot_elements};

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub user_agent: String,
    pub navigation_timeout: Duration,
    pub poll_interval: Duration,
    /// Chromium binary; auto-detected when unset.
    pub chrome_executable: Option<PathBuf>,
}

/// Command-line flags for the browser process.
pub fn launch_args(settings: &BrowserSettings) -> Vec<String> {
    vec![
        "--disable-setuid-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        format!("--user-agent={}", settings.user_agent),
    ]
}

struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
}

pub struct BrowserRenderer {
    settings: BrowserSettings,
    session: Mutex<Option<Session>>,
}

impl BrowserRenderer {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            session: Mutex::new(None),
        }
    }

    fn config(&self) -> Result<BrowserConfig, RenderError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1280, 720)
            .request_timeout(self.settings.navigation_timeout);
        for arg in launch_args(&self.settings) {
            builder = builder.arg(arg);
        }
        if let Some(path) = &self.settings.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(|e| RenderError::Launch {
            source: anyhow::anyhow!(e),
        })
    }

    async fn start(&self) -> Result<Session, RenderError> {
        let config = self.config()?;
        let (browser, mut handler) =
            Browser::launch(config)
                .await
                .map_err(|e| RenderError::Launch { source: e.into() })?;

        // The CDP connection only makes progress while its handler is polled.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser connection closed");
                    break;
                }
            }
        });
        info!(
            executable = ?self.settings.chrome_executable,
            "Headless browser started"
        );
        Ok(Session { browser, handler })
    }
}

#[async_trait]
impl Renderer for BrowserRenderer {
    async fn launch(&self) -> Result<(), RenderError> {
        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(|s| s.handler.is_finished()) {
            warn!("Browser connection was lost, relaunching");
            *session = None;
        }
        if session.is_none() {
            *session = Some(self.start().await?);
        }
        Ok(())
    }

    async fn render(&self, url: &Url) -> Result<Box<dyn Page>, RenderError> {
        self.launch().await?;
        let navigation = |source: anyhow::Error| RenderError::Navigation {
            url: url.to_string(),
            source,
        };

        let page = {
            let session = self.session.lock().await;
            let session = session
                .as_ref()
                .ok_or_else(|| navigation(anyhow::anyhow!("browser is not running")))?;
            tokio::time::timeout(
                self.settings.navigation_timeout,
                session.browser.new_page(url.as_str()),
            )
            .await
            .map_err(|_| {
                navigation(anyhow::anyhow!(
                    "page did not load within {:?}",
                    self.settings.navigation_timeout
                ))
            })?
            .map_err(|e| navigation(e.into()))?
        };

        debug!(url = %url, "Page loaded in browser");
        Ok(Box::new(BrowserPage {
            page: Some(page),
            poll_interval: self.settings.poll_interval,
        }))
    }

    async fn shutdown(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };
        if let Err(e) = session.browser.close().await {
            warn!(error = %e, "Failed to close browser cleanly");
        }
        session.handler.abort();
        info!("Headless browser stopped");
    }
}

struct BrowserPage {
    page: Option<chromiumoxide::Page>,
    poll_interval: Duration,
}

impl BrowserPage {
    /// The current DOM, serialized.
    async fn html(&self) -> Result<String, RenderError> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| RenderError::Evaluation(anyhow::anyhow!("page already closed")))?;
        page.content()
            .await
            .map_err(|e| RenderError::Evaluation(e.into()))
    }
}

#[async_trait]
impl Page for BrowserPage {
    /// Polls the live DOM until the element shows up or `timeout` elapses.
    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), RenderError> {
        let deadline = Instant::now() + timeout;
        loop {
            if document_contains(&self.html().await?, selector)? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RenderError::SelectorTimeout {
                    selector: selector.to_string(),
                    timeout,
                });
            }
            trace!(selector, "Element not rendered yet, polling");
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementSnapshot>, RenderError> {
        snapshot_elements(&self.html().await?, selector)
    }

    async fn close(&mut self) {
        if let Some(page) = self.page.take()
            && let Err(e) = page.close().await
        {
            debug!(error = %e, "Failed to close browser tab");
        }
    }
}
