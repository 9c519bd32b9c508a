//! Error types for page rendering and calendar scanning.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("renderer could not be started")]
    Launch {
        #[source]
        source: anyhow::Error,
    },
    #[error("navigation to {url} failed")]
    Navigation {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("page returned HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("timed out after {timeout:?} waiting for '{selector}'")]
    SelectorTimeout { selector: String, timeout: Duration },
    #[error("invalid selector '{0}'")]
    InvalidSelector(String),
    #[error(transparent)]
    Evaluation(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("calendar renderer is unavailable")]
    RendererUnavailable(#[source] RenderError),
}
