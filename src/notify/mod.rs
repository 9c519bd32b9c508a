//! Outbound notification delivery.
//!
//! Channels: the log, Pushover, a JSON webhook and SMTP email.
//!
//! A [`Notifier`] fans one [`Message`] out to every configured
//! [`NotificationSink`], retrying each sink independently. Network sinks are
//! preceded by a cheap TCP reachability probe so an offline host fails fast
//! instead of waiting on HTTP timeouts.

mod email;
mod pushover;
mod webhook;

pub use email::EmailSink;
pub use pushover::PushoverSink;
pub use webhook::WebhookSink;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::decision::Message;
use crate::retry::RetryPolicy;
use crate::store::Priority;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("no network connectivity ({target} unreachable)")]
    Offline {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connectivity probe to {target} timed out after {timeout:?}")]
    ProbeTimeout { target: String, timeout: Duration },
    #[error("{sink} request failed")]
    Http {
        sink: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{sink} rejected the notification with status {status}: {body}")]
    Rejected {
        sink: &'static str,
        status: u16,
        body: String,
    },
    #[error("email delivery failed")]
    Email {
        #[source]
        source: lettre::transport::smtp::Error,
    },
    #[error("email could not be composed")]
    EmailBuild {
        #[source]
        source: lettre::error::Error,
    },
    #[error("invalid email address '{address}'")]
    InvalidAddress {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether delivery goes over the network and should be gated on the probe.
    fn needs_network(&self) -> bool {
        true
    }

    async fn send(&self, message: &Message) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Always available.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn needs_network(&self) -> bool {
        false
    }

    async fn send(&self, message: &Message) -> Result<(), NotifyError> {
        match message.priority {
            Priority::High => warn!(
                kind = %message.kind,
                priority = %message.priority,
                title = %message.title,
                "{}",
                message.body
            ),
            _ => info!(
                kind = %message.kind,
                priority = %message.priority,
                title = %message.title,
                "{}",
                message.body
            ),
        }
        Ok(())
    }
}

/// TCP reachability check run before each network delivery attempt.
#[derive(Debug, Clone)]
pub struct ConnectivityProbe {
    /// `host:port` to connect to.
    pub target: String,
    pub timeout: Duration,
}

impl ConnectivityProbe {
    pub async fn check(&self) -> Result<(), NotifyError> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(source)) => Err(NotifyError::Offline {
                target: self.target.clone(),
                source,
            }),
            Err(_) => Err(NotifyError::ProbeTimeout {
                target: self.target.clone(),
                timeout: self.timeout,
            }),
        }
    }
}

/// Per-sink outcome of one [`Notifier::notify`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
    retry: RetryPolicy,
    probe: Option<ConnectivityProbe>,
}

impl Notifier {
    pub fn new(
        sinks: Vec<Arc<dyn NotificationSink>>,
        retry: RetryPolicy,
        probe: Option<ConnectivityProbe>,
    ) -> Self {
        Self {
            sinks,
            retry,
            probe,
        }
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Deliver `message` to every sink, sequentially.
    #[tracing::instrument(skip_all, fields(kind = %message.kind))]
    pub async fn notify(&self, message: &Message) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for sink in &self.sinks {
            let outcome = self
                .retry
                .run(sink.name(), |_| self.deliver(sink.as_ref(), message))
                .await;
            match outcome {
                Ok(()) => {
                    debug!(sink = sink.name(), "Notification delivered");
                    report.delivered.push(sink.name());
                }
                Err(e) => {
                    warn!(sink = sink.name(), error = %e, "Notification not delivered");
                    report.failed.push((sink.name(), e.to_string()));
                }
            }
        }

        if report.attempted() > 0 && !report.any_delivered() {
            warn!(title = %message.title, "Notification reached no channel");
        }
        report
    }

    async fn deliver(&self, sink: &dyn NotificationSink, message: &Message) -> Result<(), NotifyError> {
        if sink.needs_network()
            && let Some(probe) = &self.probe
        {
            probe.check().await?;
        }
        sink.send(message).await
    }
}
