use async_trait::async_trait;
use custom_debug_derive::Debug;
use std::time::Duration;

use super::{NotificationSink, NotifyError};
use crate::decision::Message;
use crate::fmt::redacted;
use crate::store::Priority;

const DEFAULT_ENDPOINT: &str = "https://api.pushover.net/1/messages.json";

/// Pushover push notifications, sent as a form POST.
#[derive(Debug)]
pub struct PushoverSink {
    #[debug(skip)]
    http: reqwest::Client,
    endpoint: String,
    #[debug(with = redacted)]
    token: String,
    #[debug(with = redacted)]
    user: String,
    /// Attached as the tap-through link of the notification.
    url: Option<String>,
}

impl PushoverSink {
    pub fn new(
        token: impl Into<String>,
        user: impl Into<String>,
        url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| NotifyError::Http {
                sink: "pushover",
                source,
            })?;
        Ok(Self {
            http,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: token.into(),
            user: user.into(),
            url,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Pushover priority levels: -1 quiet, 0 normal, 1 bypasses quiet hours.
fn pushover_priority(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "-1",
        Priority::Medium => "0",
        Priority::High => "1",
    }
}

#[async_trait]
impl NotificationSink for PushoverSink {
    fn name(&self) -> &'static str {
        "pushover"
    }

    async fn send(&self, message: &Message) -> Result<(), NotifyError> {
        let mut form = vec![
            ("token", self.token.as_str()),
            ("user", self.user.as_str()),
            ("title", message.title.as_str()),
            ("message", message.body.as_str()),
            ("priority", pushover_priority(message.priority)),
        ];
        if let Some(url) = &self.url {
            form.push(("url", url.as_str()));
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|source| NotifyError::Http {
                sink: "pushover",
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                sink: "pushover",
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
