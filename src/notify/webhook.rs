use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use super::{NotificationSink, NotifyError};
use crate::decision::Message;

/// Posts `{title, body, priority, kind}` as JSON to an arbitrary endpoint.
#[derive(Debug)]
pub struct WebhookSink {
    http: reqwest::Client,
    url: Url,
}

#[derive(Serialize)]
struct Payload<'a> {
    title: &'a str,
    body: &'a str,
    priority: String,
    kind: String,
}

impl WebhookSink {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| NotifyError::Http {
                sink: "webhook",
                source,
            })?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, message: &Message) -> Result<(), NotifyError> {
        let payload = Payload {
            title: &message.title,
            body: &message.body,
            priority: message.priority.to_string(),
            kind: message.kind.to_string(),
        };
        let resp = self
            .http
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|source| NotifyError::Http {
                sink: "webhook",
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                sink: "webhook",
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NotificationKind, Priority};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one request, answers with `status`, and returns the raw request.
    async fn one_shot_server(status: &'static str) -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/hook", listener.local_addr().unwrap())).unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut request = String::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.push_str(&String::from_utf8_lossy(&buf[..n]));
                if n == 0 || request.contains("}") {
                    break;
                }
            }
            let response = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            request
        });
        (url, handle)
    }

    fn message() -> Message {
        Message::new(NotificationKind::EarliestSoon, "Soon", "2025-07-19 is open", Priority::Medium)
    }

    #[tokio::test]
    async fn posts_json_payload() {
        let (url, server) = one_shot_server("200 OK").await;
        let sink = WebhookSink::new(url, Duration::from_secs(5)).unwrap();
        sink.send(&message()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook"), "{request}");
        assert!(request.contains(r#""title":"Soon""#), "{request}");
        assert!(request.contains(r#""kind":"earliest_soon""#), "{request}");
        assert!(request.contains(r#""priority":"medium""#), "{request}");
    }

    #[tokio::test]
    async fn non_success_status_is_rejection() {
        let (url, _server) = one_shot_server("502 Bad Gateway").await;
        let sink = WebhookSink::new(url, Duration::from_secs(5)).unwrap();
        let err = sink.send(&message()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Rejected { status: 502, .. }));
    }
}
