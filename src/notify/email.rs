use async_trait::async_trait;
use custom_debug_derive::Debug;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::time::Duration;

use super::{NotificationSink, NotifyError};
use crate::config::{EmailConfig, SmtpSecurity};
use crate::decision::Message;

type SmtpTransport = AsyncSmtpTransport<Tokio1Executor>;

/// Sends each notification as a plain-text email with an HTML alternative.
#[derive(Debug)]
pub struct EmailSink {
    #[debug(skip)]
    transport: SmtpTransport,
    from: Mailbox,
    to: Mailbox,
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address
        .parse()
        .map_err(|source| NotifyError::InvalidAddress {
            address: address.to_string(),
            source,
        })
}

/// The body as preformatted HTML, so line breaks and alignment survive.
fn html_body(body: &str) -> String {
    format!(
        r#"<pre style="font-family: monospace; white-space: pre-wrap;">{}</pre>"#,
        html_escape::encode_text(body)
    )
}

impl EmailSink {
    /// `timeout` bounds connecting and every SMTP exchange.
    pub fn new(config: &EmailConfig, timeout: Duration) -> Result<Self, NotifyError> {
        let from = parse_mailbox(&config.from)?;
        let to = parse_mailbox(&config.to)?;

        let host = config.smtp_host.as_str();
        let mut builder = match config.security {
            SmtpSecurity::Tls => SmtpTransport::relay(host),
            SmtpSecurity::StartTls => SmtpTransport::starttls_relay(host),
            SmtpSecurity::Plain => Ok(SmtpTransport::builder_dangerous(host)),
        }
        .map_err(|source| NotifyError::Email { source })?
        .timeout(Some(timeout));

        if let Some(port) = config.smtp_port {
            builder = builder.port(port);
        }
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    pub fn build_email(&self, message: &Message) -> Result<lettre::Message, NotifyError> {
        lettre::Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(message.title.as_str())
            .multipart(MultiPart::alternative_plain_html(
                message.body.clone(),
                html_body(&message.body),
            ))
            .map_err(|source| NotifyError::EmailBuild { source })
    }
}

#[async_trait]
impl NotificationSink for EmailSink {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, message: &Message) -> Result<(), NotifyError> {
        let email = self.build_email(message)?;
        self.transport
            .send(email)
            .await
            .map_err(|source| NotifyError::Email { source })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NotificationKind, Priority};

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: Some(587),
            security: SmtpSecurity::StartTls,
            user: Some("monitor@example.com".to_string()),
            password: Some("smtp-secret".to_string()),
            from: "Slot Watch <monitor@example.com>".to_string(),
            to: "me@example.com".to_string(),
        }
    }

    #[test]
    fn html_alternative_is_escaped_and_preformatted() {
        let html = html_body("Earliest: 2025-08-20\n<b>book</b> & go");
        assert!(html.starts_with("<pre style="), "{html}");
        assert!(html.contains("Earliest: 2025-08-20\n&lt;b&gt;book&lt;/b&gt; &amp; go"), "{html}");
        assert!(html.ends_with("</pre>"), "{html}");
    }

    #[tokio::test]
    async fn builds_multipart_email_from_message() {
        let sink = EmailSink::new(&config(), Duration::from_secs(15)).unwrap();
        let message = Message::new(
            NotificationKind::TargetRangeAvailable,
            "Slot in target window",
            "2025-08-20 is open",
            Priority::High,
        );
        let email = sink.build_email(&message).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();

        assert!(raw.contains("Subject: Slot in target window"), "{raw}");
        assert!(raw.contains("To: me@example.com"), "{raw}");
        assert!(raw.contains("monitor@example.com"), "{raw}");
        assert!(raw.contains("multipart/alternative"), "{raw}");
        assert!(raw.contains("2025-08-20 is open"), "{raw}");
    }

    #[tokio::test]
    async fn invalid_recipient_is_rejected_and_password_hidden() {
        let mut bad = config();
        bad.to = "nobody".to_string();
        let err = EmailSink::new(&bad, Duration::from_secs(15)).unwrap_err();
        assert!(matches!(err, NotifyError::InvalidAddress { .. }), "{err:?}");

        let sink = EmailSink::new(&config(), Duration::from_secs(15)).unwrap();
        let out = format!("{sink:?}");
        assert!(!out.contains("smtp-secret"), "{out}");
        assert!(format!("{:?}", config()).contains("password: Some(\"***\")"));
    }
}
