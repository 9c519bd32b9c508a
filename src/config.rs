//! Application configuration.
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `SLOTWATCH_*` environment variables (nested keys split on `__`, e.g.
//! `SLOTWATCH_SCAN__MONTHS=3`). Durations accept `"45s"`, `"4h"` or plain
//! integer seconds.

use chrono::TimeDelta;
use chrono_tz::Tz;
use custom_debug_derive::Debug;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

use crate::calendar::DateRange;
use crate::calendar::analyzer::TargetWindow;
use crate::calendar::label::{DEFAULT_AVAILABLE_MARKERS, DEFAULT_UNAVAILABLE_MARKERS};
use crate::fmt::{redacted, redacted_opt};
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "slotwatch.toml";
pub const ENV_PREFIX: &str = "SLOTWATCH_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    MissingFile(PathBuf),
    #[error("failed to load configuration")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Level for this crate's own targets; `RUST_LOG` overrides the whole filter.
    pub log_level: String,
    /// Booking page to monitor, without a `month` parameter.
    pub calendar_url: Option<Url>,
    /// Zone in which "today" and month boundaries are computed.
    #[serde(deserialize_with = "deserialize_tz")]
    pub timezone: Tz,
    pub state_file: PathBuf,
    #[serde(deserialize_with = "deserialize_duration")]
    pub check_interval: Duration,
    /// How long an in-flight check may run after a shutdown signal.
    #[serde(deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,
    pub target: TargetWindow,
    /// Days to treat as unavailable, e.g. while travelling.
    pub holiday: Option<DateRange>,
    pub scan: ScanConfig,
    pub alerts: AlertConfig,
    pub notify: NotifyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            calendar_url: None,
            timezone: chrono_tz::Europe::Amsterdam,
            state_file: PathBuf::from("appointments.json"),
            check_interval: Duration::from_secs(60 * 60),
            shutdown_timeout: Duration::from_secs(30),
            target: TargetWindow::default(),
            holiday: None,
            scan: ScanConfig::default(),
            alerts: AlertConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

/// How calendar pages are loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// Headless Chromium, for calendars built by JavaScript.
    #[default]
    Browser,
    /// Plain HTTP fetch, for server-rendered calendars.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub renderer: RendererKind,
    /// Chromium binary for the browser renderer; auto-detected when unset.
    pub chrome_executable: Option<PathBuf>,
    /// Consecutive months to scan, starting with the current one.
    pub months: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub politeness_delay: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub settle_delay: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub navigation_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub selector_timeout: Duration,
    /// Re-fetch interval while waiting for the calendar container.
    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
    pub attempts: u32,
    /// Base of the linear backoff between month attempts.
    #[serde(deserialize_with = "deserialize_duration")]
    pub retry_backoff: Duration,
    pub calendar_selector: String,
    pub day_selector: String,
    pub user_agent: String,
    pub available_markers: Vec<String>,
    pub unavailable_markers: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            renderer: RendererKind::default(),
            chrome_executable: None,
            months: 6,
            politeness_delay: Duration::from_secs(2),
            settle_delay: Duration::from_secs(5),
            navigation_timeout: Duration::from_secs(45),
            selector_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            attempts: 3,
            retry_backoff: Duration::from_secs(3),
            calendar_selector: r#"[data-testid="calendar"]"#.to_string(),
            day_selector: "button".to_string(),
            user_agent: concat!("slotwatch/", env!("CARGO_PKG_VERSION")).to_string(),
            available_markers: DEFAULT_AVAILABLE_MARKERS.iter().map(|s| s.to_string()).collect(),
            unavailable_markers: DEFAULT_UNAVAILABLE_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ScanConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.attempts, self.retry_backoff)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub imminent_days: i64,
    #[serde(deserialize_with = "deserialize_duration")]
    pub imminent_cooldown: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub status_cooldown: Duration,
    /// Consecutive failed checks before an error notification is pushed.
    pub error_threshold: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            imminent_days: 7,
            imminent_cooldown: Duration::from_secs(4 * 60 * 60),
            status_cooldown: Duration::from_secs(12 * 60 * 60),
            error_threshold: 2,
        }
    }
}

impl AlertConfig {
    pub fn imminent_cooldown_delta(&self) -> TimeDelta {
        to_delta(self.imminent_cooldown)
    }

    pub fn status_cooldown_delta(&self) -> TimeDelta {
        to_delta(self.status_cooldown)
    }
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub attempts: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub retry_backoff: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
    /// `host:port` probed before network deliveries; empty disables the probe.
    pub connectivity_probe: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub probe_timeout: Duration,
    pub pushover: Option<PushoverConfig>,
    pub webhook_url: Option<Url>,
    pub email: Option<EmailConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_backoff: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            connectivity_probe: "8.8.8.8:53".to_string(),
            probe_timeout: Duration::from_secs(5),
            pushover: None,
            webhook_url: None,
            email: None,
        }
    }
}

impl NotifyConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.attempts, self.retry_backoff)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushoverConfig {
    #[debug(with = redacted)]
    pub token: String,
    #[debug(with = redacted)]
    pub user: String,
}

/// Transport security for the SMTP connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// TLS from the first byte, usually port 465.
    #[default]
    Tls,
    /// Plain connection upgraded with STARTTLS, usually port 587.
    StartTls,
    /// Unencrypted, for local relays only.
    Plain,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    /// Defaults to the conventional port of `security`.
    pub smtp_port: Option<u16>,
    #[serde(default)]
    pub security: SmtpSecurity,
    pub user: Option<String>,
    #[debug(with = redacted_opt)]
    pub password: Option<String>,
    pub from: String,
    pub to: String,
}

impl Config {
    /// Load from defaults, the TOML file and the environment, then validate.
    ///
    /// An explicit `path` must exist; otherwise `slotwatch.toml` in the working
    /// directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if !path.exists() => {
                return Err(ConfigError::MissingFile(path.to_path_buf()));
            }
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config: Config = Figment::new()
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        match &self.calendar_url {
            None => problems.push("calendar_url must be set".to_string()),
            Some(url) if !matches!(url.scheme(), "http" | "https") => {
                problems.push(format!("calendar_url must be http(s), got '{}'", url.scheme()))
            }
            Some(_) => {}
        }
        if self.scan.months == 0 {
            problems.push("scan.months must be at least 1".to_string());
        }
        if self.scan.attempts == 0 {
            problems.push("scan.attempts must be at least 1".to_string());
        }
        if self.notify.attempts == 0 {
            problems.push("notify.attempts must be at least 1".to_string());
        }
        if self.check_interval.is_zero() {
            problems.push("check_interval must be positive".to_string());
        }
        if self.alerts.imminent_days < 0 {
            problems.push("alerts.imminent_days must not be negative".to_string());
        }
        if self.alerts.error_threshold == 0 {
            problems.push("alerts.error_threshold must be at least 1".to_string());
        }
        if let Some(holiday) = &self.holiday
            && holiday.end < holiday.start
        {
            problems.push(format!("holiday ends before it starts ({holiday})"));
        }
        if let TargetWindow::Range { start, end } = self.target
            && end < start
        {
            problems.push(format!("target range ends before it starts ({start} to {end})"));
        }
        if self.scan.available_markers.iter().all(|m| m.trim().is_empty()) {
            problems.push("scan.available_markers must contain a marker".to_string());
        }
        if let Some(pushover) = &self.notify.pushover
            && (pushover.token.is_empty() || pushover.user.is_empty())
        {
            problems.push("notify.pushover needs both token and user".to_string());
        }
        if let Some(email) = &self.notify.email {
            if email.smtp_host.trim().is_empty() {
                problems.push("notify.email.smtp_host must be set".to_string());
            }
            for (field, address) in [("from", &email.from), ("to", &email.to)] {
                if address.parse::<lettre::message::Mailbox>().is_err() {
                    problems.push(format!("notify.email.{field} is not a valid address: '{address}'"));
                }
            }
            if email.user.is_some() != email.password.is_some() {
                problems.push("notify.email needs both user and password, or neither".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

static DURATION_PARSER: LazyLock<DurationParser<'static>> = LazyLock::new(|| {
    DurationParser::with_time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
    ])
});

/// Parse a humane duration such as `"90s"` or `"4h"`.
/// A bare number is taken as seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let parsed = DURATION_PARSER
        .parse(value.trim())
        .map_err(|e| format!("invalid duration '{value}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{value}': {e}"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct DurationVisitor;

    impl Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string like \"45s\" or \"4h\", or integer seconds")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            parse_duration(value).map_err(de::Error::custom)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| de::Error::custom(format!("duration must not be negative, got {value}")))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

fn deserialize_tz<'de, D>(deserializer: D) -> Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    name.parse::<Tz>()
        .map_err(|_| serde::de::Error::custom(format!("unknown time zone '{name}'")))
}
