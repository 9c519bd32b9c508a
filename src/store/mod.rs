//! Persisted appointment state and notification history.
//!
//! The state lives in one pretty-printed JSON file. It is loaded at the start
//! of a check cycle, mutated in memory and written back at the end; a cycle that
//! fails to load never touches the file.

pub mod json;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::calendar::CalendarDate;
use crate::calendar::analyzer::TargetWindow;
use json::parse_json_with_context;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file {path} does not exist, run `slotwatch init` first")]
    Missing { path: PathBuf },
    #[error("state file {path} already exists, pass --force to overwrite it")]
    AlreadyExists { path: PathBuf },
    #[error("failed to read state file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is not valid: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to write state file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize state")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TargetRangeAvailable,
    BetterSlotAvailable,
    EarliestSoon,
    StatusUpdate,
    NotAvailable,
    Error,
    Startup,
    Test,
    /// A type written by another version of the tool.
    #[serde(other)]
    Unknown,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TargetRangeAvailable => "target_range_available",
            Self::BetterSlotAvailable => "better_slot_available",
            Self::EarliestSoon => "earliest_soon",
            Self::StatusUpdate => "status_update",
            Self::NotAvailable => "not_available",
            Self::Error => "error",
            Self::Startup => "startup",
            Self::Test => "test",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// Type-specific fields of a history record. Only the ones relevant to the
/// record's type are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_dates: Option<Vec<CalendarDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_dates_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_available: Option<CalendarDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_days_from_now: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_available: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_appointment: Option<CalendarDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_sent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_errors: Option<u32>,
}

/// One entry of the append-only notification history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(flatten)]
    pub details: RecordDetails,
}

impl NotificationRecord {
    pub fn new(kind: NotificationKind, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kind,
            message: message.into(),
            priority: None,
            details: RecordDetails::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_details(mut self, details: RecordDetails) -> Self {
        self.details = details;
        self
    }

    /// Whether a push for this record reached at least one channel.
    pub fn delivered(&self) -> bool {
        self.details.notification_sent == Some(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentState {
    #[serde(default)]
    pub last_appointment: Option<CalendarDate>,
    #[serde(default)]
    pub next_appointment: Option<CalendarDate>,
    /// Overrides the configured target window when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetWindow>,
    /// Older files name the target by a single reference date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<CalendarDate>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notifications: Vec<NotificationRecord>,
}

impl AppointmentState {
    pub fn new(next_appointment: Option<CalendarDate>, target: Option<TargetWindow>) -> Self {
        Self {
            next_appointment,
            target,
            ..Default::default()
        }
    }

    /// The target window stored in the file, if any.
    pub fn target_override(&self) -> Option<TargetWindow> {
        self.target.or_else(|| {
            self.target_date
                .map(|reference| TargetWindow::Week { reference })
        })
    }

    pub fn push(&mut self, record: NotificationRecord) {
        self.notifications.push(record);
    }

    /// The newest record of `kind` whose push was delivered.
    pub fn last_delivered(&self, kind: NotificationKind) -> Option<&NotificationRecord> {
        self.notifications
            .iter()
            .filter(|r| r.kind == kind && r.delivered())
            .max_by_key(|r| r.timestamp)
    }

    /// Whether a delivered push of `kind` happened within `window` before `now`.
    pub fn delivered_within(&self, kind: NotificationKind, window: TimeDelta, now: DateTime<Utc>) -> bool {
        self.last_delivered(kind)
            .is_some_and(|r| now.signed_duration_since(r.timestamp) < window)
    }

    /// Move a past `next_appointment` into `last_appointment`.
    ///
    /// Returns the appointment that was rolled over.
    pub fn roll_over(&mut self, today: CalendarDate) -> Option<CalendarDate> {
        let past = self.next_appointment.filter(|next| *next < today)?;
        self.last_appointment = Some(past);
        self.next_appointment = None;
        Some(past)
    }

    /// Clear the history while keeping appointments and target.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.notifications.clear();
        self.last_checked = Some(now);
    }
}

/// Reads and writes [`AppointmentState`] as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    pub async fn load(&self) -> Result<AppointmentState, StoreError> {
        let body = match tokio::fs::read_to_string(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::Missing {
                    path: self.path.clone(),
                });
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let state: AppointmentState =
            parse_json_with_context(&body).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        debug!(
            path = %self.path.display(),
            records = state.notifications.len(),
            "State loaded"
        );
        Ok(state)
    }

    /// Write `state` to a sibling temp file, then rename it over the target.
    pub async fn save(&self, state: &AppointmentState) -> Result<(), StoreError> {
        let mut body = serde_json::to_string_pretty(state)?;
        body.push('\n');

        let tmp = self.temp_path();
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Err(e) = tokio::fs::write(&tmp, body.as_bytes()).await {
            Self::discard(&tmp).await;
            return Err(write_err(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            Self::discard(&tmp).await;
            return Err(write_err(e));
        }

        debug!(path = %self.path.display(), bytes = body.len(), "State saved");
        Ok(())
    }

    /// Create the state file, refusing to replace an existing one unless `force`.
    pub async fn init(&self, state: &AppointmentState, force: bool) -> Result<(), StoreError> {
        if !force && self.exists().await {
            return Err(StoreError::AlreadyExists {
                path: self.path.clone(),
            });
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Write {
                    path: self.path.clone(),
                    source,
                })?;
        }
        self.save(state).await?;
        info!(path = %self.path.display(), "State file initialized");
        Ok(())
    }

    /// Clear the history of the stored state and write it back.
    pub async fn reset(&self, now: DateTime<Utc>) -> Result<AppointmentState, StoreError> {
        let mut state = self.load().await?;
        let cleared = state.notifications.len();
        state.reset(now);
        self.save(&state).await?;
        info!(cleared, "Notification history cleared");
        Ok(state)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn discard(tmp: &Path) {
        if let Err(e) = tokio::fs::remove_file(tmp).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %tmp.display(), error = %e, "Failed to remove temp state file");
        }
    }
}
