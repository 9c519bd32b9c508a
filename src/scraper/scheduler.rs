use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::monitor::{CheckError, CheckSummary, Monitor};
use crate::utils::fmt_duration;

/// Lifecycle of a [`Scheduler`]. Transitions only go forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler has stopped and cannot be restarted")]
    Stopped,
}

/// Runs a check immediately and then once per interval until cancelled.
///
/// Checks are awaited inline, so they never overlap; ticks missed while a
/// check is running are skipped rather than bunched up.
pub struct Scheduler {
    monitor: Mutex<Monitor>,
    interval: Duration,
    shutdown_timeout: Duration,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    pub fn new(monitor: Monitor, interval: Duration, shutdown_timeout: Duration) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            monitor: Mutex::new(monitor),
            interval,
            shutdown_timeout,
            state,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Runs the check loop until `shutdown` is cancelled.
    ///
    /// A check in flight when shutdown arrives gets `shutdown_timeout` to
    /// finish before it is abandoned. The renderer is released on the way out.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), SchedulerError> {
        let mut rejected = None;
        self.state.send_if_modified(|state| match state {
            SchedulerState::Idle => {
                *state = SchedulerState::Running;
                true
            }
            SchedulerState::Running => {
                rejected = Some(SchedulerError::AlreadyRunning);
                false
            }
            SchedulerState::Stopped => {
                rejected = Some(SchedulerError::Stopped);
                false
            }
        });
        if let Some(err) = rejected {
            return Err(err);
        }

        let mut monitor = self.monitor.lock().await;
        info!(interval = fmt_duration(self.interval), "Scheduler started");
        let report = monitor.announce_start(chrono::Utc::now()).await;
        if !report.any_delivered() {
            warn!("Startup notification was not delivered");
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let check = monitor.check();
                    tokio::pin!(check);

                    tokio::select! {
                        result = &mut check => log_check(result),
                        _ = shutdown.cancelled() => {
                            info!(
                                grace = fmt_duration(self.shutdown_timeout),
                                "Shutdown requested during a check, letting it finish"
                            );
                            match tokio::time::timeout(self.shutdown_timeout, &mut check).await {
                                Ok(result) => log_check(result),
                                Err(_) => warn!(
                                    grace = fmt_duration(self.shutdown_timeout),
                                    "Check did not finish within the grace period, abandoning"
                                ),
                            }
                            break;
                        }
                    }
                }
            }
        }

        monitor.shutdown().await;
        self.state.send_replace(SchedulerState::Stopped);
        info!("Scheduler exiting gracefully");
        Ok(())
    }
}

fn log_check(result: Result<CheckSummary, CheckError>) {
    // Failures are already logged and escalated by the monitor.
    if let Ok(summary) = result
        && let Some(past) = summary.rolled_over
    {
        info!(appointment = %past, "Booked appointment rolled over during check");
    }
}
