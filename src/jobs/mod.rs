//! Scheduled reminder scans.
//!
//! Two cron triggers feed one scan entry point:
//!
//! - **Daily check** (default 09:00 UTC): the coarse cadence
//! - **Hourly check** (default top of every hour): picks up subscriptions
//!   whose window opened since the last run
//!
//! Both call [`ScanEngine::run_scan`], whose in-flight token collapses
//! overlapping firings (and manual `run_once` calls) into a single scan.
//! The cron driver requires the `background-jobs` feature.
//!
//! # Usage
//!
//! ```rust,ignore
//! use subnotify::jobs::{ReminderScheduler, ScanEngine, ScanSettings};
//!
//! let engine = ScanEngine::new(users, log_store, channel, clock, ScanSettings::default());
//! let scheduler = ReminderScheduler::new(engine, config.scheduler.clone());
//! scheduler.start().await?;
//! ```

mod scan;
mod stats;

pub use scan::{ScanEngine, ScanSettings, ScanStatus, ScanSummary};
pub use stats::{collect_stats, NotificationStats};

#[cfg(feature = "background-jobs")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "background-jobs")]
use std::sync::Arc;
#[cfg(feature = "background-jobs")]
use tokio::sync::Mutex;
#[cfg(feature = "background-jobs")]
use tokio_cron_scheduler::{Job, JobScheduler as TokioJobScheduler};
#[cfg(feature = "background-jobs")]
use tracing::{debug, error, info, warn};

#[cfg(feature = "background-jobs")]
use crate::config::SchedulerConfig;
use crate::errors::{NotifierError, NotifierResult};

/// Cron-driven front end for a [`ScanEngine`].
#[cfg(feature = "background-jobs")]
pub struct ReminderScheduler {
    engine: ScanEngine,
    config: SchedulerConfig,
    cron: Mutex<Option<TokioJobScheduler>>,
    accepting: Arc<AtomicBool>,
}

#[cfg(feature = "background-jobs")]
impl ReminderScheduler {
    pub fn new(engine: ScanEngine, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            cron: Mutex::new(None),
            accepting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn engine(&self) -> &ScanEngine {
        &self.engine
    }

    /// Whether cron triggers are currently registered.
    pub fn is_running(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Register both triggers and start the cron driver.
    ///
    /// Calling `start` while already running is a no-op.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut slot = self.cron.lock().await;
        if slot.is_some() {
            info!("Notification scheduler is already running");
            return Ok(());
        }

        if !self.config.enabled {
            warn!("Notification scheduler disabled by configuration; only manual runs are available");
            return Ok(());
        }

        info!("Starting notification scheduler");

        let scheduler = TokioJobScheduler::new()
            .await
            .map_err(|e| SchedulerError::SchedulerError(e.to_string()))?;

        scheduler
            .add(self.scan_job(&self.config.daily_cron, "daily")?)
            .await
            .map_err(|e| SchedulerError::SchedulerError(e.to_string()))?;
        info!(
            "Added daily notification check (schedule: {})",
            self.config.daily_cron
        );

        scheduler
            .add(self.scan_job(&self.config.hourly_cron, "hourly")?)
            .await
            .map_err(|e| SchedulerError::SchedulerError(e.to_string()))?;
        info!(
            "Added hourly notification check (schedule: {})",
            self.config.hourly_cron
        );

        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::SchedulerError(e.to_string()))?;

        self.accepting.store(true, Ordering::Release);
        *slot = Some(scheduler);

        info!("Notification scheduler started");
        Ok(())
    }

    /// Stop future triggers. A scan already in flight runs to completion.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.accepting.store(false, Ordering::Release);

        let taken = self.cron.lock().await.take();
        if let Some(mut scheduler) = taken {
            info!("Stopping notification scheduler");
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::SchedulerError(e.to_string()))?;
        }

        Ok(())
    }

    /// Run a scan right now (manual trigger for operators and tests).
    pub async fn run_once(&self) -> ScanSummary {
        info!("Manual notification check triggered");
        self.engine.run_scan().await
    }

    /// Sent/failed/pending totals plus recent activity.
    pub async fn get_stats(&self) -> NotifierResult<NotificationStats> {
        self.engine.stats().await
    }

    fn scan_job(&self, schedule: &str, trigger: &'static str) -> Result<Job, SchedulerError> {
        let engine = self.engine.clone();
        let accepting = Arc::clone(&self.accepting);

        Job::new_async(schedule, move |_uuid, _l| {
            let engine = engine.clone();
            let accepting = Arc::clone(&accepting);
            Box::pin(async move {
                if !accepting.load(Ordering::Acquire) {
                    debug!("Ignoring {} trigger after stop", trigger);
                    return;
                }

                info!("Running {} notification check", trigger);
                let summary = engine.run_scan().await;
                match summary.status {
                    ScanStatus::Completed => {
                        if summary.sent > 0 || summary.failed > 0 {
                            info!(
                                "{} check: {} sent, {} failed, {} skipped",
                                trigger, summary.sent, summary.failed, summary.skipped
                            );
                        }
                    }
                    ScanStatus::AlreadyRunning => {
                        debug!("{} check collapsed into the scan in flight", trigger);
                    }
                    ScanStatus::Aborted => {
                        error!(
                            "{} check aborted: {}",
                            trigger,
                            summary.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                }
            })
        })
        .map_err(|e| SchedulerError::InvalidSchedule(format!("{schedule}: {e}")))
    }
}

/// Errors that can occur in the job scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl From<SchedulerError> for NotifierError {
    fn from(err: SchedulerError) -> Self {
        NotifierError::SchedulerError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_errors_keep_their_category() {
        let err: NotifierError = SchedulerError::InvalidSchedule("* * *".into()).into();
        assert!(matches!(err, NotifierError::SchedulerError(ref msg) if msg.contains("* * *")));
    }
}
