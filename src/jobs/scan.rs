//! One reminder scan over every subscribed user.
//!
//! A scan takes a single `now`, lists the user snapshot, and processes each
//! user independently: classify, check eligibility, deliver, record. Users
//! never share mutable state, so they run concurrently up to the configured
//! limit. The snapshot is de-duplicated by user id and only one scan runs at
//! a time, which makes each user's check-then-write sequence the only one in
//! flight for that user.
//!
//! A scan that dies halfway owes nothing: re-running derives the same tiers
//! and the log's `sent` entries turn the already-delivered users into no-ops.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classifier::{classify, remaining_days};
use crate::clock::Clock;
use crate::config::{DeliveryConfig, SchedulerConfig, MAX_SCAN_CONCURRENCY};
use crate::delivery::{DeliveryChannel, DeliveryOutcome};
use crate::eligibility::{Eligibility, EligibilityFilter};
use crate::errors::{NotifierError, NotifierResult};
use crate::logging::{log_reminder_event, ReminderEvent};
use crate::model::{NotificationLogEntry, ReminderTier, User};
use crate::store::{NotificationLogStore, UserStore};

use super::stats::{collect_stats, NotificationStats};

/// Tuning for a scan.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub concurrency: usize,
    pub dedup_window: chrono::Duration,
    pub delivery_timeout: Duration,
    pub stats_lookback: chrono::Duration,
    pub stats_recent_limit: u32,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default(), &DeliveryConfig::default())
    }
}

impl ScanSettings {
    pub fn from_config(scheduler: &SchedulerConfig, delivery: &DeliveryConfig) -> Self {
        Self {
            concurrency: scheduler.concurrency.clamp(1, MAX_SCAN_CONCURRENCY),
            dedup_window: scheduler.dedup_window(),
            delivery_timeout: delivery.timeout(),
            stats_lookback: chrono::Duration::days(i64::from(scheduler.stats_lookback_days)),
            stats_recent_limit: scheduler.stats_recent_limit,
        }
    }
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Completed,
    /// Another scan held the in-flight token; nothing was done.
    AlreadyRunning,
    /// The user store could not be listed; nothing was written.
    Aborted,
}

/// Counts reported by every scan, including ones that did nothing.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub scan_id: String,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: u32,
    pub sent: u32,
    pub failed: u32,
    pub skipped: u32,
    pub error: Option<String>,
}

impl ScanSummary {
    fn new(scan_id: String, status: ScanStatus, started_at: DateTime<Utc>) -> Self {
        Self {
            scan_id,
            status,
            started_at,
            finished_at: started_at,
            processed: 0,
            sent: 0,
            failed: 0,
            skipped: 0,
            error: None,
        }
    }

    fn record(&mut self, outcome: UserOutcome) {
        self.processed += 1;
        match outcome {
            UserOutcome::Sent => self.sent += 1,
            UserOutcome::Failed => self.failed += 1,
            UserOutcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserOutcome {
    Sent,
    Failed,
    Skipped,
}

/// Holds the in-flight token; released on drop, including on panic.
struct InFlight {
    flag: Arc<AtomicBool>,
}

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Orchestrates classify, filter, deliver and record for a whole scan.
///
/// Cheap to clone; clones share the in-flight token.
#[derive(Clone)]
pub struct ScanEngine {
    users: Arc<dyn UserStore>,
    log_store: Arc<dyn NotificationLogStore>,
    channel: Arc<dyn DeliveryChannel>,
    clock: Arc<dyn Clock>,
    filter: EligibilityFilter,
    settings: ScanSettings,
    in_flight: Arc<AtomicBool>,
}

impl ScanEngine {
    pub fn new(
        users: Arc<dyn UserStore>,
        log_store: Arc<dyn NotificationLogStore>,
        channel: Arc<dyn DeliveryChannel>,
        clock: Arc<dyn Clock>,
        settings: ScanSettings,
    ) -> Self {
        let filter = EligibilityFilter::new(Arc::clone(&log_store), settings.dedup_window);
        Self {
            users,
            log_store,
            channel,
            clock,
            filter,
            settings,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a scan currently holds the in-flight token.
    pub fn is_scanning(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one scan. Never fails: every problem ends up in the summary.
    pub async fn run_scan(&self) -> ScanSummary {
        let scan_id = Uuid::new_v4().to_string();
        let started_at = self.clock.now();

        let Some(_token) = InFlight::acquire(&self.in_flight) else {
            info!(scan_id = %scan_id, "Scan already in flight, trigger collapsed");
            return ScanSummary::new(scan_id, ScanStatus::AlreadyRunning, started_at);
        };

        let span = info_span!("reminder_scan", scan_id = %scan_id);
        self.scan(scan_id, started_at).instrument(span).await
    }

    async fn scan(&self, scan_id: String, now: DateTime<Utc>) -> ScanSummary {
        let mut summary = ScanSummary::new(scan_id, ScanStatus::Completed, now);
        info!("Running notification scan at {}", now);

        let users = match self.users.list_users_with_subscription().await {
            Ok(users) => users,
            Err(e) => {
                error!("Notification scan aborted: {e}");
                summary.status = ScanStatus::Aborted;
                summary.error = Some(e.to_string());
                summary.finished_at = self.clock.now();
                return summary;
            }
        };

        let total = users.len();
        let mut seen = HashSet::with_capacity(total);
        let users: Vec<User> = users.into_iter().filter(|u| seen.insert(u.id)).collect();
        if users.len() < total {
            warn!(
                "User snapshot listed {} duplicate record(s); processing each user once",
                total - users.len()
            );
        }
        info!("Found {} users with subscriptions", users.len());

        let permits = self.settings.concurrency.clamp(1, MAX_SCAN_CONCURRENCY);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks = JoinSet::new();

        for user in users {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Scan worker pool closed: {e}");
                    break;
                }
            };
            let engine = self.clone();
            tasks.spawn(
                async move {
                    let _permit = permit;
                    engine.process_user(user, now).await
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!("User task ended abnormally: {e}");
                    summary.record(UserOutcome::Failed);
                }
            }
        }

        summary.finished_at = self.clock.now();
        info!(
            processed = summary.processed,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "Notification scan completed"
        );
        summary
    }

    async fn process_user(&self, user: User, now: DateTime<Utc>) -> UserOutcome {
        let Some(subscription) = user.subscription.as_ref() else {
            return UserOutcome::Skipped;
        };

        let expiry = match subscription.expiry_instant() {
            Ok(Some(expiry)) => expiry,
            Ok(None) => return UserOutcome::Skipped,
            Err(e) => {
                warn!(user_id = user.id, "Treating subscription as having no tier: {e}");
                return UserOutcome::Skipped;
            }
        };

        let tier = classify(expiry, now);
        if tier.is_none() {
            return UserOutcome::Skipped;
        }

        match self
            .filter
            .check(user.id, &user.notification_preferences, tier, now)
            .await
        {
            Ok(Eligibility::Eligible) => {}
            Ok(Eligibility::AlreadySent) => {
                log_reminder_event(ReminderEvent::Deduplicated, user.id, tier, None);
                return UserOutcome::Skipped;
            }
            Ok(reason) => {
                log_reminder_event(ReminderEvent::Skipped, user.id, tier, Some(&reason.to_string()));
                return UserOutcome::Skipped;
            }
            Err(e) => {
                // Dedup state unknown: do not send, leave a trace for the operator.
                let reason = format!("dedup check failed: {e}");
                self.record_failure(&user, tier, &reason).await;
                return UserOutcome::Failed;
            }
        }

        let remaining = remaining_days(expiry, now);
        info!(user_id = user.id, %tier, remaining_days = remaining, "Sending reminder");

        let outcome = match tokio::time::timeout(
            self.settings.delivery_timeout,
            self.channel.send(&user, tier, remaining),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => DeliveryOutcome::failed(format!(
                "delivery timed out after {}ms",
                self.settings.delivery_timeout.as_millis()
            )),
        };

        let attempted_at = self.clock.now();
        match outcome {
            DeliveryOutcome::Delivered { message_id } => {
                let entry = NotificationLogEntry::sent(
                    user.id,
                    tier,
                    attempted_at,
                    &user.email,
                    message_id.clone(),
                );
                match self.log_store.append(entry).await {
                    Ok(_) => {}
                    Err(NotifierError::DuplicateEntry { .. }) => {
                        warn!(user_id = user.id, %tier, "Send already recorded for today by another writer");
                    }
                    Err(e) => {
                        // The reminder went out but dedup cannot see it; a later scan may resend.
                        log_reminder_event(
                            ReminderEvent::Failed,
                            user.id,
                            tier,
                            Some(&format!("delivered but not recorded: {e}")),
                        );
                        return UserOutcome::Failed;
                    }
                }

                self.update_last_sent(&user, attempted_at).await;
                log_reminder_event(ReminderEvent::Sent, user.id, tier, message_id.as_deref());
                UserOutcome::Sent
            }
            DeliveryOutcome::Failed { error } => {
                self.record_failure(&user, tier, &error).await;
                UserOutcome::Failed
            }
        }
    }

    /// Append a `failed` entry. A write failure here is only logged.
    async fn record_failure(&self, user: &User, tier: ReminderTier, reason: &str) {
        let entry = NotificationLogEntry::failed(user.id, tier, self.clock.now(), &user.email, reason);
        if let Err(e) = self.log_store.append(entry).await {
            error!(user_id = user.id, %tier, "Failed to record failed delivery: {e}");
        }
        log_reminder_event(ReminderEvent::Failed, user.id, tier, Some(reason));
    }

    /// Refresh the advisory `lastReminderSent` cache. Best effort.
    ///
    /// Only that field is written; the snapshot's other preferences may be
    /// stale by now.
    async fn update_last_sent(&self, user: &User, sent_at: DateTime<Utc>) {
        if let Err(e) = self.users.set_last_reminder_sent(user.id, sent_at).await {
            log_reminder_event(
                ReminderEvent::CacheUpdateFailed,
                user.id,
                ReminderTier::None,
                Some(&e.to_string()),
            );
        }
    }

    /// Aggregate counts and recent activity from the notification log.
    pub async fn stats(&self) -> NotifierResult<NotificationStats> {
        let since = self
            .clock
            .now()
            .checked_sub_signed(self.settings.stats_lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        collect_stats(
            self.log_store.as_ref(),
            since,
            self.settings.stats_recent_limit,
        )
        .await
    }
}
