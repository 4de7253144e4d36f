//! Storage interfaces consumed by the scheduler.
//!
//! - [`UserStore`] lists subscribed users and persists preference updates.
//! - [`NotificationLogStore`] is the append-only delivery log and the only
//!   source of truth for dedup.
//!
//! Two implementations ship with the crate:
//! - [`InMemoryStore`] for tests and embedding
//! - [`Database`] over SQLite/Postgres (requires the `database` feature)

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::NotifierResult;
use crate::model::{
    NotificationLogEntry, NotificationPreferences, NotificationStatus, ReminderTier, User, UserId,
};

mod memory;

#[cfg(feature = "database")]
pub mod database;

pub use memory::InMemoryStore;

#[cfg(feature = "database")]
pub use database::Database;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Snapshot of every user whose subscription is non-null.
    ///
    /// Fails with `StoreUnavailable` when the listing cannot be produced.
    async fn list_users_with_subscription(&self) -> NotifierResult<Vec<User>>;

    async fn update_notification_preferences(
        &self,
        user_id: UserId,
        prefs: &NotificationPreferences,
    ) -> NotifierResult<()>;

    /// Set only the advisory `lastReminderSent` field, leaving every other
    /// preference as currently stored.
    async fn set_last_reminder_sent(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> NotifierResult<()>;
}

#[async_trait]
pub trait NotificationLogStore: Send + Sync {
    /// Latest `sent` entry for (user, tier) with `sent_at` strictly after `since`.
    async fn find_recent_sent(
        &self,
        user_id: UserId,
        tier: ReminderTier,
        since: DateTime<Utc>,
    ) -> NotifierResult<Option<NotificationLogEntry>>;

    /// Append an entry and return it with its assigned id.
    ///
    /// A second `sent` entry for the same (user, tier, UTC day) is rejected with
    /// `DuplicateEntry`.
    async fn append(&self, entry: NotificationLogEntry) -> NotifierResult<NotificationLogEntry>;

    async fn count(&self, status: NotificationStatus) -> NotifierResult<u64>;

    /// Entries with `sent_at >= since`, newest first.
    async fn recent(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> NotifierResult<Vec<NotificationLogEntry>>;
}
