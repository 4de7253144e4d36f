use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::{NotifierError, NotifierResult};
use crate::model::{
    NotificationLogEntry, NotificationPreferences, NotificationStatus, ReminderTier, User, UserId,
};

use super::{NotificationLogStore, UserStore};

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<NotificationLogEntry>,
    next_id: i64,
}

/// In-memory user store and notification log.
///
/// Appends and dedup checks run under one lock, so the (user, tier, day)
/// uniqueness rule holds under concurrent writers.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: Mutex<BTreeMap<UserId, User>>,
    logs: Mutex<LogState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let store = Self::new();
        for user in users {
            store.upsert_user(user);
        }
        store
    }

    pub fn upsert_user(&self, user: User) {
        let mut users = self.users.lock().unwrap_or_else(|p| p.into_inner());
        users.insert(user.id, user);
    }

    pub fn user(&self, user_id: UserId) -> Option<User> {
        let users = self.users.lock().unwrap_or_else(|p| p.into_inner());
        users.get(&user_id).cloned()
    }

    /// All log entries in append order.
    pub fn entries(&self) -> Vec<NotificationLogEntry> {
        let logs = self.logs.lock().unwrap_or_else(|p| p.into_inner());
        logs.entries.clone()
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn list_users_with_subscription(&self) -> NotifierResult<Vec<User>> {
        let users = self
            .users
            .lock()
            .map_err(|_| NotifierError::StoreUnavailable("user store lock poisoned".into()))?;

        Ok(users
            .values()
            .filter(|u| u.subscription.is_some())
            .cloned()
            .collect())
    }

    async fn update_notification_preferences(
        &self,
        user_id: UserId,
        prefs: &NotificationPreferences,
    ) -> NotifierResult<()> {
        let mut users = self
            .users
            .lock()
            .map_err(|_| NotifierError::PersistenceError("user store lock poisoned".into()))?;

        match users.get_mut(&user_id) {
            Some(user) => {
                user.notification_preferences = prefs.clone();
                Ok(())
            }
            None => Err(NotifierError::PersistenceError(format!(
                "user {user_id} not found"
            ))),
        }
    }

    async fn set_last_reminder_sent(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> NotifierResult<()> {
        let mut users = self
            .users
            .lock()
            .map_err(|_| NotifierError::PersistenceError("user store lock poisoned".into()))?;

        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| NotifierError::PersistenceError(format!("user {user_id} not found")))?;
        user.notification_preferences.last_reminder_sent = Some(at);
        Ok(())
    }
}

#[async_trait]
impl NotificationLogStore for InMemoryStore {
    async fn find_recent_sent(
        &self,
        user_id: UserId,
        tier: ReminderTier,
        since: DateTime<Utc>,
    ) -> NotifierResult<Option<NotificationLogEntry>> {
        let logs = self
            .logs
            .lock()
            .map_err(|_| NotifierError::PersistenceError("log store lock poisoned".into()))?;

        Ok(logs
            .entries
            .iter()
            .filter(|e| {
                e.user_id == user_id
                    && e.tier == tier
                    && e.status == NotificationStatus::Sent
                    && e.sent_at > since
            })
            .max_by_key(|e| e.sent_at)
            .cloned())
    }

    async fn append(&self, mut entry: NotificationLogEntry) -> NotifierResult<NotificationLogEntry> {
        let mut logs = self
            .logs
            .lock()
            .map_err(|_| NotifierError::PersistenceError("log store lock poisoned".into()))?;

        if entry.status == NotificationStatus::Sent {
            let day = entry.sent_day();
            let taken = logs.entries.iter().any(|e| {
                e.status == NotificationStatus::Sent
                    && e.user_id == entry.user_id
                    && e.tier == entry.tier
                    && e.sent_day() == day
            });
            if taken {
                return Err(NotifierError::DuplicateEntry {
                    user_id: entry.user_id,
                    template: entry.tier.template().to_string(),
                    day: day.to_string(),
                });
            }
        }

        logs.next_id += 1;
        entry.id = Some(logs.next_id);
        logs.entries.push(entry.clone());
        Ok(entry)
    }

    async fn count(&self, status: NotificationStatus) -> NotifierResult<u64> {
        let logs = self
            .logs
            .lock()
            .map_err(|_| NotifierError::PersistenceError("log store lock poisoned".into()))?;

        Ok(logs.entries.iter().filter(|e| e.status == status).count() as u64)
    }

    async fn recent(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> NotifierResult<Vec<NotificationLogEntry>> {
        let logs = self
            .logs
            .lock()
            .map_err(|_| NotifierError::PersistenceError("log store lock poisoned".into()))?;

        let mut recent: Vec<_> = logs
            .entries
            .iter()
            .filter(|e| e.sent_at >= since)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.sent_at.cmp(&a.sent_at).then(b.id.cmp(&a.id)));
        recent.truncate(limit as usize);
        Ok(recent)
    }
}
