use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::NotifierResult;
use crate::model::{NotificationLogEntry, NotificationStatus};
use crate::store::NotificationLogStore;

/// Read-only view over the notification log.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationStats {
    pub total_sent: u64,
    pub total_failed: u64,
    pub total_pending: u64,
    /// Newest first.
    pub recent_activity: Vec<NotificationLogEntry>,
}

pub async fn collect_stats(
    log_store: &dyn NotificationLogStore,
    since: DateTime<Utc>,
    limit: u32,
) -> NotifierResult<NotificationStats> {
    Ok(NotificationStats {
        total_sent: log_store.count(NotificationStatus::Sent).await?,
        total_failed: log_store.count(NotificationStatus::Failed).await?,
        total_pending: log_store.count(NotificationStatus::Pending).await?,
        recent_activity: log_store.recent(since, limit).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReminderTier;
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone};

    #[test]
    fn counts_by_status_and_limits_recent() {
        let store = InMemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();

        tokio_test::block_on(async {
            store
                .append(NotificationLogEntry::sent(1, ReminderTier::SevenDay, now, "a@example.com", None))
                .await
                .unwrap();
            store
                .append(NotificationLogEntry::failed(
                    2,
                    ReminderTier::OneDay,
                    now - Duration::hours(1),
                    "b@example.com",
                    "bounced",
                ))
                .await
                .unwrap();
            store
                .append(NotificationLogEntry::sent(
                    3,
                    ReminderTier::Expired,
                    now - Duration::days(30),
                    "c@example.com",
                    None,
                ))
                .await
                .unwrap();

            let stats = collect_stats(&store, now - Duration::days(7), 1).await.unwrap();
            assert_eq!(stats.total_sent, 2);
            assert_eq!(stats.total_failed, 1);
            assert_eq!(stats.total_pending, 0);
            assert_eq!(stats.recent_activity.len(), 1);
            assert_eq!(stats.recent_activity[0].user_id, 1);
        });
    }
}
