use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use sqlx::{query, query_as, query_scalar, FromRow};
use std::sync::Arc;
use tracing::{error, warn};

#[cfg(feature = "sqlite")]
use sqlx::SqlitePool;

#[cfg(feature = "postgres")]
use sqlx::PgPool;

use crate::config::get_config;
use crate::errors::{NotifierError, NotifierResult};
use crate::model::{
    DeliveryMetadata, NotificationLogEntry, NotificationPreferences, NotificationStatus,
    ReminderTier, Subscription, User, UserId,
};

use super::{NotificationLogStore, UserStore};

/// Raw `users` row. The two JSON columns are decoded at this boundary.
#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    subscription: Option<String>,
    notification_preferences: Option<String>,
}

impl UserRow {
    /// Decode into a typed user. Rows whose blobs do not fit the typed shape
    /// are skipped rather than failing the whole listing.
    fn into_user(self) -> Option<User> {
        let subscription = match self.subscription.as_deref() {
            None => return None,
            Some(raw) => match serde_json::from_str::<Option<Subscription>>(raw) {
                Ok(Some(sub)) => sub,
                Ok(None) => return None,
                Err(e) => {
                    warn!(user_id = self.id, "Skipping user with malformed subscription: {e}");
                    return None;
                }
            },
        };

        let notification_preferences = match self.notification_preferences.as_deref() {
            None => NotificationPreferences::default(),
            Some(raw) => match serde_json::from_str::<Option<NotificationPreferences>>(raw) {
                Ok(prefs) => prefs.unwrap_or_default(),
                Err(e) => {
                    warn!(user_id = self.id, "Skipping user with malformed preferences: {e}");
                    return None;
                }
            },
        };

        Some(User {
            id: self.id,
            name: self.name,
            email: self.email,
            subscription: Some(subscription),
            notification_preferences,
        })
    }
}

/// Raw `notification_logs` row.
#[derive(Debug, Clone, FromRow)]
struct LogRow {
    id: i64,
    user_id: i64,
    channel: String,
    template: String,
    status: String,
    sent_at: NaiveDateTime,
    email_address: Option<String>,
    delivery_id: Option<String>,
    error_message: Option<String>,
}

impl LogRow {
    fn into_entry(self) -> NotifierResult<NotificationLogEntry> {
        let tier = ReminderTier::from_template(&self.template).ok_or_else(|| {
            NotifierError::InvalidRecord(format!("unknown template '{}'", self.template))
        })?;

        Ok(NotificationLogEntry {
            id: Some(self.id),
            user_id: self.user_id,
            tier,
            channel: self.channel,
            status: self.status.parse()?,
            sent_at: self.sent_at.and_utc(),
            metadata: DeliveryMetadata {
                email_address: self.email_address,
                delivery_id: self.delivery_id,
                error_message: self.error_message,
            },
        })
    }
}

fn db_error(op: &str) -> impl Fn(sqlx::Error) -> NotifierError + '_ {
    move |e| {
        error!("{op} failed: {e}");
        NotifierError::PersistenceError(format!("database error: {e}"))
    }
}

fn append_error(entry: &NotificationLogEntry) -> impl Fn(sqlx::Error) -> NotifierError + '_ {
    move |e| {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_unique_violation() {
                return NotifierError::DuplicateEntry {
                    user_id: entry.user_id,
                    template: entry.tier.template().to_string(),
                    day: entry.sent_day().to_string(),
                };
            }
        }
        error!("append notification log failed: {e}");
        NotifierError::PersistenceError(format!("database error: {e}"))
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> NotifierResult<String> {
    serde_json::to_string(value)
        .map_err(|e| NotifierError::InvalidRecord(format!("failed to encode record: {e}")))
}

#[cfg(feature = "sqlite")]
const SQLITE_SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id                       INTEGER PRIMARY KEY,
        name                     TEXT NOT NULL,
        email                    TEXT NOT NULL UNIQUE,
        subscription             TEXT,
        notification_preferences TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notification_logs (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id       INTEGER NOT NULL REFERENCES users(id),
        channel       TEXT NOT NULL,
        template      TEXT NOT NULL,
        status        TEXT NOT NULL,
        sent_at       TEXT NOT NULL,
        sent_day      TEXT NOT NULL,
        email_address TEXT,
        delivery_id   TEXT,
        error_message TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_notification_logs_user ON notification_logs (user_id, template, status, sent_at)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_notification_logs_sent_once ON notification_logs (user_id, template, sent_day) WHERE status = 'sent'",
];

#[cfg(feature = "postgres")]
const POSTGRES_SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id                       BIGINT PRIMARY KEY,
        name                     TEXT NOT NULL,
        email                    TEXT NOT NULL UNIQUE,
        subscription             TEXT,
        notification_preferences TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notification_logs (
        id            BIGSERIAL PRIMARY KEY,
        user_id       BIGINT NOT NULL REFERENCES users(id),
        channel       TEXT NOT NULL,
        template      TEXT NOT NULL,
        status        TEXT NOT NULL,
        sent_at       TIMESTAMP NOT NULL,
        sent_day      TEXT NOT NULL,
        email_address TEXT,
        delivery_id   TEXT,
        error_message TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_notification_logs_user ON notification_logs (user_id, template, status, sent_at)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_notification_logs_sent_once ON notification_logs (user_id, template, sent_day) WHERE status = 'sent'",
];

const LOG_COLUMNS: &str =
    "id, user_id, channel, template, status, sent_at, email_address, delivery_id, error_message";

/// Unified database abstraction over SQLite and Postgres.
///
/// Available variants depend on enabled features:
/// - `sqlite` feature enables `Database::SQLite`
/// - `postgres` feature enables `Database::Postgres`
#[derive(Debug, Clone)]
pub enum Database {
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl Database {
    /// Connect using the global configuration.
    pub async fn new() -> NotifierResult<Arc<Self>> {
        let config = get_config()?;
        let db_config = &config.database;

        match db_config.db_type.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let pool = SqlitePool::connect(&db_config.sqlite_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to SQLite: {e}");
                        NotifierError::StoreUnavailable(format!(
                            "failed to connect to SQLite: {e}"
                        ))
                    })?;

                Ok(Arc::new(Database::SQLite(pool)))
            }
            #[cfg(not(feature = "sqlite"))]
            "sqlite" => Err(NotifierError::ConfigError(
                "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
            )),
            #[cfg(feature = "postgres")]
            "postgres" => {
                let pool = PgPool::connect(&db_config.postgres_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to PostgreSQL: {e}");
                        NotifierError::StoreUnavailable(format!(
                            "failed to connect to PostgreSQL: {e}"
                        ))
                    })?;

                Ok(Arc::new(Database::Postgres(pool)))
            }
            #[cfg(not(feature = "postgres"))]
            "postgres" => Err(NotifierError::ConfigError(
                "PostgreSQL support not compiled in. Enable the 'postgres' feature.".to_string(),
            )),
            other => Err(NotifierError::ConfigError(format!(
                "unsupported database type: {other}"
            ))),
        }
    }

    pub fn db_type(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            Database::Postgres(_) => "postgres",
        }
    }

    /// Create the `users` and `notification_logs` tables if missing.
    pub async fn ensure_schema(&self) -> NotifierResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                for statement in SQLITE_SCHEMA {
                    query(statement)
                        .execute(pool)
                        .await
                        .map_err(db_error("SQLite ensure_schema"))?;
                }
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                for statement in POSTGRES_SCHEMA {
                    query(statement)
                        .execute(pool)
                        .await
                        .map_err(db_error("Postgres ensure_schema"))?;
                }
            }
        }

        Ok(())
    }

    /// Insert or replace a user record.
    pub async fn upsert_user(&self, user: &User) -> NotifierResult<()> {
        let subscription = user.subscription.as_ref().map(encode_json).transpose()?;
        let prefs = encode_json(&user.notification_preferences)?;

        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    r#"
                    INSERT INTO users (id, name, email, subscription, notification_preferences)
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        name                     = excluded.name,
                        email                    = excluded.email,
                        subscription             = excluded.subscription,
                        notification_preferences = excluded.notification_preferences
                    "#,
                )
                .bind(user.id)
                .bind(&user.name)
                .bind(&user.email)
                .bind(&subscription)
                .bind(&prefs)
                .execute(pool)
                .await
                .map_err(db_error("SQLite upsert_user"))?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    r#"
                    INSERT INTO users (id, name, email, subscription, notification_preferences)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (id) DO UPDATE SET
                        name                     = EXCLUDED.name,
                        email                    = EXCLUDED.email,
                        subscription             = EXCLUDED.subscription,
                        notification_preferences = EXCLUDED.notification_preferences
                    "#,
                )
                .bind(user.id)
                .bind(&user.name)
                .bind(&user.email)
                .bind(&subscription)
                .bind(&prefs)
                .execute(pool)
                .await
                .map_err(db_error("Postgres upsert_user"))?;
            }
        }

        Ok(())
    }

    /// Lightweight connectivity check.
    pub async fn ping(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query("SELECT 1").execute(pool).await.is_ok(),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query("SELECT 1").execute(pool).await.is_ok(),
        }
    }
}

#[async_trait]
impl UserStore for Database {
    async fn list_users_with_subscription(&self) -> NotifierResult<Vec<User>> {
        const SQL: &str = "SELECT id, name, email, subscription, notification_preferences \
                           FROM users WHERE subscription IS NOT NULL ORDER BY id";

        let rows = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as::<_, UserRow>(SQL).fetch_all(pool).await,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_as::<_, UserRow>(SQL).fetch_all(pool).await,
        }
        .map_err(|e| {
            error!("list_users_with_subscription failed: {e}");
            NotifierError::StoreUnavailable(format!("database error: {e}"))
        })?;

        Ok(rows.into_iter().filter_map(UserRow::into_user).collect())
    }

    async fn update_notification_preferences(
        &self,
        user_id: UserId,
        prefs: &NotificationPreferences,
    ) -> NotifierResult<()> {
        let encoded = encode_json(prefs)?;

        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query("UPDATE users SET notification_preferences = ? WHERE id = ?")
                    .bind(&encoded)
                    .bind(user_id)
                    .execute(pool)
                    .await
                    .map_err(db_error("SQLite update_notification_preferences"))?
                    .rows_affected()
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query("UPDATE users SET notification_preferences = $1 WHERE id = $2")
                    .bind(&encoded)
                    .bind(user_id)
                    .execute(pool)
                    .await
                    .map_err(db_error("Postgres update_notification_preferences"))?
                    .rows_affected()
            }
        };

        if rows_affected == 0 {
            return Err(NotifierError::PersistenceError(format!(
                "user {user_id} not found"
            )));
        }

        Ok(())
    }

    async fn set_last_reminder_sent(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> NotifierResult<()> {
        // Patched in place so concurrent preference edits are kept.
        let at = at.to_rfc3339_opts(SecondsFormat::AutoSi, true);

        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query(
                r#"
                UPDATE users
                SET notification_preferences =
                    json_set(COALESCE(notification_preferences, '{}'), '$.lastReminderSent', ?)
                WHERE id = ?
                "#,
            )
            .bind(&at)
            .bind(user_id)
            .execute(pool)
            .await
            .map_err(db_error("SQLite set_last_reminder_sent"))?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query(
                r#"
                UPDATE users
                SET notification_preferences = jsonb_set(
                    COALESCE(notification_preferences, '{}')::jsonb,
                    '{lastReminderSent}',
                    to_jsonb($1::text)
                )::text
                WHERE id = $2
                "#,
            )
            .bind(&at)
            .bind(user_id)
            .execute(pool)
            .await
            .map_err(db_error("Postgres set_last_reminder_sent"))?
            .rows_affected(),
        };

        if rows_affected == 0 {
            return Err(NotifierError::PersistenceError(format!(
                "user {user_id} not found"
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationLogStore for Database {
    async fn find_recent_sent(
        &self,
        user_id: UserId,
        tier: ReminderTier,
        since: DateTime<Utc>,
    ) -> NotifierResult<Option<NotificationLogEntry>> {
        let since = since.naive_utc();
        let sent = NotificationStatus::Sent.as_str();

        let row = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as::<_, LogRow>(&format!(
                "SELECT {LOG_COLUMNS} FROM notification_logs \
                 WHERE user_id = ? AND template = ? AND status = ? AND sent_at > ? \
                 ORDER BY sent_at DESC LIMIT 1"
            ))
            .bind(user_id)
            .bind(tier.template())
            .bind(sent)
            .bind(since)
            .fetch_optional(pool)
            .await
            .map_err(db_error("SQLite find_recent_sent"))?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_as::<_, LogRow>(&format!(
                "SELECT {LOG_COLUMNS} FROM notification_logs \
                 WHERE user_id = $1 AND template = $2 AND status = $3 AND sent_at > $4 \
                 ORDER BY sent_at DESC LIMIT 1"
            ))
            .bind(user_id)
            .bind(tier.template())
            .bind(sent)
            .bind(since)
            .fetch_optional(pool)
            .await
            .map_err(db_error("Postgres find_recent_sent"))?,
        };

        row.map(LogRow::into_entry).transpose()
    }

    async fn append(&self, mut entry: NotificationLogEntry) -> NotifierResult<NotificationLogEntry> {
        let sent_at = entry.sent_at.naive_utc();
        let sent_day = entry.sent_day().to_string();

        let id = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_scalar::<_, i64>(
                r#"
                INSERT INTO notification_logs (
                    user_id, channel, template, status, sent_at, sent_day,
                    email_address, delivery_id, error_message
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(entry.user_id)
            .bind(&entry.channel)
            .bind(entry.tier.template())
            .bind(entry.status.as_str())
            .bind(sent_at)
            .bind(&sent_day)
            .bind(&entry.metadata.email_address)
            .bind(&entry.metadata.delivery_id)
            .bind(&entry.metadata.error_message)
            .fetch_one(pool)
            .await
            .map_err(append_error(&entry))?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_scalar::<_, i64>(
                r#"
                INSERT INTO notification_logs (
                    user_id, channel, template, status, sent_at, sent_day,
                    email_address, delivery_id, error_message
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING id
                "#,
            )
            .bind(entry.user_id)
            .bind(&entry.channel)
            .bind(entry.tier.template())
            .bind(entry.status.as_str())
            .bind(sent_at)
            .bind(&sent_day)
            .bind(&entry.metadata.email_address)
            .bind(&entry.metadata.delivery_id)
            .bind(&entry.metadata.error_message)
            .fetch_one(pool)
            .await
            .map_err(append_error(&entry))?,
        };

        entry.id = Some(id);
        Ok(entry)
    }

    async fn count(&self, status: NotificationStatus) -> NotifierResult<u64> {
        let count = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query_scalar::<_, i64>("SELECT COUNT(*) FROM notification_logs WHERE status = ?")
                    .bind(status.as_str())
                    .fetch_one(pool)
                    .await
                    .map_err(db_error("SQLite count"))?
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query_scalar::<_, i64>("SELECT COUNT(*) FROM notification_logs WHERE status = $1")
                    .bind(status.as_str())
                    .fetch_one(pool)
                    .await
                    .map_err(db_error("Postgres count"))?
            }
        };

        Ok(count.max(0) as u64)
    }

    async fn recent(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> NotifierResult<Vec<NotificationLogEntry>> {
        let since = since.naive_utc();
        let limit = i64::from(limit);

        let rows = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as::<_, LogRow>(&format!(
                "SELECT {LOG_COLUMNS} FROM notification_logs \
                 WHERE sent_at >= ? ORDER BY sent_at DESC, id DESC LIMIT ?"
            ))
            .bind(since)
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(db_error("SQLite recent"))?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_as::<_, LogRow>(&format!(
                "SELECT {LOG_COLUMNS} FROM notification_logs \
                 WHERE sent_at >= $1 ORDER BY sent_at DESC, id DESC LIMIT $2"
            ))
            .bind(since)
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(db_error("Postgres recent"))?,
        };

        rows.into_iter().map(LogRow::into_entry).collect()
    }
}
