//! Error types shared across the notification engine.

use thiserror::Error;

/// Errors raised by stores, channels and configuration.
///
/// None of these escape a scan: the scheduler converts every per-user failure
/// into a counter and (where a tier was already determined) a `failed` log entry.
#[derive(Debug, Error)]
pub enum NotifierError {
    /// Configuration could not be loaded or failed validation
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Subscription data is malformed (e.g. non-positive validity days)
    #[error("classification error: {0}")]
    ClassificationError(String),

    /// Transport or provider failure while delivering a reminder
    #[error("delivery error: {0}")]
    DeliveryError(String),

    /// A read or write against the notification log failed
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// A `sent` entry for the same (user, tier, day) already exists
    #[error("duplicate notification for user {user_id} ({template}) on {day}")]
    DuplicateEntry {
        user_id: i64,
        template: String,
        day: String,
    },

    /// The user/subscription store could not be listed at all
    #[error("user store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored record could not be decoded into its typed shape
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The cron driver could not be started or stopped
    #[error("scheduler error: {0}")]
    SchedulerError(String),

    /// The ops HTTP server could not bind or stopped with an error
    #[error("server error: {0}")]
    ServerError(String),
}

/// Result alias used throughout the crate.
pub type NotifierResult<T> = Result<T, NotifierError>;
