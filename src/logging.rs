//! Structured logging for the notification engine.
//!
//! - [`init_logging`] installs the fmt subscriber from [`LoggingConfig`]
//! - [`log_reminder_event`] records per-user outcomes inside a span carrying
//!   the user id and tier, so a single user's history can be filtered out of
//!   a busy scan

use tracing::{info, info_span, warn, Level};

use crate::config::LoggingConfig;
use crate::model::{ReminderTier, UserId};

/// Reminder lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderEvent {
    /// Provider accepted the reminder
    Sent,
    /// Delivery or persistence failed
    Failed,
    /// User was not eligible for this scan
    Skipped,
    /// A `sent` entry inside the dedup window already exists
    Deduplicated,
    /// Advisory `lastReminderSent` cache could not be updated
    CacheUpdateFailed,
}

impl std::fmt::Display for ReminderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReminderEvent::Sent => "sent",
            ReminderEvent::Failed => "failed",
            ReminderEvent::Skipped => "skipped",
            ReminderEvent::Deduplicated => "deduplicated",
            ReminderEvent::CacheUpdateFailed => "cache_update_failed",
        };
        write!(f, "{}", s)
    }
}

/// Log a reminder event for one user.
///
/// # Arguments
///
/// * `event` - What happened
/// * `user_id` - The user concerned
/// * `tier` - The tier being processed
/// * `details` - Optional reason or provider detail
pub fn log_reminder_event(
    event: ReminderEvent,
    user_id: UserId,
    tier: ReminderTier,
    details: Option<&str>,
) {
    let span = info_span!(
        "reminder_event",
        event = %event,
        user_id = user_id,
        tier = %tier,
    );
    let _enter = span.enter();

    match event {
        ReminderEvent::Failed | ReminderEvent::CacheUpdateFailed => {
            if let Some(d) = details {
                warn!(reason = %d, "Reminder event occurred");
            } else {
                warn!("Reminder event occurred");
            }
        }
        _ => {
            if let Some(d) = details {
                info!(details = %d, "Reminder event occurred");
            } else {
                info!("Reminder event occurred");
            }
        }
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global fmt subscriber.
///
/// Does nothing when logging is disabled or a subscriber is already set.
pub fn init_logging(config: &LoggingConfig) {
    if !config.enabled {
        return;
    }

    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(&config.level))
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_snake_case() {
        assert_eq!(ReminderEvent::Sent.to_string(), "sent");
        assert_eq!(ReminderEvent::CacheUpdateFailed.to_string(), "cache_update_failed");
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn init_is_idempotent() {
        let config = LoggingConfig::default();
        init_logging(&config);
        init_logging(&config);
        log_reminder_event(ReminderEvent::Skipped, 1, ReminderTier::SevenDay, None);
    }
}
