//! Configuration system for subnotify.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `config.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `SUBNOTIFY_SERVER_HOST` - Ops server bind address
//! - `SUBNOTIFY_SERVER_PORT` - Ops server port
//! - `SUBNOTIFY_DATABASE_TYPE` - `sqlite` or `postgres`
//! - `SUBNOTIFY_DATABASE_URL` - Database connection URL
//! - `SUBNOTIFY_SCHEDULER_ENABLED` - Whether cron triggers are registered
//! - `SUBNOTIFY_DAILY_CRON` - Coarse daily scan trigger
//! - `SUBNOTIFY_HOURLY_CRON` - Fine hourly scan trigger
//! - `SUBNOTIFY_DEDUP_WINDOW_HOURS` - Lookback for "already sent" checks
//! - `SUBNOTIFY_SCAN_CONCURRENCY` - Users processed in parallel within a scan
//! - `SUBNOTIFY_DELIVERY_BASE_URL` - Email provider API base URL
//! - `SUBNOTIFY_DELIVERY_SENDER` - From address
//! - `SUBNOTIFY_DELIVERY_API_TOKEN` - Provider server token
//! - `SUBNOTIFY_DELIVERY_TIMEOUT_MS` - Per-send timeout
//! - `SUBNOTIFY_LOGGING_ENABLED` - Enable the fmt subscriber
//! - `SUBNOTIFY_LOG_LEVEL` - Log level (trace, debug, info, warn, error)

use config::Config;
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

use crate::errors::{NotifierError, NotifierResult};

/// Global configuration singleton.
static CONFIG: OnceLock<NotifierConfig> = OnceLock::new();

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Scan cadence and tuning
    pub scheduler: SchedulerConfig,
    /// Email provider settings
    pub delivery: DeliveryConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Ops HTTP server
    pub server: ServerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Scan cadence and tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Register cron triggers on `start()`
    pub enabled: bool,
    /// Cron expression for the coarse daily scan (default: 09:00 UTC)
    pub daily_cron: String,
    /// Cron expression for the fine hourly scan (default: top of every hour)
    pub hourly_cron: String,
    /// Lookback for `sent` entries that suppress a resend
    pub dedup_window_hours: u32,
    /// Maximum users processed concurrently within one scan
    pub concurrency: usize,
    /// How far back `get_stats` collects recent activity
    pub stats_lookback_days: u32,
    /// Maximum recent entries returned by `get_stats`
    pub stats_recent_limit: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_cron: "0 0 9 * * *".to_string(),
            hourly_cron: "0 0 * * * *".to_string(),
            dedup_window_hours: 24,
            concurrency: 4,
            stats_lookback_days: 7,
            stats_recent_limit: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn dedup_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.dedup_window_hours))
    }
}

/// Upper bound for `scheduler.concurrency`.
pub const MAX_SCAN_CONCURRENCY: usize = 256;
/// Upper bound for `scheduler.dedup_window_hours` (one leap year).
pub const MAX_DEDUP_WINDOW_HOURS: u32 = 24 * 366;
/// Upper bound for `scheduler.stats_lookback_days`.
pub const MAX_STATS_LOOKBACK_DAYS: u32 = 3650;

/// Email provider settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Provider API base URL
    pub base_url: String,
    /// Sender address
    pub sender: String,
    /// Provider server token
    pub api_token: String,
    /// Upper bound on a single send, in milliseconds
    pub timeout_ms: u64,
    /// Provider message stream
    pub message_stream: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.postmarkapp.com".to_string(),
            sender: "no-reply@localhost".to_string(),
            api_token: String::new(),
            timeout_ms: 10_000,
            message_stream: "outbound".to_string(),
        }
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database type: "sqlite" or "postgres"
    pub db_type: String,
    /// SQLite connection URL
    pub sqlite_url: String,
    /// PostgreSQL connection URL
    pub postgres_url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            sqlite_url: "sqlite://subnotify.db?mode=rwc".to_string(),
            postgres_url: "postgres://localhost/subnotify".to_string(),
        }
    }
}

/// Ops HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable logging
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl NotifierConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. `config.toml` file (optional)
    /// 3. Environment variables
    pub fn load() -> NotifierResult<Self> {
        let defaults = NotifierConfig::default();
        let cfg = |e: config::ConfigError| NotifierError::ConfigError(e.to_string());

        let builder = Config::builder()
            .set_default("scheduler.enabled", defaults.scheduler.enabled)
            .map_err(cfg)?
            .set_default("scheduler.daily_cron", defaults.scheduler.daily_cron)
            .map_err(cfg)?
            .set_default("scheduler.hourly_cron", defaults.scheduler.hourly_cron)
            .map_err(cfg)?
            .set_default(
                "scheduler.dedup_window_hours",
                i64::from(defaults.scheduler.dedup_window_hours),
            )
            .map_err(cfg)?
            .set_default("scheduler.concurrency", defaults.scheduler.concurrency as i64)
            .map_err(cfg)?
            .set_default(
                "scheduler.stats_lookback_days",
                i64::from(defaults.scheduler.stats_lookback_days),
            )
            .map_err(cfg)?
            .set_default(
                "scheduler.stats_recent_limit",
                i64::from(defaults.scheduler.stats_recent_limit),
            )
            .map_err(cfg)?
            .set_default("delivery.base_url", defaults.delivery.base_url)
            .map_err(cfg)?
            .set_default("delivery.sender", defaults.delivery.sender)
            .map_err(cfg)?
            .set_default("delivery.api_token", defaults.delivery.api_token)
            .map_err(cfg)?
            .set_default("delivery.timeout_ms", defaults.delivery.timeout_ms as i64)
            .map_err(cfg)?
            .set_default("delivery.message_stream", defaults.delivery.message_stream)
            .map_err(cfg)?
            .set_default("database.db_type", defaults.database.db_type)
            .map_err(cfg)?
            .set_default("database.sqlite_url", defaults.database.sqlite_url)
            .map_err(cfg)?
            .set_default("database.postgres_url", defaults.database.postgres_url)
            .map_err(cfg)?
            .set_default("server.host", defaults.server.host)
            .map_err(cfg)?
            .set_default("server.port", i64::from(defaults.server.port))
            .map_err(cfg)?
            .set_default("logging.enabled", defaults.logging.enabled)
            .map_err(cfg)?
            .set_default("logging.level", defaults.logging.level)
            .map_err(cfg)?
            // Load from config.toml (optional)
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables
            .set_override_option("server.host", env::var("SUBNOTIFY_SERVER_HOST").ok())
            .map_err(cfg)?
            .set_override_option("server.port", env_parsed::<i64>("SUBNOTIFY_SERVER_PORT"))
            .map_err(cfg)?
            .set_override_option("database.db_type", env::var("SUBNOTIFY_DATABASE_TYPE").ok())
            .map_err(cfg)?
            .set_override_option(
                "database.sqlite_url",
                env::var("SUBNOTIFY_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("sqlite")),
            )
            .map_err(cfg)?
            .set_override_option(
                "database.postgres_url",
                env::var("SUBNOTIFY_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("postgres")),
            )
            .map_err(cfg)?
            .set_override_option(
                "scheduler.enabled",
                env_parsed::<bool>("SUBNOTIFY_SCHEDULER_ENABLED"),
            )
            .map_err(cfg)?
            .set_override_option("scheduler.daily_cron", env::var("SUBNOTIFY_DAILY_CRON").ok())
            .map_err(cfg)?
            .set_override_option(
                "scheduler.hourly_cron",
                env::var("SUBNOTIFY_HOURLY_CRON").ok(),
            )
            .map_err(cfg)?
            .set_override_option(
                "scheduler.dedup_window_hours",
                env_parsed::<i64>("SUBNOTIFY_DEDUP_WINDOW_HOURS"),
            )
            .map_err(cfg)?
            .set_override_option(
                "scheduler.concurrency",
                env_parsed::<i64>("SUBNOTIFY_SCAN_CONCURRENCY"),
            )
            .map_err(cfg)?
            .set_override_option(
                "delivery.base_url",
                env::var("SUBNOTIFY_DELIVERY_BASE_URL").ok(),
            )
            .map_err(cfg)?
            .set_override_option("delivery.sender", env::var("SUBNOTIFY_DELIVERY_SENDER").ok())
            .map_err(cfg)?
            .set_override_option(
                "delivery.api_token",
                env::var("SUBNOTIFY_DELIVERY_API_TOKEN").ok(),
            )
            .map_err(cfg)?
            .set_override_option(
                "delivery.timeout_ms",
                env_parsed::<i64>("SUBNOTIFY_DELIVERY_TIMEOUT_MS"),
            )
            .map_err(cfg)?
            .set_override_option(
                "logging.enabled",
                env_parsed::<bool>("SUBNOTIFY_LOGGING_ENABLED"),
            )
            .map_err(cfg)?
            .set_override_option("logging.level", env::var("SUBNOTIFY_LOG_LEVEL").ok())
            .map_err(cfg)?;

        let settings = builder
            .build()
            .map_err(|e| NotifierError::ConfigError(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| NotifierError::ConfigError(format!("failed to deserialize config: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> NotifierResult<()> {
        if self.scheduler.daily_cron.trim().is_empty() {
            return Err(NotifierError::ConfigError(
                "scheduler.daily_cron cannot be empty".to_string(),
            ));
        }
        if self.scheduler.hourly_cron.trim().is_empty() {
            return Err(NotifierError::ConfigError(
                "scheduler.hourly_cron cannot be empty".to_string(),
            ));
        }
        if self.scheduler.dedup_window_hours == 0 {
            return Err(NotifierError::ConfigError(
                "scheduler.dedup_window_hours must be greater than 0".to_string(),
            ));
        }
        if self.scheduler.dedup_window_hours > MAX_DEDUP_WINDOW_HOURS {
            return Err(NotifierError::ConfigError(format!(
                "scheduler.dedup_window_hours must not exceed {MAX_DEDUP_WINDOW_HOURS}"
            )));
        }
        if self.scheduler.concurrency == 0 {
            return Err(NotifierError::ConfigError(
                "scheduler.concurrency must be greater than 0".to_string(),
            ));
        }
        if self.scheduler.concurrency > MAX_SCAN_CONCURRENCY {
            return Err(NotifierError::ConfigError(format!(
                "scheduler.concurrency must not exceed {MAX_SCAN_CONCURRENCY}"
            )));
        }
        if self.scheduler.stats_lookback_days > MAX_STATS_LOOKBACK_DAYS {
            return Err(NotifierError::ConfigError(format!(
                "scheduler.stats_lookback_days must not exceed {MAX_STATS_LOOKBACK_DAYS}"
            )));
        }

        if self.delivery.timeout_ms == 0 {
            return Err(NotifierError::ConfigError(
                "delivery.timeout_ms must be greater than 0".to_string(),
            ));
        }

        match self.database.db_type.as_str() {
            "sqlite" | "postgres" => {}
            other => {
                return Err(NotifierError::ConfigError(format!(
                    "database.db_type must be 'sqlite' or 'postgres', got '{other}'"
                )));
            }
        }

        if self.server.port == 0 {
            return Err(NotifierError::ConfigError(
                "server.port must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(NotifierError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        Ok(())
    }
}

/// Get the global configuration.
///
/// Loads on first access and caches it. Returns an error if loading or
/// validation fails.
pub fn get_config() -> NotifierResult<&'static NotifierConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = NotifierConfig::load()?;
    config.validate()?;

    // Another thread may have won the race; either value is equivalent.
    let _ = CONFIG.set(config);

    CONFIG
        .get()
        .ok_or_else(|| NotifierError::ConfigError("configuration not initialized".to_string()))
}

/// Initialize configuration explicitly.
///
/// Call this early to surface configuration errors at startup.
pub fn init_config() -> NotifierResult<&'static NotifierConfig> {
    get_config()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = NotifierConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.daily_cron, "0 0 9 * * *");
        assert_eq!(config.scheduler.hourly_cron, "0 0 * * * *");
        assert_eq!(config.scheduler.dedup_window_hours, 24);
        assert_eq!(config.delivery.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config = NotifierConfig::default();
        config.scheduler.concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(NotifierError::ConfigError(msg)) if msg.contains("concurrency")
        ));
    }

    #[test]
    fn rejects_oversized_scheduler_values() {
        let mut config = NotifierConfig::default();
        config.scheduler.concurrency = MAX_SCAN_CONCURRENCY + 1;
        assert!(config.validate().is_err());

        let mut config = NotifierConfig::default();
        config.scheduler.stats_lookback_days = 100_000_000;
        assert!(matches!(
            config.validate(),
            Err(NotifierError::ConfigError(msg)) if msg.contains("stats_lookback_days")
        ));

        let mut config = NotifierConfig::default();
        config.scheduler.dedup_window_hours = u32::MAX;
        assert!(config.validate().is_err());

        let mut config = NotifierConfig::default();
        config.scheduler.concurrency = MAX_SCAN_CONCURRENCY;
        config.scheduler.stats_lookback_days = MAX_STATS_LOOKBACK_DAYS;
        config.scheduler.dedup_window_hours = MAX_DEDUP_WINDOW_HOURS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_db_type() {
        let mut config = NotifierConfig::default();
        config.database.db_type = "mongo".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = NotifierConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn dedup_window_converts_to_hours() {
        let config = SchedulerConfig::default();
        assert_eq!(config.dedup_window(), chrono::Duration::hours(24));
    }
}
