use std::env;

use serial_test::serial;
use subnotify::config::NotifierConfig;

const OVERRIDES: [&str; 5] = [
    "SUBNOTIFY_SERVER_PORT",
    "SUBNOTIFY_DEDUP_WINDOW_HOURS",
    "SUBNOTIFY_SCAN_CONCURRENCY",
    "SUBNOTIFY_DATABASE_URL",
    "SUBNOTIFY_LOG_LEVEL",
];

fn clear_overrides() {
    for key in OVERRIDES {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn load_without_overrides_is_valid() {
    clear_overrides();

    let config = NotifierConfig::load().expect("config should load");

    // A local config.toml may change values, so only check they validate.
    assert!(config.validate().is_ok());
    assert!(config.scheduler.concurrency > 0);
}

#[test]
#[serial]
fn env_overrides_win() {
    clear_overrides();
    env::set_var("SUBNOTIFY_SERVER_PORT", "9191");
    env::set_var("SUBNOTIFY_DEDUP_WINDOW_HOURS", "12");
    env::set_var("SUBNOTIFY_SCAN_CONCURRENCY", "8");
    env::set_var("SUBNOTIFY_DATABASE_URL", "sqlite::memory:");

    let config = NotifierConfig::load().expect("config should load");

    assert_eq!(config.server.port, 9191);
    assert_eq!(config.scheduler.dedup_window_hours, 12);
    assert_eq!(config.scheduler.dedup_window(), chrono::Duration::hours(12));
    assert_eq!(config.scheduler.concurrency, 8);
    assert_eq!(config.database.sqlite_url, "sqlite::memory:");

    clear_overrides();
}

#[test]
#[serial]
fn invalid_override_fails_validation() {
    clear_overrides();
    env::set_var("SUBNOTIFY_LOG_LEVEL", "chatty");

    let config = NotifierConfig::load().expect("config should load");
    assert!(config.validate().is_err());

    clear_overrides();
}
