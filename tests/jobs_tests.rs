//! Integration tests for the cron-driven scheduler.
//!
//! These tests require the `background-jobs` feature to be enabled.

#![cfg(feature = "background-jobs")]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use subnotify::clock::SystemClock;
use subnotify::config::SchedulerConfig;
use subnotify::delivery::{DeliveryChannel, DeliveryOutcome};
use subnotify::jobs::{ReminderScheduler, ScanEngine, ScanSettings, ScanStatus};
use subnotify::model::{ReminderTier, User};
use subnotify::store::InMemoryStore;

struct AcceptAll;

#[async_trait]
impl DeliveryChannel for AcceptAll {
    async fn send(&self, _user: &User, _tier: ReminderTier, _remaining: i64) -> DeliveryOutcome {
        DeliveryOutcome::Delivered { message_id: None }
    }
}

fn scheduler(config: SchedulerConfig) -> ReminderScheduler {
    let store = Arc::new(InMemoryStore::new());
    let engine = ScanEngine::new(
        store.clone(),
        store,
        Arc::new(AcceptAll),
        Arc::new(SystemClock),
        ScanSettings::default(),
    );
    ReminderScheduler::new(engine, config)
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let scheduler = scheduler(SchedulerConfig::default());
    assert!(!scheduler.is_running());

    scheduler.start().await.expect("first start failed");
    assert!(scheduler.is_running());
    scheduler.start().await.expect("second start failed");
    assert!(scheduler.is_running());

    scheduler.stop().await.expect("first stop failed");
    assert!(!scheduler.is_running());
    scheduler.stop().await.expect("second stop failed");
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn disabled_scheduler_only_runs_manually() {
    let scheduler = scheduler(SchedulerConfig {
        enabled: false,
        ..SchedulerConfig::default()
    });

    scheduler.start().await.expect("start failed");
    assert!(!scheduler.is_running());

    let summary = scheduler.run_once().await;
    assert_eq!(summary.status, ScanStatus::Completed);
    assert!(summary.finished_at <= Utc::now());
}

#[tokio::test]
async fn invalid_cron_expression_is_rejected() {
    let scheduler = scheduler(SchedulerConfig {
        daily_cron: "every day at nine".to_string(),
        ..SchedulerConfig::default()
    });

    let err = scheduler.start().await.unwrap_err();
    assert!(err.to_string().contains("Invalid schedule"));
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn stats_are_available_without_scans() {
    let scheduler = scheduler(SchedulerConfig::default());
    let stats = scheduler.get_stats().await.unwrap();
    assert_eq!(stats.total_sent, 0);
    assert!(stats.recent_activity.is_empty());
}
