//! Subnotify - subscription expiry reminders
//!
//! Scans subscribed users, classifies each subscription into a reminder tier
//! (7 days, 3 days, 1 day, expired), filters by user preferences and a
//! rolling dedup window over the notification log, delivers through a
//! [`delivery::DeliveryChannel`], and records every attempt.
//!
//! # Features
//!
//! - `server` - Ops HTTP surface (health, stats, manual run). Enabled by default.
//! - `sqlite` - SQLite user and notification log store. Enabled by default.
//! - `postgres` - PostgreSQL store.
//! - `email` - Email delivery over an HTTP provider API. Enabled by default.
//! - `background-jobs` - Daily and hourly cron triggers. Enabled by default.
//!
//! # Example
//!
//! ```toml
//! # Engine only, bring your own stores and channel
//! subnotify = { version = "0.1", default-features = false }
//!
//! # Everything on PostgreSQL
//! subnotify = { version = "0.1", features = ["server", "postgres", "email"] }
//! ```

// Core modules (always available)
pub mod classifier;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod eligibility;
pub mod errors;
pub mod jobs;
pub mod logging;
pub mod model;
pub mod store;

// Ops server (requires "server" feature)
#[cfg(feature = "server")]
pub mod server;
