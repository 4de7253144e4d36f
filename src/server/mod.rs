//! Operational HTTP surface and binary entry points.
//!
//! - `handlers`  → health, stats and manual-run handlers
//! - `routes`    → router builder
//! - `logging`   → request id + timing middleware
//! - `bootstrap` → CLI command parsing for the binary

pub mod bootstrap;
pub mod handlers;
pub mod logging;
pub mod routes;

pub use bootstrap::{execute_command, parse_command, Command};
pub use handlers::{health_handler, run_scan_handler, stats_handler, AppState, HealthResponse};
pub use routes::build_router;
