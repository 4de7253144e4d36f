//! Command-line entry points for the `subnotify` binary.
//!
//! ```text
//! subnotify              # scheduler + ops server until Ctrl-C
//! subnotify run-once     # one scan, summary as JSON
//! subnotify stats        # notification stats as JSON
//! ```

use tracing::info;

use crate::errors::{NotifierError, NotifierResult};
use crate::jobs::{ReminderScheduler, ScanStatus};

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the cron scheduler and the ops server.
    Serve,
    RunOnce,
    Stats,
    Help,
}

/// Parse CLI arguments. `args[0]` is the program name.
///
/// Unknown commands fall back to [`Command::Help`].
pub fn parse_command(args: &[String]) -> Command {
    match args.get(1).map(String::as_str) {
        None | Some("serve") => Command::Serve,
        Some("run-once") => Command::RunOnce,
        Some("stats") => Command::Stats,
        Some(other) => {
            if !matches!(other, "help" | "--help" | "-h") {
                eprintln!("Unknown command: {other}");
            }
            Command::Help
        }
    }
}

pub fn print_usage() {
    println!("Usage: subnotify [serve | run-once | stats]");
    println!();
    println!("  serve      Run scheduled reminder scans and the ops server (default)");
    println!("  run-once   Run a single scan and print its summary");
    println!("  stats      Print notification totals and recent activity");
}

/// Execute a one-shot command.
///
/// Returns `Ok(true)` when the command ran and the process should exit,
/// `Ok(false)` when startup should continue with the server.
pub async fn execute_command(scheduler: &ReminderScheduler, cmd: &Command) -> NotifierResult<bool> {
    match cmd {
        Command::Serve => Ok(false),
        Command::Help => {
            print_usage();
            Ok(true)
        }
        Command::RunOnce => {
            let summary = scheduler.run_once().await;
            println!("{}", to_pretty_json(&summary)?);

            if summary.status == ScanStatus::Aborted {
                return Err(NotifierError::StoreUnavailable(
                    summary.error.unwrap_or_else(|| "scan aborted".to_string()),
                ));
            }
            info!("Scan {} finished", summary.scan_id);
            Ok(true)
        }
        Command::Stats => {
            let stats = scheduler.get_stats().await?;
            println!("{}", to_pretty_json(&stats)?);
            Ok(true)
        }
    }
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> NotifierResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| NotifierError::InvalidRecord(format!("failed to encode output: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_args_serves() {
        assert_eq!(parse_command(&args(&["subnotify"])), Command::Serve);
        assert_eq!(parse_command(&args(&["subnotify", "serve"])), Command::Serve);
    }

    #[test]
    fn one_shot_commands() {
        assert_eq!(parse_command(&args(&["subnotify", "run-once"])), Command::RunOnce);
        assert_eq!(parse_command(&args(&["subnotify", "stats"])), Command::Stats);
    }

    #[test]
    fn unknown_command_prints_help() {
        assert_eq!(parse_command(&args(&["subnotify", "--help"])), Command::Help);
        assert_eq!(parse_command(&args(&["subnotify", "frobnicate"])), Command::Help);
    }
}
