use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

use subnotify::clock::SystemClock;
use subnotify::config::init_config;
use subnotify::delivery::EmailChannel;
use subnotify::errors::{NotifierError, NotifierResult};
use subnotify::jobs::{ReminderScheduler, ScanEngine, ScanSettings};
use subnotify::logging::init_logging;
use subnotify::server::{build_router, execute_command, parse_command, AppState};
use subnotify::store::Database;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("subnotify exited with error: {e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> NotifierResult<()> {
    let config = init_config()?;
    init_logging(&config.logging);

    let db = Database::new().await?;
    db.ensure_schema().await?;
    info!("Connected to {} store", db.db_type());

    let channel = Arc::new(EmailChannel::from_config(&config.delivery)?);
    let engine = ScanEngine::new(
        db.clone(),
        db.clone(),
        channel,
        Arc::new(SystemClock),
        ScanSettings::from_config(&config.scheduler, &config.delivery),
    );
    let scheduler = Arc::new(ReminderScheduler::new(engine, config.scheduler.clone()));

    let args: Vec<String> = std::env::args().collect();
    let cmd = parse_command(&args);
    if execute_command(&scheduler, &cmd).await? {
        return Ok(());
    }

    scheduler.start().await?;

    let app = build_router(AppState {
        scheduler: Arc::clone(&scheduler),
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| NotifierError::ConfigError(format!("invalid server address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| NotifierError::ServerError(format!("failed to bind {addr}: {e}")))?;
    info!("Ops server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| NotifierError::ServerError(e.to_string()))?;

    scheduler.stop().await?;
    info!("subnotify stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
