/// Hype Poster
///
/// Posts a few fresh, never-repeated updates per day to X, spread across
/// waking hours:
/// - Generates candidates from templates or a hosted language model
/// - Rejects anything already posted (history survives restarts)
/// - Honours a randomized daily target and an optional monthly cap
/// - Sleeps through quiet hours and resumes in the morning wake window
/// - Optionally replies to and reposts recent posts found by keyword
/// - Optionally serves a read-only status API

use anyhow::Result;
use hype_poster::{bot, config, http_server, status::SharedStatus, status::StatusReporter};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    pretty_env_logger::init();

    log::info!("Starting Hype Poster...");

    // Load configuration from environment
    let cfg = config::Config::from_env()?;

    // Validate configuration
    cfg.validate()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Interrupt received; shutting down after the current step...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let reporter: Option<Arc<dyn StatusReporter>> = match cfg.status_port {
        Some(port) => {
            let status = SharedStatus::new();
            let state = http_server::AppState {
                status: status.clone(),
            };
            tokio::spawn(async move {
                if let Err(e) = http_server::start_server(state, port).await {
                    log::error!("Status server stopped: {:#}", e);
                }
            });
            Some(Arc::new(status) as Arc<dyn StatusReporter>)
        }
        None => None,
    };

    // Run the bot
    let summary = bot::run_bot(cfg, shutdown_rx, reporter).await?;

    log::info!(
        "Stopped ({:?}). Published {} and engaged {} times this run; {} today, {} this month.",
        summary.stop_reason,
        summary.published,
        summary.engaged,
        summary.posts_today,
        summary.posts_this_month
    );

    Ok(())
}
