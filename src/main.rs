use anyhow::Result;
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use badger::handlers::SystemOrchestrator;

const STATUS_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(false)
                .with_line_number(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "badger=info,warn".into()),
        )
        .init();

    info!("starting up");

    let orchestrator = SystemOrchestrator::init().await?;
    orchestrator.start().await?;
    info!(status = %orchestrator.status().await, "system started");

    let mut status_interval = interval(STATUS_INTERVAL);

    tokio::select! {
        _ = async {
            loop {
                status_interval.tick().await;
                info!(status = %orchestrator.status().await, "status update");
            }
        } => {},
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    orchestrator.shutdown().await?;
    info!("shutdown complete");
    Ok(())
}
