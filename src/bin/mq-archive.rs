//! mq-archive: consume one or more AMQP queues and save every message into
//! a MongoDB collection until interrupted.

use std::sync::Arc;

use clap::Parser;
use mq_archive::{connect_broker, ArchiveConfig, MongoStore, QueueSubscriptionManager};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ArchiveConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Startup connections are fatal: any failure here exits non-zero.
    let (_connection, channel) = connect_broker(&config.amqp_url).await?;
    let store = Arc::new(MongoStore::connect(&config.mongodb_url, &config.collection).await?);
    info!(
        store = %config.mongodb_url,
        collection = %store.collection_name(),
        "saving messages"
    );

    let manager = QueueSubscriptionManager::new(
        channel,
        store,
        config.pipeline_options(),
        config.max_in_flight,
    );
    let subscriptions = manager.subscribe_all(&config.queues).await?;

    shutdown_signal().await;
    for handle in subscriptions {
        handle.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
