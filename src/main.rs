//! ChannelHub Server: real-time publish/subscribe broker
//!
//! Main entry point that wires the hub into the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

use channelhub_core::config::AppConfig;
use channelhub_core::error::AppError;
use channelhub_realtime::{ChannelHub, HubHooks};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from files and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("CHANNELHUB_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Hub-wide listeners that record channel lifecycle events.
fn lifecycle_hooks() -> HubHooks {
    HubHooks::new()
        .on_created(|channel, client| {
            tracing::info!(
                channel_id = %channel.id(),
                user_id = client.map(|c| c.user_id.as_str()).unwrap_or(""),
                dynamic = channel.is_dynamic(),
                "Channel created"
            );
        })
        .on_subscribed(|channel, client| {
            tracing::debug!(
                channel_id = %channel.id(),
                user_id = client.map(|c| c.user_id.as_str()).unwrap_or(""),
                subscribers = channel.subscriber_count(),
                "Channel subscribed"
            );
        })
        .on_unsubscribed(|channel, client| {
            tracing::debug!(
                channel_id = %channel.id(),
                user_id = client.map(|c| c.user_id.as_str()).unwrap_or(""),
                subscribers = channel.subscriber_count(),
                "Channel unsubscribed"
            );
        })
        .on_removed(|channel, _| {
            tracing::info!(channel_id = %channel.id(), "Channel removed");
        })
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting ChannelHub v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(config);
    let hub = Arc::new(ChannelHub::new(config.hub.clone(), lifecycle_hooks()));
    hub.run(Vec::new())?;

    let state = channelhub_api::AppState::new(Arc::clone(&config), Arc::clone(&hub));
    let app = channelhub_api::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!("ChannelHub server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown...");
        })
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    if tokio::time::timeout(grace, hub.close()).await.is_err() {
        tracing::warn!("Channel hub did not stop within {}s", grace.as_secs());
    }

    tracing::info!("ChannelHub server shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
