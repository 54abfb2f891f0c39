//! Powered Up Bridge - Rust Implementation
//!
//! REST and WebSocket control surface for Powered Up robotics hubs.

use poweredup_bridge::driver::{self, HubDriver};
use poweredup_bridge::{api, bridge, bus, config, registry};

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "poweredup_bridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Powered Up Bridge v{} ({})",
        env!("PUB_VERSION"),
        env!("PUB_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded, port: {}, simulated hubs: {}",
        config.port,
        config.simulator.hubs.len()
    );

    // Create event bus
    let bus = bus::create_bus();

    let driver = Arc::new(driver::SimulatedDriver::new(config.simulator.hubs.clone()));
    let registry = Arc::new(registry::HubRegistry::new(driver.clone(), bus.clone()));
    let bridge = Arc::new(bridge::EventBridge::new(
        registry.clone(),
        bus.clone(),
        config.bridge.subscriber_buffer,
    ));

    // Root token for every background loop
    let shutdown = CancellationToken::new();

    let registry_task = {
        let registry = registry.clone();
        let events = driver.subscribe();
        let shutdown = shutdown.child_token();
        tokio::spawn(async move { registry.run(events, shutdown).await })
    };
    let bridge_task = {
        let bridge = bridge.clone();
        let shutdown = shutdown.child_token();
        tokio::spawn(async move { bridge.run(shutdown).await })
    };

    if config.scan_on_start {
        tracing::info!("Scanning for hubs ({} driver)", driver.name());
        if let Err(e) = driver.scan().await {
            tracing::warn!("Failed to start scanning: {}", e);
        }
    }

    let state = api::AppState::new(registry.clone(), bridge.clone(), bus.clone());
    let app = api::router(state);

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let stop = {
        let bus = bus.clone();
        let shutdown = shutdown.clone();
        async move {
            let reason = shutdown_signal().await;
            bus.publish(bus::BusEvent::ShuttingDown {
                reason: Some(reason.to_string()),
            });
            // Ends open sensor streams so the server can drain
            shutdown.cancel();
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(stop)
        .await?;

    // Cleanup: stop discovery and disconnect hubs
    tracing::info!("Shutting down hubs...");
    shutdown.cancel();
    driver.stop_scan().await;
    registry.shutdown().await;
    let _ = tokio::join!(registry_task, bridge_task);
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
            "ctrl-c"
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
            "sigterm"
        }
    }
}
