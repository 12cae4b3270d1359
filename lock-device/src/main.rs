use anyhow::{Context, Result};
use lock_device::{create_router, DeviceState};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lock_device=info".into()),
        )
        .init();

    info!("Lock device starting...");

    let port: u16 = std::env::var("LOCK_DEVICE_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .context("LOCK_DEVICE_PORT must be a valid port number")?;

    let router = create_router(Arc::new(DeviceState::new()));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind lock device to port {}", port))?;
    info!(port = port, "Lock device listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Lock device server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Lock device stopped");

    Ok(())
}
