pub mod handler;
pub mod schemas;

use crate::session::SessionManager;
use crate::utils::log_sink::LogLevel;
use anyhow::{Context, Result};
use tracing::info;

pub async fn serve(manager: SessionManager, host: &str, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .context(format!("Failed to bind {}:{}", host, port))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "HTTP transport listening");
    manager
        .log()
        .append(LogLevel::System, format!("Listening on http://{}", local_addr));

    axum::serve(listener, handler::router(manager))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;
    Ok(())
}
