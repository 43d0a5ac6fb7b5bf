mod config;
#[cfg(feature = "stdio")]
mod console;
mod error;
#[cfg(feature = "http")]
mod http;
mod session;
mod utils;

use crate::config::{Config, TransportMode};
use crate::session::SessionManager;
use crate::utils::log_sink::{LogLevel, LogSink};
use anyhow::Result;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt::format::FmtSpan, FmtSubscriber};

fn setup_logging(log_level_str: &str) {
    let level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("shell_session_server={},tower_http={}", level, level)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::load()?);
    setup_logging(&config.log_level);

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), "Starting shell-session-server");
    tracing::debug!("Loaded configuration: {:?}", config);

    if which::which(&config.default_shell).is_err() {
        tracing::warn!(shell = %config.default_shell, "Configured shell is not installed or not in PATH. Every spawn will fail until it is.");
    }

    let log = LogSink::new(config.log_capacity);
    log.append(
        LogLevel::System,
        format!("Session server started in {}", config.working_dir.display()),
    );
    let manager = SessionManager::new(config.clone(), log)?;

    match config.transport_mode {
        #[cfg(feature = "stdio")]
        TransportMode::Stdio => {
            tracing::info!("Using stdio console transport.");
            console::run(manager).await?;
        }
        #[cfg(feature = "http")]
        TransportMode::Http => {
            tracing::info!(host = %config.http_host, port = %config.http_port, "Using HTTP transport.");
            http::serve(manager, &config.http_host, config.http_port).await?;
        }
        #[cfg(not(all(feature = "stdio", feature = "http")))]
        #[allow(unreachable_patterns)]
        _ => {
            let available_feature = if cfg!(feature = "stdio") {
                "stdio"
            } else if cfg!(feature = "http") {
                "http"
            } else {
                "none"
            };
            tracing::error!(
                selected_transport = ?config.transport_mode,
                available_feature = %available_feature,
                "Selected transport mode is not available due to compiled features."
            );
            drop(manager);
            anyhow::bail!(
                "Selected transport mode {:?} is not available. Compiled with {} support only.",
                config.transport_mode,
                available_feature
            );
        }
    }

    tracing::info!("Server shutdown.");
    Ok(())
}
