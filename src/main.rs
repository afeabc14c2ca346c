use anyhow::Context;
use tracing_subscriber::EnvFilter;

use content_forge::api::{AppState, api_routes};
use content_forge::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing(&config);

    eprintln!("✍️  Content Forge v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   API: http://0.0.0.0:{}/api/v1", config.port);
    eprintln!("   Database: {}", config.db_path.display());

    let state = AppState::from_config(&config)
        .await
        .context("Failed to initialise services")?;

    // ── HTTP ─────────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Content Forge API started");

    axum::serve(listener, api_routes(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing to stderr, or to a daily-rolling file when a log
/// directory is configured.
fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "content-forge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
