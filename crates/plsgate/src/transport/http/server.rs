//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::service::GatewayService;

use super::routes::{ErrorPages, routes};

/// Serve the DAD until SIGINT or SIGTERM, then drain the session pool.
pub async fn serve(config: &ServerConfig, service: Arc<GatewayService>) -> anyhow::Result<()> {
    let error_page = tokio::fs::read_to_string(&config.error_page)
        .await
        .with_context(|| format!("failed to read error page {}", config.error_page.display()))?;
    let dad_path = config.dad_path();
    let app = routes(
        service.clone(),
        &dad_path,
        ErrorPages {
            show_errors: config.show_errors,
            error_page,
        },
    );

    let listener = TcpListener::bind((config.host.as_str(), config.listen_port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.listen_port))?;
    let actual_addr = listener.local_addr()?;

    info!("Starting plsgate on {} serving {}", actual_addr, dad_path);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");

    let report = service.shutdown().await;
    if report.outstanding > 0 {
        tracing::warn!(
            outstanding = report.outstanding,
            "Exiting with database sessions still closing"
        );
    }

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed, which only happens when
/// the tokio runtime is misconfigured.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler - is tokio runtime configured correctly?")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
