//! lc-server: HTTP API for the document conversion service.
//!
//! This crate ties the format registry and the engine worker into a running
//! server. It provides:
//!
//! - Axum-based HTTP API with bearer authentication and request IDs
//! - Bounded-concurrency admission in front of the engine
//! - Streaming uploads and downloads through per-job scratch directories
//! - Graceful shutdown via signal handling

pub mod admission;
pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::signal;

use lc_core::config::Config;
use lc_engine::EngineLocator;

use crate::context::AppContext;

/// Start the conversion server.
///
/// This is the main entry point. It locates the engine, constructs the
/// [`AppContext`], binds the configured address and serves until a shutdown
/// signal is received.
pub async fn start(config: Config) -> lc_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let engine = EngineLocator::discover(&config.engine);
    let info = engine.info().await;
    if info.available {
        tracing::info!(
            "Conversion engine found: {} ({})",
            info.path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            info.version.as_deref().unwrap_or("unknown version")
        );
    } else {
        tracing::warn!("No conversion engine found; conversions will fail until one is installed");
    }

    let ctx = AppContext::new(config, engine);
    std::fs::create_dir_all(ctx.scratch_root.as_path())?;

    let host = ctx.config.server.host.clone();
    let port = ctx.config.server.port;
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .map_err(|e| lc_core::Error::Internal(format!("Failed to bind to {host}:{port}: {e}")))?;
    let addr = listener.local_addr()?;

    tracing::info!(
        event = "startup",
        %addr,
        auth_enabled = ctx.auth.is_enabled(),
        max_concurrent = ctx.gate.capacity(),
        max_upload_bytes = ctx.config.server.max_upload_bytes,
        timeout_secs = ctx.worker.timeout().as_secs(),
        scratch_root = %ctx.scratch_root.display(),
        "Starting server on {addr}"
    );

    serve(listener, ctx, shutdown_signal()).await
}

/// Serve the API on an already bound listener until `shutdown` resolves.
///
/// Peer addresses are recorded so request logs can fall back to them when no
/// `X-Forwarded-For` header is present.
pub async fn serve<F>(listener: TcpListener, ctx: AppContext, shutdown: F) -> lc_core::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router::build_router(ctx);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| lc_core::Error::Internal(format!("Server error: {e}")))?;

    tracing::info!(event = "shutdown", "Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
