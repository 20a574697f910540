// provision-gate-server/src/server.rs
// ============================================================================
// Module: Server Runner
// Description: Listener binding and graceful shutdown for the routers.
// Purpose: Serve a router on a bound address until the shutdown signal.
// Dependencies: axum, tokio, tracing
// ============================================================================

//! ## Overview
//! Both listeners share one runner: bind the address, serve the router, and
//! drain connections when the shutdown future resolves. Cancellation of an
//! in-flight evaluation discards its partial state; no external side effects
//! persist.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server runner errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener could not be bound.
    #[error("failed to bind {addr}: {detail}")]
    Bind {
        /// Requested bind address.
        addr: SocketAddr,
        /// Bind error detail.
        detail: String,
    },
    /// Serving failed.
    #[error("server failed: {0}")]
    Serve(String),
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Serves a router on the given address until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`ServerError`] when binding or serving fails.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr).await.map_err(|error| ServerError::Bind {
        addr,
        detail: error.to_string(),
    })?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|error| ServerError::Serve(error.to_string()))?;

    tracing::info!(%addr, "server stopped");
    Ok(())
}
