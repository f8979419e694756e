//! HTTP surface
//!
//! WHEP signaling, the input WebSocket, status endpoints and the static
//! web client, all served from one axum router.

mod handlers;
mod routes;

pub use routes::create_router;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::state::AppState;

/// Serve the router on `listener` until `token` is cancelled
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    token: CancellationToken,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    info!("Starting HTTP server on {}", local_addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    info!("HTTP server on {} stopped", local_addr);
    Ok(())
}
