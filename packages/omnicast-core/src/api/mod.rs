//! HTTP/WebSocket API layer.
//!
//! Thin handlers over the orchestrator and its managers; all behavior lives
//! in the services themselves.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::BootstrappedServices;
use crate::events::BroadcastEventBridge;
use crate::orchestrator::UnifiedCastOrchestrator;
use crate::protocols::AirPlayClient;

pub mod http;
pub mod ws;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<UnifiedCastOrchestrator>,
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Answers AirPlay authentication challenges; `None` when disabled.
    pub airplay_client: Option<Arc<AirPlayClient>>,
    /// Stops the server when cancelled.
    pub cancel_token: CancellationToken,
}

impl AppState {
    pub fn from_services(services: &BootstrappedServices) -> Self {
        Self {
            orchestrator: Arc::clone(&services.orchestrator),
            event_bridge: Arc::clone(&services.event_bridge),
            airplay_client: services.airplay_client.clone(),
            cancel_token: services.cancel_token.clone(),
        }
    }
}

/// Binds the API listener. Port 0 lets the OS pick one.
///
/// # Errors
/// Returns `ServerError::Bind` if the port is unavailable.
pub async fn bind(port: u16) -> Result<tokio::net::TcpListener, ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    Ok(tokio::net::TcpListener::bind(&addr).await?)
}

/// Serves the API on `listener` until the state's cancel token fires.
///
/// # Errors
/// Returns `ServerError::Bind` if the listener fails.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> Result<(), ServerError> {
    let port = listener.local_addr()?.port();
    log::info!("[API] Listening on http://0.0.0.0:{}", port);

    let cancel = state.cancel_token.clone();
    let app = http::create_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await?;
    Ok(())
}

/// Binds `preferred_port` and serves the API.
///
/// # Errors
/// Returns `ServerError` if binding or serving fails.
pub async fn start_server(state: AppState, preferred_port: u16) -> Result<(), ServerError> {
    let listener = bind(preferred_port).await?;
    serve(listener, state).await
}
