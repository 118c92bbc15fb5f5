//! HTTP route handlers.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::device::{CastProtocol, DeviceDescriptor};
use crate::error::{CastError, CastResult};
use crate::manager::{CommandOutcome, ProtocolCastManager, ProtocolSelection};
use crate::orchestrator::CastingState;
use crate::protocol_constants::APP_NAME;
use crate::protocols::{AirPlayClient, MediaCommand, MediaRequest};

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ConnectRequest {
    id: String,
}

#[derive(Deserialize)]
struct CredentialsRequest {
    password: String,
    #[serde(default)]
    username: Option<String>,
}

/// Devices and selection of one protocol manager.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolDevices {
    protocol: CastProtocol,
    version: u64,
    devices: Vec<DeviceDescriptor>,
    selection: ProtocolSelection,
}

impl ProtocolDevices {
    fn of(manager: &ProtocolCastManager) -> Self {
        let snapshot = manager.devices();
        Self {
            protocol: manager.protocol(),
            version: snapshot.version(),
            devices: snapshot.to_vec(),
            selection: manager.selection(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandResponse {
    command: MediaCommand,
    success: bool,
    state: CastingState,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/state", get(get_casting_state))
        .route("/api/devices", get(list_all_devices))
        .route("/api/devices/{protocol}", get(list_devices))
        .route("/api/devices/{protocol}/connect", post(connect_device))
        .route("/api/devices/{protocol}/disconnect", post(disconnect_device))
        .route(
            "/api/airplay/auth",
            get(get_auth_challenge)
                .post(provide_credentials)
                .delete(cancel_authentication),
        )
        .route("/api/playback/play", post(play))
        .route("/api/playback/{command}", post(transport_command))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn manager_for<'a>(
    state: &'a AppState,
    protocol: &str,
) -> CastResult<&'a std::sync::Arc<ProtocolCastManager>> {
    let protocol: CastProtocol = protocol.parse()?;
    state
        .orchestrator
        .manager(protocol)
        .ok_or_else(|| CastError::ProtocolDisabled(protocol.label().to_string()))
}

fn airplay_client(state: &AppState) -> CastResult<&std::sync::Arc<AirPlayClient>> {
    state
        .airplay_client
        .as_ref()
        .ok_or_else(|| CastError::ProtocolDisabled(CastProtocol::AirPlay.label().to_string()))
}

async fn finish(
    state: &AppState,
    command: MediaCommand,
    outcome: CommandOutcome,
) -> Json<CommandResponse> {
    let success = outcome.wait().await;
    Json(CommandResponse {
        command,
        success,
        state: state.orchestrator.casting_state(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let protocols: Vec<CastProtocol> = state
        .orchestrator
        .managers()
        .map(|m| m.protocol())
        .collect();
    Json(json!({
        "status": "ok",
        "service": APP_NAME,
        "protocols": protocols,
        "vendor": state.orchestrator.vendor().is_some(),
    }))
}

async fn get_casting_state(State(state): State<AppState>) -> Json<CastingState> {
    Json(state.orchestrator.casting_state())
}

async fn list_all_devices(State(state): State<AppState>) -> impl IntoResponse {
    let protocols: Vec<ProtocolDevices> = state
        .orchestrator
        .managers()
        .map(|m| ProtocolDevices::of(m))
        .collect();
    Json(json!({ "protocols": protocols }))
}

async fn list_devices(
    State(state): State<AppState>,
    Path(protocol): Path<String>,
) -> CastResult<impl IntoResponse> {
    let manager = manager_for(&state, &protocol)?;
    Ok(Json(ProtocolDevices::of(manager)))
}

async fn connect_device(
    State(state): State<AppState>,
    Path(protocol): Path<String>,
    Json(payload): Json<ConnectRequest>,
) -> CastResult<impl IntoResponse> {
    let manager = manager_for(&state, &protocol)?;
    let device = manager
        .devices()
        .get(&payload.id)
        .cloned()
        .ok_or_else(|| CastError::DeviceNotFound(payload.id.clone()))?;

    if !manager.connect_to_device(device) {
        return Err(CastError::InvalidRequest(format!(
            "device {} cannot be controlled over {}",
            payload.id,
            manager.protocol()
        )));
    }

    Ok(Json(json!({
        "selection": manager.selection(),
        "state": state.orchestrator.casting_state(),
    })))
}

async fn disconnect_device(
    State(state): State<AppState>,
    Path(protocol): Path<String>,
) -> CastResult<impl IntoResponse> {
    let manager = manager_for(&state, &protocol)?;
    manager.disconnect();
    Ok(Json(json!({
        "selection": manager.selection(),
        "state": state.orchestrator.casting_state(),
    })))
}

async fn get_auth_challenge(State(state): State<AppState>) -> CastResult<impl IntoResponse> {
    let client = airplay_client(&state)?;
    Ok(Json(json!({ "challenge": client.auth_challenge() })))
}

/// Stores credentials for the challenged receiver and retries the request it
/// rejected.
async fn provide_credentials(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> CastResult<impl IntoResponse> {
    let client = airplay_client(&state)?;
    client
        .provide_credentials(&payload.password, payload.username.as_deref())
        .await?;
    Ok(Json(json!({
        "success": true,
        "state": state.orchestrator.casting_state(),
    })))
}

async fn cancel_authentication(State(state): State<AppState>) -> CastResult<impl IntoResponse> {
    let client = airplay_client(&state)?;
    client.cancel_authentication();
    Ok(Json(json!({ "challenge": client.auth_challenge() })))
}

async fn play(
    State(state): State<AppState>,
    Json(request): Json<MediaRequest>,
) -> CastResult<impl IntoResponse> {
    if request.url.trim().is_empty() {
        return Err(CastError::InvalidRequest("url must not be empty".into()));
    }
    let outcome = state.orchestrator.play_media(request);
    Ok(finish(&state, MediaCommand::Play, outcome).await)
}

async fn transport_command(
    State(state): State<AppState>,
    Path(command): Path<String>,
) -> CastResult<impl IntoResponse> {
    let (command, outcome) = match command.as_str() {
        "pause" => (MediaCommand::Pause, state.orchestrator.pause_media()),
        "resume" => (MediaCommand::Resume, state.orchestrator.resume_media()),
        "stop" => (MediaCommand::Stop, state.orchestrator.stop_media()),
        other => {
            return Err(CastError::InvalidRequest(format!(
                "unknown playback command: {other}"
            )))
        }
    };
    Ok(finish(&state, command, outcome).await)
}
