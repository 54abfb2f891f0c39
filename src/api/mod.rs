//! HTTP API handlers

pub mod ws;

use crate::bridge::EventBridge;
use crate::bus::{BusEvent, SharedBus};
use crate::dispatcher::CommandDispatcher;
use crate::error::CommandError;
use crate::registry::{HubInfo, HubRegistry};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<HubRegistry>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub bridge: Arc<EventBridge>,
    pub bus: SharedBus,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(registry: Arc<HubRegistry>, bridge: Arc<EventBridge>, bus: SharedBus) -> Self {
        Self {
            dispatcher: Arc::new(CommandDispatcher::new(registry.clone())),
            registry,
            bridge,
            bus,
            started_at: Instant::now(),
        }
    }
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Request failure, rendered as `{ "error": message }`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Malformed path or query parameter
    #[error("{0}")]
    InvalidInput(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Command(CommandError::HubNotConnected(_)) => StatusCode::NOT_FOUND,
            ApiError::Command(CommandError::IncompatibleDevice { .. })
            | ApiError::Command(CommandError::InvalidColor(_))
            | ApiError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Command(CommandError::DriverFailure(_)) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn parse_param<T: FromStr>(name: &str, raw: &str) -> Result<T, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::InvalidInput(format!("Invalid {}: {:?}", name, raw)))
}

/// Build the full router with middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/status", get(status_handler))
        // Hub queries
        .route("/hubs", get(hubs_handler))
        .route("/hubs/", get(hubs_handler))
        .route("/hubs/{id}", get(hub_handler))
        .route("/hubs/{id}/", get(hub_handler))
        // Motor commands
        .route("/hubs/{id}/{port}/speed/{speed}", get(speed_handler))
        .route("/hubs/{id}/{port}/rampspeed/{from}/{to}/{time}", get(ramp_handler))
        .route("/hubs/{id}/stop", get(hub_stop_handler))
        .route("/hubs/{id}/{port}/stop", get(port_stop_handler))
        // LED
        .route("/hubs/{id}/led/{color}", get(led_handler))
        .route("/hubs/{id}/led/{color}/", get(led_handler))
        // Legacy LED path
        .route("/hubs/{id}/colors/{color}/", get(led_handler))
        // Sensor stream (WebSocket)
        .route("/{id}/sensor/{category}", get(ws::sensor_handler))
        // Lifecycle stream (SSE)
        .route("/events", get(events_handler))
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// General status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub git_sha: &'static str,
    pub uptime_secs: u64,
    pub connected_hubs: usize,
    pub active_forwarders: usize,
    pub bus_subscribers: usize,
}

/// GET /status - Service health check
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        service: "poweredup-bridge",
        version: env!("PUB_VERSION"),
        git_sha: env!("PUB_GIT_SHA"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        connected_hubs: state.registry.len().await,
        active_forwarders: state.bridge.forwarder_count(),
        bus_subscribers: state.bus.subscriber_count(),
    })
}

// =============================================================================
// Hub handlers
// =============================================================================

#[derive(Serialize)]
pub struct HubsResponse {
    pub hubs: Vec<HubInfo>,
}

/// GET /hubs - All connected hubs with live telemetry
pub async fn hubs_handler(State(state): State<AppState>) -> Json<HubsResponse> {
    Json(HubsResponse {
        hubs: state.dispatcher.hubs().await,
    })
}

/// GET /hubs/{id} - One connected hub
pub async fn hub_handler(
    State(state): State<AppState>,
    Path(hub_id): Path<String>,
) -> Result<Json<HubInfo>, ApiError> {
    Ok(Json(state.dispatcher.hub(&hub_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SpeedQuery {
    /// Run duration in milliseconds
    pub time: Option<String>,
}

/// GET /hubs/{id}/{port}/speed/{speed}?time= - Run a motor
pub async fn speed_handler(
    State(state): State<AppState>,
    Path((hub_id, port, speed)): Path<(String, String, String)>,
    Query(query): Query<SpeedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let speed: i32 = parse_param("speed", &speed)?;
    let time = query
        .time
        .as_deref()
        .map(|t| parse_param::<u64>("time", t))
        .transpose()?;

    let ack = state
        .dispatcher
        .set_motor_speed(&hub_id, &port, speed, time)
        .await?;
    Ok(Json(ack))
}

/// GET /hubs/{id}/{port}/rampspeed/{from}/{to}/{time} - Ramp a motor
pub async fn ramp_handler(
    State(state): State<AppState>,
    Path((hub_id, port, from, to, time)): Path<(String, String, String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let from: i32 = parse_param("from speed", &from)?;
    let to: i32 = parse_param("to speed", &to)?;
    let time: u64 = parse_param("time", &time)?;

    let ack = state
        .dispatcher
        .ramp_motor_speed(&hub_id, &port, from, to, time)
        .await?;
    Ok(Json(ack))
}

/// GET /hubs/{id}/stop - Hard-stop every motor on the hub
pub async fn hub_stop_handler(
    State(state): State<AppState>,
    Path(hub_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dispatcher.stop_hub(&hub_id).await?))
}

/// GET /hubs/{id}/{port}/stop - Hard-stop one motor
pub async fn port_stop_handler(
    State(state): State<AppState>,
    Path((hub_id, port)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dispatcher.stop_motor(&hub_id, &port).await?))
}

/// GET /hubs/{id}/led/{color} - Set the hub LED
pub async fn led_handler(
    State(state): State<AppState>,
    Path((hub_id, color)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dispatcher.set_led_color(&hub_id, &color).await?))
}

// =============================================================================
// SSE event stream
// =============================================================================

/// GET /events - Hub lifecycle events as Server-Sent Events.
/// The stream ends when the service announces shutdown.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe();

    let stream = BroadcastStream::new(rx)
        .take_while(|result| !matches!(result, Ok(BusEvent::ShuttingDown { .. })))
        .filter_map(|result| match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().data(json))),
                Err(_) => None,
            },
            Err(_) => None, // Skip lagged messages
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
