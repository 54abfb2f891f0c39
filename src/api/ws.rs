//! WebSocket sensor stream.
//!
//! One connection watches one sensor category of one hub. The subscription is
//! made before the upgrade so unknown hubs and categories are answered with a
//! plain HTTP error; inbound messages never create further subscriptions.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::{ApiError, AppState};
use crate::bridge::Subscription;
use crate::driver::SensorCategory;

/// GET /{id}/sensor/{category} - Stream sensor readings over a WebSocket
pub async fn sensor_handler(
    State(state): State<AppState>,
    Path((hub_id, category)): Path<(String, String)>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let category: SensorCategory = category.parse().map_err(ApiError::InvalidInput)?;
    let subscriber = state.bridge.next_subscriber_id();
    let subscription = state.bridge.subscribe(&hub_id, subscriber, category).await?;

    let ws = match ws {
        Ok(ws) => ws,
        // Dropping the subscription here detaches its forwarder
        Err(rejection) => return Ok(rejection.into_response()),
    };

    info!(
        "Sensor stream {} of {} opened (subscriber {})",
        category, hub_id, subscriber.0
    );
    Ok(ws.on_upgrade(move |socket| handle_sensor_socket(socket, subscription)))
}

async fn handle_sensor_socket(socket: WebSocket, mut subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            warn!("Failed to serialize sensor event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    debug!("Forwarder for {} ended, closing socket", subscription.hub_id());
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!("WebSocket error on {} stream: {}", subscription.hub_id(), e);
                    break;
                }
                // Inbound data is not a command channel
                Some(Ok(_)) => {}
            },
        }
    }

    info!(
        "Sensor stream {} of {} closed",
        subscription.category(),
        subscription.hub_id()
    );
    subscription.unsubscribe();
}
