#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! HTTP API tests
//!
//! Drives the full router (middleware included) with `tower::ServiceExt::oneshot`
//! against simulated hubs, checking status codes and JSON bodies.
//!
//! Run with: cargo test --test http_api

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

use poweredup_bridge::api::{self, AppState};
use poweredup_bridge::bridge::EventBridge;
use poweredup_bridge::bus::create_bus;
use poweredup_bridge::config::SimulatedHubConfig;
use poweredup_bridge::driver::{
    DiscoveredHub, SimCommand, SimulatedDriver, SimulatedHub, Telemetry,
};
use poweredup_bridge::lookup::{ColorCode, DeviceTypeCode, HubTypeCode};
use poweredup_bridge::registry::HubRegistry;

struct TestApp {
    router: Router,
    driver: Arc<SimulatedDriver>,
}

impl TestApp {
    async fn hub(&self, uuid: &str) -> Arc<SimulatedHub> {
        self.driver.hub(uuid).await.expect("hub connected")
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }
}

/// Hub "aa:bb" with a train motor on A and lights on B
fn train_hub() -> SimulatedHubConfig {
    SimulatedHubConfig {
        uuid: "aa:bb".to_string(),
        name: "Cargo".to_string(),
        hub_type: HubTypeCode(3),
        ports: HashMap::from([
            ("A".to_string(), DeviceTypeCode::TRAIN_MOTOR),
            ("B".to_string(), DeviceTypeCode::LED_LIGHTS),
        ]),
        battery_level: 87,
        rssi: -55,
        ..SimulatedHubConfig::default()
    }
}

async fn app_with(hubs: Vec<SimulatedHubConfig>) -> TestApp {
    let bus = create_bus();
    let driver = Arc::new(SimulatedDriver::new(hubs.clone()));
    let registry = Arc::new(HubRegistry::new(driver.clone(), bus.clone()));
    for hub in hubs {
        registry
            .on_discovered(DiscoveredHub {
                uuid: hub.uuid,
                name: hub.name,
            })
            .await;
    }
    let bridge = Arc::new(EventBridge::new(registry.clone(), bus.clone(), 8));
    let router = api::router(AppState::new(registry, bridge, bus));
    TestApp { router, driver }
}

async fn app() -> TestApp {
    app_with(vec![train_hub()]).await
}

// =============================================================================
// Hub queries
// =============================================================================

#[tokio::test]
async fn lists_connected_hubs() {
    let app = app().await;

    for uri in ["/hubs", "/hubs/"] {
        let (status, body) = app.get(uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "hubs": [{
                    "uuid": "aa:bb",
                    "batteryLevel": 87,
                    "current": 0.0,
                    "name": "Cargo",
                    "rssi": -55,
                    "hubType": { "id": 3, "name": "Powered Up Hub" },
                    "ports": [
                        { "port": "A", "name": "Train Motor", "id": 2 },
                        { "port": "B", "name": "Led Lights", "id": 8 }
                    ]
                }]
            })
        );
    }
}

#[tokio::test]
async fn empty_registry_lists_nothing() {
    let app = app_with(vec![]).await;
    let (status, body) = app.get("/hubs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "hubs": [] }));
}

#[tokio::test]
async fn single_hub_lookup() {
    let app = app().await;

    let (status, body) = app.get("/hubs/aa:bb").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uuid"], "aa:bb");
    assert_eq!(body["ports"][0]["name"], "Train Motor");

    let (status, _) = app.get("/hubs/aa:bb/").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn telemetry_is_read_on_every_query() {
    let app = app().await;

    let (_, body) = app.get("/hubs/aa:bb").await;
    assert_eq!(body["batteryLevel"], 87);
    assert_eq!(body["rssi"], -55);

    app.hub("aa:bb")
        .await
        .set_telemetry(Telemetry {
            battery_level: 41,
            rssi: -80,
            current: 0.5,
        })
        .await;

    let (_, body) = app.get("/hubs/aa:bb").await;
    assert_eq!(body["batteryLevel"], 41);
    assert_eq!(body["rssi"], -80);
    assert_eq!(body["current"], 0.5);

    let (_, body) = app.get("/hubs").await;
    assert_eq!(body["hubs"][0]["batteryLevel"], 41);
}

#[tokio::test]
async fn unknown_hub_is_404_everywhere() {
    let app = app().await;

    for uri in [
        "/hubs/zz",
        "/hubs/zz/",
        "/hubs/zz/A/speed/50",
        "/hubs/zz/A/rampspeed/0/50/1000",
        "/hubs/zz/stop",
        "/hubs/zz/A/stop",
        "/hubs/zz/led/red",
        "/hubs/zz/led/not-a-color",
        "/hubs/zz/colors/red/",
    ] {
        let (status, body) = app.get(uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["error"], "Hub zz is not connected", "{}", uri);
    }
}

// =============================================================================
// Motor commands
// =============================================================================

#[tokio::test]
async fn speed_with_time_is_acknowledged() {
    let app = app().await;

    let (status, body) = app.get("/hubs/aa:bb/A/speed/50?time=1000").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "uuid": "aa:bb", "port": "A", "speed": 50, "time": "1000" })
    );
    assert_eq!(
        app.hub("aa:bb").await.commands().await,
        vec![SimCommand::Speed {
            port: "A".to_string(),
            speed: 50,
            time_ms: Some(1000),
        }]
    );
}

#[tokio::test]
async fn speed_without_time_runs_indefinitely() {
    let app = app().await;

    let (status, body) = app.get("/hubs/aa:bb/A/speed/-75").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "uuid": "aa:bb", "port": "A", "speed": -75 }));
    assert_eq!(
        app.hub("aa:bb").await.commands().await,
        vec![SimCommand::Speed {
            port: "A".to_string(),
            speed: -75,
            time_ms: None,
        }]
    );
}

#[tokio::test]
async fn speed_on_lights_port_is_rejected() {
    let app = app().await;

    let (status, body) = app.get("/hubs/aa:bb/B/speed/50?time=1000").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("port B"));
    assert!(app.hub("aa:bb").await.commands().await.is_empty());
}

#[tokio::test]
async fn attaching_a_motor_enables_speed_commands() {
    let app = app().await;
    let hub = app.hub("aa:bb").await;
    hub.detach("A").await;

    let (status, _) = app.get("/hubs/aa:bb/A/speed/30").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (_, body) = app.get("/hubs/aa:bb").await;
    assert_eq!(body["ports"][0], json!({ "port": "A", "name": "Unknown", "id": 0 }));

    hub.attach("a", DeviceTypeCode::TRAIN_MOTOR).await;

    let (status, body) = app.get("/hubs/aa:bb/A/speed/30").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "uuid": "aa:bb", "port": "A", "speed": 30 }));
    assert_eq!(hub.commands().await.len(), 1);
}

#[tokio::test]
async fn malformed_numbers_are_422() {
    let app = app().await;

    for uri in [
        "/hubs/aa:bb/A/speed/fast",
        "/hubs/aa:bb/A/speed/1.5",
        "/hubs/aa:bb/A/speed/50?time=soon",
        "/hubs/aa:bb/A/speed/50?time=-3",
        "/hubs/aa:bb/A/rampspeed/x/50/1000",
        "/hubs/aa:bb/A/rampspeed/0/50/later",
    ] {
        let (status, body) = app.get(uri).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", uri);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid"), "{}", uri);
    }
    assert!(app.hub("aa:bb").await.commands().await.is_empty());
}

#[tokio::test]
async fn ramp_is_acknowledged() {
    let app = app().await;

    let (status, body) = app.get("/hubs/aa:bb/A/rampspeed/0/80/2000").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "uuid": "aa:bb", "port": "A", "fromSpeed": 0, "toSpeed": 80, "time": "2000" })
    );
    assert_eq!(
        app.hub("aa:bb").await.commands().await,
        vec![SimCommand::Ramp {
            port: "A".to_string(),
            from: 0,
            to: 80,
            time_ms: 2000,
        }]
    );
}

#[tokio::test]
async fn port_stop() {
    let app = app().await;

    let (status, body) = app.get("/hubs/aa:bb/A/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "uuid": "aa:bb", "port": "A" }));

    let (status, _) = app.get("/hubs/aa:bb/B/stop").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn hub_stop_only_touches_motors() {
    let app = app().await;

    let (status, body) = app.get("/hubs/aa:bb/stop").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "uuid": "aa:bb", "stopped": ["A"] }));
    assert_eq!(
        app.hub("aa:bb").await.commands().await,
        vec![SimCommand::Stop {
            port: "A".to_string()
        }]
    );
}

#[tokio::test]
async fn driver_failure_is_502() {
    let app = app().await;
    app.hub("aa:bb").await.set_failing(true);

    let (status, body) = app.get("/hubs/aa:bb/A/speed/10").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().starts_with("Driver failure"));
}

// =============================================================================
// LED
// =============================================================================

#[tokio::test]
async fn led_color_is_resolved() {
    let app = app().await;

    for uri in [
        "/hubs/aa:bb/led/purple",
        "/hubs/aa:bb/led/purple/",
        "/hubs/aa:bb/colors/purple/",
    ] {
        let (status, body) = app.get(uri).await;
        assert_eq!(status, StatusCode::OK, "{}", uri);
        assert_eq!(body, json!({ "hub_uuid": "aa:bb", "color_value": 2 }));
    }
    assert_eq!(
        app.hub("aa:bb").await.commands().await,
        vec![SimCommand::Led(ColorCode(2)); 3]
    );
}

#[tokio::test]
async fn black_led_is_valid() {
    let app = app().await;
    let (status, body) = app.get("/hubs/aa:bb/led/black").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["color_value"], 0);
}

#[tokio::test]
async fn unknown_color_is_422() {
    let app = app().await;

    for color in ["Purple", "purp", "mauve"] {
        let (status, body) = app.get(&format!("/hubs/aa:bb/led/{}", color)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", color);
        assert_eq!(body["error"], format!("Unknown color: {}", color));
    }
    assert!(app.hub("aa:bb").await.commands().await.is_empty());
}

// =============================================================================
// Sensor stream preconditions, status, CORS
// =============================================================================

#[tokio::test]
async fn sensor_stream_for_unknown_hub_is_404() {
    let app = app().await;
    let (status, body) = app.get("/zz/sensor/color").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Hub zz is not connected");
}

#[tokio::test]
async fn sensor_stream_for_unknown_category_is_422() {
    let app = app().await;
    let (status, body) = app.get("/aa:bb/sensor/smell").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Unknown sensor category: smell");
}

#[tokio::test]
async fn sensor_stream_without_upgrade_leaves_no_forwarder() {
    let app = app().await;

    let (status, _) = app.get("/aa:bb/sensor/color").await;
    assert!(status.is_client_error(), "status {}", status);

    let (_, body) = app.get("/status").await;
    assert_eq!(body["active_forwarders"], 0);
}

#[tokio::test]
async fn status_reports_counts() {
    let app = app().await;

    let (status, body) = app.get("/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "poweredup-bridge");
    assert_eq!(body["connected_hubs"], 1);
    assert_eq!(body["active_forwarders"], 0);
    assert!(body["version"].is_string());
    assert!(body["git_sha"].is_string());
}

#[tokio::test]
async fn cors_is_permissive() {
    let app = app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/hubs")
                .header("Origin", "http://example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = app().await;
    let (status, _) = app.get("/hubs/aa:bb/A/fly").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
