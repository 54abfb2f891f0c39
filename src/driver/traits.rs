use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::lookup::{ColorCode, DeviceTypeCode, HubTypeCode};

// =============================================================================
// Errors
// =============================================================================

/// Failure reported by the hub driver. Propagated opaquely to callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("hub {0} disconnected")]
    Disconnected(String),
    #[error("connection to hub {uuid} failed: {reason}")]
    ConnectFailed { uuid: String, reason: String },
    #[error("hub rejected command: {0}")]
    Rejected(String),
    #[error("driver timed out")]
    Timeout,
}

// =============================================================================
// Events
// =============================================================================

/// Opaque handle for a hub seen during scanning but not yet connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHub {
    pub uuid: String,
    pub name: String,
}

/// Driver-wide events
#[derive(Debug, Clone)]
pub enum DriverEvent {
    Discovered(DiscoveredHub),
}

/// Sensor reading kinds a subscriber can watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorCategory {
    Color,
    Distance,
    Tilt,
    Speed,
    Button,
}

impl SensorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::Distance => "distance",
            Self::Tilt => "tilt",
            Self::Speed => "speed",
            Self::Button => "button",
        }
    }
}

impl std::str::FromStr for SensorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "color" => Ok(Self::Color),
            "distance" => Ok(Self::Distance),
            "tilt" => Ok(Self::Tilt),
            "speed" => Ok(Self::Speed),
            "button" => Ok(Self::Button),
            other => Err(format!("Unknown sensor category: {}", other)),
        }
    }
}

impl std::fmt::Display for SensorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sensor reading as emitted by the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorEvent {
    pub hub_uuid: String,
    pub port: String,
    pub category: SensorCategory,
    pub value: serde_json::Value,
}

/// Per-hub events
#[derive(Debug, Clone)]
pub enum HubEvent {
    Sensor(SensorEvent),
    Disconnected,
}

/// Live hub telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Telemetry {
    pub battery_level: u8,
    pub rssi: i16,
    pub current: f32,
}

// =============================================================================
// Driver boundary
// =============================================================================

/// Hardware discovery and connection.
///
/// Implementations own the wireless transport. Discoveries are emitted on the
/// channel returned by `subscribe`; `connect` turns a discovery into a live
/// device.
#[async_trait]
pub trait HubDriver: Send + Sync + 'static {
    /// Driver name for logs (e.g., "simulated")
    fn name(&self) -> &'static str;

    /// Subscribe to driver-wide events
    fn subscribe(&self) -> broadcast::Receiver<DriverEvent>;

    /// Start scanning for hubs
    async fn scan(&self) -> Result<(), DriverError>;

    /// Stop scanning
    async fn stop_scan(&self);

    /// Connect to a discovered hub
    async fn connect(&self, hub: DiscoveredHub) -> Result<Arc<dyn HubDevice>, DriverError>;
}

/// One connected hub.
///
/// Getters read the hub's live state; nothing here is cached by callers.
#[async_trait]
pub trait HubDevice: Send + Sync + 'static {
    fn uuid(&self) -> &str;

    fn name(&self) -> &str;

    fn hub_type(&self) -> HubTypeCode;

    async fn telemetry(&self) -> Telemetry;

    /// Device currently attached to `port`; `DeviceTypeCode::UNKNOWN` for an
    /// empty or nonexistent port
    async fn port_device_type(&self, port: &str) -> DeviceTypeCode;

    /// Run a motor at `speed`. With `time`, run for that long then stop.
    async fn set_motor_speed(
        &self,
        port: &str,
        speed: i32,
        time: Option<Duration>,
    ) -> Result<(), DriverError>;

    async fn ramp_motor_speed(
        &self,
        port: &str,
        from: i32,
        to: i32,
        time: Duration,
    ) -> Result<(), DriverError>;

    async fn hard_stop_motor(&self, port: &str) -> Result<(), DriverError>;

    async fn set_led_color(&self, color: ColorCode) -> Result<(), DriverError>;

    /// Subscribe to this hub's event emitter
    fn subscribe(&self) -> broadcast::Receiver<HubEvent>;

    async fn disconnect(&self);
}
