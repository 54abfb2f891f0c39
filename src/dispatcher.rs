//! CommandDispatcher - validates hub commands and forwards them to the driver
//!
//! Every command runs the same precondition chain:
//! 1. resolve the hub through the registry (`HubNotConnected`)
//! 2. for port commands, read the port's live device type
//! 3. require a device able to execute the command (`IncompatibleDevice`)
//! 4. for color commands, resolve the color name (`InvalidColor`)
//!
//! No lock is held while the driver call is awaited, and commands aimed at
//! the same port are not serialized here; ordering is the driver's business.

use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::driver::HubDevice;
use crate::error::CommandError;
use crate::lookup::ColorCode;
use crate::registry::{HubInfo, HubRegistry};

/// Ack for Set Motor Speed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotorSpeedAck {
    pub uuid: String,
    pub port: String,
    pub speed: i32,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "optional_millis"
    )]
    pub time: Option<u64>,
}

/// Ack for Ramp Motor Speed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RampAck {
    pub uuid: String,
    pub port: String,
    pub from_speed: i32,
    pub to_speed: i32,
    #[serde(serialize_with = "millis")]
    pub time: u64,
}

/// Ack for a port-scoped stop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopAck {
    pub uuid: String,
    pub port: String,
}

/// Ack for a hub-wide stop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubStopAck {
    pub uuid: String,
    /// Ports that carried a motor and were stopped
    pub stopped: Vec<String>,
}

/// Ack for Set LED Color
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedAck {
    pub hub_uuid: String,
    pub color_value: ColorCode,
}

// Durations are echoed the way they arrive on the query string
fn millis<S: Serializer>(ms: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(ms)
}

fn optional_millis<S: Serializer>(ms: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
    match ms {
        Some(ms) => serializer.collect_str(ms),
        None => serializer.serialize_none(),
    }
}

pub struct CommandDispatcher {
    registry: Arc<HubRegistry>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<HubRegistry>) -> Self {
        Self { registry }
    }

    /// Every connected hub, with telemetry and ports read live
    pub async fn hubs(&self) -> Vec<HubInfo> {
        let devices = self.registry.list().await;
        let mut hubs = Vec::with_capacity(devices.len());
        for device in devices {
            hubs.push(HubInfo::capture(device.as_ref()).await);
        }
        hubs
    }

    pub async fn hub(&self, hub_id: &str) -> Result<HubInfo, CommandError> {
        let device = self.registry.get(hub_id).await?;
        Ok(HubInfo::capture(device.as_ref()).await)
    }

    /// Run a motor. `speed` is passed through unclamped; negative is reverse.
    pub async fn set_motor_speed(
        &self,
        hub_id: &str,
        port: &str,
        speed: i32,
        time_ms: Option<u64>,
    ) -> Result<MotorSpeedAck, CommandError> {
        let device = self.motor_on(hub_id, port).await?;
        debug!("{}:{} speed {} for {:?} ms", hub_id, port, speed, time_ms);

        device
            .set_motor_speed(port, speed, time_ms.map(Duration::from_millis))
            .await?;

        Ok(MotorSpeedAck {
            uuid: hub_id.to_string(),
            port: port.to_string(),
            speed,
            time: time_ms,
        })
    }

    pub async fn ramp_motor_speed(
        &self,
        hub_id: &str,
        port: &str,
        from_speed: i32,
        to_speed: i32,
        time_ms: u64,
    ) -> Result<RampAck, CommandError> {
        let device = self.motor_on(hub_id, port).await?;
        debug!(
            "{}:{} ramp {} -> {} over {} ms",
            hub_id, port, from_speed, to_speed, time_ms
        );

        device
            .ramp_motor_speed(port, from_speed, to_speed, Duration::from_millis(time_ms))
            .await?;

        Ok(RampAck {
            uuid: hub_id.to_string(),
            port: port.to_string(),
            from_speed,
            to_speed,
            time: time_ms,
        })
    }

    pub async fn stop_motor(&self, hub_id: &str, port: &str) -> Result<StopAck, CommandError> {
        let device = self.motor_on(hub_id, port).await?;
        debug!("{}:{} hard stop", hub_id, port);

        device.hard_stop_motor(port).await?;

        Ok(StopAck {
            uuid: hub_id.to_string(),
            port: port.to_string(),
        })
    }

    /// Hard-stop every motor on the hub, skipping ports without one.
    ///
    /// All motor ports are attempted even if one stop fails; the first driver
    /// failure is then reported.
    pub async fn stop_hub(&self, hub_id: &str) -> Result<HubStopAck, CommandError> {
        let device = self.registry.get(hub_id).await?;

        let mut stopped = Vec::new();
        let mut failure = None;
        for &port in device.hub_type().ports() {
            let device_type = device.port_device_type(port).await;
            if !device_type.is_motor() {
                debug!("{}:{} has {}, not stopping", hub_id, port, device_type);
                continue;
            }
            match device.hard_stop_motor(port).await {
                Ok(()) => stopped.push(port.to_string()),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            return Err(e.into());
        }

        debug!("{} stopped ports {:?}", hub_id, stopped);
        Ok(HubStopAck {
            uuid: hub_id.to_string(),
            stopped,
        })
    }

    /// Set the hub LED. No port check: the LED belongs to the hub itself.
    pub async fn set_led_color(&self, hub_id: &str, color: &str) -> Result<LedAck, CommandError> {
        let device = self.registry.get(hub_id).await?;
        let color_value =
            ColorCode::from_name(color).ok_or_else(|| CommandError::InvalidColor(color.to_string()))?;
        debug!("{} LED {} ({})", hub_id, color, color_value);

        device.set_led_color(color_value).await?;

        Ok(LedAck {
            hub_uuid: hub_id.to_string(),
            color_value,
        })
    }

    /// Resolve the hub and require a motor on `port`
    async fn motor_on(&self, hub_id: &str, port: &str) -> Result<Arc<dyn HubDevice>, CommandError> {
        let device = self.registry.get(hub_id).await?;
        let device_type = device.port_device_type(port).await;
        if !device_type.is_motor() {
            return Err(CommandError::IncompatibleDevice {
                port: port.to_string(),
                device: device_type,
            });
        }
        Ok(device)
    }
}
