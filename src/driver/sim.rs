//! In-process simulated hub driver.
//!
//! Stands in for the wireless transport so the whole bridge can run without
//! hardware. Hubs come from configuration (or `announce`), every command is
//! recorded, and tests can attach devices, emit sensor readings, refuse
//! connections or drop hubs at will.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use super::traits::{
    DiscoveredHub, DriverError, DriverEvent, HubDevice, HubDriver, HubEvent, SensorCategory,
    SensorEvent, Telemetry,
};
use crate::config::SimulatedHubConfig;
use crate::lookup::{ColorCode, DeviceTypeCode, HubTypeCode};

const EVENT_CAPACITY: usize = 64;

/// A command received by a simulated hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCommand {
    Speed {
        port: String,
        speed: i32,
        time_ms: Option<u64>,
    },
    Ramp {
        port: String,
        from: i32,
        to: i32,
        time_ms: u64,
    },
    Stop {
        port: String,
    },
    Led(ColorCode),
}

/// Simulated hub
pub struct SimulatedHub {
    uuid: String,
    name: String,
    hub_type: HubTypeCode,
    ports: RwLock<HashMap<String, DeviceTypeCode>>,
    telemetry: RwLock<Telemetry>,
    commands: RwLock<Vec<SimCommand>>,
    failing: AtomicBool,
    connected: AtomicBool,
    events: broadcast::Sender<HubEvent>,
}

impl SimulatedHub {
    pub fn new(config: &SimulatedHubConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let ports = config
            .ports
            .iter()
            .map(|(port, device)| (port.to_uppercase(), *device))
            .collect();

        Self {
            uuid: config.uuid.clone(),
            name: config.name.clone(),
            hub_type: config.hub_type,
            ports: RwLock::new(ports),
            telemetry: RwLock::new(Telemetry {
                battery_level: config.battery_level,
                rssi: config.rssi,
                current: config.current,
            }),
            commands: RwLock::new(Vec::new()),
            failing: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            events,
        }
    }

    /// Plug a device into a port
    pub async fn attach(&self, port: &str, device: DeviceTypeCode) {
        self.ports.write().await.insert(port.to_uppercase(), device);
    }

    /// Unplug whatever is on a port
    pub async fn detach(&self, port: &str) {
        self.ports.write().await.remove(&port.to_uppercase());
    }

    pub async fn set_telemetry(&self, telemetry: Telemetry) {
        *self.telemetry.write().await = telemetry;
    }

    /// Make every subsequent command fail with `DriverError::Rejected`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Commands received so far, oldest first
    pub async fn commands(&self) -> Vec<SimCommand> {
        self.commands.read().await.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Emit a sensor reading on this hub's event emitter
    pub fn emit_sensor(&self, port: &str, category: SensorCategory, value: serde_json::Value) {
        let event = HubEvent::Sensor(SensorEvent {
            hub_uuid: self.uuid.clone(),
            port: port.to_string(),
            category,
            value,
        });
        if self.events.send(event).is_err() {
            debug!("{}: no listeners for {} reading", self.uuid, category);
        }
    }

    /// Number of live receivers on the event emitter
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Simulate the link dropping
    pub fn drop_link(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Simulated hub {} lost its link", self.uuid);
            if self.events.send(HubEvent::Disconnected).is_err() {
                debug!("{}: no listeners for disconnect", self.uuid);
            }
        }
    }

    async fn record(&self, command: SimCommand) -> Result<(), DriverError> {
        if !self.is_connected() {
            return Err(DriverError::Disconnected(self.uuid.clone()));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DriverError::Rejected(format!("{:?}", command)));
        }
        debug!("{}: {:?}", self.uuid, command);
        self.commands.write().await.push(command);
        Ok(())
    }
}

#[async_trait]
impl HubDevice for SimulatedHub {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn hub_type(&self) -> HubTypeCode {
        self.hub_type
    }

    async fn telemetry(&self) -> Telemetry {
        *self.telemetry.read().await
    }

    async fn port_device_type(&self, port: &str) -> DeviceTypeCode {
        self.ports
            .read()
            .await
            .get(port)
            .copied()
            .unwrap_or(DeviceTypeCode::UNKNOWN)
    }

    async fn set_motor_speed(
        &self,
        port: &str,
        speed: i32,
        time: Option<Duration>,
    ) -> Result<(), DriverError> {
        self.record(SimCommand::Speed {
            port: port.to_string(),
            speed,
            time_ms: time.map(|t| t.as_millis() as u64),
        })
        .await
    }

    async fn ramp_motor_speed(
        &self,
        port: &str,
        from: i32,
        to: i32,
        time: Duration,
    ) -> Result<(), DriverError> {
        self.record(SimCommand::Ramp {
            port: port.to_string(),
            from,
            to,
            time_ms: time.as_millis() as u64,
        })
        .await
    }

    async fn hard_stop_motor(&self, port: &str) -> Result<(), DriverError> {
        self.record(SimCommand::Stop {
            port: port.to_string(),
        })
        .await
    }

    async fn set_led_color(&self, color: ColorCode) -> Result<(), DriverError> {
        self.record(SimCommand::Led(color)).await
    }

    fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        self.drop_link();
    }
}

/// Simulated driver
pub struct SimulatedDriver {
    known: RwLock<Vec<SimulatedHubConfig>>,
    /// Every device handed out per hub, oldest first
    devices: RwLock<HashMap<String, Vec<Arc<SimulatedHub>>>>,
    refused: RwLock<HashSet<String>>,
    connect_delay_ms: AtomicU64,
    scanning: AtomicBool,
    events: broadcast::Sender<DriverEvent>,
}

impl SimulatedDriver {
    pub fn new(hubs: Vec<SimulatedHubConfig>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            known: RwLock::new(hubs),
            devices: RwLock::new(HashMap::new()),
            refused: RwLock::new(HashSet::new()),
            connect_delay_ms: AtomicU64::new(0),
            scanning: AtomicBool::new(false),
            events,
        }
    }

    /// Make a hub discoverable. Emits a discovery immediately while scanning.
    pub async fn announce(&self, hub: SimulatedHubConfig) {
        let discovered = DiscoveredHub {
            uuid: hub.uuid.clone(),
            name: hub.name.clone(),
        };
        {
            let mut known = self.known.write().await;
            known.retain(|h| h.uuid != hub.uuid);
            known.push(hub);
        }
        if self.scanning.load(Ordering::SeqCst) {
            self.emit(discovered);
        }
    }

    /// Reject future connection attempts to `uuid`
    pub async fn refuse_connections(&self, uuid: &str) {
        self.refused.write().await.insert(uuid.to_string());
    }

    /// Latency added to every connection attempt
    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Most recent device handed out for `uuid`
    pub async fn hub(&self, uuid: &str) -> Option<Arc<SimulatedHub>> {
        self.devices
            .read()
            .await
            .get(uuid)
            .and_then(|handed_out| handed_out.last().cloned())
    }

    /// Every device handed out for `uuid`, oldest first
    pub async fn connections(&self, uuid: &str) -> Vec<Arc<SimulatedHub>> {
        self.devices
            .read()
            .await
            .get(uuid)
            .cloned()
            .unwrap_or_default()
    }

    fn emit(&self, hub: DiscoveredHub) {
        debug!("Simulated discovery: {}", hub.uuid);
        if self.events.send(DriverEvent::Discovered(hub)).is_err() {
            debug!("No listeners for simulated discovery");
        }
    }
}

#[async_trait]
impl HubDriver for SimulatedDriver {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    async fn scan(&self) -> Result<(), DriverError> {
        self.scanning.store(true, Ordering::SeqCst);
        let discovered: Vec<DiscoveredHub> = self
            .known
            .read()
            .await
            .iter()
            .map(|h| DiscoveredHub {
                uuid: h.uuid.clone(),
                name: h.name.clone(),
            })
            .collect();
        for hub in discovered {
            self.emit(hub);
        }
        Ok(())
    }

    async fn stop_scan(&self) {
        self.scanning.store(false, Ordering::SeqCst);
    }

    async fn connect(&self, hub: DiscoveredHub) -> Result<Arc<dyn HubDevice>, DriverError> {
        let delay = self.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.refused.read().await.contains(&hub.uuid) {
            return Err(DriverError::ConnectFailed {
                uuid: hub.uuid,
                reason: "connection refused".to_string(),
            });
        }

        let config = self
            .known
            .read()
            .await
            .iter()
            .find(|h| h.uuid == hub.uuid)
            .cloned()
            .ok_or_else(|| DriverError::ConnectFailed {
                uuid: hub.uuid.clone(),
                reason: "hub is no longer advertising".to_string(),
            })?;

        let device = Arc::new(SimulatedHub::new(&config));
        self.devices
            .write()
            .await
            .entry(config.uuid.clone())
            .or_default()
            .push(device.clone());
        Ok(device)
    }
}
