//! HubRegistry - Single source of truth for connected hub sessions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, EventBus, SharedBus};
use crate::driver::{DiscoveredHub, DriverEvent, HubDevice, HubDriver, HubEvent};
use crate::error::CommandError;
use crate::lookup::TypeInfo;

/// One connected hub
struct HubSession {
    device: Arc<dyn HubDevice>,
    /// Distinguishes reconnections that reuse the same identifier
    generation: u64,
    /// Stops this session's disconnect watcher
    watcher: CancellationToken,
}

type Sessions = Arc<RwLock<HashMap<String, HubSession>>>;

/// HubRegistry owns the discover/connect/disconnect lifecycle.
/// - Consumes driver discoveries and connects to each hub
/// - Watches every session's event emitter for disconnects
/// - Serializes inserts/removals against lookups with one RwLock
/// - Never exposes the session map itself
pub struct HubRegistry {
    sessions: Sessions,
    driver: Arc<dyn HubDriver>,
    bus: SharedBus,
    /// Parent of every session watcher token
    shutdown: CancellationToken,
    next_generation: AtomicU64,
}

impl HubRegistry {
    pub fn new(driver: Arc<dyn HubDriver>, bus: SharedBus) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            driver,
            bus,
            shutdown: CancellationToken::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Consume driver discoveries until `shutdown` fires.
    /// Should be spawned as a task.
    ///
    /// `rx` comes from the driver's `subscribe()` and must be taken before the
    /// first scan, otherwise early discoveries are missed.
    pub async fn run(
        &self,
        mut rx: broadcast::Receiver<DriverEvent>,
        shutdown: CancellationToken,
    ) {
        info!("HubRegistry started (driver: {})", self.driver.name());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(DriverEvent::Discovered(hub)) => {
                        self.on_discovered(hub).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("HubRegistry lagged, {} discoveries skipped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        info!("Driver event stream closed");
                        break;
                    }
                },
            }
        }

        info!("HubRegistry stopped");
    }

    /// Connect to a discovered hub and register its session.
    ///
    /// Returns whether a new session was registered. Connection failures are
    /// logged and published, never surfaced: nobody is waiting on a discovery.
    pub async fn on_discovered(&self, hub: DiscoveredHub) -> bool {
        let hub_id = hub.uuid.clone();

        if self.contains(&hub_id).await {
            debug!("Hub {} already registered, ignoring discovery", hub_id);
            return false;
        }

        self.bus.publish(BusEvent::HubDiscovered {
            hub_id: hub_id.clone(),
            name: hub.name.clone(),
        });

        let device = match self.driver.connect(hub).await {
            Ok(device) => device,
            Err(e) => {
                warn!("Failed to connect to hub {}: {}", hub_id, e);
                self.bus.publish(BusEvent::HubConnectFailed {
                    hub_id,
                    error: e.to_string(),
                });
                return false;
            }
        };

        // Subscribe before the session becomes visible so no disconnect is missed
        let events = device.subscribe();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let watcher = self.shutdown.child_token();

        let inserted = {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&hub_id) {
                false
            } else {
                sessions.insert(
                    hub_id.clone(),
                    HubSession {
                        device: device.clone(),
                        generation,
                        watcher: watcher.clone(),
                    },
                );
                true
            }
        };
        if !inserted {
            debug!("Hub {} registered concurrently, dropping duplicate", hub_id);
            device.disconnect().await;
            return false;
        }

        info!("Connected to {}!", hub_id);
        self.bus.publish(BusEvent::HubConnected {
            hub_id: hub_id.clone(),
            name: device.name().to_string(),
            hub_type: device.hub_type().0,
        });

        spawn_disconnect_watcher(
            self.sessions.clone(),
            self.bus.clone(),
            hub_id,
            generation,
            events,
            watcher,
        );
        true
    }

    /// Remove the session for `hub_id`. Unknown identifiers are a no-op.
    pub async fn on_disconnected(&self, hub_id: &str) -> bool {
        remove_session(&self.sessions, &self.bus, hub_id, None).await
    }

    /// Snapshot of every connected hub
    pub async fn list(&self) -> Vec<Arc<dyn HubDevice>> {
        self.sessions
            .read()
            .await
            .values()
            .map(|s| s.device.clone())
            .collect()
    }

    /// Live device for `hub_id`
    pub async fn get(&self, hub_id: &str) -> Result<Arc<dyn HubDevice>, CommandError> {
        self.sessions
            .read()
            .await
            .get(hub_id)
            .map(|s| s.device.clone())
            .ok_or_else(|| CommandError::HubNotConnected(hub_id.to_string()))
    }

    pub async fn contains(&self, hub_id: &str) -> bool {
        self.sessions.read().await.contains_key(hub_id)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Tear down every session: stop watchers, disconnect hubs, clear the map
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let drained: Vec<(String, HubSession)> = self.sessions.write().await.drain().collect();

        for (hub_id, session) in drained {
            session.device.disconnect().await;
            info!("Hub {} disconnected (shutdown)", hub_id);
            self.bus.publish(BusEvent::HubDisconnected { hub_id });
        }
    }
}

/// Remove a session, optionally only if it still is the given generation
async fn remove_session(
    sessions: &RwLock<HashMap<String, HubSession>>,
    bus: &EventBus,
    hub_id: &str,
    generation: Option<u64>,
) -> bool {
    let removed = {
        let mut sessions = sessions.write().await;
        let current = sessions.get(hub_id).map(|s| s.generation);
        match (current, generation) {
            (Some(current), Some(expected)) if current != expected => None,
            (Some(_), _) => sessions.remove(hub_id),
            (None, _) => None,
        }
    };

    match removed {
        Some(session) => {
            session.watcher.cancel();
            info!("Hub {} disconnected", hub_id);
            bus.publish(BusEvent::HubDisconnected {
                hub_id: hub_id.to_string(),
            });
            true
        }
        None => {
            debug!("Hub {} not registered, nothing to remove", hub_id);
            false
        }
    }
}

fn spawn_disconnect_watcher(
    sessions: Sessions,
    bus: SharedBus,
    hub_id: String,
    generation: u64,
    mut events: broadcast::Receiver<HubEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(HubEvent::Disconnected) | Err(RecvError::Closed) => {
                        remove_session(&sessions, &bus, &hub_id, Some(generation)).await;
                        break;
                    }
                    Ok(HubEvent::Sensor(_)) | Err(RecvError::Lagged(_)) => {}
                },
            }
        }
    });
}

// =============================================================================
// Session rendering
// =============================================================================

/// Port binding as read at query time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortInfo {
    pub port: String,
    pub name: String,
    pub id: u8,
}

/// Hub session as rendered by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubInfo {
    pub uuid: String,
    pub battery_level: u8,
    pub current: f32,
    pub name: String,
    pub rssi: i16,
    pub hub_type: TypeInfo,
    pub ports: Vec<PortInfo>,
}

impl HubInfo {
    /// Read telemetry and every port's device type live from the hub
    pub async fn capture(device: &dyn HubDevice) -> Self {
        let telemetry = device.telemetry().await;
        let hub_type = device.hub_type();

        let mut ports = Vec::with_capacity(hub_type.ports().len());
        for &port in hub_type.ports() {
            let device_type = device.port_device_type(port).await;
            ports.push(PortInfo {
                port: port.to_string(),
                name: device_type.name().to_string(),
                id: device_type.0,
            });
        }

        Self {
            uuid: device.uuid().to_string(),
            battery_level: telemetry.battery_level,
            current: telemetry.current,
            name: device.name().to_string(),
            rssi: telemetry.rssi,
            hub_type: hub_type.into(),
            ports,
        }
    }
}
