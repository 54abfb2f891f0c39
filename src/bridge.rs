//! EventBridge - fans hub sensor events out to individual subscribers
//!
//! Each subscription is keyed by (hub, subscriber, category) and owns one
//! forwarder task reading the hub's event emitter. The forwarder lives exactly
//! as long as the returned [`Subscription`], the hub session, or the service,
//! whichever ends first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, SharedBus};
use crate::driver::{HubEvent, SensorCategory, SensorEvent};
use crate::error::CommandError;
use crate::registry::HubRegistry;

/// Identifies one consumer (e.g. one WebSocket connection)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubscriptionKey {
    hub_id: String,
    subscriber: SubscriberId,
    category: SensorCategory,
}

struct Forwarder {
    /// Distinguishes a replacement forwarder from the one it replaced
    generation: u64,
    cancel: CancellationToken,
}

type ForwarderMap = HashMap<SubscriptionKey, Forwarder>;
type Forwarders = Arc<Mutex<ForwarderMap>>;

// Critical sections never panic, so a poisoned map is still consistent
fn lock(forwarders: &Mutex<ForwarderMap>) -> MutexGuard<'_, ForwarderMap> {
    forwarders.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drop the entry for `key` if it still belongs to `generation`
fn release(forwarders: &Mutex<ForwarderMap>, key: &SubscriptionKey, generation: u64) {
    let mut map = lock(forwarders);
    if map.get(key).map(|f| f.generation) == Some(generation) {
        if let Some(forwarder) = map.remove(key) {
            forwarder.cancel.cancel();
        }
    }
}

pub struct EventBridge {
    registry: Arc<HubRegistry>,
    bus: SharedBus,
    forwarders: Forwarders,
    /// Outbound channel capacity per subscription
    buffer: usize,
    next_subscriber: AtomicU64,
    next_generation: AtomicU64,
    /// Parent of every forwarder token
    shutdown: CancellationToken,
}

impl EventBridge {
    pub fn new(registry: Arc<HubRegistry>, bus: SharedBus, buffer: usize) -> Self {
        Self {
            registry,
            bus,
            forwarders: Arc::new(Mutex::new(HashMap::new())),
            buffer: buffer.max(1),
            next_subscriber: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn next_subscriber_id(&self) -> SubscriberId {
        SubscriberId(self.next_subscriber.fetch_add(1, Ordering::SeqCst))
    }

    /// Start forwarding `category` events of `hub_id` to `subscriber`.
    ///
    /// A second subscribe with the same key replaces the first: the earlier
    /// forwarder is cancelled and its `Subscription` stops receiving.
    pub async fn subscribe(
        &self,
        hub_id: &str,
        subscriber: SubscriberId,
        category: SensorCategory,
    ) -> Result<Subscription, CommandError> {
        let device = self.registry.get(hub_id).await?;
        let mut events = device.subscribe();

        let key = SubscriptionKey {
            hub_id: hub_id.to_string(),
            subscriber,
            category,
        };
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let cancel = self.shutdown.child_token();
        let (tx, rx) = mpsc::channel(self.buffer);

        let replaced = lock(&self.forwarders).insert(
            key.clone(),
            Forwarder {
                generation,
                cancel: cancel.clone(),
            },
        );
        if let Some(old) = replaced {
            debug!(
                "Replacing {} forwarder for {} (subscriber {})",
                category, hub_id, subscriber.0
            );
            old.cancel.cancel();
        }

        // The session may have gone between the lookup and the insert, after
        // `run` already detached this hub
        let still_current = matches!(
            self.registry.get(hub_id).await,
            Ok(current) if Arc::ptr_eq(&current, &device)
        );
        if !still_current {
            release(&self.forwarders, &key, generation);
            return Err(CommandError::HubNotConnected(hub_id.to_string()));
        }

        let forwarders = self.forwarders.clone();
        let task_key = key.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let key = task_key;
            debug!(
                "Forwarding {} events from {} to subscriber {}",
                key.category, key.hub_id, key.subscriber.0
            );
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(HubEvent::Sensor(reading)) if reading.category == key.category => {
                            match tx.try_send(reading) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    warn!(
                                        "Subscriber {} is full, dropping {} event from {}",
                                        key.subscriber.0, key.category, key.hub_id
                                    );
                                }
                                Err(TrySendError::Closed(_)) => break,
                            }
                        }
                        Ok(HubEvent::Sensor(_)) => {}
                        Ok(HubEvent::Disconnected) | Err(RecvError::Closed) => {
                            debug!("Hub {} went away, closing forwarder", key.hub_id);
                            break;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                "Forwarder for {} lagged, {} events skipped",
                                key.hub_id, skipped
                            );
                        }
                    },
                }
            }
            release(&forwarders, &key, generation);
        });

        Ok(Subscription {
            key,
            generation,
            rx,
            cancel,
            forwarders: self.forwarders.clone(),
        })
    }

    /// Cancel every forwarder attached to `hub_id`
    pub fn detach_hub(&self, hub_id: &str) -> usize {
        let removed: Vec<Forwarder> = {
            let mut map = lock(&self.forwarders);
            let keys: Vec<SubscriptionKey> = map
                .keys()
                .filter(|k| k.hub_id == hub_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| map.remove(k)).collect()
        };
        for forwarder in &removed {
            forwarder.cancel.cancel();
        }
        if !removed.is_empty() {
            debug!("Detached {} forwarders from {}", removed.len(), hub_id);
        }
        removed.len()
    }

    pub fn forwarder_count(&self) -> usize {
        lock(&self.forwarders).len()
    }

    /// Tear down forwarders of hubs announced as disconnected on the bus.
    /// Should be spawned as a task.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut rx = self.bus.subscribe();
        info!("EventBridge started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(BusEvent::HubDisconnected { hub_id }) => {
                        self.detach_hub(&hub_id);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("EventBridge lagged, {} bus events skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        self.shutdown.cancel();
        lock(&self.forwarders).clear();
        info!("EventBridge stopped");
    }
}

/// Live subscription handle. Dropping it detaches the forwarder.
pub struct Subscription {
    key: SubscriptionKey,
    generation: u64,
    rx: mpsc::Receiver<SensorEvent>,
    cancel: CancellationToken,
    forwarders: Forwarders,
}

impl Subscription {
    pub fn hub_id(&self) -> &str {
        &self.key.hub_id
    }

    pub fn category(&self) -> SensorCategory {
        self.key.category
    }

    /// Next forwarded event; `None` once the forwarder has stopped
    pub async fn recv(&mut self) -> Option<SensorEvent> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        release(&self.forwarders, &self.key, self.generation);
    }
}
