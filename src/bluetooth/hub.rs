use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::DeviceFeed;
use crate::error::{ConnectionError, Result};
use crate::events::{EventBus, StationEvent};
use crate::models::{BluetoothState, Device};
use crate::subscription::{Sink, Subscription};
use crate::utils::lock;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Channel {
    Advertisement,
    Heartbeat,
}

struct Observer {
    uuid: String,
    channel: Channel,
    sink: Sink<Device>,
}

struct HubState {
    next: u64,
    observers: HashMap<u64, Observer>,
    state_watchers: HashMap<u64, Sink<BluetoothState>>,
    state: BluetoothState,
    connected: HashSet<String>,
    rssi: HashMap<String, i32>,
}

/// Dispatches decoded observations to per-uuid subscribers
///
/// A radio backend (the BlueZ scanner, or a test) publishes into the hub;
/// controllers and daemons read from it through [`DeviceFeed`]. Cloning shares
/// the same hub.
#[derive(Clone)]
pub struct DeviceHub {
    inner: Arc<Mutex<HubState>>,
    bus: EventBus,
}

impl DeviceHub {
    pub fn new(bus: EventBus) -> Self {
        DeviceHub {
            inner: Arc::new(Mutex::new(HubState {
                next: 0,
                observers: HashMap::new(),
                state_watchers: HashMap::new(),
                state: BluetoothState::Unknown,
                connected: HashSet::new(),
                rssi: HashMap::new(),
            })),
            bus,
        }
    }

    pub fn publish_advertisement(&self, device: Device) {
        self.publish(Channel::Advertisement, device);
    }

    pub fn publish_heartbeat(&self, device: Device) {
        self.publish(Channel::Heartbeat, device);
    }

    fn publish(&self, channel: Channel, device: Device) {
        let sinks: Vec<Sink<Device>> = {
            let mut inner = lock(&self.inner);
            if let Device::Ruuvi(tag) = &device {
                if let Some(rssi) = tag.rssi {
                    inner.rssi.insert(tag.uuid.clone(), rssi);
                }
            }
            inner
                .observers
                .values()
                .filter(|o| o.channel == channel && o.uuid == device.uuid())
                .map(|o| o.sink.clone())
                .collect()
        };
        for sink in sinks {
            sink.send(device.clone());
        }
    }

    /// Records the connection state and announces transitions on the bus
    pub fn set_connected(&self, uuid: &str, connected: bool) {
        let changed = {
            let mut inner = lock(&self.inner);
            if connected {
                inner.connected.insert(uuid.to_string())
            } else {
                inner.connected.remove(uuid)
            }
        };
        if !changed {
            return;
        }
        info!(
            "{} {}",
            uuid,
            if connected { "connected" } else { "disconnected" }
        );
        let uuid = uuid.to_string();
        self.bus.emit_lossy(if connected {
            StationEvent::DidConnect { uuid }
        } else {
            StationEvent::DidDisconnect { uuid }
        });
    }

    pub fn set_state(&self, state: BluetoothState) {
        let sinks: Vec<Sink<BluetoothState>> = {
            let mut inner = lock(&self.inner);
            if inner.state == state {
                return;
            }
            debug!("Bluetooth state {:?} -> {:?}", inner.state, state);
            inner.state = state;
            inner.state_watchers.values().cloned().collect()
        };
        for sink in sinks {
            sink.send(state);
        }
    }

    pub fn advertisement_observers(&self, uuid: &str) -> usize {
        self.count(uuid, Channel::Advertisement)
    }

    pub fn heartbeat_observers(&self, uuid: &str) -> usize {
        self.count(uuid, Channel::Heartbeat)
    }

    fn count(&self, uuid: &str, channel: Channel) -> usize {
        lock(&self.inner)
            .observers
            .values()
            .filter(|o| o.channel == channel && o.uuid == uuid)
            .count()
    }

    fn observe(&self, uuid: &str, channel: Channel, sink: Sink<Device>) -> Subscription {
        let key = {
            let mut inner = lock(&self.inner);
            inner.next += 1;
            let key = inner.next;
            inner.observers.insert(
                key,
                Observer {
                    uuid: uuid.to_string(),
                    channel,
                    sink,
                },
            );
            key
        };
        let inner = Arc::clone(&self.inner);
        Subscription::new(move || {
            lock(&inner).observers.remove(&key);
        })
    }
}

impl DeviceFeed for DeviceHub {
    fn observe_advertisements(&self, uuid: &str, sink: Sink<Device>) -> Subscription {
        self.observe(uuid, Channel::Advertisement, sink)
    }

    fn observe_heartbeats(&self, uuid: &str, sink: Sink<Device>) -> Subscription {
        self.observe(uuid, Channel::Heartbeat, sink)
    }

    fn read_rssi(&self, uuid: &str, sink: Sink<Result<i32>>) -> Subscription {
        let result = {
            let inner = lock(&self.inner);
            match (inner.connected.contains(uuid), inner.rssi.get(uuid)) {
                (true, Some(rssi)) => Ok(*rssi),
                (true, None) => Err(ConnectionError::Timeout.into()),
                (false, _) => Err(ConnectionError::NotConnected.into()),
            }
        };
        sink.send(result);
        Subscription::noop()
    }

    fn is_connected(&self, uuid: &str) -> bool {
        lock(&self.inner).connected.contains(uuid)
    }

    fn observe_state(&self, sink: Sink<BluetoothState>) -> Subscription {
        let (key, state) = {
            let mut inner = lock(&self.inner);
            inner.next += 1;
            let key = inner.next;
            inner.state_watchers.insert(key, sink.clone());
            (key, inner.state)
        };
        sink.send(state);
        let inner = Arc::clone(&self.inner);
        Subscription::new(move || {
            lock(&inner).state_watchers.remove(&key);
        })
    }
}
