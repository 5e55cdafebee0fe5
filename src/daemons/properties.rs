use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::bluetooth::DeviceFeed;
use crate::error::StationError;
use crate::events::{Daemon, EventBus, StationEvent};
use crate::models::{Device, Reading, RuuviTag, TagRecord};
use crate::store::{RegistryChange, TagPersistence, TagRegistry};
use crate::subscription::{Envelope, HandleTable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertiesFeed {
    Tags,
    Advertisement(String),
}

#[derive(Debug)]
pub enum PropertiesMessage {
    Tags(RegistryChange<TagRecord>),
    Device(Device),
}

/// Writes firmware version, MAC and connectable flag back to stored tags
///
/// Each observed change is written once: the cached record is patched when a
/// write succeeds, so repeated advertisements carrying the same value are
/// ignored until the registry reports something different.
pub struct PropertiesDaemon {
    registry: Arc<dyn TagRegistry>,
    persistence: Arc<dyn TagPersistence>,
    devices: Arc<dyn DeviceFeed>,
    bus: EventBus,
    handles: HandleTable<PropertiesFeed, PropertiesMessage>,
    inbox: UnboundedReceiver<Envelope<PropertiesMessage>>,
    records: HashMap<String, TagRecord>,
}

impl PropertiesDaemon {
    pub fn new(
        registry: Arc<dyn TagRegistry>,
        persistence: Arc<dyn TagPersistence>,
        devices: Arc<dyn DeviceFeed>,
        bus: EventBus,
    ) -> Self {
        let (handles, inbox) = HandleTable::new();
        PropertiesDaemon {
            registry,
            persistence,
            devices,
            bus,
            handles,
            inbox,
            records: HashMap::new(),
        }
    }

    pub fn start(&mut self) {
        let registry = Arc::clone(&self.registry);
        self.handles
            .subscribe(PropertiesFeed::Tags, PropertiesMessage::Tags, |sink| {
                registry.watch_tags(sink)
            });
        info!("Properties daemon started");
    }

    /// Starts the daemon and applies messages until it is dropped
    pub async fn run(mut self) {
        self.start();
        while self.step().await {}
    }

    pub fn process_pending(&mut self) -> usize {
        let mut taken = 0;
        while let Ok(envelope) = self.inbox.try_recv() {
            self.handle(envelope);
            taken += 1;
        }
        taken
    }

    pub async fn step(&mut self) -> bool {
        match self.inbox.recv().await {
            Some(envelope) => {
                self.handle(envelope);
                true
            }
            None => false,
        }
    }

    pub fn teardown(&mut self) {
        self.handles.release_all();
        self.records.clear();
    }

    pub fn advertisement_feeds(&self) -> usize {
        self.handles
            .count_where(|feed| matches!(feed, PropertiesFeed::Advertisement(_)))
    }

    fn handle(&mut self, envelope: Envelope<PropertiesMessage>) {
        if self.handles.accept(envelope.id).is_none() {
            return;
        }
        match envelope.message {
            PropertiesMessage::Tags(RegistryChange::Initial(set))
            | PropertiesMessage::Tags(RegistryChange::Updated { set, .. }) => self.on_tags(set),
            PropertiesMessage::Tags(RegistryChange::Error(error)) => self.fail(error),
            PropertiesMessage::Device(Device::Ruuvi(tag)) => {
                for error in self.on_tag(&tag) {
                    self.fail(error);
                }
            }
            PropertiesMessage::Device(Device::Unrecognized { .. }) => {}
        }
    }

    fn on_tags(&mut self, set: Vec<TagRecord>) {
        let changed = set.len() != self.records.len()
            || set.iter().any(|tag| !self.records.contains_key(&tag.uuid));
        self.records = set.into_iter().map(|tag| (tag.uuid.clone(), tag)).collect();
        if !changed {
            return;
        }

        self.handles
            .release_where(|feed| matches!(feed, PropertiesFeed::Advertisement(_)));
        let uuids: Vec<String> = self.records.keys().cloned().collect();
        for uuid in uuids {
            let devices = Arc::clone(&self.devices);
            self.handles.subscribe(
                PropertiesFeed::Advertisement(uuid.clone()),
                PropertiesMessage::Device,
                |sink| devices.observe_advertisements(&uuid, sink),
            );
        }
        debug!("Properties daemon observing {} tags", self.records.len());
    }

    /// Issues every write the snapshot calls for and returns the failures
    ///
    /// A cached field only follows the snapshot once its write succeeded, so a
    /// failed write is tried again on the next advertisement.
    fn on_tag(&mut self, tag: &RuuviTag) -> Vec<StationError> {
        let mut failures = Vec::new();
        let Some(record) = self.records.get_mut(&tag.uuid) else {
            return failures;
        };

        if record.version != tag.version {
            info!(
                "{} reports firmware version {} (was {})",
                tag.uuid, tag.version, record.version
            );
            let reading = Reading::from_device(tag, OffsetDateTime::now_utc());
            if let Err(error) = self.persistence.persist_reading(&tag.uuid, reading) {
                failures.push(error);
            }
            match self.persistence.update_version(&tag.uuid, tag.version) {
                Ok(()) => record.version = tag.version,
                Err(error) => failures.push(error),
            }
        }

        if let Some(mac) = &tag.mac {
            if record.mac.as_ref() != Some(mac) {
                info!("{} has MAC {}", tag.uuid, mac);
                match self.persistence.update_mac(&tag.uuid, mac) {
                    Ok(()) => record.mac = Some(mac.clone()),
                    Err(error) => failures.push(error),
                }
            }
        }

        if record.is_connectable != tag.is_connectable {
            match self
                .persistence
                .update_is_connectable(&tag.uuid, tag.is_connectable)
            {
                Ok(()) => record.is_connectable = tag.is_connectable,
                Err(error) => failures.push(error),
            }
        }
        failures
    }

    fn fail(&self, error: StationError) {
        error!("Properties daemon failed: {}", error);
        self.bus.emit_lossy(StationEvent::DaemonFailed {
            daemon: Daemon::Properties,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::DeviceHub;
    use crate::store::MemoryTagStore;

    fn daemon(store: &MemoryTagStore, hub: &DeviceHub, bus: &EventBus) -> PropertiesDaemon {
        PropertiesDaemon::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(hub.clone()),
            bus.clone(),
        )
    }

    fn advertisement(uuid: &str, version: u8, connectable: bool) -> Device {
        Device::Ruuvi(RuuviTag {
            uuid: uuid.to_string(),
            mac: Some("AA:BB:CC:DD:EE:FF".to_string()),
            version,
            is_connectable: connectable,
            celsius: Some(20.5),
            ..RuuviTag::default()
        })
    }

    #[test]
    fn writes_each_property_change_once() {
        let bus = EventBus::new(16);
        let store = MemoryTagStore::new();
        let hub = DeviceHub::new(bus.clone());
        store
            .insert_tag(TagRecord::new("tag", "Sauna"))
            .expect("insert");

        let mut daemon = daemon(&store, &hub, &bus);
        daemon.start();
        daemon.process_pending();
        assert_eq!(daemon.advertisement_feeds(), 1);

        hub.publish_advertisement(advertisement("tag", 5, true));
        hub.publish_advertisement(advertisement("tag", 5, true));
        daemon.process_pending();

        let stored = store.tag("tag").expect("stored tag");
        assert_eq!(stored.version, 5);
        assert_eq!(stored.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert!(stored.is_connectable);
        assert_eq!(stored.data.len(), 1);
    }

    #[test]
    fn unknown_tags_are_ignored() {
        let bus = EventBus::new(16);
        let store = MemoryTagStore::new();
        let hub = DeviceHub::new(bus.clone());
        let mut daemon = daemon(&store, &hub, &bus);
        daemon.start();
        daemon.process_pending();

        hub.publish_advertisement(advertisement("stranger", 5, true));
        assert_eq!(daemon.process_pending(), 0);
        assert_eq!(daemon.advertisement_feeds(), 0);
    }

    #[test]
    fn write_failure_is_announced() {
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let store = MemoryTagStore::new();
        let hub = DeviceHub::new(bus.clone());
        store
            .insert_tag(TagRecord::new("tag", "Sauna"))
            .expect("insert");

        let mut daemon = daemon(&store, &hub, &bus);
        daemon.start();
        daemon.process_pending();

        // Queued before the deletion, so the write hits a missing tag
        hub.publish_advertisement(advertisement("tag", 3, false));
        store.delete("tag").expect("delete");
        daemon.process_pending();

        let failed = std::iter::from_fn(|| events.try_recv().ok()).any(|event| {
            matches!(
                event,
                StationEvent::DaemonFailed {
                    daemon: Daemon::Properties,
                    ..
                }
            )
        });
        assert!(failed);
    }
}
