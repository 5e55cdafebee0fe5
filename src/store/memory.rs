use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

use super::{CalibrationService, RecordChange, RegistryChange, TagPersistence, TagRegistry};
use crate::error::{Result, StationError};
use crate::models::{Reading, TagRecord, WebTagData, WebTagRecord};
use crate::subscription::{Sink, Subscription};
use crate::utils::lock;

#[derive(Default)]
struct Watchers {
    next: u64,
    tags: HashMap<u64, Sink<RegistryChange<TagRecord>>>,
    web_tags: HashMap<u64, Sink<RegistryChange<WebTagRecord>>>,
    records: HashMap<u64, (String, Sink<RecordChange<TagRecord>>)>,
    web_data: HashMap<u64, (String, Sink<RegistryChange<WebTagData>>)>,
}

#[derive(Default)]
struct Inner {
    tags: Vec<TagRecord>,
    web_tags: Vec<WebTagRecord>,
    watchers: Watchers,
}

/// Pending notifications, sent after the store lock is released
#[derive(Default)]
struct Outbox {
    tags: Vec<(Sink<RegistryChange<TagRecord>>, RegistryChange<TagRecord>)>,
    web_tags: Vec<(Sink<RegistryChange<WebTagRecord>>, RegistryChange<WebTagRecord>)>,
    records: Vec<(Sink<RecordChange<TagRecord>>, RecordChange<TagRecord>)>,
    web_data: Vec<(Sink<RegistryChange<WebTagData>>, RegistryChange<WebTagData>)>,
}

impl Outbox {
    fn deliver(self) {
        for (sink, change) in self.tags {
            sink.send(change);
        }
        for (sink, change) in self.web_tags {
            sink.send(change);
        }
        for (sink, change) in self.records {
            sink.send(change);
        }
        for (sink, change) in self.web_data {
            sink.send(change);
        }
    }
}

impl Inner {
    fn tag_mut(&mut self, uuid: &str) -> Result<&mut TagRecord> {
        self.tags
            .iter_mut()
            .find(|tag| tag.uuid == uuid)
            .ok_or_else(|| StationError::Persistence(format!("tag {} not found", uuid)))
    }

    /// Queues collection and record notifications for a change to `uuid`
    fn tags_changed(&self, outbox: &mut Outbox, uuid: &str, insertions: Vec<usize>) {
        for sink in self.watchers.tags.values() {
            outbox.tags.push((
                sink.clone(),
                RegistryChange::Updated {
                    set: self.tags.clone(),
                    insertions: insertions.clone(),
                },
            ));
        }
        let record = self.tags.iter().find(|tag| tag.uuid == uuid);
        for (watched, sink) in self.watchers.records.values() {
            if watched == uuid {
                let change = match record {
                    Some(record) => RecordChange::Changed(record.clone()),
                    None => RecordChange::Deleted,
                };
                outbox.records.push((sink.clone(), change));
            }
        }
    }

    fn web_tags_changed(&self, outbox: &mut Outbox, insertions: Vec<usize>) {
        for sink in self.watchers.web_tags.values() {
            outbox.web_tags.push((
                sink.clone(),
                RegistryChange::Updated {
                    set: self.web_tags.clone(),
                    insertions: insertions.clone(),
                },
            ));
        }
    }
}

/// Tag registry kept in memory, with live watchers
///
/// Cloning shares the same store.
#[derive(Clone, Default)]
pub struct MemoryTagStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags(&self) -> Vec<TagRecord> {
        lock(&self.inner).tags.clone()
    }

    pub fn tag(&self, uuid: &str) -> Option<TagRecord> {
        lock(&self.inner).tags.iter().find(|t| t.uuid == uuid).cloned()
    }

    pub fn web_tags(&self) -> Vec<WebTagRecord> {
        lock(&self.inner).web_tags.clone()
    }

    /// Adds a tag, or fails if the uuid is already stored
    pub fn insert_tag(&self, record: TagRecord) -> Result<()> {
        let mut outbox = Outbox::default();
        {
            let mut inner = lock(&self.inner);
            if inner.tags.iter().any(|t| t.uuid == record.uuid) {
                return Err(StationError::Persistence(format!(
                    "tag {} already exists",
                    record.uuid
                )));
            }
            info!("Adding tag {} ({})", record.name, record.uuid);
            let uuid = record.uuid.clone();
            inner.tags.push(record);
            let index = inner.tags.len() - 1;
            inner.tags_changed(&mut outbox, &uuid, vec![index]);
        }
        outbox.deliver();
        Ok(())
    }

    pub fn insert_web_tag(&self, record: WebTagRecord) -> Result<()> {
        let mut outbox = Outbox::default();
        {
            let mut inner = lock(&self.inner);
            if inner.web_tags.iter().any(|t| t.uuid == record.uuid) {
                return Err(StationError::Persistence(format!(
                    "web tag {} already exists",
                    record.uuid
                )));
            }
            info!("Adding web tag {} ({})", record.name, record.uuid);
            inner.web_tags.push(record);
            let index = inner.web_tags.len() - 1;
            inner.web_tags_changed(&mut outbox, vec![index]);
        }
        outbox.deliver();
        Ok(())
    }

    pub fn delete_web_tag(&self, uuid: &str) -> Result<()> {
        let mut outbox = Outbox::default();
        {
            let mut inner = lock(&self.inner);
            let before = inner.web_tags.len();
            inner.web_tags.retain(|t| t.uuid != uuid);
            if inner.web_tags.len() == before {
                return Err(StationError::Persistence(format!("web tag {} not found", uuid)));
            }
            inner.web_tags_changed(&mut outbox, Vec::new());
        }
        outbox.deliver();
        Ok(())
    }

    /// Stores a weather observation for a web tag
    pub fn append_web_tag_data(&self, uuid: &str, data: WebTagData) -> Result<()> {
        let mut outbox = Outbox::default();
        {
            let mut inner = lock(&self.inner);
            let web_tag = inner
                .web_tags
                .iter_mut()
                .find(|t| t.uuid == uuid)
                .ok_or_else(|| StationError::Persistence(format!("web tag {} not found", uuid)))?;
            web_tag.data.push(data);
            let set = web_tag.data.clone();
            let insertions = vec![set.len() - 1];
            for (watched, sink) in inner.watchers.web_data.values() {
                if watched == uuid {
                    outbox.web_data.push((
                        sink.clone(),
                        RegistryChange::Updated {
                            set: set.clone(),
                            insertions: insertions.clone(),
                        },
                    ));
                }
            }
        }
        outbox.deliver();
        Ok(())
    }

    /// Reports a storage failure to every collection watcher
    pub fn report_error(&self, error: StationError) {
        let mut outbox = Outbox::default();
        {
            let inner = lock(&self.inner);
            for sink in inner.watchers.tags.values() {
                outbox.tags.push((sink.clone(), RegistryChange::Error(error.clone())));
            }
            for sink in inner.watchers.web_tags.values() {
                outbox
                    .web_tags
                    .push((sink.clone(), RegistryChange::Error(error.clone())));
            }
            for (_, sink) in inner.watchers.records.values() {
                outbox.records.push((sink.clone(), RecordChange::Error(error.clone())));
            }
        }
        outbox.deliver();
    }

    /// Number of installed watches of any kind
    pub fn watcher_count(&self) -> usize {
        let inner = lock(&self.inner);
        inner.watchers.tags.len()
            + inner.watchers.web_tags.len()
            + inner.watchers.records.len()
            + inner.watchers.web_data.len()
    }

    fn mutate(&self, uuid: &str, apply: impl FnOnce(&mut TagRecord)) -> Result<()> {
        let mut outbox = Outbox::default();
        {
            let mut inner = lock(&self.inner);
            apply(inner.tag_mut(uuid)?);
            inner.tags_changed(&mut outbox, uuid, Vec::new());
        }
        outbox.deliver();
        Ok(())
    }

    fn unwatch(&self, remove: impl FnOnce(&mut Watchers) + Send + 'static) -> Subscription {
        let inner = Arc::clone(&self.inner);
        Subscription::new(move || remove(&mut lock(&inner).watchers))
    }

    fn next_watcher(inner: &mut Inner) -> u64 {
        inner.watchers.next += 1;
        inner.watchers.next
    }
}

impl TagRegistry for MemoryTagStore {
    fn watch_tags(&self, sink: Sink<RegistryChange<TagRecord>>) -> Subscription {
        let (key, initial) = {
            let mut inner = lock(&self.inner);
            let key = Self::next_watcher(&mut inner);
            inner.watchers.tags.insert(key, sink.clone());
            (key, inner.tags.clone())
        };
        debug!("Tag collection watch {} installed", key);
        sink.send(RegistryChange::Initial(initial));
        self.unwatch(move |w| {
            w.tags.remove(&key);
        })
    }

    fn watch_web_tags(&self, sink: Sink<RegistryChange<WebTagRecord>>) -> Subscription {
        let (key, initial) = {
            let mut inner = lock(&self.inner);
            let key = Self::next_watcher(&mut inner);
            inner.watchers.web_tags.insert(key, sink.clone());
            (key, inner.web_tags.clone())
        };
        sink.send(RegistryChange::Initial(initial));
        self.unwatch(move |w| {
            w.web_tags.remove(&key);
        })
    }

    fn watch_tag(&self, uuid: &str, sink: Sink<RecordChange<TagRecord>>) -> Subscription {
        let key = {
            let mut inner = lock(&self.inner);
            let key = Self::next_watcher(&mut inner);
            inner
                .watchers
                .records
                .insert(key, (uuid.to_string(), sink));
            key
        };
        self.unwatch(move |w| {
            w.records.remove(&key);
        })
    }

    fn watch_web_tag_data(
        &self,
        uuid: &str,
        sink: Sink<RegistryChange<WebTagData>>,
    ) -> Subscription {
        let (key, initial) = {
            let mut inner = lock(&self.inner);
            let key = Self::next_watcher(&mut inner);
            inner
                .watchers
                .web_data
                .insert(key, (uuid.to_string(), sink.clone()));
            let initial = inner
                .web_tags
                .iter()
                .find(|t| t.uuid == uuid)
                .map(|t| t.data.clone())
                .unwrap_or_default();
            (key, initial)
        };
        sink.send(RegistryChange::Initial(initial));
        self.unwatch(move |w| {
            w.web_data.remove(&key);
        })
    }
}

impl TagPersistence for MemoryTagStore {
    fn update_name(&self, uuid: &str, name: &str) -> Result<()> {
        self.mutate(uuid, |tag| tag.name = name.to_string())
    }

    fn update_version(&self, uuid: &str, version: u8) -> Result<()> {
        self.mutate(uuid, |tag| tag.version = version)
    }

    fn update_mac(&self, uuid: &str, mac: &str) -> Result<()> {
        self.mutate(uuid, |tag| tag.mac = Some(mac.to_string()))
    }

    fn update_is_connectable(&self, uuid: &str, is_connectable: bool) -> Result<()> {
        self.mutate(uuid, |tag| tag.is_connectable = is_connectable)
    }

    fn persist_reading(&self, uuid: &str, reading: Reading) -> Result<()> {
        self.mutate(uuid, |tag| tag.data.push(reading))
    }

    fn delete(&self, uuid: &str) -> Result<()> {
        let mut outbox = Outbox::default();
        {
            let mut inner = lock(&self.inner);
            let before = inner.tags.len();
            inner.tags.retain(|t| t.uuid != uuid);
            if inner.tags.len() == before {
                return Err(StationError::Persistence(format!("tag {} not found", uuid)));
            }
            info!("Deleted tag {}", uuid);
            inner.tags_changed(&mut outbox, uuid, Vec::new());
        }
        outbox.deliver();
        Ok(())
    }
}

impl CalibrationService for MemoryTagStore {
    fn humidity_offset(&self, uuid: &str) -> (f64, Option<OffsetDateTime>) {
        self.tag(uuid)
            .map(|t| (t.humidity_offset, t.humidity_offset_date))
            .unwrap_or((0.0, None))
    }

    fn calibrate_humidity_to_100_percent(&self, current: f64, uuid: &str) -> Result<()> {
        let offset = 100.0 - current;
        info!("Calibrating humidity of {} by {:+.2}", uuid, offset);
        self.mutate(uuid, |tag| {
            tag.humidity_offset = offset;
            tag.humidity_offset_date = Some(OffsetDateTime::now_utc());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::HandleTable;

    #[test]
    fn watch_delivers_initial_then_updates() {
        let store = MemoryTagStore::new();
        store.insert_tag(TagRecord::new("a", "Sauna")).expect("insert");

        let (mut table, mut rx) = HandleTable::<&'static str, RegistryChange<TagRecord>>::new();
        let id = table.subscribe("tags", |c| c, |sink| store.watch_tags(sink));

        let initial = rx.try_recv().expect("initial delivered");
        assert!(matches!(initial.message, RegistryChange::Initial(ref set) if set.len() == 1));

        store.insert_tag(TagRecord::new("b", "Fridge")).expect("insert");
        match rx.try_recv().expect("update delivered").message {
            RegistryChange::Updated { set, insertions } => {
                assert_eq!(set.len(), 2);
                assert_eq!(insertions, vec![1]);
            }
            other => panic!("unexpected change {:?}", other),
        }

        table.release(id);
        assert_eq!(store.watcher_count(), 0);
        store.update_name("a", "Steam").expect("rename");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn record_watch_sees_changes_and_deletion() {
        let store = MemoryTagStore::new();
        store.insert_tag(TagRecord::new("a", "Sauna")).expect("insert");

        let (mut table, mut rx) = HandleTable::<(), RecordChange<TagRecord>>::new();
        table.subscribe((), |c| c, |sink| store.watch_tag("a", sink));

        store.calibrate_humidity_to_100_percent(96.5, "a").expect("calibrate");
        match rx.try_recv().expect("change delivered").message {
            RecordChange::Changed(tag) => assert_eq!(tag.humidity_offset, 3.5),
            other => panic!("unexpected change {:?}", other),
        }

        store.delete("a").expect("delete");
        assert_eq!(rx.try_recv().expect("deletion").message, RecordChange::Deleted);
        assert!(store.update_mac("a", "AA").is_err());
    }
}
