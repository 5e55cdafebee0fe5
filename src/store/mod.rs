//! Tag registry contracts and the in-memory store behind them

pub mod memory;

pub use memory::MemoryTagStore;

use time::OffsetDateTime;

use crate::error::{Result, StationError};
use crate::models::{Reading, TagRecord, WebTagData, WebTagRecord};
use crate::subscription::{Sink, Subscription};

/// Change notification for a watched collection
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange<T> {
    /// Current contents, delivered once when the watch starts
    Initial(Vec<T>),
    /// New contents and the indices (into `set`) of inserted entries
    Updated { set: Vec<T>, insertions: Vec<usize> },
    Error(StationError),
}

/// Change notification for a single watched record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange<T> {
    Changed(T),
    Deleted,
    Error(StationError),
}

/// Live queries over stored tags
pub trait TagRegistry: Send + Sync {
    fn watch_tags(&self, sink: Sink<RegistryChange<TagRecord>>) -> Subscription;
    fn watch_web_tags(&self, sink: Sink<RegistryChange<WebTagRecord>>) -> Subscription;
    fn watch_tag(&self, uuid: &str, sink: Sink<RecordChange<TagRecord>>) -> Subscription;
    fn watch_web_tag_data(&self, uuid: &str, sink: Sink<RegistryChange<WebTagData>>)
        -> Subscription;
}

/// Writes to stored physical tags
pub trait TagPersistence: Send + Sync {
    fn update_name(&self, uuid: &str, name: &str) -> Result<()>;
    fn update_version(&self, uuid: &str, version: u8) -> Result<()>;
    fn update_mac(&self, uuid: &str, mac: &str) -> Result<()>;
    fn update_is_connectable(&self, uuid: &str, is_connectable: bool) -> Result<()>;
    fn persist_reading(&self, uuid: &str, reading: Reading) -> Result<()>;
    fn delete(&self, uuid: &str) -> Result<()>;
}

/// Humidity calibration stored on the tag record
pub trait CalibrationService: Send + Sync {
    fn humidity_offset(&self, uuid: &str) -> (f64, Option<OffsetDateTime>);
    /// Stores the offset that makes `current` read as exactly 100 %
    fn calibrate_humidity_to_100_percent(&self, current: f64, uuid: &str) -> Result<()>;
}
