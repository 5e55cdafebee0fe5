//! BLE device feed: decoding, the in-process hub and the BlueZ scanner

#[cfg(feature = "bluez")]
pub mod bluez;
pub mod decoder;
pub mod hub;

pub use hub::DeviceHub;

use crate::error::Result;
use crate::models::{BluetoothState, Device};
use crate::subscription::{Sink, Subscription};

/// Live per-tag observations from the radio
pub trait DeviceFeed: Send + Sync {
    /// Unconnected broadcast observations of `uuid`
    fn observe_advertisements(&self, uuid: &str, sink: Sink<Device>) -> Subscription;
    /// Observations from an active connection to `uuid`
    fn observe_heartbeats(&self, uuid: &str, sink: Sink<Device>) -> Subscription;
    /// One RSSI read; the result is delivered through `sink`
    fn read_rssi(&self, uuid: &str, sink: Sink<Result<i32>>) -> Subscription;
    fn is_connected(&self, uuid: &str) -> bool;
    /// Current adapter state, then every change
    fn observe_state(&self, sink: Sink<BluetoothState>) -> Subscription;
}
