//! BlueZ scanner that feeds the device hub
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use tokio::time::{interval, Duration};

use super::decoder::{decode_ruuvi_data, AdvertisementMeta, RUUVITAG_MANUFACTURER_ID};
use super::DeviceHub;
use crate::error::{ConnectionError, Result, StationError};
use crate::models::{BluetoothState, Device};

const POLL_INTERVAL_SECS: u64 = 2; // How often discovered devices are read
/// Nordic UART service, advertised by tags that accept connections
const NUS_SERVICE_UUID: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";

fn bt_error(e: bluer::Error) -> StationError {
    ConnectionError::Other(e.to_string()).into()
}

/// Continuously scans for RuuviTags and publishes what it sees into `hub`
///
/// Tags are identified by their upper-case MAC address. Devices whose
/// manufacturer data is not Ruuvi are published as `Device::Unrecognized` only
/// when their address is in `known`. Returns only on adapter failure.
pub async fn run_scanner(hub: DeviceHub, known: HashSet<String>) -> Result<()> {
    // Initialize Bluetooth session
    let session = match bluer::Session::new().await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create Bluetooth session: {}", e);
            hub.set_state(BluetoothState::Unsupported);
            return Err(bt_error(e));
        }
    };

    let adapter = match session.default_adapter().await {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Failed to get default Bluetooth adapter: {}", e);
            hub.set_state(BluetoothState::Unsupported);
            return Err(bt_error(e));
        }
    };

    if let Err(e) = adapter.set_powered(true).await {
        error!("Failed to power on adapter: {}", e);
        hub.set_state(BluetoothState::PoweredOff);
        return Err(bt_error(e));
    }
    hub.set_state(BluetoothState::PoweredOn);

    // Configure discovery filter for Low Energy devices only
    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le,
        duplicate_data: true,
        ..Default::default()
    };
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    let discovery = adapter.discover_devices().await.map_err(|e| {
        error!("Failed to start device discovery: {}", e);
        bt_error(e)
    })?;
    let discovery_handle = tokio::spawn(async move {
        let mut stream = Box::pin(discovery);
        while let Some(event) = stream.next().await {
            debug!("Discovery event: {:?}", event);
        }
    });

    info!("Scanning for RuuviTags on {}", adapter.name());
    let mut ticker = interval(Duration::from_secs(POLL_INTERVAL_SECS));
    let result = loop {
        ticker.tick().await;

        match adapter.is_powered().await {
            Ok(true) => hub.set_state(BluetoothState::PoweredOn),
            Ok(false) => {
                hub.set_state(BluetoothState::PoweredOff);
                continue;
            }
            Err(e) => break Err(bt_error(e)),
        }

        let addresses = match adapter.device_addresses().await {
            Ok(addresses) => addresses,
            Err(e) => {
                error!("Failed to get device addresses: {}", e);
                break Err(bt_error(e));
            }
        };

        for addr in addresses {
            let device = match adapter.device(addr) {
                Ok(device) => device,
                Err(_) => continue,
            };
            if let Some(observed) = read_device(&device, &known).await {
                let connected = match &observed {
                    Device::Ruuvi(tag) => tag.is_connected,
                    Device::Unrecognized { .. } => false,
                };
                hub.set_connected(observed.uuid(), connected);
                if connected {
                    hub.publish_heartbeat(observed.clone());
                }
                hub.publish_advertisement(observed);
            }
        }
    };

    discovery_handle.abort();
    result
}

async fn read_device(device: &bluer::Device, known: &HashSet<String>) -> Option<Device> {
    let uuid = device.address().to_string().to_uppercase();
    let rssi = device.rssi().await.ok().flatten().map(i32::from);

    let manufacturer_data = match device.manufacturer_data().await {
        Ok(Some(data)) => data,
        Ok(None) => {
            debug!("No manufacturer data for {}", uuid);
            return known
                .contains(&uuid)
                .then(|| Device::Unrecognized { uuid, rssi });
        }
        Err(e) => {
            debug!("Failed to get manufacturer data for {}: {}", uuid, e);
            return None;
        }
    };

    let Some(payload) = manufacturer_data.get(&RUUVITAG_MANUFACTURER_ID) else {
        return known
            .contains(&uuid)
            .then(|| Device::Unrecognized { uuid, rssi });
    };

    let is_connectable = device
        .uuids()
        .await
        .ok()
        .flatten()
        .map(|uuids| uuids.iter().any(|u| u.to_string() == NUS_SERVICE_UUID))
        .unwrap_or(false);
    let meta = AdvertisementMeta {
        uuid: uuid.clone(),
        is_connectable,
        is_connected: device.is_connected().await.unwrap_or(false),
        rssi,
    };

    let tag = decode_ruuvi_data(payload, &meta)?;
    debug!(
        "Received data from {}: temp={:?}°C, humidity={:?}%, pressure={:?} hPa",
        uuid, tag.celsius, tag.relative_humidity, tag.pressure
    );
    Some(Device::Ruuvi(tag))
}
