//! Key-value settings, keep-connection preferences and card backgrounds

use log::info;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use crate::config::StationConfig;
use crate::events::{EventBus, StationEvent};
use crate::models::{Background, HumidityUnit, TemperatureUnit};
use crate::utils::lock;

/// Number of bundled card backgrounds
pub const DEFAULT_BACKGROUNDS: u8 = 9;

/// User preferences and one-time hint flags
pub trait Settings: Send + Sync {
    fn temperature_unit(&self) -> TemperatureUnit;
    fn set_temperature_unit(&self, unit: TemperatureUnit);
    fn humidity_unit(&self) -> HumidityUnit;
    fn set_humidity_unit(&self, unit: HumidityUnit);
    fn read_rssi(&self) -> bool;
    fn set_read_rssi(&self, read: bool);
    fn read_rssi_interval_secs(&self) -> u64;
    fn set_read_rssi_interval_secs(&self, secs: u64);
    fn cards_swipe_hint_was_shown(&self) -> bool;
    fn set_cards_swipe_hint_was_shown(&self, shown: bool);
    fn keep_connection_dialog_was_shown(&self, uuid: &str) -> bool;
    fn set_keep_connection_dialog_was_shown(&self, uuid: &str);
}

struct SettingsState {
    temperature_unit: TemperatureUnit,
    humidity_unit: HumidityUnit,
    read_rssi: bool,
    read_rssi_interval_secs: u64,
    cards_swipe_hint_was_shown: bool,
    keep_connection_dialog_shown: HashSet<String>,
}

/// Settings held in memory; changes are announced on the bus
pub struct MemorySettings {
    state: Mutex<SettingsState>,
    bus: EventBus,
}

impl MemorySettings {
    pub fn new(config: &StationConfig, bus: EventBus) -> Self {
        MemorySettings {
            state: Mutex::new(SettingsState {
                temperature_unit: config.temperature_unit,
                humidity_unit: config.humidity_unit,
                read_rssi: config.read_rssi,
                read_rssi_interval_secs: config.read_rssi_interval_secs,
                cards_swipe_hint_was_shown: false,
                keep_connection_dialog_shown: HashSet::new(),
            }),
            bus,
        }
    }
}

impl Settings for MemorySettings {
    fn temperature_unit(&self) -> TemperatureUnit {
        lock(&self.state).temperature_unit
    }

    fn set_temperature_unit(&self, unit: TemperatureUnit) {
        lock(&self.state).temperature_unit = unit;
        self.bus.emit_lossy(StationEvent::TemperatureUnitChanged);
    }

    fn humidity_unit(&self) -> HumidityUnit {
        lock(&self.state).humidity_unit
    }

    fn set_humidity_unit(&self, unit: HumidityUnit) {
        lock(&self.state).humidity_unit = unit;
        self.bus.emit_lossy(StationEvent::HumidityUnitChanged);
    }

    fn read_rssi(&self) -> bool {
        lock(&self.state).read_rssi
    }

    fn set_read_rssi(&self, read: bool) {
        lock(&self.state).read_rssi = read;
        self.bus.emit_lossy(StationEvent::ReadRssiChanged);
    }

    fn read_rssi_interval_secs(&self) -> u64 {
        lock(&self.state).read_rssi_interval_secs
    }

    fn set_read_rssi_interval_secs(&self, secs: u64) {
        lock(&self.state).read_rssi_interval_secs = secs.max(1);
        self.bus.emit_lossy(StationEvent::ReadRssiIntervalChanged);
    }

    fn cards_swipe_hint_was_shown(&self) -> bool {
        lock(&self.state).cards_swipe_hint_was_shown
    }

    fn set_cards_swipe_hint_was_shown(&self, shown: bool) {
        lock(&self.state).cards_swipe_hint_was_shown = shown;
    }

    fn keep_connection_dialog_was_shown(&self, uuid: &str) -> bool {
        lock(&self.state).keep_connection_dialog_shown.contains(uuid)
    }

    fn set_keep_connection_dialog_was_shown(&self, uuid: &str) {
        lock(&self.state)
            .keep_connection_dialog_shown
            .insert(uuid.to_string());
    }
}

/// Per-tag "keep connection" preference
pub trait ConnectionPersistence: Send + Sync {
    fn keep_connection_uuids(&self) -> Vec<String>;
    fn keep_connection(&self, uuid: &str) -> bool;
    /// Announces `KeepConnectionStarted`/`Stopped` when the preference changes
    fn set_keep_connection(&self, uuid: &str, keep: bool);
}

pub struct MemoryConnectionPersistence {
    uuids: Mutex<BTreeSet<String>>,
    bus: EventBus,
}

impl MemoryConnectionPersistence {
    pub fn new(initial: impl IntoIterator<Item = String>, bus: EventBus) -> Self {
        MemoryConnectionPersistence {
            uuids: Mutex::new(initial.into_iter().collect()),
            bus,
        }
    }
}

impl ConnectionPersistence for MemoryConnectionPersistence {
    fn keep_connection_uuids(&self) -> Vec<String> {
        lock(&self.uuids).iter().cloned().collect()
    }

    fn keep_connection(&self, uuid: &str) -> bool {
        lock(&self.uuids).contains(uuid)
    }

    fn set_keep_connection(&self, uuid: &str, keep: bool) {
        let changed = {
            let mut uuids = lock(&self.uuids);
            if keep {
                uuids.insert(uuid.to_string())
            } else {
                uuids.remove(uuid)
            }
        };
        if !changed {
            return;
        }
        info!("Keep connection to {}: {}", uuid, keep);
        let uuid = uuid.to_string();
        self.bus.emit_lossy(if keep {
            StationEvent::KeepConnectionStarted { uuid }
        } else {
            StationEvent::KeepConnectionStopped { uuid }
        });
    }
}

/// Card background per tag
pub trait BackgroundPersistence: Send + Sync {
    fn background(&self, uuid: &str) -> Option<Background>;
    /// Cycles to the next bundled background and returns it
    fn set_next_default_background(&self, uuid: &str) -> Background;
    fn set_custom_background(&self, uuid: &str, path: &str);
}

pub struct MemoryBackgroundPersistence {
    backgrounds: Mutex<HashMap<String, Background>>,
    bus: EventBus,
}

impl MemoryBackgroundPersistence {
    pub fn new(bus: EventBus) -> Self {
        MemoryBackgroundPersistence {
            backgrounds: Mutex::new(HashMap::new()),
            bus,
        }
    }

    fn store(&self, uuid: &str, background: Background) {
        lock(&self.backgrounds).insert(uuid.to_string(), background);
        self.bus.emit_lossy(StationEvent::BackgroundChanged {
            uuid: uuid.to_string(),
        });
    }
}

impl BackgroundPersistence for MemoryBackgroundPersistence {
    fn background(&self, uuid: &str) -> Option<Background> {
        lock(&self.backgrounds).get(uuid).cloned()
    }

    fn set_next_default_background(&self, uuid: &str) -> Background {
        let next = match self.background(uuid) {
            Some(Background::Default(n)) => n % DEFAULT_BACKGROUNDS + 1,
            _ => 1,
        };
        let background = Background::Default(next);
        self.store(uuid, background.clone());
        background
    }

    fn set_custom_background(&self, uuid: &str, path: &str) {
        self.store(uuid, Background::Custom(path.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_connection_announces_only_changes() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let persistence = MemoryConnectionPersistence::new(Vec::new(), bus);

        persistence.set_keep_connection("a", true);
        persistence.set_keep_connection("a", true);
        persistence.set_keep_connection("a", false);

        assert_eq!(
            rx.try_recv().ok(),
            Some(StationEvent::KeepConnectionStarted { uuid: "a".into() })
        );
        assert_eq!(
            rx.try_recv().ok(),
            Some(StationEvent::KeepConnectionStopped { uuid: "a".into() })
        );
        assert!(rx.try_recv().is_err());
        assert!(persistence.keep_connection_uuids().is_empty());
    }

    #[test]
    fn default_backgrounds_cycle() {
        let backgrounds = MemoryBackgroundPersistence::new(EventBus::new(16));
        assert_eq!(backgrounds.set_next_default_background("a"), Background::Default(1));
        for _ in 1..DEFAULT_BACKGROUNDS {
            backgrounds.set_next_default_background("a");
        }
        assert_eq!(backgrounds.background("a"), Some(Background::Default(DEFAULT_BACKGROUNDS)));
        assert_eq!(backgrounds.set_next_default_background("a"), Background::Default(1));
    }
}
