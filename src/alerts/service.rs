use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{AlertConfig, AlertKind, AlertService};
use crate::events::{EventBus, StationEvent};
use crate::utils::lock;

/// In-memory alert configuration store that announces changes on the bus
pub struct MemoryAlertService {
    configs: Mutex<HashMap<(String, AlertKind), AlertConfig>>,
    bus: EventBus,
}

impl MemoryAlertService {
    pub fn new(bus: EventBus) -> Self {
        MemoryAlertService {
            configs: Mutex::new(HashMap::new()),
            bus,
        }
    }

    fn update(&self, uuid: &str, kind: AlertKind, apply: impl FnOnce(&mut AlertConfig)) {
        {
            let mut configs = lock(&self.configs);
            let config = configs.entry((uuid.to_string(), kind)).or_default();
            apply(config);
            debug!("Alert {:?} of {} is now {:?}", kind, uuid, config);
        }
        self.bus.emit_lossy(StationEvent::AlertChanged {
            uuid: uuid.to_string(),
            kind,
        });
    }
}

impl AlertService for MemoryAlertService {
    fn configuration(&self, uuid: &str, kind: AlertKind) -> Option<AlertConfig> {
        lock(&self.configs).get(&(uuid.to_string(), kind)).cloned()
    }

    fn set_enabled(&self, uuid: &str, kind: AlertKind, enabled: bool) {
        self.update(uuid, kind, |config| config.enabled = enabled);
    }

    fn set_lower_bound(&self, uuid: &str, kind: AlertKind, lower: f64) {
        self.update(uuid, kind, |config| config.lower = Some(lower));
    }

    fn set_upper_bound(&self, uuid: &str, kind: AlertKind, upper: f64) {
        self.update(uuid, kind, |config| config.upper = Some(upper));
    }

    fn set_description(&self, uuid: &str, kind: AlertKind, description: Option<String>) {
        self.update(uuid, kind, |config| config.description = description);
    }

    fn set_movement_baseline(&self, uuid: &str, counter: i32) {
        self.update(uuid, AlertKind::Movement, |config| {
            config.movement_last = Some(counter)
        });
    }
}
