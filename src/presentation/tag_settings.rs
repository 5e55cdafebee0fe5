//! Settings of one physical tag, bound in both directions
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedReceiver;

use super::{PushAuthorization, Services};
use crate::alerts::{AlertKind, AlertType};
use crate::config::MovementBaseline;
use crate::events::StationEvent;
use crate::models::{
    Background, Device, HumidityUnit, RuuviTag, TagRecord, TemperatureUnit, RAW_V2_VERSION,
};
use crate::store::RecordChange;
use crate::subscription::{Envelope, HandleTable};

/// Per-kind alert controls
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlertSettings {
    pub is_on: bool,
    /// `None` for connection and movement
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagSettingsViewModel {
    pub uuid: String,
    pub mac: Option<String>,
    /// `None` when the tag still carries its uuid or MAC as name
    pub name: Option<String>,
    pub version: u8,
    pub temperature_unit: TemperatureUnit,
    pub humidity_unit: HumidityUnit,
    pub background: Option<Background>,
    pub is_connectable: bool,
    pub is_connected: bool,
    pub keep_connection: bool,
    pub relative_humidity: Option<f64>,
    pub humidity_offset: f64,
    pub humidity_offset_date: Option<OffsetDateTime>,
    pub voltage: Option<f64>,
    pub acceleration_x: Option<f64>,
    pub acceleration_y: Option<f64>,
    pub acceleration_z: Option<f64>,
    pub movement_counter: Option<i32>,
    pub measurement_sequence_number: Option<i32>,
    pub tx_power: Option<i32>,
    pub alerts: BTreeMap<AlertKind, AlertSettings>,
    pub is_push_notifications_enabled: Option<bool>,
}

impl TagSettingsViewModel {
    fn new(uuid: &str) -> Self {
        let alerts = AlertKind::ALL
            .iter()
            .map(|kind| {
                let bounds = kind.default_bounds();
                let settings = AlertSettings {
                    lower: bounds.map(|(lower, _)| lower),
                    upper: bounds.map(|(_, upper)| upper),
                    ..AlertSettings::default()
                };
                (*kind, settings)
            })
            .collect();
        TagSettingsViewModel {
            uuid: uuid.to_string(),
            mac: None,
            name: None,
            version: 0,
            temperature_unit: TemperatureUnit::default(),
            humidity_unit: HumidityUnit::default(),
            background: None,
            is_connectable: false,
            is_connected: false,
            keep_connection: false,
            relative_humidity: None,
            humidity_offset: 0.0,
            humidity_offset_date: None,
            voltage: None,
            acceleration_x: None,
            acceleration_y: None,
            acceleration_z: None,
            movement_counter: None,
            measurement_sequence_number: None,
            tx_power: None,
            alerts,
            is_push_notifications_enabled: None,
        }
    }

    pub fn alert(&self, kind: AlertKind) -> Option<&AlertSettings> {
        self.alerts.get(&kind)
    }

    fn alert_mut(&mut self, kind: AlertKind) -> &mut AlertSettings {
        self.alerts.entry(kind).or_default()
    }
}

pub trait TagSettingsView: Send + Sync {
    /// Called after every change to the view model
    fn view_model_did_change(&self, model: &TagSettingsViewModel);
    fn show_tag_removal_confirmation_dialog(&self);
    fn show_mac_address_detail(&self);
    fn show_uuid_detail(&self);
    fn show_update_firmware_dialog(&self);
    fn show_humidity_is_clipped_dialog(&self);
    fn show_both_not_connected_and_no_pn_permission_dialog(&self);
    fn show_not_connected_dialog(&self);
}

pub trait TagSettingsRouter: Send + Sync {
    fn dismiss(&self);
    fn open_humidity_calibration(&self, tag: &TagRecord, humidity: f64);
    fn open_firmware_update_guide(&self);
}

#[derive(Clone)]
pub struct TagSettingsUi {
    pub view: Arc<dyn TagSettingsView>,
    pub router: Arc<dyn TagSettingsRouter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagSettingsFeed {
    Record,
    Advertisement,
    Heartbeat,
    Bus,
    PushStatus,
}

#[derive(Debug)]
pub enum TagSettingsMessage {
    Record(RecordChange<TagRecord>),
    Device(Device),
    Event(StationEvent),
    PushStatus(PushAuthorization),
}

/// Binds one stored tag, its live observations and the user's edits
pub struct TagSettingsController {
    services: Services,
    ui: TagSettingsUi,
    movement_baseline: MovementBaseline,
    handles: HandleTable<TagSettingsFeed, TagSettingsMessage>,
    inbox: UnboundedReceiver<Envelope<TagSettingsMessage>>,
    record: TagRecord,
    humidity: Option<f64>,
    live_movement_counter: Option<i32>,
    model: TagSettingsViewModel,
}

impl TagSettingsController {
    /// Builds the view model for `tag` and starts every feed
    ///
    /// `humidity` is the value the dashboard card showed when the screen was opened.
    pub fn configure(
        services: Services,
        ui: TagSettingsUi,
        movement_baseline: MovementBaseline,
        tag: TagRecord,
        humidity: Option<f64>,
    ) -> Self {
        let (handles, inbox) = HandleTable::new();
        let mut controller = TagSettingsController {
            services,
            ui,
            movement_baseline,
            handles,
            inbox,
            model: TagSettingsViewModel::new(&tag.uuid),
            record: tag,
            humidity,
            live_movement_counter: None,
        };
        controller.sync_view_model();
        controller.observe_record();
        controller.observe_device();
        controller.listen();
        controller
    }

    pub fn view_model(&self) -> &TagSettingsViewModel {
        &self.model
    }

    pub fn feed_count(&self, predicate: impl Fn(&TagSettingsFeed) -> bool) -> usize {
        self.handles.count_where(predicate)
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
        let released = self.handles.release_all();
        if released > 0 {
            debug!("Settings of {} released {} subscriptions", self.record.uuid, released);
        }
    }

    fn uuid(&self) -> &str {
        &self.record.uuid
    }

    fn notify(&self) {
        self.ui.view.view_model_did_change(&self.model);
    }

    fn observe_record(&mut self) {
        let registry = Arc::clone(&self.services.registry);
        let uuid = self.record.uuid.clone();
        self.handles.subscribe(TagSettingsFeed::Record, TagSettingsMessage::Record, |sink| {
            registry.watch_tag(&uuid, sink)
        });
    }

    fn observe_device(&mut self) {
        let devices = Arc::clone(&self.services.devices);
        let uuid = self.record.uuid.clone();
        self.handles.subscribe(
            TagSettingsFeed::Advertisement,
            TagSettingsMessage::Device,
            |sink| devices.observe_advertisements(&uuid, sink),
        );
        self.handles.subscribe(
            TagSettingsFeed::Heartbeat,
            TagSettingsMessage::Device,
            |sink| devices.observe_heartbeats(&uuid, sink),
        );
    }

    fn listen(&mut self) {
        let bus = self.services.bus.clone();
        self.handles
            .subscribe(TagSettingsFeed::Bus, TagSettingsMessage::Event, |sink| bus.listen(sink));
    }

    pub fn handle(&mut self, envelope: Envelope<TagSettingsMessage>) {
        let Some(feed) = self.handles.accept(envelope.id).copied() else {
            return;
        };
        match envelope.message {
            TagSettingsMessage::Record(change) => self.on_record(change),
            TagSettingsMessage::Device(Device::Ruuvi(tag)) => self.sync_device(&tag),
            TagSettingsMessage::Device(Device::Unrecognized { uuid, .. }) => {
                debug!("Ignoring non-Ruuvi {:?} of {}", feed, uuid);
            }
            TagSettingsMessage::Event(event) => self.on_event(event),
            TagSettingsMessage::PushStatus(status) => {
                self.handles.release(envelope.id);
                self.on_push_status(status);
            }
        }
    }

    fn on_record(&mut self, change: RecordChange<TagRecord>) {
        match change {
            RecordChange::Changed(record) => {
                self.record = record;
                self.sync_view_model();
            }
            RecordChange::Deleted => {
                info!("Tag {} was deleted, closing its settings", self.record.uuid);
                self.ui.router.dismiss();
            }
            RecordChange::Error(error) => self.services.errors.present(&error),
        }
    }

    /// Rebuilds every field from the stored record and collaborator state
    fn sync_view_model(&mut self) {
        let services = &self.services;
        let record = &self.record;
        let model = &mut self.model;
        let uuid = record.uuid.as_str();

        model.temperature_unit = services.settings.temperature_unit();
        model.humidity_unit = services.settings.humidity_unit();
        model.is_connected = services.devices.is_connected(uuid);
        model.keep_connection = services.connections.keep_connection(uuid);
        model.background = services.backgrounds.background(uuid);

        model.name = if record.name == record.uuid || Some(&record.name) == record.mac.as_ref() {
            None
        } else {
            Some(record.name.clone())
        };
        model.is_connectable = record.is_connectable;
        model.mac = record.mac.clone();
        model.uuid = record.uuid.clone();
        model.version = record.version;

        model.humidity_offset = record.humidity_offset;
        model.humidity_offset_date = record.humidity_offset_date;
        model.relative_humidity = record
            .last_reading()
            .and_then(|reading| reading.relative_humidity)
            .or(self.humidity);

        let last = record.last_reading();
        model.voltage = last.and_then(|r| r.voltage);
        model.acceleration_x = last.and_then(|r| r.acceleration_x);
        model.acceleration_y = last.and_then(|r| r.acceleration_y);
        model.acceleration_z = last.and_then(|r| r.acceleration_z);

        // Only RAWv2 firmware reports these; older history is not shown
        if record.version == RAW_V2_VERSION {
            model.movement_counter = record.last_value(|r| r.movement_counter);
            model.measurement_sequence_number =
                record.last_value(|r| r.measurement_sequence_number);
            model.tx_power = record.last_value(|r| r.tx_power);
        } else {
            model.movement_counter = None;
            model.measurement_sequence_number = None;
            model.tx_power = None;
        }

        for kind in AlertKind::ALL {
            let config = services.alerts.configuration(uuid, kind).unwrap_or_default();
            let enabled = services.alerts.alert(uuid, kind);
            let settings = model.alert_mut(kind);
            settings.is_on = enabled.is_some();
            settings.description = config.description.clone();
            match enabled.and_then(|alert| alert.bounds()) {
                Some((lower, upper)) => {
                    settings.lower = Some(lower);
                    settings.upper = Some(upper);
                }
                None => {
                    if config.lower.is_some() {
                        settings.lower = config.lower;
                    }
                    if config.upper.is_some() {
                        settings.upper = config.upper;
                    }
                }
            }
        }

        self.notify();
    }

    /// Applies a live observation
    fn sync_device(&mut self, tag: &RuuviTag) {
        self.humidity = tag.relative_humidity;
        if tag.movement_counter.is_some() {
            self.live_movement_counter = tag.movement_counter;
        }

        let model = &mut self.model;
        model.relative_humidity = tag.relative_humidity;
        model.voltage = tag.voltage;
        model.acceleration_x = tag.acceleration_x;
        model.acceleration_y = tag.acceleration_y;
        model.acceleration_z = tag.acceleration_z;
        model.version = tag.version;
        model.is_connectable = tag.is_connectable;
        model.is_connected = tag.is_connected;
        if tag.version == RAW_V2_VERSION {
            model.movement_counter = tag.movement_counter;
            model.measurement_sequence_number = tag.measurement_sequence_number;
            model.tx_power = tag.tx_power;
        } else {
            model.movement_counter = None;
            model.measurement_sequence_number = None;
            model.tx_power = None;
        }
        if tag.mac.is_some() {
            model.mac = tag.mac.clone();
        }
        self.notify();
    }

    fn on_event(&mut self, event: StationEvent) {
        match event {
            StationEvent::TemperatureUnitChanged => {
                self.model.temperature_unit = self.services.settings.temperature_unit();
                self.notify();
            }
            StationEvent::HumidityUnitChanged => {
                self.model.humidity_unit = self.services.settings.humidity_unit();
                self.notify();
            }
            StationEvent::DidConnect { uuid } if uuid == self.record.uuid => {
                self.model.is_connected = true;
                self.notify();
            }
            StationEvent::DidDisconnect { uuid } if uuid == self.record.uuid => {
                self.model.is_connected = false;
                self.notify();
            }
            StationEvent::AppDidBecomeActive => self.check_push_notifications(),
            StationEvent::AlertChanged { uuid, kind } if uuid == self.record.uuid => {
                let is_on = self.services.alerts.is_on(&uuid, kind);
                let settings = self.model.alert_mut(kind);
                if settings.is_on != is_on {
                    settings.is_on = is_on;
                    self.notify();
                }
            }
            _ => {}
        }
    }

    fn check_push_notifications(&mut self) {
        self.handles
            .release_where(|feed| *feed == TagSettingsFeed::PushStatus);
        let push = Arc::clone(&self.services.push);
        self.handles.subscribe(
            TagSettingsFeed::PushStatus,
            TagSettingsMessage::PushStatus,
            |sink| push.authorization_status(sink),
        );
    }

    fn on_push_status(&mut self, status: PushAuthorization) {
        match status {
            PushAuthorization::NotDetermined => {
                self.services.push.register_for_remote_notifications()
            }
            PushAuthorization::Authorized => {
                self.model.is_push_notifications_enabled = Some(true);
                self.notify();
            }
            PushAuthorization::Denied => {
                self.model.is_push_notifications_enabled = Some(false);
                self.notify();
            }
        }
    }

    pub fn view_will_appear(&mut self) {
        self.check_push_notifications();
    }

    pub fn view_did_ask_to_dismiss(&mut self) {
        self.ui.router.dismiss();
    }

    pub fn set_keep_connection(&mut self, keep: bool) {
        self.model.keep_connection = keep;
        self.services.connections.set_keep_connection(&self.record.uuid, keep);
        self.notify();
    }

    /// Counter a newly enabled movement alert is anchored to
    fn movement_baseline(&self) -> i32 {
        let stored = self
            .record
            .data
            .iter()
            .max_by_key(|reading| reading.date)
            .and_then(|reading| reading.movement_counter);
        let counter = match self.movement_baseline {
            MovementBaseline::Registration => stored,
            MovementBaseline::Latest => self.live_movement_counter.or(stored),
        };
        counter.unwrap_or(0)
    }

    /// Turns an alert kind on or off using the bounds currently shown
    pub fn set_alert_on(&mut self, kind: AlertKind, on: bool) {
        let uuid = self.record.uuid.clone();
        if !on {
            self.model.alert_mut(kind).is_on = false;
            if self.services.alerts.is_on(&uuid, kind) {
                self.services.alerts.unregister(&uuid, kind);
            }
            self.notify();
            return;
        }

        let alert = match kind {
            AlertKind::Connection => Some(AlertType::Connection),
            AlertKind::Movement => Some(AlertType::Movement {
                last: self.movement_baseline(),
            }),
            bounded => {
                let settings = self.model.alert(bounded).cloned().unwrap_or_default();
                match (settings.lower, settings.upper) {
                    (Some(lower), Some(upper)) => AlertType::bounded(bounded, lower, upper),
                    _ => None,
                }
            }
        };
        let Some(alert) = alert else {
            warn!("No bounds to register {:?} alert of {}", kind, uuid);
            return;
        };

        self.model.alert_mut(kind).is_on = true;
        if !self.services.alerts.is_on(&uuid, kind) {
            self.services.alerts.register(&uuid, alert);
        }
        self.notify();
    }

    pub fn set_lower_bound(&mut self, kind: AlertKind, lower: f64) {
        if !kind.is_bounded() {
            warn!("{:?} alerts have no bounds", kind);
            return;
        }
        self.model.alert_mut(kind).lower = Some(lower);
        self.services.alerts.set_lower_bound(&self.record.uuid, kind, lower);
        self.notify();
    }

    pub fn set_upper_bound(&mut self, kind: AlertKind, upper: f64) {
        if !kind.is_bounded() {
            warn!("{:?} alerts have no bounds", kind);
            return;
        }
        self.model.alert_mut(kind).upper = Some(upper);
        self.services.alerts.set_upper_bound(&self.record.uuid, kind, upper);
        self.notify();
    }

    pub fn set_alert_description(&mut self, kind: AlertKind, description: Option<String>) {
        self.model.alert_mut(kind).description = description.clone();
        self.services
            .alerts
            .set_description(&self.record.uuid, kind, description);
        self.notify();
    }

    /// Renames the tag; an empty name falls back to the MAC, then the uuid
    pub fn rename(&mut self, name: &str) {
        let name = if name.is_empty() {
            self.record.mac.as_deref().unwrap_or(self.uuid())
        } else {
            name
        };
        if let Err(error) = self.services.persistence.update_name(&self.record.uuid, name) {
            self.services.errors.present(&error);
        }
    }

    pub fn view_did_ask_to_calibrate_humidity(&mut self) {
        if let Some(humidity) = self.humidity {
            self.ui.router.open_humidity_calibration(&self.record, humidity);
        }
    }

    /// Stores the offset that makes the current reading 100 %
    pub fn calibrate_humidity_to_100(&mut self) {
        let Some(humidity) = self.humidity else {
            return;
        };
        if let Err(error) = self
            .services
            .calibration
            .calibrate_humidity_to_100_percent(humidity, &self.record.uuid)
        {
            self.services.errors.present(&error);
        }
    }

    pub fn randomize_background(&mut self) {
        self.model.background = Some(
            self.services
                .backgrounds
                .set_next_default_background(&self.record.uuid),
        );
        self.notify();
    }

    pub fn did_pick_background(&mut self, path: &str) {
        self.services
            .backgrounds
            .set_custom_background(&self.record.uuid, path);
        self.model.background = Some(Background::Custom(path.to_string()));
        self.notify();
    }

    pub fn remove_tag(&mut self) {
        self.ui.view.show_tag_removal_confirmation_dialog();
    }

    pub fn confirm_tag_removal(&mut self) {
        match self.services.persistence.delete(&self.record.uuid) {
            Ok(()) => self.ui.router.dismiss(),
            Err(error) => self.services.errors.present(&error),
        }
    }

    pub fn tap_mac_address(&mut self) {
        if self.model.mac.is_some() {
            self.ui.view.show_mac_address_detail();
        } else {
            self.ui.view.show_update_firmware_dialog();
        }
    }

    pub fn tap_uuid(&mut self) {
        self.ui.view.show_uuid_detail();
    }

    pub fn tap_tx_power(&mut self) {
        if self.model.tx_power.is_none() {
            self.ui.view.show_update_firmware_dialog();
        }
    }

    pub fn tap_movement_counter(&mut self) {
        if self.model.movement_counter.is_none() {
            self.ui.view.show_update_firmware_dialog();
        }
    }

    pub fn tap_measurement_sequence_number(&mut self) {
        if self.model.measurement_sequence_number.is_none() {
            self.ui.view.show_update_firmware_dialog();
        }
    }

    pub fn tap_no_values_view(&mut self) {
        self.ui.view.show_update_firmware_dialog();
    }

    pub fn tap_humidity_accessory(&mut self) {
        self.ui.view.show_humidity_is_clipped_dialog();
    }

    pub fn learn_more_about_firmware_update(&mut self) {
        self.ui.router.open_firmware_update_guide();
    }

    /// Explains why alerts cannot fire right now
    pub fn tap_alerts_disabled_view(&mut self) {
        let push = self.model.is_push_notifications_enabled.unwrap_or(false);
        let connected = self.model.is_connected;
        match (push, connected) {
            (false, false) => self
                .ui
                .view
                .show_both_not_connected_and_no_pn_permission_dialog(),
            (false, true) => self
                .services
                .permission_presenter
                .present_no_push_notifications_permission(),
            (true, false) => self.ui.view.show_not_connected_dialog(),
            (true, true) => {}
        }
    }

    pub fn connect_from_alerts_disabled_dialog(&mut self) {
        self.set_keep_connection(true);
    }
}
