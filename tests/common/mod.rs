//! Shared fixtures for controller integration tests
//!
//! - `Spy`: records every view, router and presenter call
//! - `Station`: in-memory collaborators wired to one bus
//! - `settle` / `wait_for`: drive a controller until queued work is applied
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;

use ruuvitag_station::alerts::MemoryAlertService;
use ruuvitag_station::bluetooth::DeviceHub;
use ruuvitag_station::config::{MovementBaseline, StationConfig};
use ruuvitag_station::error::{Result, StationError};
use ruuvitag_station::events::EventBus;
use ruuvitag_station::models::{
    Device, Reading, RuuviTag, TagRecord, WeatherProvider, WebTagRecord,
};
use ruuvitag_station::presentation::{
    CardViewModel, CardsRouter, CardsView, DashboardController, DashboardUi, ErrorPresenter,
    InfoProvider, MailComposer, PermissionPresenter, PermissionsManager, PushAuthorization,
    PushNotifications, Services, TagChartsModule, TagSettingsController, TagSettingsRouter,
    TagSettingsUi, TagSettingsView, TagSettingsViewModel,
};
use ruuvitag_station::services::{
    MemoryBackgroundPersistence, MemoryConnectionPersistence, MemorySettings,
};
use ruuvitag_station::store::{MemoryTagStore, TagPersistence};
use ruuvitag_station::subscription::{Sink, Subscription};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetCards(Vec<String>),
    CardChanged(String),
    ScrollTo(usize),
    BluetoothDisabled,
    SwipeHint,
    ApiLimitExceeded,
    ReverseGeocodingFailed,
    KeepConnectionDialog(String),
    OpenDiscover,
    OpenTagSettings(String),
    OpenWebTagSettings(String),
    OpenTagCharts,
    ChartsConfigured(String),
    Error(StationError),
    NoLocationPermission,
    NoPushPermission,
    RegisterPush,
    Mail(String),
    SettingsChanged,
    TagRemovalConfirmation,
    UpdateFirmwareDialog,
    BothNotConnectedAndNoPnDialog,
    NotConnectedDialog,
    Dismiss,
    OpenHumidityCalibration(f64),
    Other(&'static str),
}

/// Records every UI call; answers permission prompts from its settings
pub struct Spy {
    calls: Mutex<Vec<Call>>,
    model: Mutex<Option<TagSettingsViewModel>>,
    push_status: Mutex<PushAuthorization>,
    location_granted: Mutex<bool>,
}

impl Spy {
    pub fn new() -> Arc<Self> {
        Arc::new(Spy {
            calls: Mutex::new(Vec::new()),
            model: Mutex::new(None),
            push_status: Mutex::new(PushAuthorization::Authorized),
            location_granted: Mutex::new(true),
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn errors(&self) -> Vec<StationError> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Error(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn last_model(&self) -> Option<TagSettingsViewModel> {
        self.model.lock().unwrap().clone()
    }

    pub fn set_push_status(&self, status: PushAuthorization) {
        *self.push_status.lock().unwrap() = status;
    }

    pub fn set_location_granted(&self, granted: bool) {
        *self.location_granted.lock().unwrap() = granted;
    }
}

impl CardsView for Spy {
    fn set_cards(&self, cards: &[CardViewModel]) {
        self.record(Call::SetCards(cards.iter().map(|c| c.uuid.clone()).collect()));
    }

    fn card_did_change(&self, card: &CardViewModel) {
        self.record(Call::CardChanged(card.uuid.clone()));
    }

    fn scroll_to(&self, index: usize, _immediately: bool) {
        self.record(Call::ScrollTo(index));
    }

    fn show_bluetooth_disabled(&self) {
        self.record(Call::BluetoothDisabled);
    }

    fn show_swipe_hint(&self) {
        self.record(Call::SwipeHint);
    }

    fn show_web_tag_api_limit_exceeded(&self) {
        self.record(Call::ApiLimitExceeded);
    }

    fn show_reverse_geocoding_failed(&self) {
        self.record(Call::ReverseGeocodingFailed);
    }

    fn show_keep_connection_dialog(&self, uuid: &str) {
        self.record(Call::KeepConnectionDialog(uuid.to_string()));
    }
}

impl CardsRouter for Spy {
    fn open_menu(&self) {
        self.record(Call::Other("open_menu"));
    }

    fn dismiss_menu(&self) {
        self.record(Call::Other("dismiss_menu"));
    }

    fn open_discover(&self) {
        self.record(Call::OpenDiscover);
    }

    fn dismiss_discover(&self) {
        self.record(Call::Other("dismiss_discover"));
    }

    fn open_settings(&self) {
        self.record(Call::Other("open_settings"));
    }

    fn open_about(&self) {
        self.record(Call::Other("open_about"));
    }

    fn open_ruuvi_website(&self) {
        self.record(Call::Other("open_ruuvi_website"));
    }

    fn open_tag_settings(&self, tag: &TagRecord, _humidity: Option<f64>) {
        self.record(Call::OpenTagSettings(tag.uuid.clone()));
    }

    fn open_web_tag_settings(&self, tag: &WebTagRecord) {
        self.record(Call::OpenWebTagSettings(tag.uuid.clone()));
    }

    fn open_tag_charts(&self) {
        self.record(Call::OpenTagCharts);
    }
}

impl TagChartsModule for Spy {
    fn configure(&self, uuid: &str) {
        self.record(Call::ChartsConfigured(uuid.to_string()));
    }
}

impl ErrorPresenter for Spy {
    fn present(&self, error: &StationError) {
        self.record(Call::Error(error.clone()));
    }
}

impl PermissionPresenter for Spy {
    fn present_no_location_permission(&self) {
        self.record(Call::NoLocationPermission);
    }

    fn present_no_push_notifications_permission(&self) {
        self.record(Call::NoPushPermission);
    }
}

impl PermissionsManager for Spy {
    fn request_location_permission(&self, granted: Sink<bool>) -> Subscription {
        granted.send(*self.location_granted.lock().unwrap());
        Subscription::noop()
    }
}

impl PushNotifications for Spy {
    fn register_for_remote_notifications(&self) {
        self.record(Call::RegisterPush);
    }

    fn authorization_status(&self, status: Sink<PushAuthorization>) -> Subscription {
        status.send(*self.push_status.lock().unwrap());
        Subscription::noop()
    }
}

impl MailComposer for Spy {
    fn present(&self, _email: &str, _subject: &str, body: &str) {
        self.record(Call::Mail(body.to_string()));
    }
}

impl InfoProvider for Spy {
    fn summary(&self) -> String {
        "station 1.0".to_string()
    }
}

impl TagSettingsView for Spy {
    fn view_model_did_change(&self, model: &TagSettingsViewModel) {
        *self.model.lock().unwrap() = Some(model.clone());
        self.record(Call::SettingsChanged);
    }

    fn show_tag_removal_confirmation_dialog(&self) {
        self.record(Call::TagRemovalConfirmation);
    }

    fn show_mac_address_detail(&self) {
        self.record(Call::Other("mac_address_detail"));
    }

    fn show_uuid_detail(&self) {
        self.record(Call::Other("uuid_detail"));
    }

    fn show_update_firmware_dialog(&self) {
        self.record(Call::UpdateFirmwareDialog);
    }

    fn show_humidity_is_clipped_dialog(&self) {
        self.record(Call::Other("humidity_is_clipped"));
    }

    fn show_both_not_connected_and_no_pn_permission_dialog(&self) {
        self.record(Call::BothNotConnectedAndNoPnDialog);
    }

    fn show_not_connected_dialog(&self) {
        self.record(Call::NotConnectedDialog);
    }
}

impl TagSettingsRouter for Spy {
    fn dismiss(&self) {
        self.record(Call::Dismiss);
    }

    fn open_humidity_calibration(&self, _tag: &TagRecord, humidity: f64) {
        self.record(Call::OpenHumidityCalibration(humidity));
    }

    fn open_firmware_update_guide(&self) {
        self.record(Call::Other("firmware_update_guide"));
    }
}

/// Persistence decorator that counts writes and can fail reading writes
pub struct CountingPersistence {
    inner: MemoryTagStore,
    writes: AtomicUsize,
    connectable_writes: AtomicUsize,
    failing_readings: AtomicUsize,
}

impl CountingPersistence {
    pub fn new(inner: MemoryTagStore) -> Self {
        CountingPersistence {
            inner,
            writes: AtomicUsize::new(0),
            connectable_writes: AtomicUsize::new(0),
            failing_readings: AtomicUsize::new(0),
        }
    }

    /// Every write attempt, successful or not
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn connectable_writes(&self) -> usize {
        self.connectable_writes.load(Ordering::SeqCst)
    }

    /// The next `count` reading writes fail without touching the store
    pub fn fail_readings(&self, count: usize) {
        self.failing_readings.store(count, Ordering::SeqCst);
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl TagPersistence for CountingPersistence {
    fn update_name(&self, uuid: &str, name: &str) -> Result<()> {
        self.count_write();
        self.inner.update_name(uuid, name)
    }

    fn update_version(&self, uuid: &str, version: u8) -> Result<()> {
        self.count_write();
        self.inner.update_version(uuid, version)
    }

    fn update_mac(&self, uuid: &str, mac: &str) -> Result<()> {
        self.count_write();
        self.inner.update_mac(uuid, mac)
    }

    fn update_is_connectable(&self, uuid: &str, is_connectable: bool) -> Result<()> {
        self.count_write();
        self.connectable_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_is_connectable(uuid, is_connectable)
    }

    fn persist_reading(&self, uuid: &str, reading: Reading) -> Result<()> {
        self.count_write();
        let failing = self
            .failing_readings
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StationError::Persistence("disk full".to_string()));
        }
        self.inner.persist_reading(uuid, reading)
    }

    fn delete(&self, uuid: &str) -> Result<()> {
        self.inner.delete(uuid)
    }
}

/// In-memory station: store, radio hub, preferences and a spying UI
pub struct Station {
    pub config: StationConfig,
    pub bus: EventBus,
    pub store: MemoryTagStore,
    pub hub: DeviceHub,
    pub alerts: Arc<MemoryAlertService>,
    pub settings: Arc<MemorySettings>,
    pub connections: Arc<MemoryConnectionPersistence>,
    pub spy: Arc<Spy>,
    pub services: Services,
}

impl Station {
    pub fn new() -> Self {
        Self::with_config(StationConfig::default())
    }

    pub fn with_config(config: StationConfig) -> Self {
        let bus = EventBus::new(64);
        let store = MemoryTagStore::new();
        let hub = DeviceHub::new(bus.clone());
        let alerts = Arc::new(MemoryAlertService::new(bus.clone()));
        let settings = Arc::new(MemorySettings::new(&config, bus.clone()));
        let connections = Arc::new(MemoryConnectionPersistence::new(
            config.keep_connection.clone(),
            bus.clone(),
        ));
        let spy = Spy::new();
        let services = Services {
            registry: Arc::new(store.clone()),
            persistence: Arc::new(store.clone()),
            calibration: Arc::new(store.clone()),
            devices: Arc::new(hub.clone()),
            alerts: alerts.clone(),
            settings: settings.clone(),
            connections: connections.clone(),
            backgrounds: Arc::new(MemoryBackgroundPersistence::new(bus.clone())),
            bus: bus.clone(),
            errors: spy.clone(),
            permission_presenter: spy.clone(),
            push: spy.clone(),
        };
        Station {
            config,
            bus,
            store,
            hub,
            alerts,
            settings,
            connections,
            spy,
            services,
        }
    }

    pub fn dashboard(&self) -> DashboardController {
        let ui = DashboardUi {
            view: self.spy.clone(),
            router: self.spy.clone(),
            charts: Some(self.spy.clone()),
            permissions_manager: self.spy.clone(),
            mail: self.spy.clone(),
            info: self.spy.clone(),
            feedback_email: "feedback@example.com".to_string(),
            feedback_subject: "Feedback".to_string(),
        };
        DashboardController::new(self.services.clone(), ui)
    }

    pub fn tag_settings(
        &self,
        uuid: &str,
        baseline: MovementBaseline,
        humidity: Option<f64>,
    ) -> TagSettingsController {
        let ui = TagSettingsUi {
            view: self.spy.clone(),
            router: self.spy.clone(),
        };
        let tag = self.store.tag(uuid).expect("tag is stored");
        TagSettingsController::configure(self.services.clone(), ui, baseline, tag, humidity)
    }

    pub fn add_tag(&self, record: TagRecord) {
        self.store.insert_tag(record).expect("tag inserted");
    }
}

pub fn reading(seconds: i64, celsius: f64) -> Reading {
    Reading {
        date: OffsetDateTime::from_unix_timestamp(1_700_000_000 + seconds).expect("valid date"),
        celsius: Some(celsius),
        relative_humidity: Some(45.0),
        pressure: Some(1013.0),
        voltage: Some(2.9),
        acceleration_x: Some(0.0),
        acceleration_y: Some(0.0),
        acceleration_z: Some(1.0),
        movement_counter: None,
        measurement_sequence_number: None,
        tx_power: None,
        rssi: None,
    }
}

pub fn ruuvi(uuid: &str, version: u8) -> RuuviTag {
    RuuviTag {
        uuid: uuid.to_string(),
        version,
        celsius: Some(21.5),
        relative_humidity: Some(40.0),
        pressure: Some(1001.0),
        ..RuuviTag::default()
    }
}

pub fn advertisement(tag: RuuviTag) -> Device {
    Device::Ruuvi(tag)
}

/// Lets spawned feed tasks run and applies whatever they queued
pub async fn settle(mut process: impl FnMut() -> usize) {
    for _ in 0..20 {
        tokio::task::yield_now().await;
        process();
    }
}

/// Keeps applying queued work until `done` holds, for work that leaves the runtime thread
pub async fn wait_for(mut process: impl FnMut() -> usize, done: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        process();
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

pub fn web_tag(uuid: &str, name: &str) -> WebTagRecord {
    WebTagRecord {
        uuid: uuid.to_string(),
        name: name.to_string(),
        provider: WeatherProvider::OpenWeatherMap,
        location: None,
        data: Vec::new(),
    }
}
