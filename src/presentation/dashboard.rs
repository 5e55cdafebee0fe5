//! Dashboard: one card per known tag, kept live against every feed
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval, Duration, MissedTickBehavior};

use super::{InfoProvider, MailComposer, PermissionsManager, Services};
use crate::alerts::{evaluate_tag, AlertState, MetricSnapshot};
use crate::error::{LocationError, Result, StationError};
use crate::events::{Daemon, StationEvent};
use crate::models::{
    Background, BluetoothState, Device, HumidityUnit, Location, RuuviTag, TagRecord,
    TemperatureUnit, WebTagData, WebTagRecord,
};
use crate::store::RegistryChange;
use crate::subscription::{Envelope, HandleTable, Sink, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    Ruuvi,
    Web,
}

/// Live projection of one tag shown as a dashboard card
#[derive(Debug, Clone, PartialEq)]
pub struct CardViewModel {
    /// Serial assigned when the card is built; an updated card keeps it
    pub instance: u64,
    pub uuid: String,
    pub kind: CardKind,
    pub name: String,
    pub mac: Option<String>,
    pub version: u8,
    pub celsius: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub voltage: Option<f64>,
    pub acceleration_x: Option<f64>,
    pub acceleration_y: Option<f64>,
    pub acceleration_z: Option<f64>,
    pub movement_counter: Option<i32>,
    /// Session only, never persisted
    pub rssi: Option<i32>,
    pub date: Option<OffsetDateTime>,
    pub is_connectable: bool,
    pub is_connected: bool,
    pub alert_state: AlertState,
    pub temperature_unit: TemperatureUnit,
    pub humidity_unit: HumidityUnit,
    pub background: Option<Background>,
    pub humidity_offset: f64,
    pub location: Option<Location>,
}

impl CardViewModel {
    fn blank(instance: u64, uuid: &str, kind: CardKind) -> Self {
        CardViewModel {
            instance,
            uuid: uuid.to_string(),
            kind,
            name: String::new(),
            mac: None,
            version: 0,
            celsius: None,
            relative_humidity: None,
            pressure: None,
            voltage: None,
            acceleration_x: None,
            acceleration_y: None,
            acceleration_z: None,
            movement_counter: None,
            rssi: None,
            date: None,
            is_connectable: false,
            is_connected: false,
            alert_state: AlertState::Empty,
            temperature_unit: TemperatureUnit::default(),
            humidity_unit: HumidityUnit::default(),
            background: None,
            humidity_offset: 0.0,
            location: None,
        }
    }

    fn ruuvi(instance: u64, record: &TagRecord) -> Self {
        let mut card = CardViewModel::blank(instance, &record.uuid, CardKind::Ruuvi);
        card.update_record(record);
        card
    }

    fn web(instance: u64, record: &WebTagRecord) -> Self {
        let mut card = CardViewModel::blank(instance, &record.uuid, CardKind::Web);
        card.update_web_record(record);
        card
    }

    /// Applies stored fields; a stored reading older than what the card shows is ignored
    fn update_record(&mut self, record: &TagRecord) {
        self.name = record.name.clone();
        self.mac = record.mac.clone();
        self.version = record.version;
        self.is_connectable = record.is_connectable;
        self.humidity_offset = record.humidity_offset;

        if let Some(reading) = record.last_reading() {
            if self.date.map_or(true, |shown| reading.date >= shown) {
                self.celsius = reading.celsius;
                self.relative_humidity = reading.relative_humidity;
                self.pressure = reading.pressure;
                self.voltage = reading.voltage;
                self.acceleration_x = reading.acceleration_x;
                self.acceleration_y = reading.acceleration_y;
                self.acceleration_z = reading.acceleration_z;
                self.movement_counter = reading.movement_counter;
                self.date = Some(reading.date);
            }
        }
    }

    fn update_web_record(&mut self, record: &WebTagRecord) {
        self.name = record.name.clone();
        self.location = record.location.clone();
        if let Some(data) = record.latest_data() {
            self.update_web_data(data);
        }
    }

    fn update_web_data(&mut self, data: &WebTagData) {
        self.celsius = data.celsius;
        self.relative_humidity = data.relative_humidity;
        self.pressure = data.pressure;
        self.date = Some(data.date);
        if data.location.is_some() {
            self.location = data.location.clone();
        }
    }

    fn update_device(&mut self, tag: &RuuviTag, now: OffsetDateTime) {
        self.celsius = tag.celsius;
        self.relative_humidity = tag.relative_humidity;
        self.pressure = tag.pressure;
        self.voltage = tag.voltage;
        self.acceleration_x = tag.acceleration_x;
        self.acceleration_y = tag.acceleration_y;
        self.acceleration_z = tag.acceleration_z;
        self.movement_counter = tag.movement_counter;
        self.version = tag.version;
        self.is_connectable = tag.is_connectable;
        if tag.mac.is_some() {
            self.mac = tag.mac.clone();
        }
        self.date = Some(now);
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        MetricSnapshot {
            celsius: self.celsius,
            relative_humidity: self.relative_humidity,
            pressure: self.pressure,
        }
    }
}

/// Card list surface
pub trait CardsView: Send + Sync {
    /// The list was rebuilt; `cards` is the complete ordered list
    fn set_cards(&self, cards: &[CardViewModel]);
    /// One card was mutated in place
    fn card_did_change(&self, card: &CardViewModel);
    fn scroll_to(&self, index: usize, immediately: bool);
    fn show_bluetooth_disabled(&self);
    fn show_swipe_hint(&self);
    fn show_web_tag_api_limit_exceeded(&self);
    fn show_reverse_geocoding_failed(&self);
    fn show_keep_connection_dialog(&self, uuid: &str);
}

pub trait CardsRouter: Send + Sync {
    fn open_menu(&self);
    fn dismiss_menu(&self);
    fn open_discover(&self);
    fn dismiss_discover(&self);
    fn open_settings(&self);
    fn open_about(&self);
    fn open_ruuvi_website(&self);
    fn open_tag_settings(&self, tag: &TagRecord, humidity: Option<f64>);
    fn open_web_tag_settings(&self, tag: &WebTagRecord);
    fn open_tag_charts(&self);
}

pub trait TagChartsModule: Send + Sync {
    fn configure(&self, uuid: &str);
}

/// Dashboard-only collaborators
#[derive(Clone)]
pub struct DashboardUi {
    pub view: Arc<dyn CardsView>,
    pub router: Arc<dyn CardsRouter>,
    pub charts: Option<Arc<dyn TagChartsModule>>,
    pub permissions_manager: Arc<dyn PermissionsManager>,
    pub mail: Arc<dyn MailComposer>,
    pub info: Arc<dyn InfoProvider>,
    pub feedback_email: String,
    pub feedback_subject: String,
}

/// What a dashboard subscription handle is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardFeed {
    Tags,
    WebTags,
    WebTagData(String),
    Advertisement(String),
    Heartbeat(String),
    RssiTimer(String),
    RssiRead(String),
    BluetoothState,
    Bus,
    LocationPermission,
    Feedback,
}

#[derive(Debug)]
pub enum DashboardMessage {
    Tags(RegistryChange<TagRecord>),
    WebTags(RegistryChange<WebTagRecord>),
    WebTagData(RegistryChange<WebTagData>),
    Advertisement(Device),
    Heartbeat(Device),
    RssiTick,
    Rssi(Result<i32>),
    BluetoothState(BluetoothState),
    Event(StationEvent),
    LocationPermission(bool),
    FeedbackSummary(String),
}

fn find_card<'a>(cards: &'a mut [CardViewModel], uuid: &str) -> Option<&'a mut CardViewModel> {
    cards.iter_mut().find(|card| card.uuid == uuid)
}

/// Seeds a new card from current preferences
fn seed_card(services: &Services, card: &mut CardViewModel) {
    card.temperature_unit = services.settings.temperature_unit();
    card.humidity_unit = services.settings.humidity_unit();
    card.background = services.backgrounds.background(&card.uuid);
    card.alert_state = if services.alerts.has_any_registration(&card.uuid) {
        AlertState::Registered
    } else {
        AlertState::Empty
    };
}

/// Recomputes the card's alert state; true when it changed
///
/// `triggered` carries the last `AlertTriggered` report for the tag. Connection
/// and movement alerts only fire through it.
fn refresh_alert_state(services: &Services, triggered: bool, card: &mut CardViewModel) -> bool {
    let state = if triggered {
        AlertState::Firing
    } else if services.alerts.has_any_registration(&card.uuid) {
        let (offset, _) = services.calibration.humidity_offset(&card.uuid);
        evaluate_tag(services.alerts.as_ref(), &card.uuid, &card.snapshot(), offset)
    } else {
        AlertState::Empty
    };
    let changed = state != card.alert_state;
    card.alert_state = state;
    changed
}

/// Fuses both tag collections, the radio and the bus into the card list
pub struct DashboardController {
    services: Services,
    ui: DashboardUi,
    handles: HandleTable<DashboardFeed, DashboardMessage>,
    inbox: UnboundedReceiver<Envelope<DashboardMessage>>,
    tags: Option<Vec<TagRecord>>,
    web_tags: Option<Vec<WebTagRecord>>,
    cards: Vec<CardViewModel>,
    /// Tags whose alert service last reported them as triggered
    triggered: HashSet<String>,
    next_instance: u64,
}

impl DashboardController {
    pub fn new(services: Services, ui: DashboardUi) -> Self {
        let (handles, inbox) = HandleTable::new();
        DashboardController {
            services,
            ui,
            handles,
            inbox,
            tags: None,
            web_tags: None,
            cards: Vec::new(),
            triggered: HashSet::new(),
            next_instance: 1,
        }
    }

    pub fn cards(&self) -> &[CardViewModel] {
        &self.cards
    }

    pub fn card(&self, uuid: &str) -> Option<&CardViewModel> {
        self.cards.iter().find(|card| card.uuid == uuid)
    }

    /// Live handles matching `predicate`
    pub fn feed_count(&self, predicate: impl Fn(&DashboardFeed) -> bool) -> usize {
        self.handles.count_where(predicate)
    }

    /// Applies everything already queued; returns how many messages were taken
    pub fn process_pending(&mut self) -> usize {
        let mut taken = 0;
        while let Ok(envelope) = self.inbox.try_recv() {
            self.handle(envelope);
            taken += 1;
        }
        taken
    }

    /// Waits for the next message and applies it
    pub async fn step(&mut self) -> bool {
        match self.inbox.recv().await {
            Some(envelope) => {
                self.handle(envelope);
                true
            }
            None => false,
        }
    }

    pub fn view_did_load(&mut self) {
        let registry = Arc::clone(&self.services.registry);
        self.handles
            .subscribe(DashboardFeed::Tags, DashboardMessage::Tags, |sink| {
                registry.watch_tags(sink)
            });
        self.handles
            .subscribe(DashboardFeed::WebTags, DashboardMessage::WebTags, |sink| {
                registry.watch_web_tags(sink)
            });

        let bus = self.services.bus.clone();
        self.handles
            .subscribe(DashboardFeed::Bus, DashboardMessage::Event, |sink| bus.listen(sink));

        self.services.push.register_for_remote_notifications();
    }

    pub fn view_will_appear(&mut self) {
        self.handles
            .release_where(|feed| *feed == DashboardFeed::BluetoothState);
        let devices = Arc::clone(&self.services.devices);
        self.handles.subscribe(
            DashboardFeed::BluetoothState,
            DashboardMessage::BluetoothState,
            |sink| devices.observe_state(sink),
        );
    }

    pub fn view_will_disappear(&mut self) {
        self.handles
            .release_where(|feed| *feed == DashboardFeed::BluetoothState);
    }

    /// Releases every live handle; safe to call repeatedly
    pub fn teardown(&mut self) {
        let released = self.handles.release_all();
        if released > 0 {
            info!("Dashboard released {} subscriptions", released);
        }
    }

    pub fn handle(&mut self, envelope: Envelope<DashboardMessage>) {
        let Some(feed) = self.handles.accept(envelope.id).cloned() else {
            return;
        };

        match (feed, envelope.message) {
            (_, DashboardMessage::Tags(change)) => self.on_tags(change),
            (_, DashboardMessage::WebTags(change)) => self.on_web_tags(change),
            (DashboardFeed::WebTagData(uuid), DashboardMessage::WebTagData(change)) => {
                self.on_web_tag_data(&uuid, change)
            }
            (_, DashboardMessage::Advertisement(device)) => self.on_device(device, true),
            (_, DashboardMessage::Heartbeat(device)) => self.on_device(device, false),
            (DashboardFeed::RssiTimer(uuid), DashboardMessage::RssiTick) => self.read_rssi(uuid),
            (DashboardFeed::RssiRead(uuid), DashboardMessage::Rssi(result)) => {
                self.handles.release(envelope.id);
                self.on_rssi(&uuid, result);
            }
            (_, DashboardMessage::BluetoothState(state)) => {
                if state != BluetoothState::PoweredOn {
                    self.ui.view.show_bluetooth_disabled();
                }
            }
            (_, DashboardMessage::Event(event)) => self.on_event(event),
            (_, DashboardMessage::LocationPermission(granted)) => {
                self.handles.release(envelope.id);
                if !granted {
                    self.services
                        .permission_presenter
                        .present_no_location_permission();
                }
            }
            (_, DashboardMessage::FeedbackSummary(summary)) => {
                self.handles.release(envelope.id);
                self.ui.mail.present(
                    &self.ui.feedback_email,
                    &self.ui.feedback_subject,
                    &format!("\n\n{}", summary),
                );
            }
            (feed, message) => warn!("Unexpected {:?} on {:?}", message, feed),
        }
    }

    fn on_tags(&mut self, change: RegistryChange<TagRecord>) {
        match change {
            RegistryChange::Initial(set) => {
                self.tags = Some(set);
                self.sync_cards();
            }
            RegistryChange::Updated { set, insertions } => {
                let inserted = insertions
                    .last()
                    .and_then(|index| set.get(*index))
                    .map(|tag| tag.uuid.clone());
                self.tags = Some(set);
                self.sync_cards();
                if let Some(uuid) = inserted {
                    self.reveal_insertion(&uuid);
                }
            }
            RegistryChange::Error(error) => {
                self.services.errors.present(&error);
                return;
            }
        }
        self.observe_advertisements();
        self.observe_heartbeats();
        self.observe_rssi();
    }

    fn on_web_tags(&mut self, change: RegistryChange<WebTagRecord>) {
        match change {
            RegistryChange::Initial(set) => {
                self.web_tags = Some(set);
                self.sync_cards();
            }
            RegistryChange::Updated { set, insertions } => {
                let inserted = insertions
                    .last()
                    .and_then(|index| set.get(*index))
                    .map(|tag| tag.uuid.clone());
                self.web_tags = Some(set);
                self.sync_cards();
                if let Some(uuid) = inserted {
                    self.reveal_insertion(&uuid);
                }
            }
            RegistryChange::Error(error) => {
                self.services.errors.present(&error);
                return;
            }
        }
        self.observe_web_tag_data();
    }

    /// Zips both collections into cards, reusing the card already held for a uuid
    fn sync_cards(&mut self) {
        let (Some(tags), Some(web_tags)) = (self.tags.as_ref(), self.web_tags.as_ref()) else {
            return;
        };

        let mut previous: HashMap<String, CardViewModel> = self
            .cards
            .drain(..)
            .map(|card| (card.uuid.clone(), card))
            .collect();
        let mut seen = HashSet::new();
        let mut cards = Vec::with_capacity(tags.len() + web_tags.len());

        for tag in tags {
            if !seen.insert(tag.uuid.clone()) {
                warn!("Duplicate tag {} in registry, skipping", tag.uuid);
                continue;
            }
            let card = match previous.remove(&tag.uuid) {
                Some(mut card) => {
                    card.update_record(tag);
                    card
                }
                None => {
                    let mut card = CardViewModel::ruuvi(self.next_instance, tag);
                    self.next_instance += 1;
                    seed_card(&self.services, &mut card);
                    card.is_connected = self.services.devices.is_connected(&tag.uuid);
                    card
                }
            };
            cards.push(card);
        }

        for web_tag in web_tags {
            if !seen.insert(web_tag.uuid.clone()) {
                warn!("Duplicate tag {} in registry, skipping", web_tag.uuid);
                continue;
            }
            let card = match previous.remove(&web_tag.uuid) {
                Some(mut card) => {
                    card.update_web_record(web_tag);
                    card
                }
                None => {
                    let mut card = CardViewModel::web(self.next_instance, web_tag);
                    self.next_instance += 1;
                    seed_card(&self.services, &mut card);
                    card
                }
            };
            cards.push(card);
        }

        self.triggered.retain(|uuid| seen.contains(uuid));
        for card in cards.iter_mut() {
            let triggered = self.triggered.contains(&card.uuid);
            refresh_alert_state(&self.services, triggered, card);
        }

        debug!(
            "Dashboard holds {} cards, {} dropped",
            cards.len(),
            previous.len()
        );
        self.cards = cards;
        self.ui.view.set_cards(&self.cards);

        if self.cards.is_empty() {
            self.ui.router.open_discover();
        }
    }

    fn reveal_insertion(&mut self, uuid: &str) {
        self.focus(uuid, false);
        let settings = &self.services.settings;
        if self.cards.len() > 1 && !settings.cards_swipe_hint_was_shown() {
            self.ui.view.show_swipe_hint();
            settings.set_cards_swipe_hint_was_shown(true);
        }
    }

    fn focus(&self, uuid: &str, immediately: bool) {
        if let Some(index) = self.cards.iter().position(|card| card.uuid == uuid) {
            self.ui.view.scroll_to(index, immediately);
            if let Some(charts) = &self.ui.charts {
                charts.configure(uuid);
            }
        }
    }

    /// Physical tags that should hold a connection
    fn kept_connection_uuids(&self) -> Vec<String> {
        let Some(tags) = self.tags.as_ref() else {
            return Vec::new();
        };
        self.services
            .connections
            .keep_connection_uuids()
            .into_iter()
            .filter(|uuid| tags.iter().any(|tag| &tag.uuid == uuid))
            .collect()
    }

    fn observe_advertisements(&mut self) {
        self.handles
            .release_where(|feed| matches!(feed, DashboardFeed::Advertisement(_)));
        let uuids: Vec<String> = self
            .tags
            .iter()
            .flatten()
            .map(|tag| tag.uuid.clone())
            .collect();
        for uuid in uuids {
            let devices = Arc::clone(&self.services.devices);
            self.handles.subscribe(
                DashboardFeed::Advertisement(uuid.clone()),
                DashboardMessage::Advertisement,
                |sink| devices.observe_advertisements(&uuid, sink),
            );
        }
    }

    fn observe_heartbeats(&mut self) {
        self.handles
            .release_where(|feed| matches!(feed, DashboardFeed::Heartbeat(_)));
        for uuid in self.kept_connection_uuids() {
            let devices = Arc::clone(&self.services.devices);
            self.handles.subscribe(
                DashboardFeed::Heartbeat(uuid.clone()),
                DashboardMessage::Heartbeat,
                |sink| devices.observe_heartbeats(&uuid, sink),
            );
        }
    }

    /// Re-arms one RSSI timer per kept-connection tag
    fn observe_rssi(&mut self) {
        self.handles.release_where(|feed| {
            matches!(feed, DashboardFeed::RssiTimer(_) | DashboardFeed::RssiRead(_))
        });
        if !self.services.settings.read_rssi() {
            return;
        }
        let period = Duration::from_secs(self.services.settings.read_rssi_interval_secs().max(1));
        for uuid in self.kept_connection_uuids() {
            self.handles.subscribe(
                DashboardFeed::RssiTimer(uuid),
                |_: ()| DashboardMessage::RssiTick,
                move |sink: Sink<()>| {
                    Subscription::from_task(tokio::spawn(async move {
                        let mut ticker = interval(period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        loop {
                            ticker.tick().await;
                            sink.send(());
                        }
                    }))
                },
            );
        }
    }

    fn read_rssi(&mut self, uuid: String) {
        // A read still in flight from the previous tick is superseded
        self.handles
            .release_where(|feed| matches!(feed, DashboardFeed::RssiRead(u) if *u == uuid));
        let devices = Arc::clone(&self.services.devices);
        self.handles.subscribe(
            DashboardFeed::RssiRead(uuid.clone()),
            DashboardMessage::Rssi,
            |sink| devices.read_rssi(&uuid, sink),
        );
    }

    fn on_rssi(&mut self, uuid: &str, result: Result<i32>) {
        match result {
            Ok(rssi) => {
                if let Some(card) = find_card(&mut self.cards, uuid) {
                    card.rssi = Some(rssi);
                    self.ui.view.card_did_change(card);
                }
            }
            Err(error) if error.is_not_connected() => {
                debug!("RSSI of {} skipped: not connected", uuid);
            }
            Err(error) => self.services.errors.present(&error),
        }
    }

    fn observe_web_tag_data(&mut self) {
        self.handles
            .release_where(|feed| matches!(feed, DashboardFeed::WebTagData(_)));
        let uuids: Vec<String> = self
            .web_tags
            .iter()
            .flatten()
            .map(|tag| tag.uuid.clone())
            .collect();
        for uuid in uuids {
            let registry = Arc::clone(&self.services.registry);
            self.handles.subscribe(
                DashboardFeed::WebTagData(uuid.clone()),
                DashboardMessage::WebTagData,
                |sink| registry.watch_web_tag_data(&uuid, sink),
            );
        }
    }

    fn on_web_tag_data(&mut self, uuid: &str, change: RegistryChange<WebTagData>) {
        let data = match change {
            RegistryChange::Initial(data) | RegistryChange::Updated { set: data, .. } => data,
            RegistryChange::Error(error) => {
                self.services.errors.present(&error);
                return;
            }
        };
        let Some(latest) = data.iter().max_by_key(|d| d.date) else {
            return;
        };
        if let Some(card) = find_card(&mut self.cards, uuid) {
            card.update_web_data(latest);
            let triggered = self.triggered.contains(uuid);
            refresh_alert_state(&self.services, triggered, card);
            self.ui.view.card_did_change(card);
        }
    }

    fn on_device(&mut self, device: Device, advertisement: bool) {
        let tag = match device {
            Device::Ruuvi(tag) => tag,
            Device::Unrecognized { uuid, .. } => {
                debug!("Ignoring non-Ruuvi observation of {}", uuid);
                return;
            }
        };
        let Some(card) = find_card(&mut self.cards, &tag.uuid) else {
            return;
        };
        card.update_device(&tag, OffsetDateTime::now_utc());
        if advertisement {
            card.rssi = tag.rssi;
        }
        let triggered = self.triggered.contains(&tag.uuid);
        refresh_alert_state(&self.services, triggered, card);
        self.ui.view.card_did_change(card);
    }

    fn on_event(&mut self, event: StationEvent) {
        match event {
            StationEvent::TemperatureUnitChanged => {
                let unit = self.services.settings.temperature_unit();
                for card in self.cards.iter_mut() {
                    card.temperature_unit = unit;
                    self.ui.view.card_did_change(card);
                }
            }
            StationEvent::HumidityUnitChanged => {
                let unit = self.services.settings.humidity_unit();
                for card in self.cards.iter_mut() {
                    card.humidity_unit = unit;
                    self.ui.view.card_did_change(card);
                }
            }
            StationEvent::BackgroundChanged { uuid } => {
                if let Some(card) = find_card(&mut self.cards, &uuid) {
                    card.background = self.services.backgrounds.background(&uuid);
                    self.ui.view.card_did_change(card);
                }
            }
            StationEvent::DidConnect { uuid } => self.set_connected(&uuid, true),
            StationEvent::DidDisconnect { uuid } => self.set_connected(&uuid, false),
            StationEvent::AlertChanged { uuid, .. } => {
                if !self.services.alerts.has_any_registration(&uuid) {
                    self.triggered.remove(&uuid);
                }
                self.refresh_card_alert(&uuid);
            }
            StationEvent::AlertTriggered { uuid, triggered } => {
                if triggered {
                    self.triggered.insert(uuid.clone());
                } else {
                    self.triggered.remove(&uuid);
                }
                self.refresh_card_alert(&uuid);
            }
            StationEvent::KeepConnectionStarted { .. }
            | StationEvent::KeepConnectionStopped { .. } => {
                self.observe_heartbeats();
                self.observe_rssi();
            }
            StationEvent::ReadRssiChanged => {
                if self.services.settings.read_rssi() {
                    self.observe_rssi();
                } else {
                    self.handles.release_where(|feed| {
                        matches!(feed, DashboardFeed::RssiTimer(_) | DashboardFeed::RssiRead(_))
                    });
                    for card in self.cards.iter_mut() {
                        if card.rssi.take().is_some() {
                            self.ui.view.card_did_change(card);
                        }
                    }
                }
            }
            StationEvent::ReadRssiIntervalChanged => self.observe_rssi(),
            StationEvent::DaemonFailed { daemon, error } => self.on_daemon_failure(daemon, error),
            StationEvent::LocalNotificationReceived { uuid } => self.focus(&uuid, false),
            StationEvent::AppDidBecomeActive => {}
        }
    }

    fn refresh_card_alert(&mut self, uuid: &str) {
        let triggered = self.triggered.contains(uuid);
        if let Some(card) = find_card(&mut self.cards, uuid) {
            if refresh_alert_state(&self.services, triggered, card) {
                self.ui.view.card_did_change(card);
            }
        }
    }

    fn set_connected(&mut self, uuid: &str, connected: bool) {
        if let Some(card) = find_card(&mut self.cards, uuid) {
            card.is_connected = connected;
            self.ui.view.card_did_change(card);
        }
    }

    fn on_daemon_failure(&mut self, daemon: Daemon, error: StationError) {
        warn!("{:?} daemon failed: {}", daemon, error);
        if daemon != Daemon::WebTag {
            self.services.errors.present(&error);
            return;
        }
        match error {
            StationError::Location(LocationError::PermissionDenied) => {
                self.services
                    .permission_presenter
                    .present_no_location_permission();
            }
            StationError::Location(LocationError::PermissionNotDetermined) => {
                self.handles
                    .release_where(|feed| *feed == DashboardFeed::LocationPermission);
                let manager = Arc::clone(&self.ui.permissions_manager);
                self.handles.subscribe(
                    DashboardFeed::LocationPermission,
                    DashboardMessage::LocationPermission,
                    |sink| manager.request_location_permission(sink),
                );
            }
            StationError::ApiLimitExceeded => self.ui.view.show_web_tag_api_limit_exceeded(),
            StationError::Location(LocationError::ReverseGeocodingFailed) => {
                self.ui.view.show_reverse_geocoding_failed()
            }
            other => self.services.errors.present(&other),
        }
    }

    fn present_unknown(&self, uuid: &str) {
        self.services
            .errors
            .present(&StationError::UnexpectedViewModel(uuid.to_string()));
    }

    pub fn view_did_trigger_menu(&mut self) {
        self.ui.router.open_menu();
    }

    pub fn view_did_trigger_settings(&mut self, uuid: &str) {
        let Some(card) = self.card(uuid) else {
            return self.present_unknown(uuid);
        };
        match card.kind {
            CardKind::Ruuvi => {
                let humidity = card.relative_humidity;
                match self.tags.iter().flatten().find(|tag| tag.uuid == uuid) {
                    Some(tag) => self.ui.router.open_tag_settings(tag, humidity),
                    None => self.present_unknown(uuid),
                }
            }
            CardKind::Web => match self.web_tags.iter().flatten().find(|tag| tag.uuid == uuid) {
                Some(tag) => self.ui.router.open_web_tag_settings(tag),
                None => self.present_unknown(uuid),
            },
        }
    }

    pub fn view_did_trigger_chart(&mut self, uuid: &str) {
        if self.card(uuid).is_none() {
            return self.present_unknown(uuid);
        }
        if self.services.settings.keep_connection_dialog_was_shown(uuid)
            || self.services.devices.is_connected(uuid)
        {
            self.ui.router.open_tag_charts();
        } else {
            self.ui.view.show_keep_connection_dialog(uuid);
        }
    }

    pub fn view_did_dismiss_keep_connection_dialog(&mut self, uuid: &str) {
        if self.card(uuid).is_none() {
            return self.present_unknown(uuid);
        }
        self.services.settings.set_keep_connection_dialog_was_shown(uuid);
        self.ui.router.open_tag_charts();
    }

    pub fn view_did_confirm_keep_connection(&mut self, uuid: &str) {
        if self.card(uuid).is_none() {
            return self.present_unknown(uuid);
        }
        self.services.connections.set_keep_connection(uuid, true);
        self.services.settings.set_keep_connection_dialog_was_shown(uuid);
        self.ui.router.open_tag_charts();
    }

    pub fn view_did_scroll_to(&mut self, uuid: &str) {
        if self.card(uuid).is_none() {
            return self.present_unknown(uuid);
        }
        if let Some(charts) = &self.ui.charts {
            charts.configure(uuid);
        }
    }

    pub fn tag_charts_did_scroll_to(&mut self, uuid: &str) {
        if let Some(index) = self.cards.iter().position(|card| card.uuid == uuid) {
            self.ui.view.scroll_to(index, true);
        }
    }

    /// Whether the onboarding flow may close
    pub fn should_dismiss_discover(&self) -> bool {
        !self.cards.is_empty()
    }

    pub fn discover_did_add_tag(&mut self) {
        self.ui.router.dismiss_discover();
    }

    pub fn menu_did_select_add_tag(&mut self) {
        self.ui.router.dismiss_menu();
        self.ui.router.open_discover();
    }

    pub fn menu_did_select_settings(&mut self) {
        self.ui.router.dismiss_menu();
        self.ui.router.open_settings();
    }

    pub fn menu_did_select_about(&mut self) {
        self.ui.router.dismiss_menu();
        self.ui.router.open_about();
    }

    pub fn menu_did_select_get_more_sensors(&mut self) {
        self.ui.router.dismiss_menu();
        self.ui.router.open_ruuvi_website();
    }

    /// Collects the diagnostic summary off the controller task, then opens mail
    pub fn menu_did_select_feedback(&mut self) {
        self.ui.router.dismiss_menu();
        self.handles
            .release_where(|feed| *feed == DashboardFeed::Feedback);
        let info = Arc::clone(&self.ui.info);
        self.handles.subscribe(
            DashboardFeed::Feedback,
            DashboardMessage::FeedbackSummary,
            move |sink| {
                Subscription::from_task(tokio::spawn(async move {
                    match tokio::task::spawn_blocking(move || info.summary()).await {
                        Ok(summary) => sink.send(summary),
                        Err(e) => warn!("Collecting feedback summary failed: {}", e),
                    }
                }))
            },
        );
    }
}
