use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

use ruuvitag_station::alerts::MemoryAlertService;
use ruuvitag_station::bluetooth::bluez::run_scanner;
use ruuvitag_station::bluetooth::DeviceHub;
use ruuvitag_station::config::StationConfig;
use ruuvitag_station::daemons::PropertiesDaemon;
use ruuvitag_station::events::EventBus;
use ruuvitag_station::models::TagRecord;
use ruuvitag_station::presentation::headless::LogUi;
use ruuvitag_station::presentation::{DashboardController, Services};
use ruuvitag_station::services::{
    MemoryBackgroundPersistence, MemoryConnectionPersistence, MemorySettings,
};
use ruuvitag_station::store::MemoryTagStore;

async fn run_station(config: StationConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting RuuviTag station");

    let bus = EventBus::new(config.event_bus_capacity);
    let store = MemoryTagStore::new();
    for (mac, name) in &config.tags {
        // Tags are keyed by their MAC, the same way the scanner reports them
        let mac = mac.to_uppercase();
        let mut record = TagRecord::new(mac.clone(), name.clone());
        record.mac = Some(mac);
        store.insert_tag(record)?;
    }
    if config.tags.is_empty() {
        warn!("No tags configured!");
    }

    let hub = DeviceHub::new(bus.clone());
    let ui = Arc::new(LogUi);
    let services = Services {
        registry: Arc::new(store.clone()),
        persistence: Arc::new(store.clone()),
        calibration: Arc::new(store.clone()),
        devices: Arc::new(hub.clone()),
        alerts: Arc::new(MemoryAlertService::new(bus.clone())),
        settings: Arc::new(MemorySettings::new(&config, bus.clone())),
        connections: Arc::new(MemoryConnectionPersistence::new(
            config.keep_connection.iter().map(|mac| mac.to_uppercase()),
            bus.clone(),
        )),
        backgrounds: Arc::new(MemoryBackgroundPersistence::new(bus.clone())),
        bus: bus.clone(),
        errors: ui.clone(),
        permission_presenter: ui.clone(),
        push: ui.clone(),
    };

    let known: HashSet<String> = store.tags().into_iter().map(|tag| tag.uuid).collect();
    let scanner = tokio::spawn(run_scanner(hub.clone(), known));

    let daemon = PropertiesDaemon::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(hub),
        bus,
    );
    tokio::spawn(daemon.run());

    let mut dashboard = DashboardController::new(services, ui.dashboard(&config));
    let dashboard_loop = async move {
        dashboard.view_did_load();
        dashboard.view_will_appear();
        while dashboard.step().await {}
        dashboard.teardown();
    };

    // The scanner only returns on adapter failure
    tokio::select! {
        result = scanner => match result {
            Ok(result) => result.map_err(Into::into),
            Err(e) => Err(e.into()),
        },
        _ = dashboard_loop => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match StationConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            // Hold the sender so shutdown is only signalled by a real Ctrl+C
            std::future::pending::<()>().await;
        }
        let _ = tx.send(());
    });

    tokio::select! {
        result = run_station(config) => {
            match result {
                Ok(_) => info!("Station stopped"),
                Err(e) => error!("Fatal error: {}", e),
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}
