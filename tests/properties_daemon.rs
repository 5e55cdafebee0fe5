//! Properties daemon feeding the dashboard through the shared store

mod common;

use std::sync::Arc;

use common::{advertisement, reading, ruuvi, settle, CountingPersistence, Station};
use ruuvitag_station::daemons::PropertiesDaemon;
use ruuvitag_station::events::{Daemon, StationEvent};
use ruuvitag_station::models::{RuuviTag, TagRecord};

const MAC: &str = "AA:BB:CC:DD:EE:FF";

fn daemon(station: &Station, persistence: &Arc<CountingPersistence>) -> PropertiesDaemon {
    PropertiesDaemon::new(
        Arc::new(station.store.clone()),
        persistence.clone(),
        Arc::new(station.hub.clone()),
        station.bus.clone(),
    )
}

#[tokio::test]
async fn connectable_flag_is_written_once() {
    let station = Station::new();
    station.add_tag(TagRecord::new("A", "Sauna"));
    let persistence = Arc::new(CountingPersistence::new(station.store.clone()));
    let mut daemon = daemon(&station, &persistence);
    daemon.start();
    let mut dashboard = station.dashboard();
    dashboard.view_did_load();
    settle(|| daemon.process_pending() + dashboard.process_pending()).await;

    let tag = RuuviTag {
        is_connectable: true,
        mac: Some(MAC.to_string()),
        ..ruuvi("A", 5)
    };
    for _ in 0..3 {
        station.hub.publish_advertisement(advertisement(tag.clone()));
    }
    settle(|| daemon.process_pending() + dashboard.process_pending()).await;

    assert_eq!(persistence.connectable_writes(), 1);
    let stored = station.store.tag("A").expect("stored");
    assert!(stored.is_connectable);
    assert_eq!(stored.version, 5);
    assert_eq!(stored.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));

    let card = dashboard.card("A").expect("card");
    assert!(card.is_connectable);
    assert_eq!(card.version, 5);

    daemon.teardown();
    dashboard.teardown();
    assert_eq!(station.hub.advertisement_observers("A"), 0);
}

#[tokio::test]
async fn only_the_connectable_flag_changes_on_current_firmware() {
    let station = Station::new();
    let mut record = TagRecord::new("A", "Sauna");
    record.version = 5;
    record.mac = Some(MAC.to_string());
    record.data = vec![reading(0, 20.0)];
    station.add_tag(record);
    let persistence = Arc::new(CountingPersistence::new(station.store.clone()));
    let mut daemon = daemon(&station, &persistence);
    daemon.start();
    daemon.process_pending();

    let tag = RuuviTag {
        is_connectable: true,
        mac: Some(MAC.to_string()),
        ..ruuvi("A", 5)
    };
    for _ in 0..3 {
        station.hub.publish_advertisement(advertisement(tag.clone()));
        daemon.process_pending();
    }

    assert_eq!(persistence.writes(), 1);
    assert_eq!(persistence.connectable_writes(), 1);
    let stored = station.store.tag("A").expect("stored");
    assert!(stored.is_connectable);
    assert_eq!(stored.version, 5);
    assert_eq!(stored.mac.as_deref(), Some(MAC));
    assert_eq!(stored.data.len(), 1);
}

#[tokio::test]
async fn failed_reading_does_not_block_the_version_write() {
    let station = Station::new();
    let mut events = station.bus.subscribe();
    let mut record = TagRecord::new("A", "Sauna");
    record.mac = Some(MAC.to_string());
    record.is_connectable = true;
    station.add_tag(record);
    let persistence = Arc::new(CountingPersistence::new(station.store.clone()));
    persistence.fail_readings(1);
    let mut daemon = daemon(&station, &persistence);
    daemon.start();
    daemon.process_pending();

    let tag = RuuviTag {
        is_connectable: true,
        mac: Some(MAC.to_string()),
        ..ruuvi("A", 5)
    };
    for _ in 0..3 {
        station.hub.publish_advertisement(advertisement(tag.clone()));
        daemon.process_pending();
    }

    let stored = station.store.tag("A").expect("stored");
    assert_eq!(stored.version, 5);
    assert_eq!(stored.mac.as_deref(), Some(MAC));
    assert!(stored.is_connectable);
    assert!(stored.data.is_empty());
    // One reading plus one version write, nothing repeated afterwards
    assert_eq!(persistence.writes(), 2);

    let failures = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|event| {
            matches!(
                event,
                StationEvent::DaemonFailed {
                    daemon: Daemon::Properties,
                    ..
                }
            )
        })
        .count();
    assert_eq!(failures, 1);
}
