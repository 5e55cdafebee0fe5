//! Station-wide events and the broadcast bus that carries them

use log::warn;
use tokio::sync::broadcast;

use crate::alerts::AlertKind;
use crate::error::StationError;
use crate::subscription::{Sink, Subscription};

/// Background workers whose failures are reported on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Daemon {
    WebTag,
    Advertisement,
    Properties,
    Heartbeat,
    ReadLogs,
}

/// Cross-cutting events
///
/// Each event that used to travel as a named notification with a loosely typed
/// payload is a variant with its payload spelled out.
#[derive(Debug, Clone, PartialEq)]
pub enum StationEvent {
    TemperatureUnitChanged,
    HumidityUnitChanged,
    BackgroundChanged {
        uuid: String,
    },
    DidConnect {
        uuid: String,
    },
    DidDisconnect {
        uuid: String,
    },
    /// Any mutation of an alert configuration
    AlertChanged {
        uuid: String,
        kind: AlertKind,
    },
    /// Alert evaluator decided a tag is (or stopped) firing
    AlertTriggered {
        uuid: String,
        triggered: bool,
    },
    KeepConnectionStarted {
        uuid: String,
    },
    KeepConnectionStopped {
        uuid: String,
    },
    /// The "read RSSI" toggle flipped
    ReadRssiChanged,
    ReadRssiIntervalChanged,
    DaemonFailed {
        daemon: Daemon,
        error: StationError,
    },
    /// User opened a local notification about a tag
    LocalNotificationReceived {
        uuid: String,
    },
    AppDidBecomeActive,
}

/// Central event distribution bus
///
/// Backed by `tokio::broadcast`: publishing never blocks, listeners that fall
/// behind lose the oldest events and are told how many.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StationEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: StationEvent,
    ) -> Result<usize, broadcast::error::SendError<StationEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: StationEvent) {
        let _ = self.tx.send(event);
    }

    /// Forwards every future event into `sink` until the subscription is released
    ///
    /// Must be called from within a tokio runtime.
    pub fn listen(&self, sink: Sink<StationEvent>) -> Subscription {
        let mut rx = self.tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => sink.send(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "Bus listener {} lagged, {} events skipped",
                            sink.id(),
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription::from_task(handle)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::HandleTable;

    #[tokio::test]
    async fn listener_forwards_in_order_until_released() {
        let bus = EventBus::new(16);
        let (mut table, mut rx) = HandleTable::<&'static str, StationEvent>::new();
        let id = table.subscribe("bus", |e| e, |sink| bus.listen(sink));

        bus.emit(StationEvent::TemperatureUnitChanged).expect("listener attached");
        bus.emit(StationEvent::DidConnect { uuid: "a".into() })
            .expect("listener attached");

        let first = rx.recv().await.expect("first event");
        let second = rx.recv().await.expect("second event");
        assert_eq!(first.message, StationEvent::TemperatureUnitChanged);
        assert_eq!(second.message, StationEvent::DidConnect { uuid: "a".into() });
        assert_eq!(first.id, id);

        table.release(id);
        for _ in 0..10 {
            if bus.subscriber_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(bus.emit(StationEvent::ReadRssiChanged).is_err());
    }

    #[test]
    fn emit_lossy_without_listeners_is_fine() {
        let bus = EventBus::new(4);
        bus.emit_lossy(StationEvent::AppDidBecomeActive);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 4);
    }
}
