//! Firing evaluation for threshold alerts
use super::{AlertKind, AlertService, AlertState, AlertType};
use crate::humidity::Humidity;

/// Latest metrics of a tag, as held by its view model
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricSnapshot {
    pub celsius: Option<f64>,
    /// Percent, uncalibrated
    pub relative_humidity: Option<f64>,
    /// hPa
    pub pressure: Option<f64>,
}

/// Applies the calibration offset and clips at 100 %
pub fn calibrated_humidity(relative_humidity: f64, offset: f64) -> f64 {
    (relative_humidity + offset).min(100.0)
}

fn outside(value: f64, lower: f64, upper: f64) -> bool {
    value < lower || value > upper
}

/// Whether one enabled alert fires for the snapshot
///
/// Metrics the snapshot does not have never fire. Connection and movement
/// alerts are judged by the alert service, not here.
pub fn is_firing(alert: &AlertType, snapshot: &MetricSnapshot, humidity_offset: f64) -> bool {
    let calibrated = snapshot
        .relative_humidity
        .map(|rh| calibrated_humidity(rh, humidity_offset));
    let air = match (snapshot.celsius, calibrated) {
        (Some(celsius), Some(rh)) => Some(Humidity::new(celsius, rh / 100.0)),
        _ => None,
    };

    match *alert {
        AlertType::Temperature { lower, upper } => snapshot
            .celsius
            .map_or(false, |celsius| outside(celsius, lower, upper)),
        AlertType::RelativeHumidity { lower, upper } => {
            calibrated.map_or(false, |rh| outside(rh, lower, upper))
        }
        AlertType::AbsoluteHumidity { lower, upper } => air
            .and_then(|air| air.absolute())
            .map_or(false, |ah| outside(ah, lower, upper)),
        AlertType::DewPoint { lower, upper } => air
            .and_then(|air| air.dew_point())
            .map_or(false, |td| outside(td, lower, upper)),
        AlertType::Pressure { lower, upper } => snapshot
            .pressure
            .map_or(false, |pressure| outside(pressure, lower, upper)),
        AlertType::Connection | AlertType::Movement { .. } => false,
    }
}

/// Aggregate state over the enabled alerts of one tag
pub fn evaluate<'a>(
    alerts: impl IntoIterator<Item = &'a AlertType>,
    snapshot: &MetricSnapshot,
    humidity_offset: f64,
) -> AlertState {
    let mut state = AlertState::Empty;
    for alert in alerts {
        if is_firing(alert, snapshot, humidity_offset) {
            return AlertState::Firing;
        }
        state = AlertState::Registered;
    }
    state
}

/// Reads the tag's enabled alerts from the service and evaluates them
pub fn evaluate_tag(
    service: &dyn AlertService,
    uuid: &str,
    snapshot: &MetricSnapshot,
    humidity_offset: f64,
) -> AlertState {
    let alerts: Vec<AlertType> = AlertKind::ALL
        .iter()
        .filter_map(|kind| service.alert(uuid, *kind))
        .collect();
    evaluate(&alerts, snapshot, humidity_offset)
}
