//! Alert configuration, the alert service contract and firing evaluation

pub mod evaluator;
pub mod service;

pub use evaluator::{calibrated_humidity, evaluate, evaluate_tag, is_firing, MetricSnapshot};
pub use service::MemoryAlertService;

/// The seven alert kinds a tag can register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlertKind {
    Temperature,
    RelativeHumidity,
    AbsoluteHumidity,
    DewPoint,
    Pressure,
    Connection,
    Movement,
}

impl AlertKind {
    pub const ALL: [AlertKind; 7] = [
        AlertKind::Temperature,
        AlertKind::RelativeHumidity,
        AlertKind::AbsoluteHumidity,
        AlertKind::DewPoint,
        AlertKind::Pressure,
        AlertKind::Connection,
        AlertKind::Movement,
    ];

    /// Bounds shown before the user picks any; `None` for boolean kinds
    pub fn default_bounds(self) -> Option<(f64, f64)> {
        match self {
            AlertKind::Temperature => Some((-40.0, 85.0)),
            AlertKind::RelativeHumidity => Some((0.0, 100.0)),
            AlertKind::AbsoluteHumidity => Some((0.0, 40.0)),
            AlertKind::DewPoint => Some((-40.0, 85.0)),
            AlertKind::Pressure => Some((300.0, 1100.0)),
            AlertKind::Connection | AlertKind::Movement => None,
        }
    }

    pub fn is_bounded(self) -> bool {
        self.default_bounds().is_some()
    }
}

/// An enabled alert with the parameters it is evaluated against
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertType {
    /// Celsius
    Temperature { lower: f64, upper: f64 },
    /// Percent, compared after calibration
    RelativeHumidity { lower: f64, upper: f64 },
    /// g/m³
    AbsoluteHumidity { lower: f64, upper: f64 },
    /// Celsius
    DewPoint { lower: f64, upper: f64 },
    /// hPa
    Pressure { lower: f64, upper: f64 },
    Connection,
    /// Movement counter value captured when the alert was registered
    Movement { last: i32 },
}

impl AlertType {
    pub fn kind(&self) -> AlertKind {
        match self {
            AlertType::Temperature { .. } => AlertKind::Temperature,
            AlertType::RelativeHumidity { .. } => AlertKind::RelativeHumidity,
            AlertType::AbsoluteHumidity { .. } => AlertKind::AbsoluteHumidity,
            AlertType::DewPoint { .. } => AlertKind::DewPoint,
            AlertType::Pressure { .. } => AlertKind::Pressure,
            AlertType::Connection => AlertKind::Connection,
            AlertType::Movement { .. } => AlertKind::Movement,
        }
    }

    pub fn bounds(&self) -> Option<(f64, f64)> {
        match *self {
            AlertType::Temperature { lower, upper }
            | AlertType::RelativeHumidity { lower, upper }
            | AlertType::AbsoluteHumidity { lower, upper }
            | AlertType::DewPoint { lower, upper }
            | AlertType::Pressure { lower, upper } => Some((lower, upper)),
            AlertType::Connection | AlertType::Movement { .. } => None,
        }
    }

    /// Builds the bounded variant of `kind`; `None` for boolean kinds
    pub fn bounded(kind: AlertKind, lower: f64, upper: f64) -> Option<AlertType> {
        match kind {
            AlertKind::Temperature => Some(AlertType::Temperature { lower, upper }),
            AlertKind::RelativeHumidity => Some(AlertType::RelativeHumidity { lower, upper }),
            AlertKind::AbsoluteHumidity => Some(AlertType::AbsoluteHumidity { lower, upper }),
            AlertKind::DewPoint => Some(AlertType::DewPoint { lower, upper }),
            AlertKind::Pressure => Some(AlertType::Pressure { lower, upper }),
            AlertKind::Connection | AlertKind::Movement => None,
        }
    }
}

/// Stored configuration of one alert kind for one tag
///
/// Bounds and description survive disabling, so re-enabling restores them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub description: Option<String>,
    pub movement_last: Option<i32>,
}

impl AlertConfig {
    /// The enabled alert this configuration describes, if any
    pub fn as_type(&self, kind: AlertKind) -> Option<AlertType> {
        if !self.enabled {
            return None;
        }
        match kind {
            AlertKind::Connection => Some(AlertType::Connection),
            AlertKind::Movement => Some(AlertType::Movement {
                last: self.movement_last.unwrap_or(0),
            }),
            bounded => {
                let (default_lower, default_upper) = bounded.default_bounds()?;
                AlertType::bounded(
                    bounded,
                    self.lower.unwrap_or(default_lower),
                    self.upper.unwrap_or(default_upper),
                )
            }
        }
    }
}

/// Aggregate alert state shown on a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertState {
    #[default]
    Empty,
    Registered,
    Firing,
}

/// Per-tag, per-kind alert configuration store
///
/// Every mutation is announced on the bus as `AlertChanged { uuid, kind }`.
pub trait AlertService: Send + Sync {
    fn configuration(&self, uuid: &str, kind: AlertKind) -> Option<AlertConfig>;

    fn set_enabled(&self, uuid: &str, kind: AlertKind, enabled: bool);
    fn set_lower_bound(&self, uuid: &str, kind: AlertKind, lower: f64);
    fn set_upper_bound(&self, uuid: &str, kind: AlertKind, upper: f64);
    fn set_description(&self, uuid: &str, kind: AlertKind, description: Option<String>);
    fn set_movement_baseline(&self, uuid: &str, counter: i32);

    /// Enabled alert of `kind`, with its parameters
    fn alert(&self, uuid: &str, kind: AlertKind) -> Option<AlertType> {
        self.configuration(uuid, kind)
            .and_then(|config| config.as_type(kind))
    }

    fn is_on(&self, uuid: &str, kind: AlertKind) -> bool {
        self.alert(uuid, kind).is_some()
    }

    fn has_any_registration(&self, uuid: &str) -> bool {
        AlertKind::ALL.iter().any(|kind| self.is_on(uuid, *kind))
    }

    /// Stores the alert's parameters and enables it
    fn register(&self, uuid: &str, alert: AlertType) {
        let kind = alert.kind();
        match alert {
            AlertType::Movement { last } => self.set_movement_baseline(uuid, last),
            AlertType::Connection => {}
            bounded => {
                if let Some((lower, upper)) = bounded.bounds() {
                    self.set_lower_bound(uuid, kind, lower);
                    self.set_upper_bound(uuid, kind, upper);
                }
            }
        }
        self.set_enabled(uuid, kind, true);
    }

    fn unregister(&self, uuid: &str, kind: AlertKind) {
        self.set_enabled(uuid, kind, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_is_not_an_alert() {
        let config = AlertConfig {
            enabled: false,
            lower: Some(0.0),
            upper: Some(10.0),
            ..AlertConfig::default()
        };
        assert_eq!(config.as_type(AlertKind::Temperature), None);
    }

    #[test]
    fn enabled_config_falls_back_to_default_bounds() {
        let config = AlertConfig {
            enabled: true,
            upper: Some(30.0),
            ..AlertConfig::default()
        };
        assert_eq!(
            config.as_type(AlertKind::Pressure),
            Some(AlertType::Pressure {
                lower: 300.0,
                upper: 30.0
            })
        );
        assert_eq!(
            config.as_type(AlertKind::Movement),
            Some(AlertType::Movement { last: 0 })
        );
    }

    #[test]
    fn kinds_round_trip_through_types() {
        for kind in AlertKind::ALL {
            if let Some((lower, upper)) = kind.default_bounds() {
                let alert = AlertType::bounded(kind, lower, upper).expect("bounded kind");
                assert_eq!(alert.kind(), kind);
                assert_eq!(alert.bounds(), Some((lower, upper)));
            } else {
                assert!(AlertType::bounded(kind, 0.0, 1.0).is_none());
            }
        }
    }
}
