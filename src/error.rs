//! Error types for the station core

use thiserror::Error;

/// Common result type for station operations
pub type Result<T> = std::result::Result<T, StationError>;

/// BLE connection failures reported by the device feed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The tag has no active connection; expected during normal disconnect cycles
    #[error("device is not connected")]
    NotConnected,

    #[error("connection timed out")]
    Timeout,

    #[error("bluetooth error: {0}")]
    Other(String),
}

/// Location and geocoding failures raised by the web tag daemon
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location permission not determined")]
    PermissionNotDetermined,

    #[error("reverse geocoding failed")]
    ReverseGeocodingFailed,

    #[error("location error: {0}")]
    Other(String),
}

/// Errors surfaced by the station core and its collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StationError {
    /// Persistent store read, write or watch failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    /// Weather provider refused the request
    #[error("Weather API limit exceeded")]
    ApiLimitExceeded,

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A view referenced a tag the controller does not know about
    #[error("Unexpected view model: {0}")]
    UnexpectedViewModel(String),
}

impl StationError {
    /// True for the RSSI read failure that is swallowed instead of presented
    pub fn is_not_connected(&self) -> bool {
        matches!(self, StationError::Connection(ConnectionError::NotConnected))
    }
}
