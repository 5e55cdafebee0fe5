use std::str::FromStr;
use time::OffsetDateTime;

use crate::error::StationError;

/// Protocol version that carries movement counter, sequence number and tx power
pub const RAW_V2_VERSION: u8 = 5;

/// Live observation of a RuuviTag, decoded from an advertisement or heartbeat
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuuviTag {
    pub uuid: String,
    pub mac: Option<String>,
    pub version: u8,
    pub is_connectable: bool,
    pub is_connected: bool,
    pub rssi: Option<i32>,
    pub celsius: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub voltage: Option<f64>,
    pub acceleration_x: Option<f64>,
    pub acceleration_y: Option<f64>,
    pub acceleration_z: Option<f64>,
    pub movement_counter: Option<i32>,
    pub measurement_sequence_number: Option<i32>,
    pub tx_power: Option<i32>,
}

/// Anything the device feed can observe
#[derive(Debug, Clone, PartialEq)]
pub enum Device {
    Ruuvi(RuuviTag),
    /// A peripheral that matched the uuid but carried no Ruuvi payload
    Unrecognized { uuid: String, rssi: Option<i32> },
}

impl Device {
    pub fn uuid(&self) -> &str {
        match self {
            Device::Ruuvi(tag) => &tag.uuid,
            Device::Unrecognized { uuid, .. } => uuid,
        }
    }
}

/// One stored measurement of a physical tag
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub date: OffsetDateTime,
    pub celsius: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub voltage: Option<f64>,
    pub acceleration_x: Option<f64>,
    pub acceleration_y: Option<f64>,
    pub acceleration_z: Option<f64>,
    pub movement_counter: Option<i32>,
    pub measurement_sequence_number: Option<i32>,
    pub tx_power: Option<i32>,
    pub rssi: Option<i32>,
}

impl Reading {
    pub fn from_device(tag: &RuuviTag, date: OffsetDateTime) -> Self {
        Reading {
            date,
            celsius: tag.celsius,
            relative_humidity: tag.relative_humidity,
            pressure: tag.pressure,
            voltage: tag.voltage,
            acceleration_x: tag.acceleration_x,
            acceleration_y: tag.acceleration_y,
            acceleration_z: tag.acceleration_z,
            movement_counter: tag.movement_counter,
            measurement_sequence_number: tag.measurement_sequence_number,
            tx_power: tag.tx_power,
            rssi: tag.rssi,
        }
    }
}

/// Stored physical tag, owned by the tag registry
#[derive(Debug, Clone, PartialEq)]
pub struct TagRecord {
    pub uuid: String,
    pub mac: Option<String>,
    pub name: String,
    pub version: u8,
    pub is_connectable: bool,
    pub humidity_offset: f64,
    pub humidity_offset_date: Option<OffsetDateTime>,
    /// Append-only, newest last
    pub data: Vec<Reading>,
}

impl TagRecord {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        TagRecord {
            uuid: uuid.into(),
            mac: None,
            name: name.into(),
            version: 0,
            is_connectable: false,
            humidity_offset: 0.0,
            humidity_offset_date: None,
            data: Vec::new(),
        }
    }

    pub fn last_reading(&self) -> Option<&Reading> {
        self.data.last()
    }

    /// Latest non-null value of a field across the history
    pub fn last_value<T: Copy>(&self, field: impl Fn(&Reading) -> Option<T>) -> Option<T> {
        self.data.iter().rev().find_map(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherProvider {
    OpenWeatherMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub city: Option<String>,
    pub country: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

/// Weather observation stored for a web tag
#[derive(Debug, Clone, PartialEq)]
pub struct WebTagData {
    pub date: OffsetDateTime,
    pub celsius: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub location: Option<Location>,
}

/// Virtual tag backed by location-derived weather data
#[derive(Debug, Clone, PartialEq)]
pub struct WebTagRecord {
    pub uuid: String,
    pub name: String,
    pub provider: WeatherProvider,
    /// `None` means "current location"
    pub location: Option<Location>,
    pub data: Vec<WebTagData>,
}

impl WebTagRecord {
    pub fn latest_data(&self) -> Option<&WebTagData> {
        self.data.iter().max_by_key(|d| d.date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
    Kelvin,
}

impl FromStr for TemperatureUnit {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "celsius" | "c" => Ok(TemperatureUnit::Celsius),
            "fahrenheit" | "f" => Ok(TemperatureUnit::Fahrenheit),
            "kelvin" | "k" => Ok(TemperatureUnit::Kelvin),
            other => Err(StationError::Config(format!(
                "unknown temperature unit '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HumidityUnit {
    #[default]
    Percent,
    Gm3,
    Dew,
}

impl FromStr for HumidityUnit {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "percent" | "%" => Ok(HumidityUnit::Percent),
            "gm3" | "g/m3" => Ok(HumidityUnit::Gm3),
            "dew" => Ok(HumidityUnit::Dew),
            other => Err(StationError::Config(format!(
                "unknown humidity unit '{}'",
                other
            ))),
        }
    }
}

/// Card background chosen for a tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Background {
    Default(u8),
    Custom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluetoothState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(movement_counter: Option<i32>) -> Reading {
        Reading {
            date: OffsetDateTime::UNIX_EPOCH,
            celsius: Some(21.0),
            relative_humidity: None,
            pressure: None,
            voltage: None,
            acceleration_x: None,
            acceleration_y: None,
            acceleration_z: None,
            movement_counter,
            measurement_sequence_number: None,
            tx_power: None,
            rssi: None,
        }
    }

    #[test]
    fn last_value_skips_trailing_nulls() {
        let mut tag = TagRecord::new("uuid", "Sauna");
        tag.data = vec![reading(Some(3)), reading(Some(7)), reading(None)];

        assert_eq!(tag.last_value(|r| r.movement_counter), Some(7));
        assert_eq!(tag.last_reading().and_then(|r| r.movement_counter), None);
    }

    #[test]
    fn units_parse_from_config_strings() {
        assert_eq!("Fahrenheit".parse::<TemperatureUnit>(), Ok(TemperatureUnit::Fahrenheit));
        assert_eq!("gm3".parse::<HumidityUnit>(), Ok(HumidityUnit::Gm3));
        assert!("rankine".parse::<TemperatureUnit>().is_err());
    }
}
