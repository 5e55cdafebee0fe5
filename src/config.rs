use log::{debug, info};
use std::env;
use std::str::FromStr;

use crate::error::{Result, StationError};
use crate::models::{HumidityUnit, TemperatureUnit};

const DEFAULT_READ_RSSI_INTERVAL_SECS: u64 = 5;
const DEFAULT_EVENT_BUS_CAPACITY: usize = 256;

/// Which movement counter a newly enabled movement alert is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MovementBaseline {
    /// Counter of the newest stored reading at the moment the alert is enabled
    #[default]
    Registration,
    /// Newest counter seen live, falling back to the stored one
    Latest,
}

impl FromStr for MovementBaseline {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "registration" => Ok(MovementBaseline::Registration),
            "latest" => Ok(MovementBaseline::Latest),
            other => Err(StationError::Config(format!(
                "unknown movement baseline '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StationConfig {
    /// (MAC, name) pairs seeded into the tag registry
    pub tags: Vec<(String, String)>,
    pub temperature_unit: TemperatureUnit,
    pub humidity_unit: HumidityUnit,
    pub read_rssi: bool,
    pub read_rssi_interval_secs: u64,
    pub keep_connection: Vec<String>,
    pub movement_baseline: MovementBaseline,
    pub event_bus_capacity: usize,
    pub feedback_email: String,
    pub feedback_subject: String,
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            tags: Vec::new(),
            temperature_unit: TemperatureUnit::Celsius,
            humidity_unit: HumidityUnit::Percent,
            read_rssi: true,
            read_rssi_interval_secs: DEFAULT_READ_RSSI_INTERVAL_SECS,
            keep_connection: Vec::new(),
            movement_baseline: MovementBaseline::Registration,
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
            feedback_email: "contact@ruuvi.com".to_string(),
            feedback_subject: "Station feedback".to_string(),
        }
    }
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| StationError::Config(format!("invalid value '{}' for {}", value, key))),
        Err(_) => Ok(None),
    }
}

fn parse_unit<T: FromStr<Err = StationError>>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(value) => value.parse().map(Some),
        Err(_) => Ok(None),
    }
}

impl StationConfig {
    /// Loads `.env` and then reads the environment
    pub fn new() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        let defaults = StationConfig::default();

        let config = StationConfig {
            tags: Self::tags_from_env(),
            temperature_unit: parse_unit("TEMPERATURE_UNIT")?.unwrap_or(defaults.temperature_unit),
            humidity_unit: parse_unit("HUMIDITY_UNIT")?.unwrap_or(defaults.humidity_unit),
            read_rssi: parse_var("READ_RSSI")?.unwrap_or(defaults.read_rssi),
            read_rssi_interval_secs: parse_var::<u64>("READ_RSSI_INTERVAL_SECS")?
                .unwrap_or(defaults.read_rssi_interval_secs)
                .max(1),
            keep_connection: env::var("KEEP_CONNECTION")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|mac| !mac.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            movement_baseline: parse_unit("MOVEMENT_BASELINE")?
                .unwrap_or(defaults.movement_baseline),
            event_bus_capacity: parse_var::<usize>("EVENT_BUS_CAPACITY")?
                .unwrap_or(defaults.event_bus_capacity)
                .max(1),
            feedback_email: env::var("FEEDBACK_EMAIL").unwrap_or(defaults.feedback_email),
            feedback_subject: env::var("FEEDBACK_SUBJECT").unwrap_or(defaults.feedback_subject),
        };

        info!("Total tags loaded: {}", config.tags.len());
        for (mac, name) in &config.tags {
            debug!("Tag: {} -> {}", mac, name);
        }

        Ok(config)
    }

    fn tags_from_env() -> Vec<(String, String)> {
        let mut tags = Vec::new();

        // Try RUUVI_TAGS format first
        if let Ok(ruuvi_tags) = env::var("RUUVI_TAGS") {
            for pair in ruuvi_tags.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some((mac, name)) if !mac.trim().is_empty() && !name.trim().is_empty() => {
                        tags.push((mac.trim().to_string(), name.trim().to_string()));
                    }
                    _ => debug!("Skipping malformed tag pair: '{}'", pair),
                }
            }
        } else {
            // Fallback to individual environment variables
            for (key, value) in env::vars() {
                if let Some(index) = key
                    .strip_prefix("RUUVI_TAG_")
                    .and_then(|s| s.strip_suffix("_MAC"))
                {
                    let name_key = format!("RUUVI_TAG_{}_NAME", index);
                    if let Ok(name) = env::var(&name_key) {
                        tags.push((value, name));
                    }
                }
            }
            tags.sort();
        }

        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 9] = [
        "RUUVI_TAGS",
        "TEMPERATURE_UNIT",
        "HUMIDITY_UNIT",
        "READ_RSSI",
        "READ_RSSI_INTERVAL_SECS",
        "KEEP_CONNECTION",
        "MOVEMENT_BASELINE",
        "RUUVI_TAG_1_MAC",
        "RUUVI_TAG_1_NAME",
    ];

    fn clear() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn empty_environment_uses_defaults() {
        clear();
        let config = StationConfig::from_env().expect("defaults load");
        assert!(config.tags.is_empty());
        assert_eq!(config.temperature_unit, TemperatureUnit::Celsius);
        assert!(config.read_rssi);
        assert_eq!(config.read_rssi_interval_secs, DEFAULT_READ_RSSI_INTERVAL_SECS);
        assert_eq!(config.movement_baseline, MovementBaseline::Registration);
    }

    #[test]
    #[serial]
    fn reads_tag_pairs_and_preferences() {
        clear();
        env::set_var("RUUVI_TAGS", "AA:BB=Sauna, CC:DD = Fridge ,broken");
        env::set_var("TEMPERATURE_UNIT", "fahrenheit");
        env::set_var("READ_RSSI", "false");
        env::set_var("READ_RSSI_INTERVAL_SECS", "0");
        env::set_var("KEEP_CONNECTION", "AA:BB, ");
        env::set_var("MOVEMENT_BASELINE", "latest");

        let config = StationConfig::from_env().expect("config loads");
        clear();

        assert_eq!(
            config.tags,
            vec![
                ("AA:BB".to_string(), "Sauna".to_string()),
                ("CC:DD".to_string(), "Fridge".to_string())
            ]
        );
        assert_eq!(config.temperature_unit, TemperatureUnit::Fahrenheit);
        assert!(!config.read_rssi);
        assert_eq!(config.read_rssi_interval_secs, 1);
        assert_eq!(config.keep_connection, vec!["AA:BB".to_string()]);
        assert_eq!(config.movement_baseline, MovementBaseline::Latest);
    }

    #[test]
    #[serial]
    fn falls_back_to_indexed_variables() {
        clear();
        env::set_var("RUUVI_TAG_1_MAC", "EE:FF");
        env::set_var("RUUVI_TAG_1_NAME", "Garage");

        let config = StationConfig::from_env().expect("config loads");
        clear();

        assert_eq!(config.tags, vec![("EE:FF".to_string(), "Garage".to_string())]);
    }

    #[test]
    #[serial]
    fn invalid_values_are_config_errors() {
        clear();
        env::set_var("HUMIDITY_UNIT", "grains");
        let result = StationConfig::from_env();
        clear();
        assert!(matches!(result, Err(StationError::Config(_))));
    }
}
