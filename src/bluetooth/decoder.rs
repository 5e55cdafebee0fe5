//! RuuviTag manufacturer data decoding
use log::warn;

use crate::models::RuuviTag;

// RuuviTag protocol constants
pub const RUUVITAG_MANUFACTURER_ID: u16 = 0x0499; // Ruuvi Innovations Ltd. manufacturer ID
const DATA_FORMAT_3: u8 = 3; // RAWv1
const DATA_FORMAT_5: u8 = 5; // RAWv2
const FORMAT_3_LEN: usize = 14;
const FORMAT_5_LEN: usize = 24;

/// Advertisement metadata that does not live in the manufacturer payload
#[derive(Debug, Clone, Default)]
pub struct AdvertisementMeta {
    pub uuid: String,
    pub is_connectable: bool,
    pub is_connected: bool,
    pub rssi: Option<i32>,
}

/// Decode RuuviTag manufacturer data (format 3 or 5) into a live snapshot
///
/// Returns `None` for unknown formats or truncated payloads.
pub fn decode_ruuvi_data(data: &[u8], meta: &AdvertisementMeta) -> Option<RuuviTag> {
    match data.first() {
        Some(&DATA_FORMAT_5) if data.len() == FORMAT_5_LEN => Some(decode_format_5(data, meta)),
        Some(&DATA_FORMAT_3) if data.len() >= FORMAT_3_LEN => Some(decode_format_3(data, meta)),
        Some(format) => {
            warn!(
                "Invalid RuuviTag data: len={}, format={}",
                data.len(),
                format
            );
            None
        }
        None => None,
    }
}

/// RuuviTag data format 5 uses a 24-byte payload with the following structure:
/// - Byte 0: Data format (5)
/// - Bytes 1-2: Temperature (signed 16-bit, 0.005°C resolution)
/// - Bytes 3-4: Humidity (unsigned 16-bit, 0.0025% resolution)
/// - Bytes 5-6: Pressure (unsigned 16-bit, +50000 Pa offset, 1 Pa resolution)
/// - Bytes 7-12: Acceleration X/Y/Z (signed 16-bit, 0.001 g resolution)
/// - Bytes 13-14: Battery voltage (11 bits, +1600 mV) + TX power (5 bits, -40 dBm + 2 dBm steps)
/// - Byte 15: Movement counter
/// - Bytes 16-17: Measurement sequence number
/// - Bytes 18-23: MAC address
///
/// All-ones (or 0x8000 for signed fields) marks a value as unavailable.
fn decode_format_5(data: &[u8], meta: &AdvertisementMeta) -> RuuviTag {
    let be_i16 = |i: usize| i16::from_be_bytes([data[i], data[i + 1]]);
    let be_u16 = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);
    let signed = |i: usize, scale: f64| match be_i16(i) {
        i16::MIN => None,
        raw => Some(raw as f64 * scale),
    };

    let temperature = signed(1, 0.005);
    let humidity = match be_u16(3) {
        u16::MAX => None,
        raw => Some(raw as f64 * 0.0025),
    };
    let pressure = match be_u16(5) {
        u16::MAX => None,
        raw => Some((raw as f64 + 50000.0) / 100.0),
    };

    let power = be_u16(13);
    let voltage = match power >> 5 {
        0x7FF => None,
        mv => Some((mv as f64 + 1600.0) / 1000.0),
    };
    let tx_power = match power & 0x1F {
        0x1F => None,
        step => Some(-40 + 2 * step as i32),
    };

    // Movement counter: increments when significant movement is detected
    let movement_counter = match data[15] {
        u8::MAX => None,
        value => Some(value as i32),
    };
    let measurement_sequence_number = match be_u16(16) {
        u16::MAX => None,
        value => Some(value as i32),
    };

    let mac = &data[18..24];
    let mac = if mac.iter().all(|b| *b == 0xFF) {
        None
    } else {
        Some(
            mac.iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(":"),
        )
    };

    RuuviTag {
        uuid: meta.uuid.clone(),
        mac,
        version: DATA_FORMAT_5,
        is_connectable: meta.is_connectable,
        is_connected: meta.is_connected,
        rssi: meta.rssi,
        celsius: temperature.map(round2),
        relative_humidity: humidity.map(round2),
        pressure: pressure.map(round2),
        voltage,
        acceleration_x: signed(7, 0.001).map(round3),
        acceleration_y: signed(9, 0.001).map(round3),
        acceleration_z: signed(11, 0.001).map(round3),
        movement_counter,
        measurement_sequence_number,
        tx_power,
    }
}

/// RuuviTag data format 3 (14 bytes): humidity in 0.5% steps, temperature as
/// sign-magnitude integer + hundredths, pressure +50000 Pa, acceleration in mG
/// and battery voltage in mV. No MAC, tx power or counters.
fn decode_format_3(data: &[u8], meta: &AdvertisementMeta) -> RuuviTag {
    let be_i16 = |i: usize| i16::from_be_bytes([data[i], data[i + 1]]);
    let be_u16 = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);

    let humidity = data[1] as f64 * 0.5;
    let magnitude = (data[2] & 0x7F) as f64 + data[3] as f64 / 100.0;
    let temperature = if data[2] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };
    let pressure = (be_u16(4) as f64 + 50000.0) / 100.0;

    RuuviTag {
        uuid: meta.uuid.clone(),
        mac: None,
        version: DATA_FORMAT_3,
        is_connectable: meta.is_connectable,
        is_connected: meta.is_connected,
        rssi: meta.rssi,
        celsius: Some(round2(temperature)),
        relative_humidity: Some(round2(humidity)),
        pressure: Some(round2(pressure)),
        voltage: Some(be_u16(12) as f64 / 1000.0),
        acceleration_x: Some(be_i16(6) as f64 / 1000.0),
        acceleration_y: Some(be_i16(8) as f64 / 1000.0),
        acceleration_z: Some(be_i16(10) as f64 / 1000.0),
        movement_counter: None,
        measurement_sequence_number: None,
        tx_power: None,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
