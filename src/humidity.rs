//! Psychrometric conversions used by the humidity alerts.

/// Magnus coefficients (Bolton 1980), valid for roughly -45..60 °C
const MAGNUS_B: f64 = 17.67;
const MAGNUS_C: f64 = 243.5;
/// Saturation vapour pressure at 0 °C, hPa
const SATURATION_HPA: f64 = 6.112;
/// Molar mass of water over the gas constant, scaled for g/m³
const WATER_VAPOUR_FACTOR: f64 = 2.1674;
const KELVIN_OFFSET: f64 = 273.15;

/// Air sample described by temperature and relative humidity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Humidity {
    pub celsius: f64,
    /// Relative humidity as a fraction, 0.0..=1.0
    pub relative: f64,
}

impl Humidity {
    pub fn new(celsius: f64, relative: f64) -> Self {
        Humidity { celsius, relative }
    }

    /// Saturation vapour pressure in hPa
    fn saturation_pressure(&self) -> f64 {
        SATURATION_HPA * (MAGNUS_B * self.celsius / (self.celsius + MAGNUS_C)).exp()
    }

    /// Absolute humidity in g/m³, `None` when the inputs are not finite
    pub fn absolute(&self) -> Option<f64> {
        if !self.celsius.is_finite() || !self.relative.is_finite() {
            return None;
        }
        let vapour = self.saturation_pressure() * self.relative * 100.0;
        let ah = vapour * WATER_VAPOUR_FACTOR / (KELVIN_OFFSET + self.celsius);
        ah.is_finite().then_some(ah)
    }

    /// Dew point in °C; no solution for dry air (relative humidity ≤ 0)
    pub fn dew_point(&self) -> Option<f64> {
        if self.relative <= 0.0 || !self.relative.is_finite() || !self.celsius.is_finite() {
            return None;
        }
        let gamma = self.relative.ln() + MAGNUS_B * self.celsius / (MAGNUS_C + self.celsius);
        let td = MAGNUS_C * gamma / (MAGNUS_B - gamma);
        td.is_finite().then_some(td)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturated_air_dew_point_equals_temperature() {
        let h = Humidity::new(20.0, 1.0);
        let td = h.dew_point().expect("dew point defined");
        assert!((td - 20.0).abs() < 1e-9);
    }

    #[test]
    fn dew_point_reference_values() {
        let td = Humidity::new(25.0, 0.5).dew_point().expect("dew point defined");
        assert!((td - 13.86).abs() < 0.05, "got {}", td);
    }

    #[test]
    fn absolute_humidity_reference_values() {
        let ah = Humidity::new(20.0, 0.5).absolute().expect("absolute humidity defined");
        assert!((ah - 8.64).abs() < 0.05, "got {}", ah);
    }

    #[test]
    fn dry_air_has_no_dew_point() {
        assert_eq!(Humidity::new(20.0, 0.0).dew_point(), None);
        assert_eq!(Humidity::new(f64::NAN, 0.5).absolute(), None);
    }
}
