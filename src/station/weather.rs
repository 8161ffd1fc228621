use super::sensors::{HumiditySensor, PressureSensor, TemperatureSensor};
use crate::measurement::{Measurement, MeasurementStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Retries granted to a single sensor read before giving up on this
/// tick's value.
pub const READ_RETRIES: u32 = 5;

// Sea-level reduction constants (barometric formula).
const GAS_CONSTANT: f64 = 8.31432; // J/(mol·K)
const GRAVITY: f64 = 9.81; // m/s²
const MOLAR_MASS_AIR: f64 = 0.028_964_4; // kg/mol

const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol {
            "F" | "f" => TemperatureUnit::Fahrenheit,
            _ => TemperatureUnit::Celsius,
        }
    }
}

/// Measurement snapshot formatted for display: each field is either a
/// rounded value or "N/A".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresentedMeasurement {
    pub temperature: String,
    pub humidity: String,
    pub pressure: String,
}

/// Aggregates whatever temperature/humidity/pressure sensors are
/// configured and persists readings through the injected store.
///
/// The temperature and humidity sources may be the same physical
/// device behind two capability handles.
pub struct WeatherStation {
    temperature: Option<Arc<dyn TemperatureSensor>>,
    humidity: Option<Arc<dyn HumiditySensor>>,
    pressure: Option<Arc<dyn PressureSensor>>,
    store: Arc<dyn MeasurementStore>,
    elevation_meters: f64,
}

impl WeatherStation {
    pub fn new(store: Arc<dyn MeasurementStore>, elevation_meters: f64) -> Self {
        Self {
            temperature: None,
            humidity: None,
            pressure: None,
            store,
            elevation_meters,
        }
    }

    pub fn with_temperature_sensor(mut self, sensor: Arc<dyn TemperatureSensor>) -> Self {
        self.temperature = Some(sensor);
        self
    }

    pub fn with_humidity_sensor(mut self, sensor: Arc<dyn HumiditySensor>) -> Self {
        self.humidity = Some(sensor);
        self
    }

    pub fn with_pressure_sensor(mut self, sensor: Arc<dyn PressureSensor>) -> Self {
        self.pressure = Some(sensor);
        self
    }

    pub fn elevation_meters(&self) -> f64 {
        self.elevation_meters
    }

    /// Temperature in Celsius, or None after the sensor failed every
    /// bounded attempt (or no sensor is configured).
    pub fn get_temperature(&self) -> Option<f64> {
        let sensor = self.temperature.as_ref()?;
        for attempt in 0..=READ_RETRIES {
            match sensor.read_temperature() {
                Ok(value) => return Some(value),
                Err(e) => warn!("Temperature read failed (attempt {attempt}): {e}"),
            }
        }
        None
    }

    /// Relative humidity in percent, same retry policy.
    pub fn get_humidity(&self) -> Option<f64> {
        let sensor = self.humidity.as_ref()?;
        for attempt in 0..=READ_RETRIES {
            match sensor.read_humidity() {
                Ok(value) => return Some(value),
                Err(e) => warn!("Humidity read failed (attempt {attempt}): {e}"),
            }
        }
        None
    }

    /// Absolute pressure in hPa, same retry policy.
    pub fn get_pressure(&self) -> Option<f64> {
        let sensor = self.pressure.as_ref()?;
        for attempt in 0..=READ_RETRIES {
            match sensor.read_pressure() {
                Ok(value) => return Some(value),
                Err(e) => warn!("Pressure read failed (attempt {attempt}): {e}"),
            }
        }
        None
    }

    /// Snapshot of all configured sensors; each field fails
    /// independently.
    pub fn measure(&self) -> Measurement {
        Measurement::now(
            self.get_temperature(),
            self.get_humidity(),
            self.get_pressure(),
        )
    }

    /// Measure and persist one row when at least one field has a value.
    /// Returns None when persistence fails; the reading is lost but the
    /// caller keeps running.
    pub fn measure_and_log(&self) -> Option<Measurement> {
        let measurement = self.measure();
        if measurement.has_any_value() && !self.store.log(&measurement) {
            warn!("Failed to persist measurement; dropping this tick's reading");
            return None;
        }
        Some(measurement)
    }

    /// Display form of a fresh measurement: values rounded to
    /// `round_digits`, missing fields shown as "N/A", temperature
    /// converted to the requested unit.
    pub fn present_measure_or_na(
        &self,
        round_digits: usize,
        unit: TemperatureUnit,
    ) -> PresentedMeasurement {
        let measurement = self.measure();
        let temperature = measurement.temperature.map(|t| match unit {
            TemperatureUnit::Celsius => t,
            TemperatureUnit::Fahrenheit => c_to_fahrenheit(t),
        });
        PresentedMeasurement {
            temperature: format_or_na(temperature, round_digits),
            humidity: format_or_na(measurement.humidity, round_digits),
            pressure: format_or_na(measurement.pressure, round_digits),
        }
    }

    /// Sea-level-adjusted pressure for display, "N/A" when either input
    /// is missing or non-numeric.
    pub fn present_relative_pressure(
        &self,
        absolute_hpa: Option<f64>,
        temperature_c: Option<f64>,
        round_digits: usize,
    ) -> String {
        match (absolute_hpa, temperature_c) {
            (Some(pressure), Some(temperature))
                if pressure.is_finite() && temperature.is_finite() =>
            {
                let relative = relative_pressure(pressure, temperature, self.elevation_meters);
                format!("{relative:.round_digits$}")
            }
            _ => NOT_AVAILABLE.to_string(),
        }
    }
}

/// `P_rel = P_abs · exp(g · M · elevation / (R · T_kelvin))`
pub fn relative_pressure(absolute_hpa: f64, temperature_c: f64, elevation_meters: f64) -> f64 {
    let kelvin = temperature_c + 273.15;
    absolute_hpa * (GRAVITY * MOLAR_MASS_AIR * elevation_meters / (GAS_CONSTANT * kelvin)).exp()
}

pub fn c_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn f_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

fn format_or_na(value: Option<f64>, round_digits: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.round_digits$}"),
        _ => NOT_AVAILABLE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HomewatchError;
    use crate::measurement::MemoryStore;
    use parking_lot::Mutex;

    /// Fails the first `failures` reads, then succeeds; counts attempts.
    struct FlakySensor {
        failures: u32,
        attempts: Mutex<u32>,
        value: f64,
    }

    impl FlakySensor {
        fn new(failures: u32, value: f64) -> Self {
            Self {
                failures,
                attempts: Mutex::new(0),
                value,
            }
        }

        fn attempts(&self) -> u32 {
            *self.attempts.lock()
        }

        fn read(&self) -> crate::error::Result<f64> {
            let mut attempts = self.attempts.lock();
            *attempts += 1;
            if *attempts <= self.failures {
                Err(HomewatchError::hardware("flaky", "transient read failure"))
            } else {
                Ok(self.value)
            }
        }
    }

    impl TemperatureSensor for FlakySensor {
        fn read_temperature(&self) -> crate::error::Result<f64> {
            self.read()
        }
    }

    impl PressureSensor for FlakySensor {
        fn read_pressure(&self) -> crate::error::Result<f64> {
            self.read()
        }
    }

    struct FailingStore;

    impl MeasurementStore for FailingStore {
        fn log(&self, _measurement: &Measurement) -> bool {
            false
        }
    }

    fn station_with(sensor: Arc<FlakySensor>) -> WeatherStation {
        WeatherStation::new(Arc::new(MemoryStore::new()), 0.0).with_temperature_sensor(sensor)
    }

    #[test]
    fn celsius_fahrenheit_literals() {
        assert_eq!(c_to_fahrenheit(0.0), 32.0);
        assert_eq!(c_to_fahrenheit(100.0), 212.0);
        assert_eq!(f_to_celsius(-40.0), -40.0);
    }

    #[test]
    fn celsius_fahrenheit_round_trip() {
        for x in [-273.15, -40.0, 0.0, 21.5, 36.6, 100.0, 1000.0] {
            assert!((f_to_celsius(c_to_fahrenheit(x)) - x).abs() < 1e-9);
        }
    }

    #[test]
    fn transient_failures_are_retried() {
        let sensor = Arc::new(FlakySensor::new(3, 21.5));
        let station = station_with(Arc::clone(&sensor));
        assert_eq!(station.get_temperature(), Some(21.5));
        assert_eq!(sensor.attempts(), 4);
    }

    #[test]
    fn retries_are_bounded() {
        let sensor = Arc::new(FlakySensor::new(100, 21.5));
        let station = station_with(Arc::clone(&sensor));
        assert_eq!(station.get_temperature(), None);
        assert_eq!(sensor.attempts(), READ_RETRIES + 1);
    }

    #[test]
    fn pressure_retries_the_pressure_sensor() {
        let sensor = Arc::new(FlakySensor::new(2, 1010.3));
        let station = WeatherStation::new(Arc::new(MemoryStore::new()), 0.0)
            .with_pressure_sensor(Arc::clone(&sensor) as _);
        assert_eq!(station.get_pressure(), Some(1010.3));
        assert_eq!(sensor.attempts(), 3);
    }

    #[test]
    fn missing_sensors_yield_none_without_failing_others() {
        let store = Arc::new(MemoryStore::new());
        let station = WeatherStation::new(Arc::clone(&store) as _, 0.0)
            .with_temperature_sensor(Arc::new(MockSensorValue(19.0)));

        let m = station.measure();
        assert_eq!(m.temperature, Some(19.0));
        assert_eq!(m.humidity, None);
        assert_eq!(m.pressure, None);
    }

    struct MockSensorValue(f64);

    impl TemperatureSensor for MockSensorValue {
        fn read_temperature(&self) -> crate::error::Result<f64> {
            Ok(self.0)
        }
    }

    #[test]
    fn measure_and_log_persists_partial_rows() {
        let store = Arc::new(MemoryStore::new());
        let station = WeatherStation::new(Arc::clone(&store) as _, 0.0)
            .with_temperature_sensor(Arc::new(MockSensorValue(19.0)));

        let logged = station.measure_and_log();
        assert!(logged.is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.rows()[0].temperature, Some(19.0));
    }

    #[test]
    fn all_none_measurement_is_not_persisted() {
        let store = Arc::new(MemoryStore::new());
        let station = WeatherStation::new(Arc::clone(&store) as _, 0.0);

        let result = station.measure_and_log();
        assert!(result.is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn persistence_failure_returns_none() {
        let station = WeatherStation::new(Arc::new(FailingStore), 0.0)
            .with_temperature_sensor(Arc::new(MockSensorValue(19.0)));
        assert!(station.measure_and_log().is_none());
    }

    #[test]
    fn presentation_rounds_and_converts() {
        let station = WeatherStation::new(Arc::new(MemoryStore::new()), 0.0)
            .with_temperature_sensor(Arc::new(MockSensorValue(21.57)));

        let celsius = station.present_measure_or_na(1, TemperatureUnit::Celsius);
        assert_eq!(celsius.temperature, "21.6");
        assert_eq!(celsius.humidity, "N/A");
        assert_eq!(celsius.pressure, "N/A");

        let fahrenheit = station.present_measure_or_na(1, TemperatureUnit::Fahrenheit);
        assert_eq!(fahrenheit.temperature, "70.8");
    }

    #[test]
    fn relative_pressure_at_sea_level_is_identity() {
        assert!((relative_pressure(1013.25, 15.0, 0.0) - 1013.25).abs() < 1e-9);
    }

    #[test]
    fn relative_pressure_grows_with_elevation() {
        let at_300m = relative_pressure(980.0, 10.0, 300.0);
        assert!(at_300m > 980.0);
        // roughly +12 hPa per 100 m near sea level
        assert!((at_300m - 980.0) > 30.0 && (at_300m - 980.0) < 45.0);
    }

    #[test]
    fn relative_pressure_presentation_handles_missing_inputs() {
        let station = WeatherStation::new(Arc::new(MemoryStore::new()), 250.0);
        assert_eq!(
            station.present_relative_pressure(None, Some(20.0), 1),
            "N/A"
        );
        assert_eq!(
            station.present_relative_pressure(Some(1000.0), None, 1),
            "N/A"
        );
        assert_eq!(
            station.present_relative_pressure(Some(f64::NAN), Some(20.0), 1),
            "N/A"
        );
        let shown = station.present_relative_pressure(Some(1000.0), Some(20.0), 1);
        assert!(shown.parse::<f64>().unwrap() > 1000.0);
    }

    #[test]
    fn aliased_temperature_and_humidity_handle() {
        let shared = Arc::new(crate::station::sensors::MockSensor::new(20.0, 50.0, 990.0));
        let station = WeatherStation::new(Arc::new(MemoryStore::new()), 0.0)
            .with_temperature_sensor(Arc::clone(&shared) as _)
            .with_humidity_sensor(shared as _);

        let m = station.measure();
        assert_eq!(m.temperature, Some(20.0));
        assert_eq!(m.humidity, Some(50.0));
        assert_eq!(m.pressure, None);
    }
}
