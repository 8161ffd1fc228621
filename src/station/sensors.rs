use crate::error::Result;

/// Temperature capability in degrees Celsius.
///
/// Implementations return raw hardware failures as errors and do not
/// retry; bounded retries belong to the station.
pub trait TemperatureSensor: Send + Sync {
    fn read_temperature(&self) -> Result<f64>;
}

/// Relative humidity capability in percent.
pub trait HumiditySensor: Send + Sync {
    fn read_humidity(&self) -> Result<f64>;
}

/// Absolute pressure capability in hPa.
pub trait PressureSensor: Send + Sync {
    fn read_pressure(&self) -> Result<f64>;
}

/// Fixed-value sensor for development away from the Pi.
#[derive(Debug, Clone)]
pub struct MockSensor {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

impl MockSensor {
    pub fn new(temperature: f64, humidity: f64, pressure: f64) -> Self {
        Self {
            temperature,
            humidity,
            pressure,
        }
    }
}

impl TemperatureSensor for MockSensor {
    fn read_temperature(&self) -> Result<f64> {
        Ok(self.temperature)
    }
}

impl HumiditySensor for MockSensor {
    fn read_humidity(&self) -> Result<f64> {
        Ok(self.humidity)
    }
}

impl PressureSensor for MockSensor {
    fn read_pressure(&self) -> Result<f64> {
        Ok(self.pressure)
    }
}
