pub mod logger;
pub mod sensors;
pub mod weather;

#[cfg(all(target_os = "linux", feature = "sensors"))]
pub mod hw;

pub use logger::MeasurementLogger;
pub use sensors::{HumiditySensor, MockSensor, PressureSensor, TemperatureSensor};
pub use weather::{PresentedMeasurement, TemperatureUnit, WeatherStation};
