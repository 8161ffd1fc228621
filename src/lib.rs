pub mod app;
pub mod camera;
pub mod config;
pub mod error;
pub mod frame;
pub mod measurement;
pub mod motion;
pub mod station;
pub mod streaming;
pub mod web;

pub use app::Homewatch;
pub use camera::{
    CameraBackend, CameraController, MockCameraBackend, NoiseReductionMode, Quality, Resolution,
    SensorMode, StreamName,
};
pub use config::HomewatchConfig;
pub use error::{HomewatchError, Result};
pub use frame::{Frame, LumaFrame};
pub use measurement::{Measurement, MeasurementStore, MemoryStore};
pub use motion::{image_change_ratio, MotionDetector, MotionSettings};
pub use station::{
    HumiditySensor, MeasurementLogger, MockSensor, PressureSensor, TemperatureSensor,
    TemperatureUnit, WeatherStation,
};
pub use streaming::{multipart_chunk, FrameStream, StreamingOutput, MJPEG_CONTENT_TYPE};
