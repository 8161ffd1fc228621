use crate::camera::{backend::MockCameraBackend, CameraBackend, CameraController};
use crate::config::{CameraConfig, HomewatchConfig, StationConfig};
use crate::error::{HomewatchError, Result};
use crate::measurement::{MeasurementStore, MemoryStore};
use crate::motion::{MotionDetector, MotionSettings};
use crate::station::{MeasurementLogger, MockSensor, WeatherStation};
use crate::web::{self, WebState};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The assembled home-monitoring system: one camera controller, one
/// weather station, and their background loops, wired from
/// configuration and owned for the process lifetime.
pub struct Homewatch {
    pub camera: Arc<CameraController>,
    pub motion: Arc<MotionDetector>,
    pub station: Arc<WeatherStation>,
    pub logger: Arc<MeasurementLogger>,
}

impl Homewatch {
    /// Bootstrap with an in-memory measurement store.
    pub async fn bootstrap(config: &HomewatchConfig) -> Result<Self> {
        Self::bootstrap_with_store(config, Arc::new(MemoryStore::new())).await
    }

    /// Bootstrap with an injected persistence layer.
    pub async fn bootstrap_with_store(
        config: &HomewatchConfig,
        store: Arc<dyn MeasurementStore>,
    ) -> Result<Self> {
        let timezone: Tz = config.station.timezone.parse().map_err(|_| {
            HomewatchError::invalid_argument(format!(
                "unknown timezone '{}'",
                config.station.timezone
            ))
        })?;

        let backend = build_backend(&config.camera)?;
        let camera = CameraController::new(backend, &config.camera, &config.storage, timezone)?;

        let station = Arc::new(build_station(&config.station, store));
        let logger = MeasurementLogger::new(
            Arc::clone(&station),
            Duration::from_secs(config.logging.interval_secs),
        );
        if config.logging.log_in_background {
            logger.start_logging().await;
        }

        let motion = MotionDetector::new(Arc::clone(&camera), MotionSettings::from(&config.motion));
        if config.motion.capture_in_background {
            motion.start().await?;
        }

        info!("Homewatch components initialized");
        Ok(Self {
            camera,
            motion,
            station,
            logger,
        })
    }

    pub fn router(&self) -> axum::Router {
        web::router(WebState {
            camera: Arc::clone(&self.camera),
            motion: Arc::clone(&self.motion),
            station: Arc::clone(&self.station),
            logger: Arc::clone(&self.logger),
        })
    }

    /// Stop every background loop and release the camera cleanly.
    pub async fn shutdown(&self) {
        info!("Shutting down homewatch components");
        self.motion.stop().await;
        self.logger.stop_logging().await;
        if let Err(e) = self.camera.stop_capture_stream() {
            warn!("Preview stream did not stop cleanly: {e}");
        }
        if let Err(e) = self.camera.stop_recording_to_file() {
            warn!("Recording did not stop cleanly: {e}");
        }
    }
}

fn build_backend(camera: &CameraConfig) -> Result<Arc<dyn CameraBackend>> {
    match camera.backend.as_str() {
        "mock" => {
            info!("Using mock camera backend");
            Ok(MockCameraBackend::new() as Arc<dyn CameraBackend>)
        }
        "gstreamer" => {
            #[cfg(all(target_os = "linux", feature = "camera"))]
            {
                info!("Using GStreamer camera backend");
                Ok(Arc::new(crate::camera::gst::GstCameraBackend::new(camera)?))
            }
            #[cfg(not(all(target_os = "linux", feature = "camera")))]
            {
                Err(HomewatchError::invalid_argument(
                    "the gstreamer backend requires the 'camera' feature on Linux",
                ))
            }
        }
        other => Err(HomewatchError::invalid_argument(format!(
            "unknown camera backend '{other}', expected 'mock' or 'gstreamer'"
        ))),
    }
}

fn build_station(config: &StationConfig, store: Arc<dyn MeasurementStore>) -> WeatherStation {
    let station = WeatherStation::new(store, config.elevation_meters);

    #[cfg(all(target_os = "linux", feature = "sensors"))]
    let (station, hardware_attached) = attach_hardware_sensors(station, config);
    #[cfg(not(all(target_os = "linux", feature = "sensors")))]
    let hardware_attached = false;

    if hardware_attached {
        station
    } else {
        info!("Using mocked environment sensors");
        let mock = Arc::new(MockSensor::new(
            config.mocked_temperature,
            config.mocked_humidity,
            config.mocked_pressure,
        ));
        station
            .with_temperature_sensor(Arc::clone(&mock) as _)
            .with_humidity_sensor(Arc::clone(&mock) as _)
            .with_pressure_sensor(mock as _)
    }
}

#[cfg(all(target_os = "linux", feature = "sensors"))]
fn attach_hardware_sensors(
    mut station: WeatherStation,
    config: &StationConfig,
) -> (WeatherStation, bool) {
    use crate::station::hw::{Qmp6988Sensor, Sht3xSensor};

    let mut attached = false;

    if config.use_sht3x {
        match Sht3xSensor::new() {
            Ok(sensor) => {
                let sensor = Arc::new(sensor);
                station = station
                    .with_temperature_sensor(Arc::clone(&sensor) as _)
                    .with_humidity_sensor(sensor as _);
                attached = true;
                info!("SHT3x temperature/humidity sensor attached");
            }
            Err(e) => warn!("SHT3x sensor unavailable: {e}"),
        }
    }

    if config.use_qmp6988 {
        match Qmp6988Sensor::new() {
            Ok(sensor) => {
                station = station.with_pressure_sensor(Arc::new(sensor) as _);
                attached = true;
                info!("QMP6988 pressure sensor attached");
            }
            Err(e) => warn!("QMP6988 sensor unavailable: {e}"),
        }
    }

    (station, attached)
}
