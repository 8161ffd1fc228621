use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HomewatchConfig {
    pub camera: CameraConfig,
    pub motion: MotionConfig,
    pub logging: LoggingConfig,
    pub station: StationConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Camera backend selection: "mock" or "gstreamer"
    #[serde(default = "default_camera_backend")]
    pub backend: String,

    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_device_index")]
    pub device_index: u32,

    /// Main stream resolution used for recording and snapshots
    #[serde(default = "default_main_resolution")]
    pub main_resolution: (u32, u32),

    /// Lores stream resolution used for preview and motion analysis
    #[serde(default = "default_stream_resolution")]
    pub stream_resolution: (u32, u32),

    /// Recording framerate
    #[serde(default = "default_recording_framerate")]
    pub recording_framerate: u32,

    /// Preview stream inactivity timeout in seconds
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MotionConfig {
    /// Start motion capture automatically at boot
    #[serde(default = "default_capture_in_background")]
    pub capture_in_background: bool,

    /// Detection loop rate in Hz
    #[serde(default = "default_detection_rate")]
    pub detection_rate: u32,

    /// Fraction of changed pixels that counts as motion (0..1)
    #[serde(default = "default_change_ratio_threshold")]
    pub change_ratio_threshold: f64,

    /// Keep recording at least this long after the last motion
    #[serde(default = "default_min_clip_length_secs")]
    pub min_clip_length_secs: u64,

    /// Rotate to a new clip after this long
    #[serde(default = "default_max_clip_length_secs")]
    pub max_clip_length_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Start measurement logging automatically at boot
    #[serde(default = "default_log_in_background")]
    pub log_in_background: bool,

    /// Seconds between measurement rows
    #[serde(default = "default_logging_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StationConfig {
    /// Use the SHT3x temperature/humidity sensor when available
    #[serde(default = "default_use_sht3x")]
    pub use_sht3x: bool,

    /// Use the QMP6988 pressure sensor when available
    #[serde(default = "default_use_qmp6988")]
    pub use_qmp6988: bool,

    /// Site elevation for sea-level pressure reduction
    #[serde(default = "default_elevation_meters")]
    pub elevation_meters: f64,

    /// Timezone used for timestamped capture filenames
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Values served by the mock sensors when no hardware is configured
    #[serde(default = "default_mocked_temperature")]
    pub mocked_temperature: f64,

    #[serde(default = "default_mocked_humidity")]
    pub mocked_humidity: f64,

    #[serde(default = "default_mocked_pressure")]
    pub mocked_pressure: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Directory for manual recordings
    #[serde(default = "default_recordings_path")]
    pub recordings_path: String,

    /// Directory for motion-triggered clips
    #[serde(default = "default_motion_captures_path")]
    pub motion_captures_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl HomewatchConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("homewatch.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.backend", default_camera_backend())?
            .set_default("camera.device_index", default_device_index())?
            .set_default(
                "camera.main_resolution",
                vec![default_main_resolution().0, default_main_resolution().1],
            )?
            .set_default(
                "camera.stream_resolution",
                vec![default_stream_resolution().0, default_stream_resolution().1],
            )?
            .set_default("camera.recording_framerate", default_recording_framerate())?
            .set_default("camera.stream_timeout_secs", default_stream_timeout_secs())?
            .set_default(
                "motion.capture_in_background",
                default_capture_in_background(),
            )?
            .set_default("motion.detection_rate", default_detection_rate())?
            .set_default(
                "motion.change_ratio_threshold",
                default_change_ratio_threshold(),
            )?
            .set_default(
                "motion.min_clip_length_secs",
                default_min_clip_length_secs(),
            )?
            .set_default(
                "motion.max_clip_length_secs",
                default_max_clip_length_secs(),
            )?
            .set_default("logging.log_in_background", default_log_in_background())?
            .set_default("logging.interval_secs", default_logging_interval_secs())?
            .set_default("station.use_sht3x", default_use_sht3x())?
            .set_default("station.use_qmp6988", default_use_qmp6988())?
            .set_default("station.elevation_meters", default_elevation_meters())?
            .set_default("station.timezone", default_timezone())?
            .set_default("station.mocked_temperature", default_mocked_temperature())?
            .set_default("station.mocked_humidity", default_mocked_humidity())?
            .set_default("station.mocked_pressure", default_mocked_pressure())?
            .set_default("storage.recordings_path", default_recordings_path())?
            .set_default(
                "storage.motion_captures_path",
                default_motion_captures_path(),
            )?
            .set_default("server.ip", default_server_ip())?
            .set_default("server.port", default_server_port())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with HOMEWATCH_ prefix
            .add_source(Environment::with_prefix("HOMEWATCH").separator("_"))
            .build()?;

        let config: HomewatchConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.main_resolution.0 == 0 || self.camera.main_resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Main resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.stream_resolution.0 == 0 || self.camera.stream_resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Stream resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.recording_framerate == 0 {
            return Err(ConfigError::Message(
                "Recording framerate must be greater than 0".to_string(),
            ));
        }

        if self.motion.detection_rate == 0 {
            return Err(ConfigError::Message(
                "Motion detection rate must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.motion.change_ratio_threshold) {
            return Err(ConfigError::Message(
                "Change ratio threshold must be between 0 and 1".to_string(),
            ));
        }

        if self.motion.min_clip_length_secs == 0 {
            return Err(ConfigError::Message(
                "Minimum clip length must be greater than 0".to_string(),
            ));
        }

        if self.motion.max_clip_length_secs < self.motion.min_clip_length_secs {
            return Err(ConfigError::Message(
                "Maximum clip length must not be below the minimum".to_string(),
            ));
        }

        if self.logging.interval_secs == 0 {
            return Err(ConfigError::Message(
                "Logging interval must be greater than 0".to_string(),
            ));
        }

        if self.station.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::Message(format!(
                "Unknown timezone '{}'",
                self.station.timezone
            )));
        }

        Ok(())
    }
}

impl Default for HomewatchConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                backend: default_camera_backend(),
                device_index: default_device_index(),
                main_resolution: default_main_resolution(),
                stream_resolution: default_stream_resolution(),
                recording_framerate: default_recording_framerate(),
                stream_timeout_secs: default_stream_timeout_secs(),
            },
            motion: MotionConfig {
                capture_in_background: default_capture_in_background(),
                detection_rate: default_detection_rate(),
                change_ratio_threshold: default_change_ratio_threshold(),
                min_clip_length_secs: default_min_clip_length_secs(),
                max_clip_length_secs: default_max_clip_length_secs(),
            },
            logging: LoggingConfig {
                log_in_background: default_log_in_background(),
                interval_secs: default_logging_interval_secs(),
            },
            station: StationConfig {
                use_sht3x: default_use_sht3x(),
                use_qmp6988: default_use_qmp6988(),
                elevation_meters: default_elevation_meters(),
                timezone: default_timezone(),
                mocked_temperature: default_mocked_temperature(),
                mocked_humidity: default_mocked_humidity(),
                mocked_pressure: default_mocked_pressure(),
            },
            storage: StorageConfig {
                recordings_path: default_recordings_path(),
                motion_captures_path: default_motion_captures_path(),
            },
            server: ServerConfig {
                ip: default_server_ip(),
                port: default_server_port(),
            },
        }
    }
}

// Default value functions
fn default_camera_backend() -> String {
    "mock".to_string()
}
fn default_device_index() -> u32 {
    0
}
fn default_main_resolution() -> (u32, u32) {
    (1920, 1080)
}
fn default_stream_resolution() -> (u32, u32) {
    (800, 450)
}
fn default_recording_framerate() -> u32 {
    25
}
fn default_stream_timeout_secs() -> u64 {
    5 * 60
}

fn default_capture_in_background() -> bool {
    false
}
fn default_detection_rate() -> u32 {
    5
}
fn default_change_ratio_threshold() -> f64 {
    0.1
}
fn default_min_clip_length_secs() -> u64 {
    10
}
fn default_max_clip_length_secs() -> u64 {
    300
}

fn default_log_in_background() -> bool {
    true
}
fn default_logging_interval_secs() -> u64 {
    30
}

fn default_use_sht3x() -> bool {
    true
}
fn default_use_qmp6988() -> bool {
    true
}
fn default_elevation_meters() -> f64 {
    0.0
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_mocked_temperature() -> f64 {
    21.5
}
fn default_mocked_humidity() -> f64 {
    45.0
}
fn default_mocked_pressure() -> f64 {
    1013.25
}

fn default_recordings_path() -> String {
    "captures/recordings".to_string()
}
fn default_motion_captures_path() -> String {
    "captures/motion_captures".to_string()
}

fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8080
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HomewatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.camera.backend, "mock");
        assert_eq!(config.camera.main_resolution, (1920, 1080));
        assert_eq!(config.logging.interval_secs, 30);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = HomewatchConfig::load_from_file("does-not-exist.toml").unwrap();
        assert_eq!(config.camera.stream_resolution, (800, 450));
        assert_eq!(config.motion.detection_rate, 5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = HomewatchConfig::default();
        config.motion.change_ratio_threshold = 1.5;
        assert!(config.validate().is_err());

        config.motion.change_ratio_threshold = 0.2;
        assert!(config.validate().is_ok());

        config.motion.max_clip_length_secs = 1;
        config.motion.min_clip_length_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let mut config = HomewatchConfig::default();
        config.station.timezone = "Mars/Olympus_Mons".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homewatch.toml");
        std::fs::write(
            &path,
            r#"
[camera]
backend = "mock"
recording_framerate = 30

[motion]
detection_rate = 10
"#,
        )
        .unwrap();

        let config = HomewatchConfig::load_from_file(&path).unwrap();
        assert_eq!(config.camera.recording_framerate, 30);
        assert_eq!(config.motion.detection_rate, 10);
        // untouched sections keep their defaults
        assert_eq!(config.logging.interval_secs, 30);
    }
}
