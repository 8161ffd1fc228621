use crate::camera::backend::{CameraBackend, EncoderHandle};
use crate::camera::{NoiseReductionMode, Quality, Resolution, SensorMode, StreamName};
use crate::config::{CameraConfig, StorageConfig};
use crate::error::{HomewatchError, Result};
use crate::frame::LumaFrame;
use crate::streaming::{FrameStream, StreamingOutput};
use chrono::Utc;
use chrono_tz::Tz;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Framerate applied when a non-positive value is requested.
const FALLBACK_FRAMERATE: u32 = 30;

#[derive(Default)]
struct EncoderSlots {
    recording: Option<EncoderHandle>,
    streaming: Option<EncoderHandle>,
}

/// Owner of the physical camera.
///
/// All configuration changes and encoder starts/stops go through this
/// type; per-stream encoder bookkeeping is serialized under one lock so
/// no two operations on the same stream can interleave.
pub struct CameraController {
    backend: Arc<dyn CameraBackend>,
    encoders: Mutex<EncoderSlots>,
    streaming_output: Arc<StreamingOutput>,
    stream_timer: Mutex<Option<CancellationToken>>,
    stream_timeout: Duration,
    recording_framerate: u32,
    main_resolution: Resolution,
    lores_resolution: Resolution,
    recordings_dir: PathBuf,
    motion_captures_dir: PathBuf,
    timezone: Tz,
}

impl CameraController {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        camera: &CameraConfig,
        storage: &StorageConfig,
        timezone: Tz,
    ) -> Result<Arc<Self>> {
        let main = Resolution::from(camera.main_resolution);
        let mut lores = Resolution::from(camera.stream_resolution);
        if lores.width > main.width || lores.height > main.height {
            warn!("Lores resolution {lores} exceeds main {main}; using main resolution");
            lores = main;
        }

        let controller = Arc::new(Self {
            backend,
            encoders: Mutex::new(EncoderSlots::default()),
            streaming_output: Arc::new(StreamingOutput::new()),
            stream_timer: Mutex::new(None),
            stream_timeout: Duration::from_secs(camera.stream_timeout_secs),
            recording_framerate: camera.recording_framerate,
            main_resolution: main,
            lores_resolution: lores,
            recordings_dir: PathBuf::from(&storage.recordings_path),
            motion_captures_dir: PathBuf::from(&storage.motion_captures_path),
            timezone,
        });

        controller.configure_video_sensor()?;
        controller.configure_video_streams()?;
        controller.configure_runtime_controls()?;

        Ok(controller)
    }

    /// Highest-resolution sensor mode able to deliver the requested
    /// framerate: among the device's modes with fps >= `fps` (device
    /// order kept), the last entry wins; None when that entry cannot
    /// cover the requested resolution.
    pub fn get_best_sensor_mode(&self, resolution: Resolution, fps: u32) -> Option<SensorMode> {
        let modes = self.backend.sensor_modes();
        let best = modes.iter().filter(|mode| mode.fps >= fps as f64).last()?;
        if best.size.covers(&resolution) {
            Some(*best)
        } else {
            None
        }
    }

    fn configure_video_sensor(&self) -> Result<()> {
        let fps = self.recording_framerate;
        // sensor must be stopped before reconfiguring
        self.backend.stop()?;
        match self.get_best_sensor_mode(self.main_resolution, fps) {
            Some(mode) => {
                self.backend.configure_sensor(&mode)?;
                info!(
                    "Configured video sensor to {} (bit depth {}) for {} fps",
                    mode.size, mode.bit_depth, fps
                );
            }
            None => {
                warn!(
                    "Cannot configure sensor for {} at {} fps; keeping default mode \
                     (output may be cropped)",
                    self.main_resolution, fps
                );
            }
        }
        Ok(())
    }

    fn configure_video_streams(&self) -> Result<()> {
        self.backend.stop()?;
        self.backend
            .configure_streams(self.main_resolution, self.lores_resolution)
    }

    fn configure_runtime_controls(&self) -> Result<()> {
        self.set_noise_reduction("Fast")?;
        self.set_framerate(self.recording_framerate)
    }

    /// Rejects unknown mode names with the accepted list.
    pub fn set_noise_reduction(&self, mode: &str) -> Result<()> {
        let mode = NoiseReductionMode::from_name(mode)?;
        self.backend.set_noise_reduction(mode)
    }

    /// Values below 1 fall back to 30 fps rather than erroring.
    pub fn set_framerate(&self, fps: u32) -> Result<()> {
        let fps = if fps < 1 { FALLBACK_FRAMERATE } else { fps };
        let duration_us = (1_000_000f64 / fps as f64).round() as u32;
        self.backend.set_frame_duration_us(duration_us, duration_us)
    }

    pub fn is_recording(&self) -> bool {
        self.encoders.lock().recording.is_some()
    }

    pub fn is_streaming(&self) -> bool {
        self.encoders.lock().streaming.is_some()
    }

    pub fn start_recording_to_file(
        &self,
        path: &Path,
        stream: StreamName,
        quality: Quality,
    ) -> Result<()> {
        let mut slots = self.encoders.lock();
        if slots.recording.is_some() {
            return Err(HomewatchError::already_active(stream.as_str()));
        }
        let handle = self.backend.start_file_encoder(path, stream, quality)?;
        if let Err(e) = self.backend.start() {
            let _ = self.backend.stop_encoder(handle);
            return Err(e);
        }
        slots.recording = Some(handle);
        info!("Recording to {} on stream '{stream}'", path.display());
        Ok(())
    }

    /// Start a recording with a timestamped filename under the
    /// recordings directory; returns the file path.
    pub fn start_default_recording(&self, quality: Quality) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.recordings_dir)?;
        let path = self.recordings_dir.join(self.timed_filename(".mp4"));
        self.start_recording_to_file(&path, StreamName::Main, quality)?;
        Ok(path)
    }

    /// Timestamped motion clip under the motion-captures directory.
    pub(crate) fn start_motion_recording(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.motion_captures_dir)?;
        let path = self.motion_captures_dir.join(self.timed_filename(".mp4"));
        self.start_recording_to_file(&path, StreamName::Main, Quality::Medium)?;
        Ok(path)
    }

    /// No-op when idle. Bookkeeping is cleared even when the backend
    /// fails to stop so the slot can never wedge in "active".
    pub fn stop_recording_to_file(&self) -> Result<()> {
        let handle = self.encoders.lock().recording.take();
        match handle {
            Some(handle) => {
                if let Err(e) = self.backend.stop_encoder(handle) {
                    warn!("Recording encoder did not stop cleanly: {e}");
                    return Err(e);
                }
                info!("Stopped file recording");
                Ok(())
            }
            None => {
                debug!("Stop requested with no active recording");
                Ok(())
            }
        }
    }

    /// Idempotent: a second call only re-arms the inactivity timeout.
    /// Returns a fresh subscription to the preview frames.
    pub fn start_capture_stream(self: &Arc<Self>) -> Result<FrameStream> {
        self.cancel_stream_timer();
        {
            let mut slots = self.encoders.lock();
            if slots.streaming.is_none() {
                let handle = self
                    .backend
                    .start_stream_encoder(Arc::clone(&self.streaming_output), StreamName::Lores)?;
                if let Err(e) = self.backend.start() {
                    let _ = self.backend.stop_encoder(handle);
                    return Err(e);
                }
                slots.streaming = Some(handle);
                info!("Started live preview stream");
            }
        }
        self.arm_stream_timer();
        Ok(self.streaming_output.subscribe())
    }

    pub fn stop_capture_stream(&self) -> Result<()> {
        self.cancel_stream_timer();
        let handle = self.encoders.lock().streaming.take();
        if let Some(handle) = handle {
            let result = self.backend.stop_encoder(handle);
            // readers must be unblocked even when the backend stop failed
            self.streaming_output.close();
            result?;
            info!("Stopped video streaming");
        }
        Ok(())
    }

    /// One-shot JPEG still. Refused while a file recording is active;
    /// the encoder lock is held across the capture so a recording
    /// cannot start mid-still either.
    pub fn capture_picture(&self) -> Result<Vec<u8>> {
        let slots = self.encoders.lock();
        if slots.recording.is_some() {
            return Err(HomewatchError::conflict(
                "cannot capture a still while a recording is active",
            ));
        }
        self.backend.start()?;
        self.backend.capture_jpeg()
    }

    pub(crate) fn capture_lores_frame(&self) -> Result<LumaFrame> {
        self.backend.capture_lores_frame()
    }

    pub fn lores_resolution(&self) -> Resolution {
        self.lores_resolution
    }

    pub fn main_resolution(&self) -> Resolution {
        self.main_resolution
    }

    fn cancel_stream_timer(&self) {
        if let Some(token) = self.stream_timer.lock().take() {
            token.cancel();
        }
    }

    fn arm_stream_timer(self: &Arc<Self>) {
        let token = CancellationToken::new();
        let timeout = self.stream_timeout;
        let controller = Arc::downgrade(self);
        let timer_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer_token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(controller) = controller.upgrade() {
                        info!("Preview stream idle for {timeout:?}; stopping");
                        if let Err(e) = controller.stop_capture_stream() {
                            warn!("Failed to stop idle preview stream: {e}");
                        }
                    }
                }
            }
        });
        *self.stream_timer.lock() = Some(token);
    }

    fn timed_filename(&self, extension: &str) -> String {
        let now = Utc::now().with_timezone(&self.timezone);
        format!("{}{}", now.format("%Y-%m-%d_%H-%M-%S"), extension)
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        let mut slots = self.encoders.lock();
        for handle in slots.recording.take().into_iter().chain(slots.streaming.take()) {
            if let Err(e) = self.backend.stop_encoder(handle) {
                warn!("Encoder did not stop cleanly on shutdown: {e}");
            }
        }
        self.streaming_output.close();
        if let Err(e) = self.backend.stop() {
            warn!("Camera did not stop cleanly on shutdown: {e}");
        }
    }
}
