use crate::camera::CameraController;
use crate::config::MotionConfig;
use crate::error::{HomewatchError, Result};
use crate::frame::LumaFrame;
use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-pixel intensity delta that counts as a changed pixel.
const PIXEL_THRESHOLD: i16 = 12;
/// Smoothing applied before frame differencing to suppress sensor noise.
const SMOOTHING_SIGMA: f32 = 1.0;
/// Upper bound on waiting for the loop to exit during stop/restart.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct MotionSettings {
    /// Detection loop rate in Hz
    pub detection_rate: u32,
    /// Fraction of changed pixels that counts as motion (0..1)
    pub change_ratio_threshold: f64,
    /// Keep recording at least this long after the last motion
    pub min_clip_length: Duration,
    /// Rotate to a new clip after this long
    pub max_clip_length: Duration,
}

impl From<&MotionConfig> for MotionSettings {
    fn from(config: &MotionConfig) -> Self {
        Self {
            detection_rate: config.detection_rate,
            change_ratio_threshold: config.change_ratio_threshold,
            min_clip_length: Duration::from_secs(config.min_clip_length_secs),
            max_clip_length: Duration::from_secs(config.max_clip_length_secs),
        }
    }
}

struct DetectorLoop {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Background motion detection and capturing.
///
/// Compares consecutive smoothed lores frames and starts/stops
/// recordings on the shared camera controller.
pub struct MotionDetector {
    camera: Arc<CameraController>,
    settings: RwLock<MotionSettings>,
    loop_handle: AsyncMutex<Option<DetectorLoop>>,
    active: AtomicBool,
}

impl MotionDetector {
    pub fn new(camera: Arc<CameraController>, settings: MotionSettings) -> Arc<Self> {
        Arc::new(Self {
            camera,
            settings: RwLock::new(settings),
            loop_handle: AsyncMutex::new(None),
            active: AtomicBool::new(false),
        })
    }

    pub fn is_motion_capturing(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn settings(&self) -> MotionSettings {
        self.settings.read().clone()
    }

    pub fn detection_rate(&self) -> u32 {
        self.settings.read().detection_rate
    }

    pub async fn set_detection_rate(self: &Arc<Self>, rate: u32) -> Result<()> {
        if rate == 0 {
            return Err(HomewatchError::invalid_argument(
                "detection rate must be positive",
            ));
        }
        self.settings.write().detection_rate = rate;
        self.restart_if_running().await
    }

    pub fn change_ratio_threshold(&self) -> f64 {
        self.settings.read().change_ratio_threshold
    }

    pub async fn set_change_ratio_threshold(self: &Arc<Self>, threshold: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(HomewatchError::invalid_argument(
                "change ratio threshold must be between 0 and 1",
            ));
        }
        self.settings.write().change_ratio_threshold = threshold;
        self.restart_if_running().await
    }

    pub fn min_clip_length(&self) -> Duration {
        self.settings.read().min_clip_length
    }

    pub async fn set_min_clip_length(self: &Arc<Self>, length: Duration) -> Result<()> {
        self.settings.write().min_clip_length = length;
        self.restart_if_running().await
    }

    pub fn max_clip_length(&self) -> Duration {
        self.settings.read().max_clip_length
    }

    pub async fn set_max_clip_length(self: &Arc<Self>, length: Duration) -> Result<()> {
        self.settings.write().max_clip_length = length;
        self.restart_if_running().await
    }

    pub async fn set_motion_capturing(self: &Arc<Self>, enable: bool) -> Result<()> {
        if enable == self.is_motion_capturing() {
            return Ok(());
        }
        if enable {
            self.start().await
        } else {
            self.stop().await;
            Ok(())
        }
    }

    /// Start the background loop; restarts it when already running.
    /// Refused while a recording the detector does not own is active.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.loop_handle.lock().await;
        if self.camera.is_recording() && !self.is_motion_capturing() {
            return Err(HomewatchError::conflict(
                "cannot start motion capture while another recording is running",
            ));
        }
        if let Some(running) = slot.take() {
            warn!("Motion capture loop was not stopped; stopping now");
            shutdown_loop(running).await;
            self.active.store(false, Ordering::Relaxed);
        }

        let token = CancellationToken::new();
        let detector = Arc::clone(self);
        let loop_token = token.clone();
        let task = tokio::spawn(async move {
            detector.run_loop(loop_token).await;
        });

        *slot = Some(DetectorLoop { token, task });
        self.active.store(true, Ordering::Relaxed);
        info!("Background motion capture started");
        Ok(())
    }

    pub async fn stop(&self) {
        let mut slot = self.loop_handle.lock().await;
        if let Some(running) = slot.take() {
            shutdown_loop(running).await;
            self.active.store(false, Ordering::Relaxed);
            info!("Background motion capture stopped");
        }
    }

    async fn restart_if_running(self: &Arc<Self>) -> Result<()> {
        if self.is_motion_capturing() {
            self.stop().await;
            self.start().await
        } else {
            Ok(())
        }
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        let mut prev: Option<GrayImage> = None;
        let mut last_detected = Instant::now();
        let mut recording_started: Option<Instant> = None;

        loop {
            let settings = self.settings.read().clone();
            let tick = Duration::from_secs_f64(1.0 / settings.detection_rate as f64);

            match self.camera.capture_lores_frame() {
                Ok(raw) => {
                    if let Some(cur) = smooth_frame(&raw) {
                        if let Some(prev_frame) = &prev {
                            let ratio = image_change_ratio(prev_frame, &cur, PIXEL_THRESHOLD);

                            if ratio >= settings.change_ratio_threshold {
                                if !self.camera.is_recording() {
                                    match self.camera.start_motion_recording() {
                                        Ok(path) => {
                                            recording_started = Some(Instant::now());
                                            info!(
                                                "New motion: {:.2}% frame change, recording to {}",
                                                ratio * 100.0,
                                                path.display()
                                            );
                                        }
                                        Err(e) => {
                                            error!("Failed to start motion recording: {e}")
                                        }
                                    }
                                }
                                last_detected = Instant::now();
                            } else if self.camera.is_recording()
                                && last_detected.elapsed() > settings.min_clip_length
                            {
                                // motion ended
                                match self.camera.stop_recording_to_file() {
                                    Ok(()) => recording_started = None,
                                    Err(e) => error!("Failed to stop motion recording: {e}"),
                                }
                            }

                            // rotate clips that hit the maximum length
                            if self.camera.is_recording() {
                                if let Some(started) = recording_started {
                                    if started.elapsed() > settings.max_clip_length {
                                        if let Err(e) = self.camera.stop_recording_to_file() {
                                            error!("Failed to rotate motion clip: {e}");
                                        }
                                        match self.camera.start_motion_recording() {
                                            Ok(path) => {
                                                recording_started = Some(Instant::now());
                                                debug!(
                                                    "Rotated motion clip to {}",
                                                    path.display()
                                                );
                                            }
                                            Err(e) => {
                                                recording_started = None;
                                                error!("Failed to start rotated clip: {e}");
                                            }
                                        }
                                    }
                                }
                            }
                        }
                        prev = Some(cur);
                    } else {
                        warn!("Lores frame buffer too short for its dimensions; skipping");
                    }
                }
                Err(e) => warn!("Lores frame capture failed: {e}"),
            }

            tokio::select! {
                _ = token.cancelled() => {
                    if self.camera.is_recording() {
                        if let Err(e) = self.camera.stop_recording_to_file() {
                            error!("Failed to stop recording on shutdown: {e}");
                        }
                    }
                    debug!("Motion capture loop exited cleanly");
                    break;
                }
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }
}

async fn shutdown_loop(running: DetectorLoop) {
    running.token.cancel();
    if tokio::time::timeout(STOP_JOIN_TIMEOUT, running.task)
        .await
        .is_err()
    {
        warn!("Motion capture loop did not stop within {STOP_JOIN_TIMEOUT:?}");
    }
}

fn smooth_frame(raw: &LumaFrame) -> Option<GrayImage> {
    let image = raw.to_gray_image()?;
    Some(gaussian_blur_f32(&image, SMOOTHING_SIGMA))
}

/// Fraction of pixels whose intensity changed by at least
/// `pixel_threshold` between two frames of equal dimensions.
pub fn image_change_ratio(prev: &GrayImage, cur: &GrayImage, pixel_threshold: i16) -> f64 {
    if prev.dimensions() != cur.dimensions() {
        return 0.0;
    }
    let total = (prev.width() as u64 * prev.height() as u64) as f64;
    if total == 0.0 {
        return 0.0;
    }
    let changed = prev
        .pixels()
        .zip(cur.pixels())
        .filter(|(p, c)| ((c[0] as i16) - (p[0] as i16)).abs() >= pixel_threshold)
        .count();
    changed as f64 / total
}
