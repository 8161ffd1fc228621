use crate::camera::{
    NoiseReductionMode, Quality, Resolution, SensorMode, StreamName, CAMERA_MODULE3_WIDE_MODES,
};
use crate::error::{HomewatchError, Result};
use crate::frame::{Frame, LumaFrame};
use crate::streaming::StreamingOutput;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One active hardware encoding session.
///
/// At most one handle per named stream is active at a time; the
/// controller enforces this under its bookkeeping lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderHandle {
    id: u64,
    stream: StreamName,
}

impl EncoderHandle {
    pub(crate) fn new(id: u64, stream: StreamName) -> Self {
        Self { id, stream }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn stream(&self) -> StreamName {
        self.stream
    }
}

/// Capability seam over the physical camera device.
///
/// One production implementation (GStreamer, Linux-only) and one
/// in-memory mock; the controller picks one at construction time from
/// configuration and owns it for the process lifetime.
pub trait CameraBackend: Send + Sync {
    /// Device mode list in device order.
    fn sensor_modes(&self) -> Vec<SensorMode>;

    fn configure_sensor(&self, mode: &SensorMode) -> Result<()>;

    fn configure_streams(&self, main: Resolution, lores: Resolution) -> Result<()>;

    fn stream_resolution(&self, stream: StreamName) -> Resolution;

    fn set_noise_reduction(&self, mode: NoiseReductionMode) -> Result<()>;

    /// Frame duration limits in microseconds (min, max).
    fn set_frame_duration_us(&self, min_us: u32, max_us: u32) -> Result<()>;

    /// Power up the sensor. Idempotent.
    fn start(&self) -> Result<()>;

    /// Power down the sensor. Idempotent.
    fn stop(&self) -> Result<()>;

    fn start_file_encoder(
        &self,
        path: &Path,
        stream: StreamName,
        quality: Quality,
    ) -> Result<EncoderHandle>;

    fn start_stream_encoder(
        &self,
        output: Arc<StreamingOutput>,
        stream: StreamName,
    ) -> Result<EncoderHandle>;

    fn stop_encoder(&self, handle: EncoderHandle) -> Result<()>;

    /// One-shot JPEG still from the main stream.
    fn capture_jpeg(&self) -> Result<Vec<u8>>;

    /// Raw grayscale frame from the lores stream.
    fn capture_lores_frame(&self) -> Result<LumaFrame>;
}

/// Signalled stop flag with a timed wait; the wait doubles as the
/// encoder thread's frame tick so stopping wakes it immediately.
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stopped: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    fn signal(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    /// Wait up to `timeout`; true once stop has been signalled.
    fn wait(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if *stopped {
            return true;
        }
        self.cond.wait_for(&mut stopped, timeout);
        *stopped
    }
}

struct MockEncoder {
    stop: Arc<StopSignal>,
    thread: Option<thread::JoinHandle<()>>,
}

struct MockState {
    started: bool,
    main: Resolution,
    lores: Resolution,
    sensor_mode: Option<SensorMode>,
    noise_reduction: NoiseReductionMode,
    frame_duration_us: (u32, u32),
    encoders: HashMap<u64, MockEncoder>,
    lores_script: VecDeque<LumaFrame>,
    last_scripted: Option<LumaFrame>,
}

/// In-memory camera for development and tests: synthetic JPEG frames on
/// a timer for stream encoders, placeholder files for recordings, and a
/// scriptable lores frame sequence for driving the motion detector.
pub struct MockCameraBackend {
    state: Mutex<MockState>,
    next_encoder_id: AtomicU64,
    encoder_starts: AtomicUsize,
    encoder_stops: AtomicUsize,
    frame_interval: Duration,
}

impl MockCameraBackend {
    pub fn new() -> Arc<Self> {
        Self::with_frame_interval(Duration::from_millis(100))
    }

    /// Interval between synthetic frames produced by stream encoders.
    pub fn with_frame_interval(frame_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                started: false,
                main: Resolution::new(1920, 1080),
                lores: Resolution::new(800, 450),
                sensor_mode: None,
                noise_reduction: NoiseReductionMode::Fast,
                frame_duration_us: (40_000, 40_000),
                encoders: HashMap::new(),
                lores_script: VecDeque::new(),
                last_scripted: None,
            }),
            next_encoder_id: AtomicU64::new(1),
            encoder_starts: AtomicUsize::new(0),
            encoder_stops: AtomicUsize::new(0),
            frame_interval,
        })
    }

    /// Queue lores frames returned by subsequent `capture_lores_frame`
    /// calls; once drained, the last scripted frame repeats.
    pub fn push_lores_frames<I: IntoIterator<Item = LumaFrame>>(&self, frames: I) {
        let mut state = self.state.lock();
        state.lores_script.extend(frames);
    }

    pub fn encoder_starts(&self) -> usize {
        self.encoder_starts.load(Ordering::Relaxed)
    }

    pub fn encoder_stops(&self) -> usize {
        self.encoder_stops.load(Ordering::Relaxed)
    }

    pub fn active_encoders(&self) -> usize {
        self.state.lock().encoders.len()
    }

    pub fn configured_noise_reduction(&self) -> NoiseReductionMode {
        self.state.lock().noise_reduction
    }

    pub fn configured_frame_duration_us(&self) -> (u32, u32) {
        self.state.lock().frame_duration_us
    }

    pub fn configured_sensor_mode(&self) -> Option<SensorMode> {
        self.state.lock().sensor_mode
    }

    fn register_encoder(&self, encoder: MockEncoder) -> u64 {
        let id = self.next_encoder_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().encoders.insert(id, encoder);
        self.encoder_starts.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Minimal JPEG: SOI + JFIF header, a payload varying with `seed`,
    /// then EOI. Enough for content-length framing and decoder smoke
    /// tests that only check the markers.
    fn synthetic_jpeg(seed: u64) -> Vec<u8> {
        let mut data = vec![
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x01,
            0x00, 0x48, 0x00, 0x48, 0x00, 0x00,
        ];
        let payload_len = 512 + (seed % 256) as usize;
        data.extend(std::iter::repeat((seed % 251) as u8).take(payload_len));
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }
}

impl CameraBackend for MockCameraBackend {
    fn sensor_modes(&self) -> Vec<SensorMode> {
        CAMERA_MODULE3_WIDE_MODES.to_vec()
    }

    fn configure_sensor(&self, mode: &SensorMode) -> Result<()> {
        debug!("Mock camera sensor configured to {} @ {} fps", mode.size, mode.fps);
        self.state.lock().sensor_mode = Some(*mode);
        Ok(())
    }

    fn configure_streams(&self, main: Resolution, lores: Resolution) -> Result<()> {
        debug!("Mock camera streams configured: main {main}, lores {lores}");
        let mut state = self.state.lock();
        state.main = main;
        state.lores = lores;
        Ok(())
    }

    fn stream_resolution(&self, stream: StreamName) -> Resolution {
        let state = self.state.lock();
        match stream {
            StreamName::Main => state.main,
            StreamName::Lores => state.lores,
        }
    }

    fn set_noise_reduction(&self, mode: NoiseReductionMode) -> Result<()> {
        self.state.lock().noise_reduction = mode;
        Ok(())
    }

    fn set_frame_duration_us(&self, min_us: u32, max_us: u32) -> Result<()> {
        self.state.lock().frame_duration_us = (min_us, max_us);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.started {
            debug!("Mock camera started");
            state.started = true;
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.started {
            debug!("Mock camera stopped");
            state.started = false;
        }
        Ok(())
    }

    fn start_file_encoder(
        &self,
        path: &Path,
        stream: StreamName,
        quality: Quality,
    ) -> Result<EncoderHandle> {
        std::fs::write(path, b"mock h264 recording\n")?;
        info!(
            "Mock recording to {} on stream '{stream}' with quality '{}'",
            path.display(),
            quality.as_str()
        );
        let id = self.register_encoder(MockEncoder {
            stop: StopSignal::new(),
            thread: None,
        });
        Ok(EncoderHandle::new(id, stream))
    }

    fn start_stream_encoder(
        &self,
        output: Arc<StreamingOutput>,
        stream: StreamName,
    ) -> Result<EncoderHandle> {
        let stop = StopSignal::new();
        let thread_stop = Arc::clone(&stop);
        let interval = self.frame_interval;
        let thread = thread::spawn(move || {
            let mut seed = 0u64;
            loop {
                output.write(Frame::new(Self::synthetic_jpeg(seed)));
                seed += 1;
                if thread_stop.wait(interval) {
                    debug!("Mock stream encoder exited cleanly");
                    break;
                }
            }
        });
        info!("Mock streaming encoder started on stream '{stream}'");
        let id = self.register_encoder(MockEncoder {
            stop,
            thread: Some(thread),
        });
        Ok(EncoderHandle::new(id, stream))
    }

    fn stop_encoder(&self, handle: EncoderHandle) -> Result<()> {
        let encoder = self.state.lock().encoders.remove(&handle.id);
        match encoder {
            Some(mut encoder) => {
                encoder.stop.signal();
                if let Some(thread) = encoder.thread.take() {
                    if thread.join().is_err() {
                        warn!("Mock encoder thread panicked during shutdown");
                    }
                }
                self.encoder_stops.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => {
                warn!("Stop requested for unknown encoder on stream '{}'", handle.stream());
                Ok(())
            }
        }
    }

    fn capture_jpeg(&self) -> Result<Vec<u8>> {
        if !self.state.lock().started {
            return Err(HomewatchError::hardware(
                "mock_camera",
                "capture requested before the camera was started",
            ));
        }
        Ok(Self::synthetic_jpeg(42))
    }

    fn capture_lores_frame(&self) -> Result<LumaFrame> {
        let mut state = self.state.lock();
        if let Some(frame) = state.lores_script.pop_front() {
            state.last_scripted = Some(frame.clone());
            return Ok(frame);
        }
        if let Some(frame) = &state.last_scripted {
            return Ok(frame.clone());
        }
        let lores = state.lores;
        Ok(LumaFrame::filled(lores.width, lores.height, 128))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_encoder_produces_frames_until_stopped() {
        let backend = MockCameraBackend::with_frame_interval(Duration::from_millis(5));
        let output = Arc::new(StreamingOutput::new());
        let handle = backend
            .start_stream_encoder(Arc::clone(&output), StreamName::Lores)
            .unwrap();

        let mut reader = output.subscribe();
        let frame = futures::executor::block_on(reader.next_frame()).unwrap();
        assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);
        assert_eq!(&frame.data[frame.len() - 2..], &[0xFF, 0xD9]);

        backend.stop_encoder(handle).unwrap();
        assert_eq!(backend.active_encoders(), 0);
        assert_eq!(backend.encoder_stops(), 1);
    }

    #[test]
    fn file_encoder_writes_a_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let backend = MockCameraBackend::new();
        let handle = backend
            .start_file_encoder(&path, StreamName::Main, Quality::Low)
            .unwrap();
        assert!(path.exists());
        backend.stop_encoder(handle).unwrap();
    }

    #[test]
    fn scripted_lores_frames_drain_then_repeat() {
        let backend = MockCameraBackend::new();
        backend.push_lores_frames([LumaFrame::filled(4, 4, 1), LumaFrame::filled(4, 4, 2)]);

        assert_eq!(backend.capture_lores_frame().unwrap().data[0], 1);
        assert_eq!(backend.capture_lores_frame().unwrap().data[0], 2);
        // drained: the last scripted frame repeats
        assert_eq!(backend.capture_lores_frame().unwrap().data[0], 2);
    }

    #[test]
    fn capture_before_start_is_a_hardware_error() {
        let backend = MockCameraBackend::new();
        assert!(backend.capture_jpeg().is_err());
        backend.start().unwrap();
        assert!(backend.capture_jpeg().is_ok());
    }

    #[test]
    fn stopping_an_unknown_encoder_does_not_fail() {
        let backend = MockCameraBackend::new();
        let handle = EncoderHandle::new(99, StreamName::Main);
        assert!(backend.stop_encoder(handle).is_ok());
    }
}
