//! GStreamer camera backend for Linux hosts with a V4L2 device.
//!
//! One persistent capture pipeline fans the device out through a tee:
//! a JPEG branch feeding snapshots, stream encoders and file encoders,
//! and a scaled GRAY8 branch feeding motion analysis. File encoders are
//! their own `appsrc ! x264enc ! mp4mux` pipelines fed from the JPEG
//! branch.

use crate::camera::backend::{CameraBackend, EncoderHandle};
use crate::camera::{
    NoiseReductionMode, Quality, Resolution, SensorMode, StreamName, CAMERA_MODULE3_WIDE_MODES,
};
use crate::error::{HomewatchError, Result};
use crate::frame::{Frame, LumaFrame};
use crate::streaming::StreamingOutput;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::{AppSink, AppSrc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::CameraConfig;

/// How long a snapshot or lores capture waits for the pipeline to
/// produce its first buffer.
const CAPTURE_WAIT: Duration = Duration::from_secs(2);
const CAPTURE_POLL: Duration = Duration::from_millis(50);

fn gst_error(details: impl Into<String>) -> HomewatchError {
    HomewatchError::hardware("gstreamer".to_string(), details.into())
}

enum EncoderSink {
    File { appsrc: AppSrc, pipeline: Pipeline },
    Stream { output: Arc<StreamingOutput> },
}

struct GstState {
    pipeline: Option<Pipeline>,
    main: Resolution,
    lores: Resolution,
    framerate: u32,
    started: bool,
}

pub struct GstCameraBackend {
    device_index: u32,
    state: Mutex<GstState>,
    next_encoder_id: AtomicU64,
    encoders: Arc<Mutex<HashMap<u64, EncoderSink>>>,
    latest_main_jpeg: Arc<Mutex<Option<Vec<u8>>>>,
    latest_lores: Arc<Mutex<Option<LumaFrame>>>,
}

impl GstCameraBackend {
    pub fn new(config: &CameraConfig) -> Result<Self> {
        gstreamer::init().map_err(|e| gst_error(format!("failed to initialize GStreamer: {e}")))?;

        Ok(Self {
            device_index: config.device_index,
            state: Mutex::new(GstState {
                pipeline: None,
                main: Resolution::from(config.main_resolution),
                lores: Resolution::from(config.stream_resolution),
                framerate: config.recording_framerate,
                started: false,
            }),
            next_encoder_id: AtomicU64::new(1),
            encoders: Arc::new(Mutex::new(HashMap::new())),
            latest_main_jpeg: Arc::new(Mutex::new(None)),
            latest_lores: Arc::new(Mutex::new(None)),
        })
    }

    fn build_capture_pipeline_string(&self, state: &GstState) -> String {
        format!(
            "v4l2src device=/dev/video{} io-mode=mmap do-timestamp=true ! \
             image/jpeg,width={},height={},framerate={}/1 ! \
             tee name=t \
             t. ! queue max-size-buffers=4 leaky=downstream ! \
                  appsink name=main_sink sync=false max-buffers=1 drop=true \
             t. ! queue max-size-buffers=2 leaky=downstream ! \
                  jpegdec ! videoconvert ! video/x-raw,format=GRAY8 ! \
                  videoscale method=0 ! \
                  video/x-raw,format=GRAY8,width={},height={} ! \
                  appsink name=lores_sink sync=false max-buffers=1 drop=true",
            self.device_index,
            state.main.width,
            state.main.height,
            state.framerate,
            state.lores.width,
            state.lores.height,
        )
    }

    fn start_capture_pipeline(&self, state: &mut GstState) -> Result<()> {
        if state.pipeline.is_some() {
            return Ok(());
        }

        let description = self.build_capture_pipeline_string(state);
        debug!("Creating capture pipeline: {description}");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| gst_error(format!("failed to create capture pipeline: {e}")))?
            .downcast::<Pipeline>()
            .map_err(|_| gst_error("failed to downcast to Pipeline"))?;

        let main_sink = pipeline
            .by_name("main_sink")
            .ok_or_else(|| gst_error("missing main_sink"))?
            .downcast::<AppSink>()
            .map_err(|_| gst_error("main_sink is not an appsink"))?;

        let lores_sink = pipeline
            .by_name("lores_sink")
            .ok_or_else(|| gst_error("missing lores_sink"))?
            .downcast::<AppSink>()
            .map_err(|_| gst_error("lores_sink is not an appsink"))?;

        let latest_jpeg = Arc::clone(&self.latest_main_jpeg);
        let encoders = Arc::clone(&self.encoders);
        main_sink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                    if let Some(buffer) = sample.buffer() {
                        if let Ok(map) = buffer.map_readable() {
                            let bytes = map.as_slice().to_vec();
                            *latest_jpeg.lock() = Some(bytes.clone());
                            fan_out_jpeg(&encoders, bytes);
                        }
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        let latest_lores = Arc::clone(&self.latest_lores);
        let lores_resolution = state.lores;
        lores_sink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                    if let Some(buffer) = sample.buffer() {
                        if let Ok(map) = buffer.map_readable() {
                            *latest_lores.lock() = Some(LumaFrame::new(
                                lores_resolution.width,
                                lores_resolution.height,
                                map.as_slice().to_vec(),
                            ));
                        }
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| gst_error(format!("failed to start capture pipeline: {e}")))?;

        info!("GStreamer capture pipeline started");
        state.pipeline = Some(pipeline);
        Ok(())
    }

    fn teardown_capture_pipeline(&self, state: &mut GstState) {
        if let Some(pipeline) = state.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                warn!("Capture pipeline did not stop cleanly: {e}");
            }
            info!("GStreamer capture pipeline stopped");
        }
        *self.latest_main_jpeg.lock() = None;
        *self.latest_lores.lock() = None;
    }

    fn encode_settings(quality: Quality) -> (&'static str, u32) {
        match quality {
            Quality::Low => ("ultrafast", 2_500),
            Quality::Medium => ("medium", 6_000),
            Quality::High => ("medium", 12_000),
        }
    }

    fn build_file_encoder(&self, path: &Path, quality: Quality, framerate: u32) -> Result<(AppSrc, Pipeline)> {
        let (preset, bitrate) = Self::encode_settings(quality);
        let description = format!(
            "appsrc name=src format=time is-live=true do-timestamp=true caps=image/jpeg,framerate={}/1 ! \
             jpegparse ! \
             jpegdec ! \
             videoconvert ! video/x-raw,format=I420 ! \
             x264enc speed-preset={} bitrate={} key-int-max=60 ! \
             h264parse config-interval=1 ! \
             mp4mux faststart=true ! \
             filesink location={}",
            framerate,
            preset,
            bitrate,
            path.to_string_lossy(),
        );
        debug!("Creating file encoder pipeline: {description}");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| gst_error(format!("failed to create encoder pipeline: {e}")))?
            .downcast::<Pipeline>()
            .map_err(|_| gst_error("failed to downcast to Pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| gst_error("missing encoder appsrc"))?
            .downcast::<AppSrc>()
            .map_err(|_| gst_error("encoder src is not an appsrc"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| gst_error(format!("failed to start encoder pipeline: {e}")))?;

        Ok((appsrc, pipeline))
    }

    fn register_encoder(&self, sink: EncoderSink, stream: StreamName) -> EncoderHandle {
        let id = self.next_encoder_id.fetch_add(1, Ordering::Relaxed);
        self.encoders.lock().insert(id, sink);
        EncoderHandle::new(id, stream)
    }

    fn wait_for<T: Clone>(slot: &Mutex<Option<T>>) -> Option<T> {
        let deadline = Instant::now() + CAPTURE_WAIT;
        loop {
            if let Some(value) = slot.lock().clone() {
                return Some(value);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(CAPTURE_POLL);
        }
    }
}

/// Push one JPEG frame to every registered encoder sink.
fn fan_out_jpeg(encoders: &Mutex<HashMap<u64, EncoderSink>>, bytes: Vec<u8>) {
    let encoders = encoders.lock();
    if encoders.is_empty() {
        return;
    }
    for sink in encoders.values() {
        match sink {
            EncoderSink::Stream { output } => {
                output.write(Frame::new(bytes.clone()));
            }
            EncoderSink::File { appsrc, .. } => {
                let buffer = gstreamer::Buffer::from_slice(bytes.clone());
                if let Err(e) = appsrc.push_buffer(buffer) {
                    warn!("Failed to push frame to file encoder: {e:?}");
                }
            }
        }
    }
}

impl CameraBackend for GstCameraBackend {
    fn sensor_modes(&self) -> Vec<SensorMode> {
        // V4L2 exposes no discrete mode table; the supported sensor's
        // published modes stand in for it.
        CAMERA_MODULE3_WIDE_MODES.to_vec()
    }

    fn configure_sensor(&self, mode: &SensorMode) -> Result<()> {
        debug!("Sensor mode {} @ {} fps selected", mode.size, mode.fps);
        Ok(())
    }

    fn configure_streams(&self, main: Resolution, lores: Resolution) -> Result<()> {
        let mut state = self.state.lock();
        let rebuild = state.pipeline.is_some();
        if rebuild {
            self.teardown_capture_pipeline(&mut state);
        }
        state.main = main;
        state.lores = lores;
        if rebuild && state.started {
            self.start_capture_pipeline(&mut state)?;
        }
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
        // No ISP control path over V4L2 MJPEG; recorded for parity with
        // the camera stack's control surface.
        debug!("Noise reduction mode set to {}", mode.as_str());
        Ok(())
    }

    fn set_frame_duration_us(&self, min_us: u32, _max_us: u32) -> Result<()> {
        let mut state = self.state.lock();
        let framerate = (1_000_000f64 / min_us as f64).round() as u32;
        if framerate != state.framerate {
            let rebuild = state.pipeline.is_some();
            if rebuild {
                self.teardown_capture_pipeline(&mut state);
            }
            state.framerate = framerate;
            if rebuild && state.started {
                self.start_capture_pipeline(&mut state)?;
            }
        }
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.started = true;
        self.start_capture_pipeline(&mut state)
    }

    fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.started = false;
        self.teardown_capture_pipeline(&mut state);
        Ok(())
    }

    fn start_file_encoder(
        &self,
        path: &Path,
        stream: StreamName,
        quality: Quality,
    ) -> Result<EncoderHandle> {
        let framerate = self.state.lock().framerate;
        let (appsrc, pipeline) = self.build_file_encoder(path, quality, framerate)?;
        info!(
            "Recording encoder started for {} on stream '{stream}'",
            path.display()
        );
        Ok(self.register_encoder(EncoderSink::File { appsrc, pipeline }, stream))
    }

    fn start_stream_encoder(
        &self,
        output: Arc<StreamingOutput>,
        stream: StreamName,
    ) -> Result<EncoderHandle> {
        info!("Streaming encoder started on stream '{stream}'");
        Ok(self.register_encoder(EncoderSink::Stream { output }, stream))
    }

    fn stop_encoder(&self, handle: EncoderHandle) -> Result<()> {
        let sink = self.encoders.lock().remove(&handle.id());
        match sink {
            Some(EncoderSink::File { appsrc, pipeline }) => {
                // flush the muxer so the file index is written
                if let Err(e) = appsrc.end_of_stream() {
                    warn!("File encoder EOS failed: {e:?}");
                }
                if let Some(bus) = pipeline.bus() {
                    let _ = bus.timed_pop_filtered(
                        gstreamer::ClockTime::from_seconds(2),
                        &[
                            gstreamer::MessageType::Eos,
                            gstreamer::MessageType::Error,
                        ],
                    );
                }
                pipeline
                    .set_state(gstreamer::State::Null)
                    .map_err(|e| gst_error(format!("encoder pipeline did not stop: {e}")))?;
                Ok(())
            }
            Some(EncoderSink::Stream { .. }) => Ok(()),
            None => {
                warn!(
                    "Stop requested for unknown encoder on stream '{}'",
                    handle.stream()
                );
                Ok(())
            }
        }
    }

    fn capture_jpeg(&self) -> Result<Vec<u8>> {
        {
            let mut state = self.state.lock();
            state.started = true;
            self.start_capture_pipeline(&mut state)?;
        }
        Self::wait_for(&self.latest_main_jpeg)
            .ok_or_else(|| gst_error("no frame produced within the capture window"))
    }

    fn capture_lores_frame(&self) -> Result<LumaFrame> {
        {
            let mut state = self.state.lock();
            state.started = true;
            self.start_capture_pipeline(&mut state)?;
        }
        Self::wait_for(&self.latest_lores)
            .ok_or_else(|| gst_error("no lores frame produced within the capture window"))
    }
}
