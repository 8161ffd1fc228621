use super::backend::MockCameraBackend;
use super::controller::CameraController;
use super::{Quality, Resolution, StreamName};
use crate::config::{CameraConfig, StorageConfig};
use crate::error::HomewatchError;
use std::sync::Arc;
use std::time::Duration;

fn test_camera_config() -> CameraConfig {
    CameraConfig {
        backend: "mock".to_string(),
        device_index: 0,
        main_resolution: (1920, 1080),
        stream_resolution: (800, 450),
        recording_framerate: 25,
        stream_timeout_secs: 300,
    }
}

fn test_storage_config(dir: &tempfile::TempDir) -> StorageConfig {
    StorageConfig {
        recordings_path: dir.path().join("recordings").display().to_string(),
        motion_captures_path: dir.path().join("motion").display().to_string(),
    }
}

fn build_controller(
    backend: Arc<MockCameraBackend>,
    dir: &tempfile::TempDir,
) -> Arc<CameraController> {
    CameraController::new(backend, &test_camera_config(), &test_storage_config(dir), chrono_tz::UTC)
        .unwrap()
}

#[test]
fn best_sensor_mode_picks_last_eligible_entry() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(MockCameraBackend::new(), &dir);

    // both 120fps and 56fps modes qualify; the last one wins
    let mode = controller
        .get_best_sensor_mode(Resolution::new(1920, 1080), 30)
        .unwrap();
    assert_eq!(mode.size, Resolution::new(2304, 1296));

    // only the first mode reaches 100fps
    let mode = controller
        .get_best_sensor_mode(Resolution::new(1536, 864), 100)
        .unwrap();
    assert_eq!(mode.size, Resolution::new(1536, 864));
}

#[test]
fn best_sensor_mode_rejects_uncoverable_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(MockCameraBackend::new(), &dir);
    assert!(controller
        .get_best_sensor_mode(Resolution::new(3840, 2160), 15)
        .is_none());
}

#[test]
fn best_sensor_mode_with_unreachable_framerate() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(MockCameraBackend::new(), &dir);
    assert!(controller
        .get_best_sensor_mode(Resolution::new(640, 480), 240)
        .is_none());
}

#[test]
fn startup_configures_sensor_for_recording_framerate() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MockCameraBackend::new();
    let _controller = build_controller(Arc::clone(&backend), &dir);

    // 25 fps over 1920x1080 resolves to the 2304x1296 @ 56fps mode
    let mode = backend.configured_sensor_mode().unwrap();
    assert_eq!(mode.size, Resolution::new(2304, 1296));
    // runtime controls applied: 25 fps -> 40ms frame duration
    assert_eq!(backend.configured_frame_duration_us(), (40_000, 40_000));
}

#[test]
fn lores_resolution_never_exceeds_main() {
    let dir = tempfile::tempdir().unwrap();
    let mut camera = test_camera_config();
    camera.stream_resolution = (4000, 4000);
    let controller = CameraController::new(
        MockCameraBackend::new(),
        &camera,
        &test_storage_config(&dir),
        chrono_tz::UTC,
    )
    .unwrap();
    assert_eq!(controller.lores_resolution(), controller.main_resolution());
}

#[test]
fn framerate_below_one_clamps_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MockCameraBackend::new();
    let controller = build_controller(Arc::clone(&backend), &dir);

    controller.set_framerate(0).unwrap();
    assert_eq!(backend.configured_frame_duration_us(), (33_333, 33_333));

    controller.set_framerate(25).unwrap();
    assert_eq!(backend.configured_frame_duration_us(), (40_000, 40_000));
}

#[test]
fn unknown_noise_reduction_mode_is_invalid_argument() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(MockCameraBackend::new(), &dir);
    match controller.set_noise_reduction("Turbo") {
        Err(HomewatchError::InvalidArgument { .. }) => {}
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
    controller.set_noise_reduction("HighQuality").unwrap();
}

#[test]
fn stopping_idle_recording_and_stream_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(MockCameraBackend::new(), &dir);
    assert!(controller.stop_recording_to_file().is_ok());
    assert!(controller.stop_capture_stream().is_ok());
    assert!(!controller.is_recording());
    assert!(!controller.is_streaming());
}

#[test]
fn duplicate_recording_start_is_already_active() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(MockCameraBackend::new(), &dir);

    let path = controller.start_default_recording(Quality::Low).unwrap();
    assert!(path.exists());
    assert!(controller.is_recording());

    let second = dir.path().join("second.mp4");
    match controller.start_recording_to_file(&second, StreamName::Main, Quality::Low) {
        Err(HomewatchError::AlreadyActive { .. }) => {}
        other => panic!("expected AlreadyActive, got {other:?}"),
    }

    controller.stop_recording_to_file().unwrap();
    assert!(!controller.is_recording());
    // the slot is free again
    controller.start_default_recording(Quality::Low).unwrap();
    controller.stop_recording_to_file().unwrap();
}

#[test]
fn recording_filename_is_timestamped() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(MockCameraBackend::new(), &dir);
    let path = controller.start_default_recording(Quality::Low).unwrap();
    controller.stop_recording_to_file().unwrap();

    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    // YYYY-MM-DD_HH-MM-SS.mp4
    assert_eq!(name.len(), "2026-01-01_00-00-00.mp4".len());
    assert!(name.ends_with(".mp4"));
    assert_eq!(&name[4..5], "-");
    assert_eq!(&name[10..11], "_");
}

#[test]
fn capture_picture_conflicts_with_active_recording() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(MockCameraBackend::new(), &dir);

    controller.start_default_recording(Quality::Low).unwrap();
    match controller.capture_picture() {
        Err(HomewatchError::Conflict { .. }) => {}
        other => panic!("expected Conflict, got {other:?}"),
    }

    controller.stop_recording_to_file().unwrap();
    let jpeg = controller.capture_picture().unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
}

#[tokio::test]
async fn double_stream_start_reuses_the_encoder() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MockCameraBackend::with_frame_interval(Duration::from_millis(5));
    let controller = build_controller(Arc::clone(&backend), &dir);

    let _first = controller.start_capture_stream().unwrap();
    let _second = controller.start_capture_stream().unwrap();

    assert_eq!(backend.encoder_starts(), 1);
    assert!(controller.is_streaming());

    controller.stop_capture_stream().unwrap();
    assert!(!controller.is_streaming());
    assert_eq!(backend.encoder_stops(), 1);
}

#[tokio::test]
async fn stream_readers_receive_frames_and_end_on_stop() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MockCameraBackend::with_frame_interval(Duration::from_millis(5));
    let controller = build_controller(backend, &dir);

    let mut reader = controller.start_capture_stream().unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(1), reader.next_frame())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);

    controller.stop_capture_stream().unwrap();
    let end = tokio::time::timeout(Duration::from_secs(1), reader.next_frame())
        .await
        .expect("reader must not hang after stop");
    assert!(end.is_none());
}

#[tokio::test(start_paused = true)]
async fn idle_stream_stops_after_the_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MockCameraBackend::with_frame_interval(Duration::from_millis(5));
    let controller = build_controller(backend, &dir);

    let _reader = controller.start_capture_stream().unwrap();
    assert!(controller.is_streaming());

    tokio::time::sleep(Duration::from_secs(301)).await;
    assert!(!controller.is_streaming());
}

#[tokio::test(start_paused = true)]
async fn restarting_the_stream_resets_the_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MockCameraBackend::with_frame_interval(Duration::from_millis(5));
    let controller = build_controller(backend, &dir);

    let _reader = controller.start_capture_stream().unwrap();
    tokio::time::sleep(Duration::from_secs(200)).await;

    // second call re-arms the timer without a second encoder
    let _again = controller.start_capture_stream().unwrap();
    tokio::time::sleep(Duration::from_secs(200)).await;
    assert!(controller.is_streaming());

    tokio::time::sleep(Duration::from_secs(101)).await;
    assert!(!controller.is_streaming());
}
