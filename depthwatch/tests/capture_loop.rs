use depthwatch::capture::{DepthDevice, DeviceBackend, FrameListener, Registration, SceneRenderer};
use depthwatch::config::{CaptureConfig, DeviceConfig, PipelineKind, PipelineSelection};
use depthwatch::control::ControlState;
use depthwatch::core_modules::frame::{DepthFrame, FrameSet, FrameTypes, RawFrame};
use depthwatch::error::{CaptureError, Result};
use depthwatch::pipeline::{FrameScene, GridRect};
use depthwatch::sim::{PinholeRegistration, SimScene, SimStats, SimulatedBackend};
use depthwatch::CaptureLoop;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Records everything the loop hands over.
#[derive(Default)]
struct RecordingRenderer {
    scenes: Vec<FrameScene>,
    frame_labels: Vec<&'static str>,
    renders: usize,
    quit_after: Option<usize>,
}

impl SceneRenderer for RecordingRenderer {
    fn submit_scene(&mut self, scene: &FrameScene) {
        self.scenes.push(scene.clone());
    }

    fn add_frame(&mut self, frame: RawFrame<'_>) {
        self.frame_labels.push(frame.label());
    }

    fn render(&mut self) -> Result<bool> {
        self.renders += 1;
        Ok(self.quit_after.is_some_and(|n| self.renders >= n))
    }
}

fn fast_sim(box_after: u64) -> SimulatedBackend {
    SimulatedBackend::new(SimScene {
        frame_interval: Duration::from_millis(2),
        box_enters_after: Some(box_after),
        ..Default::default()
    })
}

fn config(frame_limit: u64) -> CaptureConfig {
    CaptureConfig {
        frame_limit: Some(frame_limit),
        frame_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

#[test]
fn simulated_run_finds_the_box() {
    let control = ControlState::new();
    let mut backend = fast_sim(20);
    let stats = backend.stats();
    let mut renderer = RecordingRenderer::default();

    let capture = CaptureLoop::new(config(40), &control).unwrap();
    let summary = capture.run(&mut backend, &mut renderer).unwrap();

    assert_eq!(summary.frames_processed, 40);
    assert!(summary.regions_emitted > 0);
    assert!(!summary.shutdown_requested);
    assert_eq!(renderer.renders, 40);
    assert_eq!(renderer.scenes.len(), 40);

    // Background is always layer 0; regions are the box's grid footprint.
    let expected = GridRect {
        min_row: 15,
        min_col: 20,
        max_row: 37,
        max_col: 43,
    };
    for scene in &renderer.scenes {
        let layers = scene.layers();
        assert_eq!(layers[0].points.len(), 64 * 53);
        if let Some(region) = &scene.region {
            assert_eq!(region.rect, expected);
            assert_eq!(layers.len(), 2);
        }
    }
    assert!(renderer.frame_labels.contains(&"RGB"));
    assert!(renderer.frame_labels.contains(&"depth"));
    assert!(renderer.frame_labels.contains(&"ir"));

    assert_eq!(SimStats::get(&stats.configured), 1);
    assert_eq!(SimStats::get(&stats.closes), 1);
    assert!(SimStats::get(&stats.stops) >= 1);
    assert_eq!(stats.frames_released.load(Ordering::SeqCst), 40);
}

#[test]
fn no_device_is_fatal() {
    let control = ControlState::new();
    let mut backend = SimulatedBackend::default();
    backend.serials.clear();
    let err = CaptureLoop::new(config(5), &control)
        .unwrap()
        .run(&mut backend, &mut RecordingRenderer::default())
        .unwrap_err();
    assert!(matches!(err, CaptureError::DeviceNotFound));
    assert_eq!(err.exit_code(), -1);
}

#[test]
fn open_failure_names_the_serial() {
    let control = ControlState::new();
    let mut backend = SimulatedBackend::default();
    backend.fail_open = true;
    let err = CaptureLoop::new(config(5), &control)
        .unwrap()
        .run(&mut backend, &mut RecordingRenderer::default())
        .unwrap_err();
    match err {
        CaptureError::DeviceOpenFailed { serial } => assert_eq!(serial, "000000000001"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn unknown_serial_fails_to_open() {
    let control = ControlState::new();
    let mut backend = SimulatedBackend::default();
    let capture = CaptureLoop::new(
        CaptureConfig {
            serial: Some("999".into()),
            ..config(5)
        },
        &control,
    )
    .unwrap();
    let err = capture.run(&mut backend, &mut RecordingRenderer::default()).unwrap_err();
    assert!(matches!(err, CaptureError::DeviceOpenFailed { .. }));
}

#[test]
fn start_failure_closes_the_device() {
    let control = ControlState::new();
    let mut backend = SimulatedBackend::default();
    backend.fail_start = true;
    let stats = backend.stats();
    let err = CaptureLoop::new(config(5), &control)
        .unwrap()
        .run(&mut backend, &mut RecordingRenderer::default())
        .unwrap_err();
    assert!(matches!(err, CaptureError::StreamStartFailed));
    assert_eq!(SimStats::get(&stats.closes), 1);
}

#[test]
fn silent_device_times_out_and_is_closed() {
    let control = ControlState::new();
    let mut backend = fast_sim(1000);
    backend.max_frames = Some(3);
    let stats = backend.stats();
    let capture = CaptureLoop::new(
        CaptureConfig {
            frame_limit: None,
            frame_timeout: Duration::from_millis(200),
            ..Default::default()
        },
        &control,
    )
    .unwrap();

    let mut renderer = RecordingRenderer::default();
    let err = capture.run(&mut backend, &mut renderer).unwrap_err();
    assert!(matches!(err, CaptureError::FrameTimeout(t) if t == Duration::from_millis(200)));
    assert!(renderer.renders <= 3);
    assert_eq!(SimStats::get(&stats.stops), 1);
    assert_eq!(SimStats::get(&stats.closes), 1);
}

#[test]
fn viewer_can_request_shutdown() {
    let control = ControlState::new();
    let mut backend = fast_sim(1000);
    let mut renderer = RecordingRenderer {
        quit_after: Some(7),
        ..Default::default()
    };
    let summary = CaptureLoop::new(config(100), &control)
        .unwrap()
        .run(&mut backend, &mut renderer)
        .unwrap();
    assert_eq!(summary.frames_processed, 7);
    assert!(summary.shutdown_requested);
}

#[test]
fn shutdown_before_start_processes_nothing() {
    let control = ControlState::new();
    control.request_shutdown();
    let mut backend = fast_sim(1000);
    let stats = backend.stats();
    let summary = CaptureLoop::new(config(100), &control)
        .unwrap()
        .run(&mut backend, &mut RecordingRenderer::default())
        .unwrap();
    assert_eq!(summary.frames_processed, 0);
    assert!(summary.shutdown_requested);
    assert_eq!(SimStats::get(&stats.closes), 1);
}

#[test]
fn disabled_viewer_skips_the_renderer() {
    let control = ControlState::new();
    let mut backend = fast_sim(1000);
    let mut renderer = RecordingRenderer::default();
    let summary = CaptureLoop::new(
        CaptureConfig {
            viewer_enabled: false,
            ..config(12)
        },
        &control,
    )
    .unwrap()
    .run(&mut backend, &mut renderer)
    .unwrap();
    assert_eq!(summary.frames_processed, 12);
    assert_eq!(renderer.renders, 0);
    assert!(renderer.scenes.is_empty());
}

#[test]
fn rgb_only_run_has_no_scenes() {
    let control = ControlState::new();
    let mut backend = fast_sim(1000);
    let mut renderer = RecordingRenderer::default();
    CaptureLoop::new(
        CaptureConfig {
            enable_depth: false,
            ..config(5)
        },
        &control,
    )
    .unwrap()
    .run(&mut backend, &mut renderer)
    .unwrap();
    assert!(renderer.scenes.is_empty());
    assert_eq!(renderer.frame_labels, vec!["RGB"; 5]);
}

#[test]
fn both_streams_disabled_is_rejected_up_front() {
    let control = ControlState::new();
    let err = CaptureLoop::new(
        CaptureConfig {
            enable_rgb: false,
            enable_depth: false,
            ..Default::default()
        },
        &control,
    )
    .unwrap_err();
    assert!(matches!(err, CaptureError::InvalidArgument(_)));
}

#[test]
fn pause_toggle_stops_and_restarts_the_device() {
    static CONTROL: ControlState = ControlState::new();
    let mut backend = fast_sim(1000);
    let stats = backend.stats();

    let summary = std::thread::scope(|scope| {
        scope.spawn(|| {
            std::thread::sleep(Duration::from_millis(50));
            CONTROL.request_pause_toggle();
            while !CONTROL.is_paused() {
                std::thread::sleep(Duration::from_millis(1));
            }
            std::thread::sleep(Duration::from_millis(50));
            CONTROL.request_pause_toggle();
        });
        CaptureLoop::new(config(60), &CONTROL)
            .unwrap()
            .run(&mut backend, &mut RecordingRenderer::default())
            .unwrap()
    });

    assert_eq!(summary.frames_processed, 60);
    assert_eq!(SimStats::get(&stats.starts), 2);
    // One stop for the pause, one at the end of the run.
    assert_eq!(SimStats::get(&stats.stops), 2);
    assert!(!CONTROL.is_paused());
}

// --- Scripted fakes for exact frame sequences ---

struct ScriptedListener {
    frames: VecDeque<FrameSet>,
    released: Arc<AtomicUsize>,
}

impl FrameListener for ScriptedListener {
    fn wait_for_new_frame(&mut self, _timeout: Duration) -> Option<FrameSet> {
        self.frames.pop_front()
    }

    fn release(&mut self, _frames: FrameSet) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedDevice {
    frames: Option<VecDeque<FrameSet>>,
    released: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl DepthDevice for ScriptedDevice {
    fn serial_number(&self) -> String {
        "42".into()
    }

    fn firmware_version(&self) -> String {
        "test".into()
    }

    fn configure(&mut self, _config: &DeviceConfig) {}

    fn frame_listener(&mut self, _types: FrameTypes) -> Box<dyn FrameListener> {
        let frames = self.frames.take().unwrap_or_default();
        Box::new(ScriptedListener {
            frames,
            released: Arc::clone(&self.released),
        })
    }

    fn registration(&self) -> Arc<dyn Registration> {
        Arc::new(PinholeRegistration::kinect_v2_ir())
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_streams(&mut self, _rgb: bool, _depth: bool) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedBackend {
    device: Option<ScriptedDevice>,
    opened_with: Option<PipelineSelection>,
}

impl DeviceBackend for ScriptedBackend {
    fn enumerate_devices(&mut self) -> usize {
        1
    }

    fn default_serial(&self) -> Option<String> {
        Some("42".into())
    }

    fn open(&mut self, _serial: &str, pipeline: PipelineSelection) -> Option<Box<dyn DepthDevice>> {
        self.opened_with = Some(pipeline);
        self.device.take().map(|d| Box::new(d) as Box<dyn DepthDevice>)
    }
}

fn depth_only(frame: DepthFrame) -> FrameSet {
    FrameSet {
        depth: Some(frame),
        ..Default::default()
    }
}

#[test]
fn resolution_change_mid_run_is_fatal() {
    let mut frames: VecDeque<FrameSet> = (0..5).map(|_| depth_only(DepthFrame::filled(512, 424, 2000.0))).collect();
    frames.push_back(depth_only(DepthFrame::filled(256, 212, 2000.0)));

    let released = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let mut backend = ScriptedBackend {
        device: Some(ScriptedDevice {
            frames: Some(frames),
            released: Arc::clone(&released),
            closed: Arc::clone(&closed),
        }),
        opened_with: None,
    };

    let control = ControlState::new();
    let err = CaptureLoop::new(config(100), &control)
        .unwrap()
        .run(&mut backend, &mut RecordingRenderer::default())
        .unwrap_err();
    assert!(matches!(
        err,
        CaptureError::GridMismatch {
            expected: (64, 53),
            found: (32, 27)
        }
    ));
    assert_eq!(released.load(Ordering::SeqCst), 6);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn exhausted_script_is_a_timeout() {
    let frames: VecDeque<FrameSet> = (0..3).map(|_| depth_only(DepthFrame::filled(64, 64, 1000.0))).collect();
    let mut backend = ScriptedBackend {
        device: Some(ScriptedDevice {
            frames: Some(frames),
            released: Arc::default(),
            closed: Arc::default(),
        }),
        opened_with: None,
    };
    let control = ControlState::new();
    let mut renderer = RecordingRenderer::default();
    let err = CaptureLoop::new(config(100), &control)
        .unwrap()
        .run(&mut backend, &mut renderer)
        .unwrap_err();
    assert!(matches!(err, CaptureError::FrameTimeout(_)));
    assert_eq!(renderer.renders, 3);
    assert!(renderer.scenes.iter().all(|s| !s.is_ready()));
}

#[test]
fn gpu_index_reaches_the_backend() {
    let frames: VecDeque<FrameSet> = (0..2).map(|_| depth_only(DepthFrame::filled(64, 64, 1000.0))).collect();
    let mut backend = ScriptedBackend {
        device: Some(ScriptedDevice {
            frames: Some(frames),
            released: Arc::default(),
            closed: Arc::default(),
        }),
        opened_with: None,
    };
    let control = ControlState::new();
    let summary = CaptureLoop::new(
        CaptureConfig {
            pipeline: Some(PipelineKind::Cuda),
            gpu_device: Some(1),
            ..config(2)
        },
        &control,
    )
    .unwrap()
    .run(&mut backend, &mut RecordingRenderer::default())
    .unwrap();

    assert_eq!(summary.frames_processed, 2);
    assert_eq!(
        backend.opened_with,
        Some(PipelineSelection {
            kind: Some(PipelineKind::Cuda),
            gpu_device: Some(1),
        })
    );
}
