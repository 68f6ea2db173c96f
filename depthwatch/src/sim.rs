// THEORY:
// The `sim` module is a stand-in depth sensor. It implements the `capture` traits
// with a background thread that renders synthetic frames, so the whole capture
// loop can run (and be tested) without hardware.
//
// Key architectural principles:
// 1.  **A Scene Worth Segmenting**: Every frame shows a flat wall. After a
//     configurable number of frames a box appears in front of it, large enough to
//     pass the foreground minimum at the default stride.
// 2.  **Realistic Delivery**: Frames are produced on their own thread at a fixed
//     interval and handed over through a bounded channel. A slow consumer causes
//     frames to be dropped, not queued, as a real sensor would.
// 3.  **Observable Lifecycle**: Start, stop, close and release calls are counted in
//     a shared `SimStats` so callers can verify the device was driven correctly.

use crate::capture::{DepthDevice, DeviceBackend, FrameListener, Registration};
use crate::config::{DeviceConfig, PipelineSelection};
use crate::core_modules::frame::{
    COLOR_HEIGHT, COLOR_WIDTH, ColorFrame, DEPTH_HEIGHT, DEPTH_WIDTH, DepthFrame, FrameSet, FrameTypes, IrFrame,
};
use crate::core_modules::point::Point3D;
use crate::error::{CaptureError, Result};
use glam::Vec3;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace};

const CHANNEL_DEPTH: usize = 2;
const IDLE_POLL: Duration = Duration::from_millis(2);

/// Pinhole unprojection with millimetre depth input and metre output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeRegistration {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl PinholeRegistration {
    /// Factory intrinsics of a Kinect v2 class IR camera.
    pub fn kinect_v2_ir() -> Self {
        Self {
            fx: 365.456,
            fy: 365.456,
            cx: 254.878,
            cy: 205.395,
        }
    }
}

impl Default for PinholeRegistration {
    fn default() -> Self {
        Self::kinect_v2_ir()
    }
}

impl Registration for PinholeRegistration {
    fn point_xyz(&self, depth: &DepthFrame, row: usize, col: usize) -> Point3D {
        let depth_mm = depth.at(row, col);
        // Also rejects NaN.
        if !(depth_mm > 0.0) {
            return Vec3::NAN;
        }
        let z = depth_mm / 1000.0;
        let x = (col as f32 + 0.5 - self.cx) * z / self.fx;
        let y = (row as f32 + 0.5 - self.cy) * z / self.fy;
        Vec3::new(x, y, z)
    }
}

/// What the simulated camera sees.
#[derive(Debug, Clone, PartialEq)]
pub struct SimScene {
    pub width: usize,
    pub height: usize,
    /// Distance of the back wall.
    pub wall_depth_mm: f32,
    /// Frame sequence from which the box is visible. `None` keeps the scene empty.
    pub box_enters_after: Option<u64>,
    pub box_depth_mm: f32,
    pub box_rows: Range<usize>,
    pub box_cols: Range<usize>,
    /// Columns at the left edge with no depth reading, as the sensor's shadow band.
    pub invalid_columns: usize,
    pub frame_interval: Duration,
}

impl Default for SimScene {
    fn default() -> Self {
        Self {
            width: DEPTH_WIDTH,
            height: DEPTH_HEIGHT,
            wall_depth_mm: 2500.0,
            box_enters_after: Some(30),
            box_depth_mm: 1200.0,
            box_rows: 120..304,
            box_cols: 160..352,
            invalid_columns: 4,
            frame_interval: Duration::from_millis(33),
        }
    }
}

impl SimScene {
    pub fn render_depth(&self, sequence: u64) -> DepthFrame {
        let box_visible = self.box_enters_after.is_some_and(|n| sequence >= n);
        let mut data = vec![self.wall_depth_mm; self.width * self.height];
        for row in 0..self.height {
            let line = &mut data[row * self.width..(row + 1) * self.width];
            for (col, d) in line.iter_mut().enumerate() {
                if col < self.invalid_columns {
                    *d = 0.0;
                } else if box_visible && self.box_rows.contains(&row) && self.box_cols.contains(&col) {
                    *d = self.box_depth_mm;
                }
            }
        }
        let mut frame = DepthFrame::new(self.width, self.height, data).with_sequence(sequence);
        frame.timestamp = self.timestamp_of(sequence);
        frame
    }

    /// Exposure time of frame `sequence`, saturating at `u64::MAX` nanoseconds.
    pub fn timestamp_of(&self, sequence: u64) -> Duration {
        let nanos = self.frame_interval.as_nanos().saturating_mul(u128::from(sequence));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Lifecycle counters shared between a backend and the devices it opens.
#[derive(Debug, Default)]
pub struct SimStats {
    pub configured: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub closes: AtomicUsize,
    pub frames_produced: AtomicU64,
    pub frames_released: AtomicU64,
}

impl SimStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// A backend that hands out simulated devices.
#[derive(Debug)]
pub struct SimulatedBackend {
    pub serials: Vec<String>,
    pub scene: SimScene,
    /// `open` fails for every serial.
    pub fail_open: bool,
    /// `start`/`start_streams` fail.
    pub fail_start: bool,
    /// The producer goes silent after this many frames.
    pub max_frames: Option<u64>,
    stats: Arc<SimStats>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(SimScene::default())
    }
}

impl SimulatedBackend {
    pub fn new(scene: SimScene) -> Self {
        Self {
            serials: vec!["000000000001".to_string()],
            scene,
            fail_open: false,
            fail_start: false,
            max_frames: None,
            stats: Arc::default(),
        }
    }

    pub fn stats(&self) -> Arc<SimStats> {
        Arc::clone(&self.stats)
    }
}

impl DeviceBackend for SimulatedBackend {
    fn enumerate_devices(&mut self) -> usize {
        self.serials.len()
    }

    fn default_serial(&self) -> Option<String> {
        self.serials.first().cloned()
    }

    fn open(&mut self, serial: &str, pipeline: PipelineSelection) -> Option<Box<dyn DepthDevice>> {
        if self.fail_open || !self.serials.iter().any(|s| s == serial) {
            return None;
        }
        info!(
            serial,
            pipeline = ?pipeline.kind,
            gpu = ?pipeline.gpu_device,
            "opening simulated device"
        );
        Some(Box::new(SimDevice {
            serial: serial.to_string(),
            scene: self.scene.clone(),
            fail_start: self.fail_start,
            max_frames: self.max_frames,
            stats: Arc::clone(&self.stats),
            shared: Arc::new(Producer::default()),
            sender: None,
            types: FrameTypes::empty(),
            worker: None,
        }))
    }
}

#[derive(Debug, Default)]
struct Producer {
    streaming: AtomicBool,
    closed: AtomicBool,
    rgb: AtomicBool,
    depth: AtomicBool,
    depth_range_mm: Mutex<Option<(f32, f32)>>,
}

/// A simulated sensor with its producer thread.
#[derive(Debug)]
pub struct SimDevice {
    serial: String,
    scene: SimScene,
    fail_start: bool,
    max_frames: Option<u64>,
    stats: Arc<SimStats>,
    shared: Arc<Producer>,
    sender: Option<SyncSender<FrameSet>>,
    types: FrameTypes,
    worker: Option<JoinHandle<()>>,
}

impl SimDevice {
    fn begin(&mut self, rgb: bool, depth: bool) -> Result<()> {
        if self.fail_start {
            return Err(CaptureError::StreamStartFailed);
        }
        self.stats.starts.fetch_add(1, Ordering::SeqCst);
        self.shared.rgb.store(rgb, Ordering::SeqCst);
        self.shared.depth.store(depth, Ordering::SeqCst);
        self.shared.streaming.store(true, Ordering::SeqCst);

        if self.worker.is_none() {
            let Some(sender) = self.sender.take() else {
                // No listener attached yet: nothing to deliver to.
                return Ok(());
            };
            let shared = Arc::clone(&self.shared);
            let stats = Arc::clone(&self.stats);
            let scene = self.scene.clone();
            let types = self.types;
            let max_frames = self.max_frames;
            let handle = std::thread::Builder::new()
                .name(format!("sim-{}", self.serial))
                .spawn(move || produce(scene, types, max_frames, shared, stats, sender))?;
            self.worker = Some(handle);
        }
        Ok(())
    }
}

impl DepthDevice for SimDevice {
    fn serial_number(&self) -> String {
        self.serial.clone()
    }

    fn firmware_version(&self) -> String {
        "sim-1.0".to_string()
    }

    fn configure(&mut self, config: &DeviceConfig) {
        self.stats.configured.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut range) = self.shared.depth_range_mm.lock() {
            *range = Some((config.min_depth * 1000.0, config.max_depth * 1000.0));
        }
    }

    fn frame_listener(&mut self, types: FrameTypes) -> Box<dyn FrameListener> {
        let (sender, receiver) = sync_channel(CHANNEL_DEPTH);
        self.sender = Some(sender);
        self.types = types;
        Box::new(SimListener {
            receiver,
            stats: Arc::clone(&self.stats),
        })
    }

    fn registration(&self) -> Arc<dyn Registration> {
        Arc::new(PinholeRegistration::kinect_v2_ir())
    }

    fn start(&mut self) -> Result<()> {
        self.begin(true, true)
    }

    fn start_streams(&mut self, rgb: bool, depth: bool) -> Result<()> {
        self.begin(rgb, depth)
    }

    fn stop(&mut self) -> Result<()> {
        self.stats.stops.fetch_add(1, Ordering::SeqCst);
        self.shared.streaming.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.shared.streaming.store(false, Ordering::SeqCst);
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                return Err(std::io::Error::other("simulated producer thread panicked").into());
            }
        }
        Ok(())
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

fn produce(
    scene: SimScene,
    types: FrameTypes,
    max_frames: Option<u64>,
    shared: Arc<Producer>,
    stats: Arc<SimStats>,
    sender: SyncSender<FrameSet>,
) {
    info!(width = scene.width, height = scene.height, "simulated producer started");
    let color: Arc<[u8]> = vec![0x80u8; COLOR_WIDTH * COLOR_HEIGHT * 4].into();
    let mut sequence: u64 = 0;

    while !shared.closed.load(Ordering::SeqCst) {
        let exhausted = max_frames.is_some_and(|max| sequence >= max);
        if !shared.streaming.load(Ordering::SeqCst) || exhausted {
            std::thread::sleep(IDLE_POLL);
            continue;
        }

        let mut frames = FrameSet::default();
        if types.contains(FrameTypes::COLOR) && shared.rgb.load(Ordering::SeqCst) {
            frames.color = Some(ColorFrame {
                width: COLOR_WIDTH,
                height: COLOR_HEIGHT,
                sequence,
                data: Arc::clone(&color),
            });
        }
        if types.contains(FrameTypes::DEPTH) && shared.depth.load(Ordering::SeqCst) {
            let mut depth = scene.render_depth(sequence);
            if let Ok(range) = shared.depth_range_mm.lock() {
                if let Some((min, max)) = *range {
                    for d in depth.data.iter_mut().filter(|d| **d < min || **d > max) {
                        *d = 0.0;
                    }
                }
            }
            if types.contains(FrameTypes::IR) {
                frames.ir = Some(IrFrame {
                    width: depth.width,
                    height: depth.height,
                    sequence,
                    data: depth.data.iter().map(|d| if *d > 0.0 { 1000.0 } else { 0.0 }).collect(),
                });
            }
            frames.depth = Some(depth);
        }

        match sender.try_send(frames) {
            Ok(()) => {
                stats.frames_produced.fetch_add(1, Ordering::SeqCst);
            }
            Err(TrySendError::Full(_)) => trace!(sequence, "listener busy, frame dropped"),
            Err(TrySendError::Disconnected(_)) => break,
        }
        sequence += 1;
        std::thread::sleep(scene.frame_interval);
    }
    debug!(sequence, "simulated producer stopped");
}

/// Receiving end of a simulated device.
#[derive(Debug)]
pub struct SimListener {
    receiver: Receiver<FrameSet>,
    stats: Arc<SimStats>,
}

impl FrameListener for SimListener {
    fn wait_for_new_frame(&mut self, timeout: Duration) -> Option<FrameSet> {
        self.receiver.recv_timeout(timeout).ok()
    }

    fn release(&mut self, frames: FrameSet) {
        self.stats.frames_released.fetch_add(1, Ordering::SeqCst);
        drop(frames);
    }
}
