// THEORY:
// The `capture` module is the boundary between the segmentation engine and the
// outside world. The sensor driver, its frame listener, its unprojection service and
// the renderer are all reached through the traits below, so the loop can run
// against real hardware, the simulator in `sim`, or scripted fakes in tests.
//
// Key architectural principles:
// 1.  **Single-Threaded Loop**: One thread waits for a frame, runs the pipeline,
//     renders and releases the frame set, in that order. The wait blocks for at
//     most the configured timeout.
// 2.  **Fatal Timeouts**: A wait that times out ends the run with
//     `CaptureError::FrameTimeout`. There is no retry.
// 3.  **Polled Control**: Shutdown and pause requests arrive through
//     `ControlState` atomics and are checked once per iteration. Device start/stop
//     for pausing is performed here, on the loop thread, never from the thread
//     that raised the request.
// 4.  **Always Clean Up**: Once the device is open, it is stopped and closed on
//     every exit path, including errors.

use crate::config::{CaptureConfig, DeviceConfig, PipelineSelection};
use crate::control::ControlState;
use crate::core_modules::background::BackgroundPhase;
use crate::core_modules::frame::{DepthFrame, FrameSet, FrameTypes, RawFrame};
use crate::core_modules::point::Point3D;
use crate::error::{CaptureError, Result};
use crate::pipeline::{FrameScene, SegmentationPipeline};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long the loop sleeps between control polls while paused.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Frames between "viewer is turned off" progress lines.
const PROGRESS_INTERVAL: u64 = 100;

/// Unprojects a depth pixel into camera space.
pub trait Registration: Send + Sync {
    /// Camera-space point in metres for `depth` at `(row, col)`. NaN when the pixel
    /// carries no depth.
    fn point_xyz(&self, depth: &DepthFrame, row: usize, col: usize) -> Point3D;
}

/// Blocking source of synchronized frame sets.
pub trait FrameListener: Send {
    /// Waits up to `timeout` for the next frame set. `None` means the wait timed out.
    fn wait_for_new_frame(&mut self, timeout: Duration) -> Option<FrameSet>;

    /// Hands a frame set back once the loop is done with it.
    fn release(&mut self, frames: FrameSet);
}

/// An opened depth sensor.
pub trait DepthDevice: Send {
    fn serial_number(&self) -> String;
    fn firmware_version(&self) -> String;

    /// Applies the depth clipping range.
    fn configure(&mut self, config: &DeviceConfig);

    /// Creates the listener that will receive `types` once streaming starts.
    fn frame_listener(&mut self, types: FrameTypes) -> Box<dyn FrameListener>;

    /// The unprojection service calibrated for this device.
    fn registration(&self) -> Arc<dyn Registration>;

    /// Starts every stream.
    fn start(&mut self) -> Result<()>;

    /// Starts only the requested streams.
    fn start_streams(&mut self, rgb: bool, depth: bool) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Discovers and opens devices.
pub trait DeviceBackend {
    /// Number of devices currently attached.
    fn enumerate_devices(&mut self) -> usize;

    fn default_serial(&self) -> Option<String>;

    /// Opens the device with `serial`, decoding through `pipeline`. `None` when it
    /// cannot be opened.
    fn open(&mut self, serial: &str, pipeline: PipelineSelection) -> Option<Box<dyn DepthDevice>>;
}

/// Receives the per-frame output of the loop.
pub trait SceneRenderer {
    /// The segmentation result of the current frame, background layer first.
    fn submit_scene(&mut self, scene: &FrameScene);

    /// A raw frame to show next to the scene.
    fn add_frame(&mut self, frame: RawFrame<'_>);

    /// Draws everything submitted since the last call. Returns `true` when the
    /// user asked to quit.
    fn render(&mut self) -> Result<bool>;
}

/// A renderer that draws nothing.
#[derive(Debug, Default)]
pub struct NullRenderer {
    pub scenes: u64,
    pub frames: u64,
}

impl SceneRenderer for NullRenderer {
    fn submit_scene(&mut self, _scene: &FrameScene) {
        self.scenes += 1;
    }

    fn add_frame(&mut self, _frame: RawFrame<'_>) {
        self.frames += 1;
    }

    fn render(&mut self) -> Result<bool> {
        Ok(false)
    }
}

/// What a finished capture run did.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSummary {
    pub frames_processed: u64,
    pub regions_emitted: u64,
    /// The run ended because a shutdown was requested (signal, viewer or web).
    pub shutdown_requested: bool,
    pub phase: BackgroundPhase,
}

/// Drives one capture run from device discovery to device close.
#[derive(Debug)]
pub struct CaptureLoop<'a> {
    config: CaptureConfig,
    control: &'a ControlState,
}

impl<'a> CaptureLoop<'a> {
    pub fn new(config: CaptureConfig, control: &'a ControlState) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, control })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn run(&self, backend: &mut dyn DeviceBackend, renderer: &mut dyn SceneRenderer) -> Result<CaptureSummary> {
        // --- 1. Discovery ---
        if backend.enumerate_devices() == 0 {
            error!("no device connected");
            return Err(CaptureError::DeviceNotFound);
        }
        let serial = match &self.config.serial {
            Some(serial) => serial.clone(),
            None => backend.default_serial().ok_or(CaptureError::DeviceNotFound)?,
        };

        // --- 2. Open & configure ---
        let Some(mut device) = backend.open(&serial, self.config.pipeline_selection()) else {
            error!(serial, "failure opening device");
            return Err(CaptureError::DeviceOpenFailed { serial });
        };
        device.configure(&self.config.device_config);

        let types = FrameTypes::for_streams(self.config.enable_rgb, self.config.enable_depth);
        let mut listener = device.frame_listener(types);

        // --- 3. Start ---
        if let Err(e) = self.start_device(device.as_mut()) {
            error!(serial, "failed to start device streams");
            if let Err(close_err) = device.close() {
                warn!(error = %close_err, "closing device after failed start");
            }
            return Err(e);
        }
        info!(serial = %device.serial_number(), "device serial");
        info!(firmware = %device.firmware_version(), "device firmware");

        // --- 4. Loop, then always stop & close ---
        let registration = device.registration();
        let outcome = self.drive(device.as_mut(), listener.as_mut(), types, registration.as_ref(), renderer);

        if let Err(e) = device.stop() {
            warn!(error = %e, "stopping device");
        }
        if let Err(e) = device.close() {
            warn!(error = %e, "closing device");
        }

        match &outcome {
            Ok(summary) => info!(
                frames = summary.frames_processed,
                regions = summary.regions_emitted,
                shutdown = summary.shutdown_requested,
                "capture finished"
            ),
            Err(e) => error!(error = %e, "capture aborted"),
        }
        outcome
    }

    fn start_device(&self, device: &mut dyn DepthDevice) -> Result<()> {
        if self.config.enable_rgb && self.config.enable_depth {
            device.start()
        } else {
            device.start_streams(self.config.enable_rgb, self.config.enable_depth)
        }
    }

    fn drive(
        &self,
        device: &mut dyn DepthDevice,
        listener: &mut dyn FrameListener,
        expected: FrameTypes,
        registration: &dyn Registration,
        renderer: &mut dyn SceneRenderer,
    ) -> Result<CaptureSummary> {
        let mut pipeline = SegmentationPipeline::new(&self.config.pipeline_config);
        let mut frame_count: u64 = 0;
        let mut regions_emitted: u64 = 0;
        let mut viewer_quit = false;

        while !self.control.shutdown_requested()
            && !viewer_quit
            && self.config.frame_limit.is_none_or(|max| frame_count < max)
        {
            if let Some(paused) = self.control.take_pause_change() {
                if paused {
                    device.stop()?;
                    info!(frame_count, "capture paused");
                } else {
                    self.start_device(device)?;
                    info!(frame_count, "capture resumed");
                }
            }
            if self.control.is_paused() {
                std::thread::sleep(PAUSE_POLL_INTERVAL);
                continue;
            }

            let Some(frames) = listener.wait_for_new_frame(self.config.frame_timeout) else {
                error!(timeout = ?self.config.frame_timeout, "timeout waiting for frame");
                return Err(CaptureError::FrameTimeout(self.config.frame_timeout));
            };

            let missing = expected.difference(frames.types());
            if !missing.is_empty() {
                warn!(frame_count, ?missing, "frame set is missing requested streams");
            }

            let scene = match (&frames.depth, self.config.enable_depth) {
                (Some(depth), true) => match pipeline.process(depth, registration) {
                    Ok(scene) => Some(scene),
                    Err(e) => {
                        listener.release(frames);
                        return Err(e);
                    }
                },
                _ => None,
            };
            if let Some(scene) = &scene {
                if scene.region.is_some() {
                    regions_emitted += 1;
                }
            }

            frame_count += 1;
            if !self.config.viewer_enabled {
                if frame_count % PROGRESS_INTERVAL == 0 {
                    info!(frame_count, "the viewer is turned off, Ctrl-C to stop");
                }
                listener.release(frames);
                continue;
            }

            if let Some(scene) = &scene {
                renderer.submit_scene(scene);
            }
            if self.config.enable_rgb {
                if let Some(color) = &frames.color {
                    renderer.add_frame(RawFrame::Color(color));
                }
            }
            if self.config.enable_depth {
                if let Some(ir) = &frames.ir {
                    renderer.add_frame(RawFrame::Ir(ir));
                }
                if let Some(depth) = &frames.depth {
                    renderer.add_frame(RawFrame::Depth(depth));
                }
            }
            let render_result = renderer.render();
            listener.release(frames);
            viewer_quit = render_result?;
            if viewer_quit {
                debug!(frame_count, "viewer requested shutdown");
            }
        }

        Ok(CaptureSummary {
            frames_processed: frame_count,
            regions_emitted,
            shutdown_requested: self.control.shutdown_requested() || viewer_quit,
            phase: pipeline.phase(),
        })
    }
}
