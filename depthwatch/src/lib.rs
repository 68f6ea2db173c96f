// THEORY:
// This file is the main entry point for the `depthwatch` library crate. It defines
// the public API used by the capture binary and the visualizer.
//
// The primary goal is to export the `SegmentationPipeline` and the `CaptureLoop`
// together with their data structures (`FrameScene`, `Region`, `CaptureConfig`,
// etc.) as the high-level interface of the engine. The algorithmic stages live in
// `core_modules`; the hardware boundary is a set of traits in `capture`, with a
// software sensor in `sim` standing in when no device driver is linked.

pub mod capture;
pub mod config;
pub mod control;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod sim;

pub use capture::{CaptureLoop, CaptureSummary, SceneRenderer};
pub use config::{CaptureConfig, DeviceConfig, PipelineConfig, PipelineKind, PipelineSelection};
pub use control::ControlState;
pub use error::{CaptureError, Result};
pub use pipeline::{FrameScene, SegmentationPipeline};
