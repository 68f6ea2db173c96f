// THEORY:
// Configuration is split the same way the work is split. `PipelineConfig` tunes the
// per-frame segmentation math, `DeviceConfig` is pushed to the sensor after it is
// opened, and `CaptureConfig` describes one capture run as requested on the command
// line. Every struct has a `Default` that reproduces the stock behaviour, so a caller
// only overrides what it cares about.

use crate::error::{CaptureError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

/// Tuning for the grid sampler, background estimator and foreground segmenter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pixel stride between grid samples.
    pub stride: NonZeroUsize,
    /// Frames averaged into the background before it is frozen.
    pub warmup_frames: NonZeroUsize,
    /// Minimum |dz| (metres) for a cell to count as foreground.
    pub foreground_threshold: f32,
    /// A region is emitted only when strictly more cells than this are foreground.
    pub min_foreground_cells: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stride: NonZeroUsize::new(8).unwrap_or(NonZeroUsize::MIN),
            warmup_frames: NonZeroUsize::new(4).unwrap_or(NonZeroUsize::MIN),
            foreground_threshold: 0.1,
            min_foreground_cells: 300,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.foreground_threshold.is_finite() || self.foreground_threshold < 0.0 {
            return Err(CaptureError::InvalidArgument(format!(
                "foreground threshold must be a finite non-negative number, got {}",
                self.foreground_threshold
            )));
        }
        Ok(())
    }

    /// Loads a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}

/// Depth clipping range applied to the device after it opens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Metres.
    pub min_depth: f32,
    /// Metres.
    pub max_depth: f32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            min_depth: 0.2,
            max_depth: 100.0,
        }
    }
}

/// The processing backend the driver should decode frames with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Cpu,
    Gl,
    Cl,
    ClKde,
    Cuda,
    CudaKde,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 6] = [
        PipelineKind::Cpu,
        PipelineKind::Gl,
        PipelineKind::Cl,
        PipelineKind::ClKde,
        PipelineKind::Cuda,
        PipelineKind::CudaKde,
    ];

    /// Parses a command-line selector token such as `cpu` or `cudakde`.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == token)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Cpu => "cpu",
            PipelineKind::Gl => "gl",
            PipelineKind::Cl => "cl",
            PipelineKind::ClKde => "clkde",
            PipelineKind::Cuda => "cuda",
            PipelineKind::CudaKde => "cudakde",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decoding pipeline handed to the backend when a device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineSelection {
    /// `None` lets the backend choose.
    pub kind: Option<PipelineKind>,
    /// GPU index for the OpenCL and CUDA pipelines. `None` is the driver default.
    pub gpu_device: Option<i32>,
}

/// Everything one capture run needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Device to open. `None` picks the backend's default device.
    pub serial: Option<String>,
    /// `None` lets the backend choose.
    pub pipeline: Option<PipelineKind>,
    /// GPU index for the GPU-backed pipelines.
    pub gpu_device: Option<i32>,
    pub enable_rgb: bool,
    pub enable_depth: bool,
    pub viewer_enabled: bool,
    /// Stop after this many processed frames.
    pub frame_limit: Option<u64>,
    /// How long to wait for a frame before giving up.
    pub frame_timeout: Duration,
    pub pipeline_config: PipelineConfig,
    pub device_config: DeviceConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            serial: None,
            pipeline: None,
            gpu_device: None,
            enable_rgb: true,
            enable_depth: true,
            viewer_enabled: true,
            frame_limit: None,
            frame_timeout: Duration::from_secs(10),
            pipeline_config: PipelineConfig::default(),
            device_config: DeviceConfig::default(),
        }
    }
}

impl CaptureConfig {
    pub fn pipeline_selection(&self) -> PipelineSelection {
        PipelineSelection {
            kind: self.pipeline,
            gpu_device: self.gpu_device,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.enable_rgb && !self.enable_depth {
            return Err(CaptureError::InvalidArgument(
                "disabling both streams is not allowed".into(),
            ));
        }
        if self.frame_limit == Some(0) {
            return Err(CaptureError::InvalidArgument("frame limit must be positive".into()));
        }
        self.pipeline_config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_behaviour() {
        let config = PipelineConfig::default();
        assert_eq!(config.stride.get(), 8);
        assert_eq!(config.warmup_frames.get(), 4);
        assert_eq!(config.foreground_threshold, 0.1);
        assert_eq!(config.min_foreground_cells, 300);

        let capture = CaptureConfig::default();
        assert_eq!(capture.frame_timeout, Duration::from_secs(10));
        assert!(capture.validate().is_ok());
    }

    #[test]
    fn both_streams_disabled_is_rejected() {
        let config = CaptureConfig {
            enable_rgb: false,
            enable_depth: false,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CaptureError::InvalidArgument(_))));
    }

    #[test]
    fn zero_frame_limit_is_rejected() {
        let config = CaptureConfig {
            frame_limit: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn pipeline_tokens_round_trip() {
        for kind in PipelineKind::ALL {
            assert_eq!(PipelineKind::from_token(kind.as_str()), Some(kind));
        }
        assert_eq!(PipelineKind::from_token("vulkan"), None);
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{ "stride": 4 }"#).unwrap();
        assert_eq!(config.stride.get(), 4);
        assert_eq!(config.warmup_frames.get(), 4);
    }

    #[test]
    fn zero_stride_fails_to_parse() {
        assert!(serde_json::from_str::<PipelineConfig>(r#"{ "stride": 0 }"#).is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{ "min_foreground_cells": 50, "foreground_threshold": 0.25 }"#).unwrap();
        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.min_foreground_cells, 50);
        assert_eq!(config.foreground_threshold, 0.25);

        let negative = dir.path().join("negative.json");
        std::fs::write(&negative, r#"{ "foreground_threshold": -1.0 }"#).unwrap();
        let err = PipelineConfig::from_json_file(&negative).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidArgument(_)));
    }
}
