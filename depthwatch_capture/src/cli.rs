use clap::Parser;
use depthwatch::config::{CaptureConfig, PipelineConfig, PipelineKind};
use depthwatch::error::{CaptureError, Result};
use depthwatch::sim::SimScene;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Long options that were historically spelled with a single dash.
const LEGACY_FLAGS: [&str; 6] = ["-noviewer", "-norgb", "-nodepth", "-frames", "-help", "-version"];

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "depthwatch_capture")]
#[command(about = "Depth camera capture with background-subtraction segmentation")]
#[command(version)]
#[command(after_help = "Environment variables: LOGFILE=<depthwatch.log>, RUST_LOG=<filter>\n\
To pause and unpause: pkill -USR1 depthwatch_capture")]
pub struct Cli {
    /// Processing pipeline (gl, cl, clkde, cuda, cudakde, cpu) and/or device serial
    #[arg(value_name = "PIPELINE|SERIAL")]
    pub targets: Vec<String>,

    /// GPU index used by the OpenCL and CUDA pipelines
    #[arg(long, value_name = "ID", allow_negative_numbers = true)]
    pub gpu: Option<i32>,

    /// Disable the viewer; only log progress
    #[arg(long)]
    pub noviewer: bool,

    /// Disable the color stream
    #[arg(long)]
    pub norgb: bool,

    /// Disable the depth stream
    #[arg(long)]
    pub nodepth: bool,

    /// Number of frames to process before exiting
    #[arg(long, value_name = "N")]
    pub frames: Option<u64>,

    /// Seconds to wait for a frame before giving up
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub timeout: u64,

    /// Pipeline tuning as JSON (stride, warmup_frames, foreground_threshold, min_foreground_cells)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write colorized depth previews into this directory
    #[arg(long, value_name = "DIR")]
    pub snapshot_dir: Option<PathBuf>,

    /// Frames between two snapshots
    #[arg(long, value_name = "N", default_value_t = 30)]
    pub snapshot_every: u64,

    /// Frame index at which the simulated box enters the scene
    #[arg(long, value_name = "N", default_value_t = 30)]
    pub sim_box_after: u64,

    /// Milliseconds between simulated frames
    #[arg(long, value_name = "MS", default_value_t = 33)]
    pub sim_interval_ms: u64,

    /// Show the depth preview in an OpenCV window
    #[cfg(feature = "highgui")]
    #[arg(long)]
    pub highgui: bool,

    /// Serve previews and controls over HTTP/WebSocket on this address
    #[cfg(feature = "web")]
    #[arg(long, value_name = "ADDR")]
    pub serve: Option<std::net::SocketAddr>,
}

/// Rewrites legacy single-dash options (`-noviewer`, `-frames 10`, `-gpu=1`, `-v`)
/// into the double-dash form clap expects.
///
/// `-gpu` has to come before any pipeline token, since the pipeline is created
/// with the GPU index it was given at that point.
pub fn normalize_legacy_args<I, T>(args: I) -> Result<Vec<OsString>>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut out = Vec::new();
    let mut pipeline_seen = false;

    for (i, arg) in args.into_iter().map(Into::into).enumerate() {
        if i == 0 {
            out.push(arg);
            continue;
        }
        let Some(text) = arg.to_str() else {
            out.push(arg);
            continue;
        };

        if PipelineKind::from_token(text).is_some() {
            pipeline_seen = true;
        }
        let is_gpu = text.starts_with("-gpu=") || text.starts_with("--gpu");
        if is_gpu && pipeline_seen {
            return Err(CaptureError::InvalidArgument(
                "-gpu must be specified before pipeline argument".into(),
            ));
        }

        let rewritten = if text == "-v" {
            "--version".to_string()
        } else if LEGACY_FLAGS.contains(&text) || text.starts_with("-gpu=") {
            format!("-{text}")
        } else {
            text.to_string()
        };
        out.push(rewritten.into());
    }
    Ok(out)
}

impl Cli {
    /// Builds the capture configuration, classifying the positional tokens.
    pub fn capture_config(&self) -> Result<CaptureConfig> {
        let mut pipeline = None;
        let mut serial = None;
        for token in &self.targets {
            if let Some(kind) = PipelineKind::from_token(token) {
                // The first pipeline named wins.
                pipeline.get_or_insert(kind);
            } else if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
                serial = Some(token.clone());
            } else {
                warn!(argument = %token, "unknown argument");
            }
        }

        if self.frames == Some(0) {
            return Err(CaptureError::InvalidArgument("invalid frame count '0'".into()));
        }

        let pipeline_config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };

        let config = CaptureConfig {
            serial,
            pipeline,
            gpu_device: self.gpu,
            enable_rgb: !self.norgb,
            enable_depth: !self.nodepth,
            viewer_enabled: !self.noviewer,
            frame_limit: self.frames,
            frame_timeout: Duration::from_secs(self.timeout),
            pipeline_config,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn sim_scene(&self) -> SimScene {
        SimScene {
            box_enters_after: Some(self.sim_box_after),
            frame_interval: Duration::from_millis(self.sim_interval_ms),
            ..Default::default()
        }
    }
}
