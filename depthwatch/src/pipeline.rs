// THEORY:
// The `pipeline` module is the top-level per-frame API of the segmentation engine.
// It strings the core stages together into a single call: a depth frame goes in,
// a `FrameScene` describing everything worth drawing comes out.
//
// Key architectural principles & algorithm steps:
// 1.  **Stage 1, Decimation**: The `GridSampler` reduces the frame to a coarse grid
//     of camera-space points.
// 2.  **Stage 2, Calibration**: While the `BackgroundEstimator` is warming, the grid
//     is folded into the running mean and nothing else happens. The frame that
//     completes the warm-up is only used for calibration.
// 3.  **Stage 3, Segmentation**: Once the background is ready, every later frame is
//     compared against it by the `ForegroundSegmenter`, producing zero or one
//     `Region`.
// 4.  **Layered Output**: The resulting `FrameScene` always lists the background as
//     layer 0, followed by the region if there is one. Renderers and the cube toy
//     consume that layer list and never reach into the stages directly.

use crate::capture::Registration;
use crate::core_modules::background::{BackgroundEstimator, BackgroundModel, BackgroundPhase};
use crate::core_modules::frame::DepthFrame;
use crate::core_modules::grid_sampler::{GridSample, GridSampler};
use crate::core_modules::point::{Bounds3, Point3D, SceneLayer};
use crate::core_modules::segmenter::ForegroundSegmenter;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

// Re-export key data structures for the public API.
pub use crate::config::PipelineConfig;
pub use crate::core_modules::segmenter::{GridRect, Region};

/// Everything derived from one depth frame.
#[derive(Debug, Clone)]
pub struct FrameScene {
    /// Zero-based count of frames run through the pipeline before this one.
    pub frame_index: u64,
    pub phase: BackgroundPhase,
    pub grid_width: usize,
    pub grid_height: usize,
    /// The stride the grid was sampled at, for mapping cells back to pixels.
    pub stride: usize,
    /// Current background estimate (running mean while warming).
    pub background: Arc<[Point3D]>,
    /// Empty until the background is ready.
    pub background_normals: Arc<[Point3D]>,
    pub background_bounds: Option<Bounds3>,
    pub region: Option<Region>,
    /// Cells that passed the depth test, whether or not a region was emitted.
    pub foreground_cells: usize,
    /// First grid cell of this frame with no depth reading.
    pub first_invalid: Option<(usize, usize)>,
    /// Device timestamp of the depth frame. Zero for pre-sampled grids.
    pub timestamp: Duration,
}

impl FrameScene {
    pub fn is_ready(&self) -> bool {
        self.phase == BackgroundPhase::Ready
    }

    /// The drawable layers: the background first, then the region if present.
    pub fn layers(&self) -> Vec<SceneLayer<'_>> {
        let mut layers = vec![SceneLayer {
            points: &self.background,
            normals: &self.background_normals,
            bounds: self.background_bounds,
        }];
        if let Some(region) = &self.region {
            layers.push(SceneLayer {
                points: &region.points,
                normals: &region.normals,
                bounds: region.bounds,
            });
        }
        layers
    }
}

/// The main per-frame segmentation engine.
#[derive(Debug)]
pub struct SegmentationPipeline {
    sampler: GridSampler,
    estimator: BackgroundEstimator,
    segmenter: ForegroundSegmenter,
    frames_processed: u64,
}

impl SegmentationPipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            sampler: GridSampler::new(config.stride),
            estimator: BackgroundEstimator::new(config.warmup_frames),
            segmenter: ForegroundSegmenter::new(config.foreground_threshold, config.min_foreground_cells),
            frames_processed: 0,
        }
    }

    pub fn phase(&self) -> BackgroundPhase {
        self.estimator.phase()
    }

    pub fn background(&self) -> Option<&Arc<BackgroundModel>> {
        self.estimator.model()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Samples `depth` through `registration` and runs the remaining stages.
    pub fn process<R>(&mut self, depth: &DepthFrame, registration: &R) -> Result<FrameScene>
    where
        R: Registration + ?Sized,
    {
        let sample = self.sampler.sample(depth, registration);
        trace!(sequence = depth.sequence, grid = ?sample.dims(), "frame sampled");
        let mut scene = self.process_sample(sample)?;
        scene.timestamp = depth.timestamp;
        Ok(scene)
    }

    /// Runs calibration or segmentation on an already sampled grid.
    pub fn process_sample(&mut self, sample: GridSample) -> Result<FrameScene> {
        let frame_index = self.frames_processed;
        let was_ready = self.estimator.is_ready();

        // --- 1. Calibration (or dimension check once calibrated) ---
        let phase = self.estimator.observe(&sample)?;

        // --- 2. Segmentation ---
        let (background, background_normals, background_bounds, region, foreground_cells) =
            match self.estimator.model() {
                Some(model) if was_ready => {
                    let (mask, region) = self.segmenter.segment(&sample, model);
                    if let Some(region) = &region {
                        debug!(frame_index, rect = ?region.rect, cells = mask.count, "foreground region");
                    }
                    (
                        model.points.clone(),
                        model.normals.clone(),
                        model.bounds,
                        region,
                        mask.count,
                    )
                }
                Some(model) => (model.points.clone(), model.normals.clone(), model.bounds, None, 0),
                None => (
                    Arc::from(self.estimator.current_points()),
                    Arc::<[Point3D]>::from(Vec::new()),
                    None,
                    None,
                    0,
                ),
            };

        self.frames_processed += 1;
        Ok(FrameScene {
            frame_index,
            phase,
            grid_width: sample.width,
            grid_height: sample.height,
            stride: sample.stride,
            background,
            background_normals,
            background_bounds,
            region,
            foreground_cells,
            first_invalid: sample.first_invalid,
            timestamp: Duration::ZERO,
        })
    }
}
