// THEORY:
// The `BackgroundEstimator` learns what the empty scene looks like. For a fixed
// number of warm-up frames it averages the incoming grid samples cell by cell;
// once that count is reached it freezes the result into an immutable
// `BackgroundModel` that every later frame is compared against.
//
// Key architectural principles:
// 1.  **Explicit Lifecycle**: The estimator is a two-state machine,
//     `Warming(n)` -> `Ready`. The accumulated sum and frame counter live inside the
//     `Warming` state instead of being loose variables in the capture loop.
// 2.  **One-Shot Calibration**: There is no way back to `Warming`. If the real
//     background changes after calibration, the model does not adapt; a restart is
//     required. This is a known limitation, kept deliberately.
// 3.  **Compute Once, Share Forever**: On the `Ready` transition the background's
//     normals and bounding box are computed exactly once. The finished model sits
//     behind an `Arc` so each frame's scene can reference it without copying.
// 4.  **Fixed Geometry**: The grid dimensions seen on the first frame are fixed for
//     the model's lifetime. A frame of any other size is rejected with
//     `CaptureError::GridMismatch`.

use crate::core_modules::grid_sampler::GridSample;
use crate::core_modules::normals::normal_estimator;
use crate::core_modules::point::{Bounds3, Point3D};
use crate::error::{CaptureError, Result};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info};

/// The frozen, calibrated background.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundModel {
    pub width: usize,
    pub height: usize,
    /// Cell-wise mean of the warm-up samples.
    pub points: Arc<[Point3D]>,
    /// One normal per cell, computed once at calibration.
    pub normals: Arc<[Point3D]>,
    /// Bounds of the finite background points, computed once at calibration.
    pub bounds: Option<Bounds3>,
}

impl BackgroundModel {
    #[inline]
    pub fn point(&self, row: usize, col: usize) -> Point3D {
        self.points[row * self.width + col]
    }
}

/// The externally visible phase of the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundPhase {
    /// Still averaging; `frames_accumulated` frames have been folded in so far.
    Warming { frames_accumulated: usize },
    Ready,
}

#[derive(Debug)]
enum Estimation {
    Warming {
        frames: usize,
        dims: Option<(usize, usize)>,
        sum: Vec<Point3D>,
        mean: Vec<Point3D>,
    },
    Ready(Arc<BackgroundModel>),
}

/// Accumulates the running-mean background over the warm-up frames.
#[derive(Debug)]
pub struct BackgroundEstimator {
    warmup_frames: NonZeroUsize,
    state: Estimation,
}

impl BackgroundEstimator {
    pub fn new(warmup_frames: NonZeroUsize) -> Self {
        Self {
            warmup_frames,
            state: Estimation::Warming {
                frames: 0,
                dims: None,
                sum: Vec::new(),
                mean: Vec::new(),
            },
        }
    }

    pub fn warmup_frames(&self) -> usize {
        self.warmup_frames.get()
    }

    pub fn phase(&self) -> BackgroundPhase {
        match &self.state {
            Estimation::Warming { frames, .. } => BackgroundPhase::Warming {
                frames_accumulated: *frames,
            },
            Estimation::Ready(_) => BackgroundPhase::Ready,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, Estimation::Ready(_))
    }

    /// The calibrated model, once `Ready`.
    pub fn model(&self) -> Option<&Arc<BackgroundModel>> {
        match &self.state {
            Estimation::Ready(model) => Some(model),
            Estimation::Warming { .. } => None,
        }
    }

    /// The current best estimate of the background: the running mean while
    /// warming, the frozen model once ready. Empty before the first frame.
    pub fn current_points(&self) -> &[Point3D] {
        match &self.state {
            Estimation::Warming { mean, .. } => mean,
            Estimation::Ready(model) => &model.points,
        }
    }

    /// Folds one grid sample into the estimate and returns the resulting phase.
    ///
    /// Once `Ready`, samples are only checked for matching dimensions; the model
    /// itself never changes again.
    pub fn observe(&mut self, sample: &GridSample) -> Result<BackgroundPhase> {
        let warmup = self.warmup_frames.get();

        let finished = match &mut self.state {
            Estimation::Ready(model) => {
                check_dims((model.width, model.height), sample)?;
                return Ok(BackgroundPhase::Ready);
            }
            Estimation::Warming {
                frames,
                dims,
                sum,
                mean,
            } => {
                match *dims {
                    None => {
                        *dims = Some(sample.dims());
                        *sum = sample.points.clone();
                        *mean = sample.points.clone();
                    }
                    Some(expected) => {
                        check_dims(expected, sample)?;
                        let count = (*frames + 1) as f32;
                        for ((acc, avg), p) in sum.iter_mut().zip(mean.iter_mut()).zip(&sample.points) {
                            *acc += *p;
                            *avg = *acc / count;
                        }
                    }
                }
                *frames += 1;
                debug!(frames = *frames, warmup, "background frame accumulated");

                if *frames < warmup {
                    return Ok(BackgroundPhase::Warming {
                        frames_accumulated: *frames,
                    });
                }

                let (width, height) = sample.dims();
                (std::mem::take(mean), width, height)
            }
        };

        let (mean, width, height) = finished;
        let normals = normal_estimator::estimate_normals(&mean, width, height);
        let bounds = Bounds3::from_points(&mean);
        info!(width, height, ?bounds, "background model ready");

        self.state = Estimation::Ready(Arc::new(BackgroundModel {
            width,
            height,
            points: mean.into(),
            normals: normals.into(),
            bounds,
        }));
        Ok(BackgroundPhase::Ready)
    }
}

fn check_dims(expected: (usize, usize), sample: &GridSample) -> Result<()> {
    if sample.dims() != expected {
        return Err(CaptureError::GridMismatch {
            expected,
            found: sample.dims(),
        });
    }
    Ok(())
}
