// THEORY:
// The `GridSampler` is the first stage of the segmentation engine. A depth frame
// holds hundreds of thousands of readings; the segmentation logic only needs a
// coarse, evenly spaced lattice of them. The sampler walks the frame at a fixed
// stride and unprojects each visited reading into camera space.
//
// Key architectural principles:
// 1.  **Spatial Decimation**: Rows and columns {0, S, 2S, ...} are visited, which
//     yields ceil(H/S) x ceil(W/S) samples in row-major order. This grid is the unit
//     of analysis for every later stage.
// 2.  **Viewer Convention**: The unprojected X and Y axes are sign-inverted so that
//     the resulting cloud matches the orientation the viewer renders with.
// 3.  **Tolerant of Missing Depth**: Invalid readings unproject to NaN and are passed
//     through untouched. The first one seen in a frame is recorded (and logged) so a
//     fully dead frame is visible in the logs, but nothing is rejected.

use crate::capture::Registration;
use crate::core_modules::frame::DepthFrame;
use crate::core_modules::point::Point3D;
use std::num::NonZeroUsize;
use tracing::debug;

/// The coarse lattice of camera-space points taken from one depth frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSample {
    /// Number of sampled columns.
    pub width: usize,
    /// Number of sampled rows.
    pub height: usize,
    /// The pixel stride the grid was taken at.
    pub stride: usize,
    /// Row-major points, `width * height` long.
    pub points: Vec<Point3D>,
    /// Grid coordinate `(row, col)` of the first NaN reading in this frame, if any.
    pub first_invalid: Option<(usize, usize)>,
}

impl GridSample {
    /// Builds a sample directly from a point list. The list must be `width * height` long.
    pub fn from_points(width: usize, height: usize, stride: usize, points: Vec<Point3D>) -> Self {
        debug_assert_eq!(points.len(), width * height);
        let first_invalid = points
            .iter()
            .position(|p| p.x.is_nan())
            .map(|i| (i / width.max(1), i % width.max(1)));
        Self {
            width,
            height,
            stride,
            points,
            first_invalid,
        }
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.width + col
    }

    #[inline]
    pub fn point(&self, row: usize, col: usize) -> Point3D {
        self.points[self.index(row, col)]
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Decimates depth frames into a `GridSample` at a fixed stride.
#[derive(Debug, Clone, Copy)]
pub struct GridSampler {
    stride: NonZeroUsize,
}

impl GridSampler {
    pub fn new(stride: NonZeroUsize) -> Self {
        Self { stride }
    }

    pub fn stride(&self) -> usize {
        self.stride.get()
    }

    /// The `(width, height)` of the grid produced for a frame of the given size.
    pub fn grid_dims(&self, frame_width: usize, frame_height: usize) -> (usize, usize) {
        (
            frame_width.div_ceil(self.stride()),
            frame_height.div_ceil(self.stride()),
        )
    }

    /// Samples `depth`, unprojecting each visited reading through `registration`.
    pub fn sample<R>(&self, depth: &DepthFrame, registration: &R) -> GridSample
    where
        R: Registration + ?Sized,
    {
        self.sample_with(depth.width, depth.height, |row, col| {
            registration.point_xyz(depth, row, col)
        })
    }

    /// Samples a `frame_width x frame_height` field where `unproject(row, col)`
    /// yields the raw camera-space point of a pixel.
    pub fn sample_with<F>(&self, frame_width: usize, frame_height: usize, mut unproject: F) -> GridSample
    where
        F: FnMut(usize, usize) -> Point3D,
    {
        let stride = self.stride();
        let (width, height) = self.grid_dims(frame_width, frame_height);
        let mut points = Vec::with_capacity(width * height);
        let mut first_invalid = None;

        for (grid_row, row) in (0..frame_height).step_by(stride).enumerate() {
            for (grid_col, col) in (0..frame_width).step_by(stride).enumerate() {
                let mut point = unproject(row, col);

                if first_invalid.is_none() && point.x.is_nan() {
                    debug!(row, col, "first invalid depth reading in frame");
                    first_invalid = Some((grid_row, grid_col));
                }

                point.x = -point.x;
                point.y = -point.y;
                points.push(point);
            }
        }

        GridSample {
            width,
            height,
            stride,
            points,
            first_invalid,
        }
    }
}
