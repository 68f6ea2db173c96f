// THEORY:
// The `ForegroundSegmenter` is the spatial layer of the engine. Given a calibrated
// `BackgroundModel` and the current frame's grid, it decides which cells hold
// something that was not there during calibration, and summarizes them as a
// `Region`.
//
// Key architectural principles & algorithm steps:
// 1.  **Depth Difference Test**: A cell is foreground when |current.z - background.z|
//     exceeds a fixed threshold. NaN on either side fails the comparison, so
//     missing depth is never foreground.
// 2.  **Single Bounding Box**: All foreground cells expand one running bounding box.
//     There is no connected-component labelling; two separate objects produce one
//     box spanning both. This keeps the per-frame cost linear and the output to at
//     most one region.
// 3.  **Minimum Mass**: If the foreground cell count does not exceed a minimum, the
//     scene is treated as empty. This filters sensor noise along depth edges.
// 4.  **Region Packaging**: The emitted `Region` carries the grid points inside the
//     box (row-major), their bounds and their normals, computed with the box's own
//     width and height.

use crate::core_modules::background::BackgroundModel;
use crate::core_modules::grid_sampler::GridSample;
use crate::core_modules::normals::normal_estimator;
use crate::core_modules::point::{Bounds3, Point3D};

/// An inclusive rectangle of grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct GridRect {
    pub min_row: usize,
    pub min_col: usize,
    pub max_row: usize,
    pub max_col: usize,
}

impl GridRect {
    /// A rectangle covering the single cell `(row, col)`.
    pub fn cell(row: usize, col: usize) -> Self {
        Self {
            min_row: row,
            min_col: col,
            max_row: row,
            max_col: col,
        }
    }

    /// Grows the rectangle to cover `(row, col)`.
    pub fn include(&mut self, row: usize, col: usize) {
        self.min_row = self.min_row.min(row);
        self.min_col = self.min_col.min(col);
        self.max_row = self.max_row.max(row);
        self.max_col = self.max_col.max(col);
    }

    pub fn width(&self) -> usize {
        self.max_col - self.min_col + 1
    }

    pub fn height(&self) -> usize {
        self.max_row - self.min_row + 1
    }

    pub fn cell_count(&self) -> usize {
        self.width() * self.height()
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        (self.min_row..=self.max_row).contains(&row) && (self.min_col..=self.max_col).contains(&col)
    }
}

/// The outcome of comparing one frame against the background.
#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundMask {
    pub width: usize,
    pub height: usize,
    /// Number of `true` cells.
    pub count: usize,
    /// Bounding box of all foreground cells, if any.
    pub rect: Option<GridRect>,
}

/// The single foreground object extracted from a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub rect: GridRect,
    /// How many cells inside `rect` actually passed the depth test.
    pub foreground_cells: usize,
    /// Current-frame points inside `rect`, row-major, `rect.cell_count()` long.
    pub points: Vec<Point3D>,
    pub normals: Vec<Point3D>,
    pub bounds: Option<Bounds3>,
}

/// Compares frames against the background and extracts at most one region.
#[derive(Debug, Clone, Copy)]
pub struct ForegroundSegmenter {
    threshold: f32,
    min_cells: usize,
}

impl ForegroundSegmenter {
    pub fn new(threshold: f32, min_cells: usize) -> Self {
        Self { threshold, min_cells }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn min_cells(&self) -> usize {
        self.min_cells
    }

    /// Marks every cell whose depth departs from the background by more than the threshold.
    pub fn classify(&self, current: &GridSample, background: &BackgroundModel) -> ForegroundMask {
        debug_assert_eq!(current.dims(), (background.width, background.height));

        let mut count = 0;
        let mut rect: Option<GridRect> = None;

        for row in 0..current.height {
            for col in 0..current.width {
                let ix = current.index(row, col);
                let diff = (current.points[ix].z - background.points[ix].z).abs();
                if diff > self.threshold {
                    count += 1;
                    match rect.as_mut() {
                        Some(r) => r.include(row, col),
                        None => rect = Some(GridRect::cell(row, col)),
                    }
                }
            }
        }

        ForegroundMask {
            width: current.width,
            height: current.height,
            count,
            rect,
        }
    }

    /// Runs the depth test and packages the foreground as a `Region`, or returns
    /// `None` when too few cells changed.
    pub fn segment(&self, current: &GridSample, background: &BackgroundModel) -> (ForegroundMask, Option<Region>) {
        let mask = self.classify(current, background);
        if mask.count <= self.min_cells {
            return (mask, None);
        }
        let region = mask.rect.map(|rect| extract_region(current, rect, mask.count));
        (mask, region)
    }
}

fn extract_region(current: &GridSample, rect: GridRect, foreground_cells: usize) -> Region {
    let mut points = Vec::with_capacity(rect.cell_count());
    for row in rect.min_row..=rect.max_row {
        for col in rect.min_col..=rect.max_col {
            points.push(current.point(row, col));
        }
    }
    let normals = normal_estimator::estimate_normals(&points, rect.width(), rect.height());
    let bounds = Bounds3::from_points(&points);

    Region {
        rect,
        foreground_cells,
        points,
        normals,
        bounds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::sync::Arc;

    const W: usize = 64;
    const H: usize = 53;

    fn wall(z: f32) -> Vec<Vec3> {
        let mut points = Vec::with_capacity(W * H);
        for row in 0..H {
            for col in 0..W {
                points.push(Vec3::new(col as f32 * 0.05, row as f32 * 0.05, z));
            }
        }
        points
    }

    fn background() -> BackgroundModel {
        let points = wall(2.5);
        BackgroundModel {
            width: W,
            height: H,
            normals: normal_estimator::estimate_normals(&points, W, H).into(),
            bounds: Bounds3::from_points(&points),
            points: Arc::from(points),
        }
    }

    fn with_block(rect: GridRect, z: f32) -> GridSample {
        let mut points = wall(2.5);
        for row in rect.min_row..=rect.max_row {
            for col in rect.min_col..=rect.max_col {
                points[row * W + col].z = z;
            }
        }
        GridSample::from_points(W, H, 8, points)
    }

    fn segmenter() -> ForegroundSegmenter {
        ForegroundSegmenter::new(0.1, 300)
    }

    #[test]
    fn identical_frame_has_no_foreground() {
        let bg = background();
        let current = GridSample::from_points(W, H, 8, wall(2.5));
        let (mask, region) = segmenter().segment(&current, &bg);
        assert_eq!(mask.count, 0);
        assert!(mask.rect.is_none());
        assert!(region.is_none());
    }

    #[test]
    fn large_block_yields_exactly_its_bounding_box() {
        let bg = background();
        let block = GridRect {
            min_row: 10,
            min_col: 20,
            max_row: 29,
            max_col: 39,
        };
        let (mask, region) = segmenter().segment(&with_block(block, 1.5), &bg);
        assert_eq!(mask.count, 400);

        let region = region.expect("400 cells exceed the minimum");
        assert_eq!(region.rect, block);
        assert_eq!(region.foreground_cells, 400);
        assert_eq!(region.points.len(), 400);
        assert_eq!(region.normals.len(), 400);
        let bounds = region.bounds.unwrap();
        assert_eq!(bounds.min.z, 1.5);
        assert_eq!(bounds.max.z, 1.5);
        // A flat block: every normal faces the camera axis.
        for n in &region.normals {
            assert!((*n - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-4);
        }
    }

    #[test]
    fn small_change_within_threshold_is_ignored() {
        let bg = background();
        let block = GridRect {
            min_row: 0,
            min_col: 0,
            max_row: 52,
            max_col: 63,
        };
        let (mask, region) = segmenter().segment(&with_block(block, 2.45), &bg);
        assert_eq!(mask.count, 0);
        assert!(region.is_none());
    }

    #[test]
    fn exactly_minimum_cells_is_treated_as_empty() {
        let bg = background();
        // 15 x 20 = 300 cells: not more than the minimum.
        let block = GridRect {
            min_row: 0,
            min_col: 0,
            max_row: 14,
            max_col: 19,
        };
        let (mask, region) = segmenter().segment(&with_block(block, 1.0), &bg);
        assert_eq!(mask.count, 300);
        assert!(region.is_none());

        // One more cell tips it over.
        let mut current = with_block(block, 1.0);
        current.points[40 * W + 50].z = 1.0;
        let (_, region) = segmenter().segment(&current, &bg);
        let region = region.expect("301 cells");
        assert_eq!(
            region.rect,
            GridRect {
                min_row: 0,
                min_col: 0,
                max_row: 40,
                max_col: 50,
            }
        );
        assert_eq!(region.foreground_cells, 301);
    }

    #[test]
    fn two_objects_share_one_bounding_box() {
        let bg = background();
        let mut current = with_block(
            GridRect {
                min_row: 2,
                min_col: 2,
                max_row: 16,
                max_col: 16,
            },
            1.0,
        );
        for row in 40..50 {
            for col in 50..60 {
                current.points[row * W + col].z = 4.0;
            }
        }
        let (_, region) = segmenter().segment(&current, &bg);
        let rect = region.unwrap().rect;
        assert_eq!((rect.min_row, rect.min_col, rect.max_row, rect.max_col), (2, 2, 49, 59));
    }

    #[test]
    fn nan_cells_are_never_foreground() {
        let bg = background();
        let mut points = wall(2.5);
        for p in points.iter_mut().take(1000) {
            *p = Vec3::NAN;
        }
        let (mask, region) = segmenter().segment(&GridSample::from_points(W, H, 8, points), &bg);
        assert_eq!(mask.count, 0);
        assert!(region.is_none());
    }

    #[test]
    fn rect_geometry() {
        let mut rect = GridRect::cell(5, 5);
        rect.include(2, 9);
        assert_eq!((rect.width(), rect.height(), rect.cell_count()), (5, 4, 20));
        assert!(rect.contains(3, 7));
        assert!(!rect.contains(6, 7));
    }
}
