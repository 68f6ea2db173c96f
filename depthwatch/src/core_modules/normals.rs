// THEORY:
// The `NormalEstimator` approximates a surface normal for every cell of a point
// grid, using only the cell's grid neighbours. It runs once on the finished
// background model and once per frame on the extracted region.
//
// Key architectural principles & algorithm steps:
// 1.  **Explicit Coordinates**: Each flattened index is turned back into a
//     `(row, col)` pair and classified from those coordinates. Corner, edge and
//     interior cells are decided by comparing against the first/last row and
//     column, never by modulo arithmetic on the flat index.
// 2.  **Neighbour Differences**: Every contributing vector is `neighbour - here`.
// 3.  **Consistent Winding**: Corners sum two cross products built from the two
//     in-grid neighbours plus the diagonal between them; edges sum two cross
//     products over their three neighbours; interior cells sum four cross products
//     over up/left/down/right. Every formula walks the neighbours with the same
//     winding, so a flat grid yields identical normals on all cells.
// 4.  **NaN Propagation**: The summed vector is normalized. A zero or non-finite
//     sum (for example from a missing depth reading) produces a NaN normal, which
//     callers accept as "unknown".

use crate::core_modules::point::Point3D;

pub mod normal_estimator {
    use super::*;
    use glam::Vec3;

    /// Where a cell sits in its grid, which decides the neighbour formula.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum CellClass {
        TopLeft,
        TopRight,
        BottomLeft,
        BottomRight,
        Top,
        Bottom,
        Left,
        Right,
        Interior,
    }

    /// Classifies `(row, col)` within a `width x height` grid of at least 2x2.
    pub fn classify(row: usize, col: usize, width: usize, height: usize) -> CellClass {
        let top = row == 0;
        let bottom = row + 1 == height;
        let left = col == 0;
        let right = col + 1 == width;

        match (top, bottom, left, right) {
            (true, _, true, _) => CellClass::TopLeft,
            (true, _, _, true) => CellClass::TopRight,
            (true, ..) => CellClass::Top,
            (_, true, true, _) => CellClass::BottomLeft,
            (_, true, _, true) => CellClass::BottomRight,
            (_, true, ..) => CellClass::Bottom,
            (_, _, true, _) => CellClass::Left,
            (_, _, _, true) => CellClass::Right,
            _ => CellClass::Interior,
        }
    }

    /// Estimates one unit normal per point of a row-major `width x height` grid.
    ///
    /// Grids narrower or shorter than two cells have no neighbour on one axis, so
    /// every normal comes back NaN.
    pub fn estimate_normals(points: &[Point3D], width: usize, height: usize) -> Vec<Point3D> {
        if width < 2 || height < 2 || points.len() != width * height {
            return vec![Vec3::NAN; points.len()];
        }

        let mut normals = Vec::with_capacity(points.len());
        for row in 0..height {
            for col in 0..width {
                normals.push(normal_at(points, width, height, row, col));
            }
        }
        normals
    }

    fn normal_at(points: &[Point3D], width: usize, height: usize, row: usize, col: usize) -> Point3D {
        let here = points[row * width + col];
        let to = |r: usize, c: usize| points[r * width + c] - here;

        let sum = match classify(row, col, width, height) {
            CellClass::TopLeft => {
                let down = to(row + 1, col);
                let right = to(row, col + 1);
                let diagonal = to(row + 1, col + 1);
                diagonal.cross(right) + down.cross(diagonal)
            }
            CellClass::TopRight => {
                let down = to(row + 1, col);
                let left = to(row, col - 1);
                let diagonal = to(row + 1, col - 1);
                left.cross(diagonal) + diagonal.cross(down)
            }
            CellClass::Top => {
                let down = to(row + 1, col);
                let left = to(row, col - 1);
                let right = to(row, col + 1);
                left.cross(down) + down.cross(right)
            }
            CellClass::BottomLeft => {
                let up = to(row - 1, col);
                let right = to(row, col + 1);
                let diagonal = to(row - 1, col + 1);
                right.cross(diagonal) + diagonal.cross(up)
            }
            CellClass::BottomRight => {
                let up = to(row - 1, col);
                let left = to(row, col - 1);
                let diagonal = to(row - 1, col - 1);
                up.cross(diagonal) + diagonal.cross(left)
            }
            CellClass::Bottom => {
                let up = to(row - 1, col);
                let left = to(row, col - 1);
                let right = to(row, col + 1);
                right.cross(up) + up.cross(left)
            }
            CellClass::Left => {
                let up = to(row - 1, col);
                let down = to(row + 1, col);
                let right = to(row, col + 1);
                down.cross(right) + right.cross(up)
            }
            CellClass::Right => {
                let up = to(row - 1, col);
                let down = to(row + 1, col);
                let left = to(row, col - 1);
                up.cross(left) + left.cross(down)
            }
            CellClass::Interior => {
                let up = to(row - 1, col);
                let down = to(row + 1, col);
                let left = to(row, col - 1);
                let right = to(row, col + 1);
                up.cross(left) + left.cross(down) + down.cross(right) + right.cross(up)
            }
        };

        sum.normalize_or(Vec3::NAN)
    }
}
