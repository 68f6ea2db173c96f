// THEORY:
// The `point` module holds the smallest geometric vocabulary of the engine. Every
// sampled depth reading becomes a `Point3D` in camera space, and every higher layer
// (background model, regions, the cube toy) summarizes sets of those points with an
// axis-aligned `Bounds3`.
//
// Key architectural principles:
// 1.  **Borrowed Math**: `Point3D` is a plain `glam::Vec3`. There is no wrapper type,
//     so all of glam's arithmetic (dot, cross, normalize) is available directly.
// 2.  **NaN Is Data**: A missing depth reading unprojects to a NaN point. That is not
//     an error. Summaries such as `Bounds3::from_points` skip non-finite points
//     instead of letting them poison the result.

use glam::Vec3;

/// A camera-space coordinate in metres. NaN components mean "no depth reading".
pub type Point3D = Vec3;

/// An axis-aligned box enclosing a set of points.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bounds3 {
    pub min: Point3D,
    pub max: Point3D,
}

impl Bounds3 {
    /// Computes the bounds of every finite point in `points`.
    /// Returns `None` if the set holds no finite point at all.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point3D>,
    {
        points
            .into_iter()
            .filter(|p| p.is_finite())
            .fold(None, |bounds: Option<Bounds3>, p| {
                Some(match bounds {
                    None => Bounds3 { min: *p, max: *p },
                    Some(b) => Bounds3 {
                        min: b.min.min(*p),
                        max: b.max.max(*p),
                    },
                })
            })
    }

    /// Strict containment on the horizontal (x/z) plane, ignoring height.
    pub fn contains_xz(&self, p: Point3D) -> bool {
        p.x > self.min.x && p.x < self.max.x && p.z > self.min.z && p.z < self.max.z
    }
}

/// A borrowed set of points with their normals and bounds, as handed to renderers
/// and to the cube toy. Normals may be empty while they are still unknown.
#[derive(Debug, Clone, Copy)]
pub struct SceneLayer<'a> {
    pub points: &'a [Point3D],
    pub normals: &'a [Point3D],
    pub bounds: Option<Bounds3>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_skip_nan_points() {
        let points = vec![
            Vec3::new(1.0, -2.0, 3.0),
            Vec3::NAN,
            Vec3::new(-1.0, 4.0, 0.5),
        ];
        let bounds = Bounds3::from_points(&points).expect("two finite points");
        assert_eq!(bounds.min, Vec3::new(-1.0, -2.0, 0.5));
        assert_eq!(bounds.max, Vec3::new(1.0, 4.0, 3.0));
    }

    #[test]
    fn bounds_of_all_nan_is_none() {
        let points = vec![Vec3::NAN; 4];
        assert!(Bounds3::from_points(&points).is_none());
        assert!(Bounds3::from_points(&[] as &[Point3D]).is_none());
    }

    #[test]
    fn contains_xz_ignores_height() {
        let bounds = Bounds3 {
            min: Vec3::new(-1.0, -1.0, 1.0),
            max: Vec3::new(1.0, 1.0, 2.0),
        };
        assert!(bounds.contains_xz(Vec3::new(0.0, 50.0, 1.5)));
        assert!(!bounds.contains_xz(Vec3::new(0.0, 0.0, 2.5)));
        assert!(!bounds.contains_xz(Vec3::new(1.0, 0.0, 1.5)));
    }
}
