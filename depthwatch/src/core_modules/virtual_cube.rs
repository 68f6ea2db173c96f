// THEORY:
// The `virtual_cube` module is a small augmented-reality toy that rides on top of the
// segmentation output. A handful of rigid cubes are thrown through the captured
// scene; when one touches a captured point it bounces off along that point's
// surface normal. It exists to make the normals visible, not to be a physics engine.
//
// Key architectural principles:
// 1.  **Explicit Euler**: Position, velocity, orientation and angular velocity are
//     integrated with a plain forward step. Gravity is weak (0.098 m/s^2) so motion
//     stays watchable at camera scale.
// 2.  **Scene-Driven Collisions**: Collision candidates come only from layers whose
//     bounds contain the cube on the x/z plane. Within those, the first point closer
//     than the contact radius wins.
// 3.  **Respawn, Don't Clamp**: A cube that leaves the background volume is reset to
//     a preset (or a randomized) launch state instead of being constrained.

use crate::core_modules::point::SceneLayer;
use glam::{Mat3, Quat, Vec3};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::trace;

const GRAVITY: Vec3 = Vec3::new(0.0, -0.098, 0.0);
/// Squared contact distance between a cube centre and a scene point.
const CONTACT_DISTANCE_SQUARED: f32 = 0.012;
/// Principal moment of inertia of the unit cube body.
const BODY_INERTIA: f32 = 0.00375;
const LAUNCH_ANGLES: Vec3 = Vec3::new(0.57, 0.57, 0.57);
const LAUNCH_TORQUE: Vec3 = Vec3::new(0.57, 0.3, 0.1);
/// Velocity applied when a collided point has no usable normal.
const FALLBACK_BOUNCE: Vec3 = Vec3::new(0.0, 0.0, -1.0);

/// A rigid cube with its full kinematic state.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualCube {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Rotation matrix, kept orthonormal after every step.
    pub orientation: Mat3,
    pub angular_velocity: Vec3,
    pub body_inertia_inv: Mat3,
    /// Applied on the next step, then cleared.
    pub torque: Vec3,
}

impl VirtualCube {
    fn launch(position: Vec3, velocity: Vec3, angles: Vec3) -> Self {
        let orientation = Mat3::from_quat(
            Quat::from_rotation_x(angles.x) * Quat::from_rotation_y(angles.y) * Quat::from_rotation_z(angles.z),
        );
        Self {
            position,
            velocity,
            orientation,
            angular_velocity: Vec3::ZERO,
            body_inertia_inv: Mat3::from_diagonal(Vec3::splat(BODY_INERTIA)).inverse(),
            torque: LAUNCH_TORQUE,
        }
    }

    /// One of the four fixed launch scenarios. Out-of-range ids fall back to the first.
    pub fn preset(id: u8) -> Self {
        match id {
            2 => Self::launch(Vec3::new(-0.15, 0.0, 1.1), Vec3::new(0.13, 0.30, 0.37), Vec3::new(0.30, 0.57, 0.84)),
            3 => Self::launch(Vec3::new(0.1, -0.5, 0.0), Vec3::new(0.13, 0.30, 0.37), LAUNCH_ANGLES),
            4 => Self::launch(Vec3::new(-1.3, -0.3, 0.7), Vec3::new(0.30, 0.33, 0.11), LAUNCH_ANGLES),
            _ => Self::launch(Vec3::new(0.15, 0.0, 0.55), Vec3::new(0.13, 0.30, 0.37), LAUNCH_ANGLES),
        }
    }

    /// A launch from below the scene with a randomized lateral offset and depth speed.
    pub fn random_respawn<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let x: i32 = rng.gen_range(1..=100);
        let z: i32 = rng.gen_range(1..=100);
        let offset = x as f32 / 100.0 - 0.5;
        let lateral = (50.0 - x as f32) * 0.009;
        let depth_speed = (z as f32 / 100.0) * 0.15 + 0.1;
        Self::launch(
            Vec3::new(offset, -0.5, 0.0),
            Vec3::new(lateral, 0.33, depth_speed),
            LAUNCH_ANGLES,
        )
    }

    /// Free flight: gravity, torque-driven spin and re-orthonormalization.
    fn integrate(&mut self, dt: f32) {
        self.position += self.velocity * dt;
        self.velocity += GRAVITY * dt;

        let inertia_inv = self.orientation.transpose() * self.body_inertia_inv * self.orientation;
        self.angular_velocity += inertia_inv * self.torque * dt;
        self.torque = Vec3::ZERO;
        self.angular_velocity = self.angular_velocity.normalize_or_zero();

        let spin = skew(self.angular_velocity);
        self.orientation += spin * self.orientation * dt;
        self.orientation = orthonormalize(self.orientation);
    }

    /// Bounce: the velocity becomes the contact normal.
    fn bounce(&mut self, normal: Vec3, dt: f32) {
        self.velocity = if normal.x.is_nan() { FALLBACK_BOUNCE } else { normal };
        self.position += self.velocity * dt;
    }
}

/// The set of cubes flying through the captured scene.
#[derive(Debug)]
pub struct CubeWorld {
    pub cubes: Vec<VirtualCube>,
    rng: StdRng,
}

impl CubeWorld {
    /// Two cubes: one with a randomized launch, one on preset 4.
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let cubes = vec![VirtualCube::random_respawn(&mut rng), VirtualCube::preset(4)];
        Self { cubes, rng }
    }

    /// Advances every cube by `dt` seconds against `layers`, where layer 0 is the
    /// background. Without background bounds nothing moves.
    pub fn step(&mut self, dt: f32, layers: &[SceneLayer<'_>]) {
        let Some(background) = layers.first().and_then(|l| l.bounds) else {
            return;
        };

        for (n, cube) in self.cubes.iter_mut().enumerate() {
            let p = cube.position;
            let escaped = p.z > background.max.z + 0.5
                || p.z < 0.0
                || p.x > background.max.x + 1.5
                || p.x < background.min.x - 1.5;

            if escaped {
                trace!(cube = n, ?p, "cube left the scene, respawning");
                *cube = if n == 0 {
                    VirtualCube::random_respawn(&mut self.rng)
                } else {
                    VirtualCube::preset(4)
                };
                continue;
            }

            match find_contact(p, layers) {
                Some(normal) => cube.bounce(normal, dt),
                None => cube.integrate(dt),
            }
        }
    }
}

/// The normal of the first scene point within contact distance of `p`.
fn find_contact(p: Vec3, layers: &[SceneLayer<'_>]) -> Option<Vec3> {
    layers
        .iter()
        .filter(|layer| layer.bounds.is_some_and(|b| b.contains_xz(p)))
        .find_map(|layer| {
            layer
                .points
                .iter()
                .position(|q| p.distance_squared(*q) <= CONTACT_DISTANCE_SQUARED)
                .map(|i| layer.normals.get(i).copied().unwrap_or(Vec3::NAN))
        })
}

fn skew(w: Vec3) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(0.0, w.z, -w.y),
        Vec3::new(-w.z, 0.0, w.x),
        Vec3::new(w.y, -w.x, 0.0),
    )
}

/// Gram-Schmidt on the columns.
fn orthonormalize(m: Mat3) -> Mat3 {
    let x = m.x_axis.normalize_or(Vec3::X);
    let y = (m.y_axis - x * x.dot(m.y_axis)).normalize_or(Vec3::Y);
    let z = x.cross(y);
    Mat3::from_cols(x, y, z)
}
