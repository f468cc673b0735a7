//! Assembly kernel: rotation and pose primitives.
//!
//! Conventions: +Z is an attach point's outward axis, +Y is up.
//! Angles crossing the API boundary are degrees.

use nalgebra::{Isometry3, Quaternion, Translation3, Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// World or local orientation.
pub type Rotation = UnitQuaternion<f64>;

/// Rigid transform (position + orientation).
pub type Pose = Isometry3<f64>;

/// Default tolerance, in degrees, for "same orientation" checks.
pub const DEFAULT_ANGLE_TOLERANCE_DEG: f64 = 1e-3;

/// Rotation of `degrees` about `axis`.
pub fn axis_angle_deg(axis: &Unit<Vector3<f64>>, degrees: f64) -> Rotation {
    UnitQuaternion::from_axis_angle(axis, degrees.to_radians())
}

/// Rotation about the attach axis (+Z).
pub fn about_forward(degrees: f64) -> Rotation {
    axis_angle_deg(&Vector3::z_axis(), degrees)
}

/// Rotation about the up axis (+Y).
pub fn about_up(degrees: f64) -> Rotation {
    axis_angle_deg(&Vector3::y_axis(), degrees)
}

/// The half turn about +Y that makes two outward-facing attach points face each other.
pub fn facing_flip() -> Rotation {
    about_up(180.0)
}

/// Euler angles in degrees, applied about Z, then X, then Y.
pub fn euler_deg(x: f64, y: f64, z: f64) -> Rotation {
    about_up(y) * axis_angle_deg(&Vector3::x_axis(), x) * about_forward(z)
}

/// Same as [`euler_deg`] for a `[x, y, z]` triple.
pub fn euler_deg_array(angles: [f64; 3]) -> Rotation {
    euler_deg(angles[0], angles[1], angles[2])
}

/// Unsigned angle in degrees between two orientations.
///
/// `q` and `-q` describe the same orientation, so the sign of the dot
/// product is ignored. Result lies in `[0, 180]`.
pub fn angle_deg(a: &Rotation, b: &Rotation) -> f64 {
    let dot = a.coords.dot(&b.coords).abs().min(1.0);
    (2.0 * dot.acos()).to_degrees()
}

/// True when two orientations differ by at most `tolerance_deg`.
pub fn same_orientation(a: &Rotation, b: &Rotation, tolerance_deg: f64) -> bool {
    angle_deg(a, b) <= tolerance_deg
}

/// The four quarter turns about the attach axis, in check order.
pub fn quarter_turns() -> [Rotation; 4] {
    [
        Rotation::identity(),
        about_forward(90.0),
        about_forward(180.0),
        about_forward(270.0),
    ]
}

/// Build a pose from a position and an orientation.
pub fn pose_from(position: Vector3<f64>, rotation: Rotation) -> Pose {
    Isometry3::from_parts(Translation3::from(position), rotation)
}

/// Quaternion as persisted in plan and layout files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuatRecord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for QuatRecord {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

impl QuatRecord {
    /// Normalized rotation. Degenerate (all-zero) records read as identity.
    pub fn to_rotation(self) -> Rotation {
        let q = Quaternion::new(self.w, self.x, self.y, self.z);
        if q.norm() <= f64::EPSILON {
            return Rotation::identity();
        }
        UnitQuaternion::from_quaternion(q)
    }
}

impl From<Rotation> for QuatRecord {
    fn from(rotation: Rotation) -> Self {
        let c = rotation.coords;
        // nalgebra stores [i, j, k, w]
        Self {
            x: c[0],
            y: c[1],
            z: c[2],
            w: c[3],
        }
    }
}
