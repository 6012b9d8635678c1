//! Rigid transform helpers.
//!
//! All poses are `Isometry3<f64>` in the pose-of-child-in-parent convention:
//! `x_a_b` is the pose of frame `b` expressed in frame `a`, so chains compose
//! left to right:
//!
//! ```text
//! x_a_c = x_a_b * x_b_c
//! ```
//!
//! Motion vectors (task errors and speeds) are 6D with the angular part first
//! and the linear part last.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Rigid transform in 3D.
pub type Transform = Isometry3<f64>;

/// 6D motion vector `[angular; linear]`.
pub type MotionVector = Vector6<f64>;

/// Transform as written in configuration files.
///
/// Rotation is given as roll/pitch/yaw in radians.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub translation: [f64; 3],
    #[serde(default)]
    pub rpy: [f64; 3],
}

impl TransformConfig {
    pub fn to_isometry(&self) -> Transform {
        from_translation_rpy(Vector3::from(self.translation), Vector3::from(self.rpy))
    }

    pub fn from_isometry(x: &Transform) -> Self {
        let (r, p, y) = x.rotation.euler_angles();
        Self {
            translation: x.translation.vector.into(),
            rpy: [r, p, y],
        }
    }
}

impl From<TransformConfig> for Transform {
    fn from(c: TransformConfig) -> Self {
        c.to_isometry()
    }
}

/// Build a transform from a translation and roll/pitch/yaw angles (radians).
pub fn from_translation_rpy(translation: Vector3<f64>, rpy: Vector3<f64>) -> Transform {
    Isometry3::from_parts(
        Translation3::from(translation),
        UnitQuaternion::from_euler_angles(rpy.x, rpy.y, rpy.z),
    )
}

/// Pure translation.
pub fn from_translation(translation: Vector3<f64>) -> Transform {
    Isometry3::from_parts(Translation3::from(translation), UnitQuaternion::identity())
}

/// Pure rotation from roll/pitch/yaw (radians).
pub fn from_rpy(rpy: Vector3<f64>) -> Transform {
    from_translation_rpy(Vector3::zeros(), rpy)
}

/// Interpolate between two transforms: linear for translation, slerp for rotation.
pub fn interpolate(a: &Transform, b: &Transform, t: f64) -> Transform {
    a.lerp_slerp(b, t)
}

/// Express a transform as a 6D motion vector `[rotation vector; translation]`.
pub fn to_motion_vector(x: &Transform) -> MotionVector {
    let w = x.rotation.scaled_axis();
    let v = x.translation.vector;
    MotionVector::new(w.x, w.y, w.z, v.x, v.y, v.z)
}

/// Euclidean norm of the linear (translational) part of a motion vector.
#[inline]
pub fn linear_norm(v: &MotionVector) -> f64 {
    v.fixed_rows::<3>(3).norm()
}

/// Euclidean norm of the angular part of a motion vector.
#[inline]
pub fn angular_norm(v: &MotionVector) -> f64 {
    v.fixed_rows::<3>(0).norm()
}

/// Format a transform as "t=[x y z] rpy=[r p y]deg" for logs.
pub fn describe(x: &Transform) -> String {
    let t = x.translation.vector;
    let (r, p, y) = x.rotation.euler_angles();
    format!(
        "t=[{:.4} {:.4} {:.4}] rpy=[{:.2} {:.2} {:.2}]deg",
        t.x,
        t.y,
        t.z,
        r.to_degrees(),
        p.to_degrees(),
        y.to_degrees()
    )
}
