//! Foundation types shared by every layer.

pub mod transform;

pub use transform::{
    MotionVector, Transform, TransformConfig, angular_norm, from_rpy, from_translation,
    from_translation_rpy, interpolate, linear_norm, to_motion_vector,
};
