//! Rigid transforms linking marker poses to semantic frames.
//!
//! Pure functions, no state. Naming follows `x_a_b` = pose of `b` in `a`.
//!
//! The servoing problem in one picture:
//!
//! ```text
//!            x_camera_tm                      x_camera_rm
//! camera ─────────────────▶ target marker    camera ─────────────────▶ robot marker
//!                               │ x_tm_goal                                │ x_rm_frame
//!                               ▼                                          ▼
//!                             goal  ◀──────────── error ─────────────  robot frame
//! ```
//!
//! The goal is the target frame moved by the configured frame offset and
//! desired offset. The servo error is the robot frame expressed in the goal;
//! it is the identity once the robot frame sits on the goal.

use nalgebra::Vector3;

use crate::core::{Transform, interpolate};
use crate::markers::MarkerMount;

/// Which basis the approach goal is computed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApproachBasis {
    /// From the target marker's observed world pose
    Marker,
    /// From the target robot's kinematic frame
    Frame,
}

impl ApproachBasis {
    pub fn from_use_marker(use_marker: bool) -> Self {
        if use_marker {
            ApproachBasis::Marker
        } else {
            ApproachBasis::Frame
        }
    }
}

/// Expected world pose of a marker from the kinematics of its attachment frame.
pub fn mount_pose(mount: &MarkerMount, x_0_attachment: &Transform) -> Transform {
    x_0_attachment * mount.frame_offset
}

/// Transform from a marker to a semantic frame, `x_marker_frame`.
///
/// `x_0_attachment` is the live pose of the frame the marker is mounted on,
/// `x_0_frame` the live pose of the frame of interest (often the same one).
pub fn resolve_frame_offset(
    mount: &MarkerMount,
    x_0_attachment: &Transform,
    x_0_frame: &Transform,
) -> Transform {
    mount_pose(mount, x_0_attachment).inverse() * x_0_frame
}

/// Servo goal expressed relative to the target marker, `x_marker_goal`.
///
/// The goal is the target frame moved by `frame_to_target` and then by
/// `desired_offset`, so that once the controlled frame reaches it, it sits at
/// `desired_offset` from the (offset) target frame.
pub fn compute_target_offset(
    target_mount: &MarkerMount,
    x_0_attachment: &Transform,
    x_0_target_frame: &Transform,
    desired_offset: &Transform,
    frame_to_target: &Transform,
) -> Transform {
    resolve_frame_offset(target_mount, x_0_attachment, x_0_target_frame)
        * frame_to_target
        * desired_offset
}

/// World pose the approach trajectory drives to.
///
/// With [`ApproachBasis::Marker`] the observed world pose of the target marker
/// replaces the kinematic one, which absorbs any error in the target robot's
/// model.
#[allow(clippy::too_many_arguments)]
pub fn approach_target(
    basis: ApproachBasis,
    target_mount: &MarkerMount,
    x_0_attachment: &Transform,
    x_0_target_frame: &Transform,
    x_0_marker_observed: &Transform,
    frame_to_target: &Transform,
    approach_offset: &Transform,
) -> Transform {
    let x_0_goal_frame = match basis {
        ApproachBasis::Marker => {
            x_0_marker_observed
                * resolve_frame_offset(target_mount, x_0_attachment, x_0_target_frame)
        }
        ApproachBasis::Frame => *x_0_target_frame,
    };
    x_0_goal_frame * frame_to_target * approach_offset
}

/// Servo error from the two camera-relative marker observations.
///
/// Returns `x_goal_frame`: the controlled frame expressed in the goal frame.
pub fn servo_error(
    x_camera_target_marker: &Transform,
    x_target_marker_goal: &Transform,
    x_camera_robot_marker: &Transform,
    x_robot_marker_frame: &Transform,
) -> Transform {
    let x_camera_goal = x_camera_target_marker * x_target_marker_goal;
    let x_camera_frame = x_camera_robot_marker * x_robot_marker_frame;
    x_camera_goal.inverse() * x_camera_frame
}

/// Point halfway between the expected target and robot marker mounts.
pub fn look_at_point(x_0_target_mount: &Transform, x_0_robot_mount: &Transform) -> Vector3<f64> {
    interpolate(x_0_target_mount, x_0_robot_mount, 0.5)
        .translation
        .vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{from_translation, from_translation_rpy};
    use approx::assert_relative_eq;

    fn pose(t: [f64; 3], rpy: [f64; 3]) -> Transform {
        from_translation_rpy(Vector3::from(t), Vector3::from(rpy))
    }

    fn assert_iso_eq(a: &Transform, b: &Transform) {
        assert_relative_eq!(a.translation.vector, b.translation.vector, epsilon = 1e-9);
        assert_relative_eq!(a.rotation.angle_to(&b.rotation), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_resolve_frame_offset_roundtrip() {
        let mount = MarkerMount::new("robot", "wrist", pose([0.01, -0.02, 0.05], [0.1, 0.0, 0.3]));
        let x_0_wrist = pose([0.5, 0.2, 0.9], [0.3, -0.2, 1.0]);
        let x_0_tool = pose([0.55, 0.2, 0.75], [0.3, -0.1, 1.2]);

        let x_marker_tool = resolve_frame_offset(&mount, &x_0_wrist, &x_0_tool);
        let x_0_marker = mount_pose(&mount, &x_0_wrist);

        // marker pose composed with the resolved offset gives back the frame
        assert_iso_eq(&(x_0_marker * x_marker_tool), &x_0_tool);
        // and the inverse brings the frame back onto the marker
        assert_iso_eq(&(x_0_tool * x_marker_tool.inverse()), &x_0_marker);
    }

    #[test]
    fn test_same_frame_offset_is_mount_inverse() {
        let offset = pose([0.0, 0.0, 0.05], [0.0, 0.0, 0.5]);
        let mount = MarkerMount::new("robot", "tool", offset);
        let x_0_tool = pose([1.0, 2.0, 3.0], [0.1, 0.2, 0.3]);
        let resolved = resolve_frame_offset(&mount, &x_0_tool, &x_0_tool);
        assert_iso_eq(&resolved, &offset.inverse());
    }

    #[test]
    fn test_target_offset_places_goal() {
        let mount = MarkerMount::new("env", "bracket", pose([0.0, 0.1, 0.0], [0.0, 0.0, 0.2]));
        let x_0_bracket = pose([1.0, 0.0, 0.5], [0.0, 0.0, 0.4]);
        let x_0_slot = pose([1.0, 0.05, 0.45], [0.0, 0.0, 0.4]);
        let desired = from_translation(Vector3::new(0.0, 0.0, 0.1));
        let frame_to_target = pose([0.0, 0.0, 0.0], [0.0, 0.0, 0.1]);

        let x_tm_goal = compute_target_offset(&mount, &x_0_bracket, &x_0_slot, &desired, &frame_to_target);
        let x_0_goal = mount_pose(&mount, &x_0_bracket) * x_tm_goal;
        assert_iso_eq(&x_0_goal, &(x_0_slot * frame_to_target * desired));
    }

    #[test]
    fn test_servo_error_zero_at_goal() {
        let camera = pose([0.0, 0.0, 2.0], [std::f64::consts::PI, 0.0, 0.0]);
        let target_mount = MarkerMount::world_fixed("env", pose([1.0, 0.0, 0.0], [0.0, 0.0, 0.0]));
        let robot_mount = MarkerMount::new("robot", "tool", pose([0.0, 0.0, 0.02], [0.0, 0.0, 0.0]));
        let desired = from_translation(Vector3::new(0.0, 0.0, 0.1));
        let identity = Transform::identity();

        let x_0_goal = mount_pose(&target_mount, &identity) * desired;
        // robot tool exactly on the goal
        let x_0_tool = x_0_goal;

        let x_tm_goal = compute_target_offset(&target_mount, &identity, &x_0_goal, &identity, &identity);
        let x_rm_tool = resolve_frame_offset(&robot_mount, &x_0_tool, &x_0_tool);
        let x_cam_tm = camera.inverse() * mount_pose(&target_mount, &identity);
        let x_cam_rm = camera.inverse() * mount_pose(&robot_mount, &x_0_tool);

        let error = servo_error(&x_cam_tm, &x_tm_goal, &x_cam_rm, &x_rm_tool);
        assert_iso_eq(&error, &identity);
    }

    #[test]
    fn test_servo_error_reports_displacement_in_goal_frame() {
        let identity = Transform::identity();
        let x_tm_goal = identity;
        let x_rm_frame = identity;
        let x_cam_tm = pose([0.0, 0.0, 1.0], [0.0, 0.0, std::f64::consts::FRAC_PI_2]);
        let x_cam_rm = x_cam_tm * from_translation(Vector3::new(0.03, 0.0, 0.0));
        let error = servo_error(&x_cam_tm, &x_tm_goal, &x_cam_rm, &x_rm_frame);
        assert_relative_eq!(error.translation.vector, Vector3::new(0.03, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_approach_basis() {
        let mount = MarkerMount::new("env", "bracket", Transform::identity());
        let x_0_bracket = from_translation(Vector3::new(1.0, 0.0, 0.0));
        let observed = from_translation(Vector3::new(1.02, 0.0, 0.0));
        let offset = from_translation(Vector3::new(0.0, 0.0, 0.2));
        let identity = Transform::identity();

        let by_frame = approach_target(ApproachBasis::Frame, &mount, &x_0_bracket, &x_0_bracket, &observed, &identity, &offset);
        let by_marker = approach_target(ApproachBasis::Marker, &mount, &x_0_bracket, &x_0_bracket, &observed, &identity, &offset);
        assert_relative_eq!(by_frame.translation.vector, Vector3::new(1.0, 0.0, 0.2), epsilon = 1e-12);
        assert_relative_eq!(by_marker.translation.vector, Vector3::new(1.02, 0.0, 0.2), epsilon = 1e-12);
    }

    #[test]
    fn test_look_at_midpoint() {
        let a = from_translation(Vector3::new(0.0, 0.0, 0.0));
        let b = from_translation(Vector3::new(1.0, 2.0, 0.0));
        assert_relative_eq!(look_at_point(&a, &b), Vector3::new(0.5, 1.0, 0.0));
    }
}
