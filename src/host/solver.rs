//! Task/constraint solver interface consumed by the servoing state.
//!
//! The solver owns the actual tasks; states only describe them and push
//! targets/errors. At most one task of each kind is active per solver, which
//! matches how the approach + servoing state uses them.

use nalgebra::Vector3;

use crate::core::{MotionVector, Transform};

/// Instantaneous status of a task, as reported by the solver after its last
/// iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TaskStatus {
    /// Task error `[angular; linear]`
    pub eval: MotionVector,
    /// Task speed `[angular; linear]`
    pub speed: MotionVector,
}

impl TaskStatus {
    pub fn zero() -> Self {
        Self {
            eval: MotionVector::zeros(),
            speed: MotionVector::zeros(),
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::zero()
    }
}

/// Spline trajectory task driving a frame to a world target.
#[derive(Clone, Debug, PartialEq)]
pub struct TrajectorySpec {
    pub robot: String,
    pub frame: String,
    pub duration: f64,
    pub stiffness: f64,
    pub weight: f64,
    /// Final world pose
    pub target: Transform,
    /// Intermediate world positions
    pub waypoints: Vec<Vector3<f64>>,
    /// Intermediate world orientations, `(time, rotation)`
    pub ori_waypoints: Vec<(f64, nalgebra::UnitQuaternion<f64>)>,
    pub paused: bool,
}

/// Position-based visual servoing task.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseServoSpec {
    pub robot: String,
    pub frame: String,
    pub stiffness: f64,
    pub weight: f64,
    pub joints: Option<Vec<String>>,
}

/// Orientation task aligning a body vector with a world point.
#[derive(Clone, Debug, PartialEq)]
pub struct LookAtSpec {
    pub robot: String,
    pub body: String,
    pub body_vector: Vector3<f64>,
    pub stiffness: f64,
    pub weight: f64,
    pub joints: Option<Vec<String>>,
    pub target: Vector3<f64>,
}

/// Symmetric velocity bound on a frame, `[angular; linear]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SpeedBound {
    pub robot: String,
    pub frame: String,
    pub upper: MotionVector,
}

impl SpeedBound {
    /// Bound for a linear speed limit; the angular limit is `π` times the
    /// linear one.
    pub fn from_linear(robot: &str, frame: &str, speed: f64) -> Self {
        let angular = std::f64::consts::PI * speed;
        Self {
            robot: robot.to_string(),
            frame: frame.to_string(),
            upper: MotionVector::new(angular, angular, angular, speed, speed, speed),
        }
    }

    pub fn lower(&self) -> MotionVector {
        -self.upper
    }

    /// Linear speed limit
    pub fn linear(&self) -> f64 {
        self.upper[3]
    }
}

/// Task/constraint solver operations required by the states.
pub trait Solver {
    fn add_trajectory(&mut self, spec: TrajectorySpec);
    fn remove_trajectory(&mut self);
    fn trajectory_status(&self) -> Option<TaskStatus>;

    fn add_pose_servo(&mut self, spec: PoseServoSpec);
    fn remove_pose_servo(&mut self);
    /// Set the error driving the servo task: the controlled frame expressed
    /// in its goal frame.
    fn set_pose_servo_error(&mut self, error: Transform);
    fn set_pose_servo_stiffness(&mut self, stiffness: f64);
    fn pose_servo_stiffness(&self) -> Option<f64>;
    fn pose_servo_status(&self) -> Option<TaskStatus>;

    /// Install (or replace) the speed bound on a frame.
    fn set_speed_bound(&mut self, bound: SpeedBound);
    fn remove_speed_bound(&mut self, robot: &str, frame: &str);

    fn add_look_at(&mut self, spec: LookAtSpec);
    fn set_look_at_target(&mut self, target: Vector3<f64>);
    fn remove_look_at(&mut self);
}
