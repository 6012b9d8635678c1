//! Kinematic host simulation.
//!
//! Stands in for a robot controller in the demo binary and integration tests:
//! the controlled frame is a free-floating body in a [`StaticFrames`] table.
//!
//! - Trajectory task: the frame follows the path by interpolation over the
//!   configured duration (smoothstep time scaling).
//! - Pose-servo task: each step moves the frame by `min(stiffness·dt, 1)` of
//!   the remaining error, clamped by the bounded-speed constraint.

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::{UnitQuaternion, Vector3};

use crate::core::{Transform, interpolate, to_motion_vector};
use crate::host::{
    Controller, Datastore, FrameProvider, LookAtSpec, PoseServoSpec, Solver, SpeedBound,
    StaticFrames, TaskStatus, TrajectorySpec,
};

#[derive(Debug)]
struct TrajectoryRun {
    spec: TrajectorySpec,
    start: Transform,
    elapsed: f64,
    status: TaskStatus,
}

impl TrajectoryRun {
    fn pose_at(&self, elapsed: f64) -> Transform {
        let duration = self.spec.duration.max(f64::EPSILON);
        let u = (elapsed / duration).clamp(0.0, 1.0);
        let s = u * u * (3.0 - 2.0 * u);

        // Piecewise-linear position through the waypoints
        let mut points: Vec<Vector3<f64>> = Vec::with_capacity(self.spec.waypoints.len() + 2);
        points.push(self.start.translation.vector);
        points.extend(self.spec.waypoints.iter().copied());
        points.push(self.spec.target.translation.vector);
        let segments = (points.len() - 1) as f64;
        let x = s * segments;
        let i = (x.floor() as usize).min(points.len() - 2);
        let position = points[i].lerp(&points[i + 1], x - i as f64);

        // Orientation keyframes in time
        let mut keys: Vec<(f64, UnitQuaternion<f64>)> = Vec::with_capacity(self.spec.ori_waypoints.len() + 2);
        keys.push((0.0, self.start.rotation));
        keys.extend(
            self.spec
                .ori_waypoints
                .iter()
                .filter(|(t, _)| *t > 0.0 && *t < duration)
                .copied(),
        );
        keys.push((duration, self.spec.target.rotation));
        keys.sort_by(|a, b| a.0.total_cmp(&b.0));
        let t = s * duration;
        let j = keys
            .windows(2)
            .position(|w| t <= w[1].0)
            .unwrap_or(keys.len() - 2);
        let (t0, q0) = keys[j];
        let (t1, q1) = keys[j + 1];
        let span = (t1 - t0).max(f64::EPSILON);
        let rotation = q0
            .try_slerp(&q1, ((t - t0) / span).clamp(0.0, 1.0), 1e-12)
            .unwrap_or(q1);

        Transform::from_parts(position.into(), rotation)
    }
}

#[derive(Debug)]
struct ServoRun {
    spec: PoseServoSpec,
    /// Controlled frame expressed in its goal
    error: Transform,
    status: TaskStatus,
}

/// Minimal task solver moving frames of a [`StaticFrames`] table.
#[derive(Debug)]
pub struct KinematicSim {
    frames: Arc<StaticFrames>,
    dt: f64,
    trajectory: Option<TrajectoryRun>,
    servo: Option<ServoRun>,
    bounds: HashMap<(String, String), SpeedBound>,
    look_at: Option<LookAtSpec>,
}

impl KinematicSim {
    pub fn new(frames: Arc<StaticFrames>, dt: f64) -> Self {
        Self {
            frames,
            dt,
            trajectory: None,
            servo: None,
            bounds: HashMap::new(),
            look_at: None,
        }
    }

    fn current_pose(&self, robot: &str, frame: &str) -> Transform {
        self.frames.frame_pose(robot, frame).unwrap_or_else(|| {
            tracing::warn!("[KinematicSim] Unknown frame {}/{}, starting at origin", robot, frame);
            Transform::identity()
        })
    }

    /// Limit a displacement to what the speed bound allows in one step.
    fn clamp(&self, robot: &str, frame: &str, step: Transform) -> Transform {
        let Some(bound) = self.bounds.get(&(robot.to_string(), frame.to_string())) else {
            return step;
        };
        let linear = step.translation.vector.norm();
        let angular = step.rotation.angle();
        let max_linear = bound.linear() * self.dt;
        let max_angular = bound.upper[0] * self.dt;

        let mut scale: f64 = 1.0;
        if linear > max_linear {
            scale = scale.min(max_linear / linear);
        }
        if angular > max_angular {
            scale = scale.min(max_angular / angular);
        }
        if scale < 1.0 {
            interpolate(&Transform::identity(), &step, scale)
        } else {
            step
        }
    }

    /// Advance every active task by one control period.
    pub fn step(&mut self) {
        let dt = self.dt;

        if let Some(run) = self.trajectory.as_mut() {
            if !run.spec.paused {
                run.elapsed = (run.elapsed + dt).min(run.spec.duration);
            }
            let pose = run.pose_at(run.elapsed);
            let previous = self
                .frames
                .frame_pose(&run.spec.robot, &run.spec.frame)
                .unwrap_or(pose);
            self.frames.set(&run.spec.robot, &run.spec.frame, pose);
            run.status = TaskStatus {
                eval: to_motion_vector(&(run.spec.target.inverse() * pose)),
                speed: to_motion_vector(&(previous.inverse() * pose)) / dt,
            };
        }

        if let Some((robot, frame, error, stiffness)) = self
            .servo
            .as_ref()
            .map(|s| (s.spec.robot.clone(), s.spec.frame.clone(), s.error, s.spec.stiffness))
        {
            let k = (stiffness * dt).clamp(0.0, 1.0);
            let step = interpolate(&Transform::identity(), &error.inverse(), k);
            let step = self.clamp(&robot, &frame, step);
            let current = self.current_pose(&robot, &frame);
            self.frames.set(&robot, &frame, current * step);
            if let Some(servo) = self.servo.as_mut() {
                servo.error = error * step;
                servo.status = TaskStatus {
                    eval: to_motion_vector(&servo.error),
                    speed: to_motion_vector(&step) / dt,
                };
            }
        }
    }

    pub fn frames(&self) -> &Arc<StaticFrames> {
        &self.frames
    }

    pub fn look_at(&self) -> Option<&LookAtSpec> {
        self.look_at.as_ref()
    }

    pub fn speed_bound(&self, robot: &str, frame: &str) -> Option<&SpeedBound> {
        self.bounds.get(&(robot.to_string(), frame.to_string()))
    }
}

impl Solver for KinematicSim {
    fn add_trajectory(&mut self, spec: TrajectorySpec) {
        let start = self.current_pose(&spec.robot, &spec.frame);
        tracing::debug!("[KinematicSim] Trajectory on {}/{} over {:.2}s", spec.robot, spec.frame, spec.duration);
        self.trajectory = Some(TrajectoryRun {
            spec,
            start,
            elapsed: 0.0,
            status: TaskStatus::zero(),
        });
    }

    fn remove_trajectory(&mut self) {
        self.trajectory = None;
    }

    fn trajectory_status(&self) -> Option<TaskStatus> {
        self.trajectory.as_ref().map(|t| t.status)
    }

    fn add_pose_servo(&mut self, spec: PoseServoSpec) {
        self.servo = Some(ServoRun {
            spec,
            error: Transform::identity(),
            status: TaskStatus::zero(),
        });
    }

    fn remove_pose_servo(&mut self) {
        self.servo = None;
    }

    fn set_pose_servo_error(&mut self, error: Transform) {
        if let Some(servo) = self.servo.as_mut() {
            servo.error = error;
        }
    }

    fn set_pose_servo_stiffness(&mut self, stiffness: f64) {
        if let Some(servo) = self.servo.as_mut() {
            servo.spec.stiffness = stiffness;
        }
    }

    fn pose_servo_stiffness(&self) -> Option<f64> {
        self.servo.as_ref().map(|s| s.spec.stiffness)
    }

    fn pose_servo_status(&self) -> Option<TaskStatus> {
        self.servo.as_ref().map(|s| s.status)
    }

    fn set_speed_bound(&mut self, bound: SpeedBound) {
        self.bounds
            .insert((bound.robot.clone(), bound.frame.clone()), bound);
    }

    fn remove_speed_bound(&mut self, robot: &str, frame: &str) {
        self.bounds.remove(&(robot.to_string(), frame.to_string()));
    }

    fn add_look_at(&mut self, spec: LookAtSpec) {
        self.look_at = Some(spec);
    }

    fn set_look_at_target(&mut self, target: Vector3<f64>) {
        if let Some(look_at) = self.look_at.as_mut() {
            look_at.target = target;
        }
    }

    fn remove_look_at(&mut self) {
        self.look_at = None;
    }
}

/// Controller view over a [`KinematicSim`].
pub struct SimHost {
    frames: Arc<StaticFrames>,
    sim: KinematicSim,
    datastore: Arc<Datastore>,
}

impl SimHost {
    pub fn new(frames: Arc<StaticFrames>, dt: f64) -> Self {
        Self {
            sim: KinematicSim::new(Arc::clone(&frames), dt),
            frames,
            datastore: Arc::new(Datastore::new()),
        }
    }

    /// Advance the simulated robot after the state has run.
    pub fn step(&mut self) {
        self.sim.step();
    }

    pub fn sim(&self) -> &KinematicSim {
        &self.sim
    }

    pub fn frame_table(&self) -> &Arc<StaticFrames> {
        &self.frames
    }

    pub fn shared_datastore(&self) -> &Arc<Datastore> {
        &self.datastore
    }
}

impl Controller for SimHost {
    fn frames(&self) -> &dyn FrameProvider {
        self.frames.as_ref()
    }

    fn solver(&mut self) -> &mut dyn Solver {
        &mut self.sim
    }

    fn datastore(&self) -> &Datastore {
        &self.datastore
    }

    fn dt(&self) -> f64 {
        self.sim.dt
    }
}
