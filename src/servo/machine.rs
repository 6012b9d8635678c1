//! Approach + visual servoing state.
//!
//! Sequence:
//!
//! ```text
//! Approaching ─▶ AwaitingEnable ─▶ Servoing ─▶ Converged
//!      │                            ▲    │
//!      │                 re-acquire │    │ occlusion
//!      │                            │    ▼
//!      │                      AwaitingReacquire
//!      └─▶ Converged (servoing disabled)
//!
//! Servoing | AwaitingReacquire ─Pause─▶ Paused ─Resume─▶ Servoing
//! ```
//!
//! `Failed` is entered at start when no vision feed is available.
//!
//! The approach drives the robot frame along a trajectory to a goal computed
//! once at start. Servoing then corrects the residual error from the two
//! marker observations every tick, under a bounded-speed constraint that is
//! zero whenever servoing is not actively running.
//!
//! Every transition that waits on a condition (approach completion,
//! convergence, stiffness ramp) uses its own counter: incremented while the
//! condition holds, reset as soon as it does not.

use std::sync::Arc;

use nalgebra::{Point3, Vector3};

use super::registry::{APPROACH_VISUAL_SERVOING, State};
use super::state::{RunStatus, ServoCommand, ServoOutput, ServoPhase, ServoStatus};
use crate::config::{FeedMode, ServoConfig};
use crate::core::transform::describe;
use crate::core::{Transform, from_rpy, linear_norm};
use crate::error::{Result, VisionError};
use crate::host::{
    CompletionTracker, Controller, FrameProvider, LookAtSpec, PoseServoSpec, SpeedBound,
    TrajectorySpec, attachment_pose,
};
use crate::markers::MarkerMount;
use crate::offsets::{
    ApproachBasis, approach_target, compute_target_offset, look_at_point, mount_pose,
    resolve_frame_offset, servo_error,
};
use crate::subscriber::VisionSubscriber;

/// Kinematic quantities resolved once at start.
#[derive(Clone, Debug)]
struct Geometry {
    robot_mount: MarkerMount,
    target_mount: MarkerMount,
    /// Robot marker to controlled frame
    x_rm_frame: Transform,
    x_0_target_attachment: Transform,
    x_0_target_frame: Transform,
    /// Target frame to the frame the offsets are expressed in
    frame_offset: Transform,
}

impl Geometry {
    /// Servo goal relative to the target marker
    fn target_offset(&self, servo_offset: &Transform) -> Transform {
        compute_target_offset(
            &self.target_mount,
            &self.x_0_target_attachment,
            &self.x_0_target_frame,
            servo_offset,
            &self.frame_offset,
        )
    }
}

/// Solver tasks currently owned by the state.
#[derive(Clone, Copy, Debug, Default)]
struct ActiveTasks {
    trajectory: bool,
    servo: bool,
    speed_bound: bool,
    look_at: bool,
}

pub struct ApproachVisualServoing {
    config: ServoConfig,
    phase: ServoPhase,
    output: Option<ServoOutput>,
    subscriber: Option<Arc<VisionSubscriber>>,
    geometry: Option<Geometry>,

    stiffness: f64,
    max_stiffness: f64,
    desired_speed: f64,
    current_speed: f64,
    eval_threshold: f64,
    speed_threshold: f64,
    servo_offset: Transform,
    /// Last error set on the servo task
    error: Transform,

    approach_count: usize,
    converge_count: usize,
    stall_count: usize,
    was_visible: bool,
    completion: Option<CompletionTracker>,
    /// Look-at task prepared at start, added once the approach completes
    look_at: Option<LookAtSpec>,
    dumped: bool,
    tasks: ActiveTasks,
}

impl ApproachVisualServoing {
    pub fn new(config: ServoConfig) -> Self {
        let vs = &config.visual_servoing;
        Self {
            phase: ServoPhase::Approaching,
            output: None,
            subscriber: None,
            geometry: None,
            stiffness: vs.stiffness,
            max_stiffness: vs.max_stiffness,
            desired_speed: vs.max_speed,
            current_speed: 0.0,
            eval_threshold: vs.eval,
            speed_threshold: vs.speed,
            servo_offset: vs.offset.to_isometry(),
            error: Transform::identity(),
            approach_count: 0,
            converge_count: 0,
            stall_count: 0,
            was_visible: true,
            completion: None,
            look_at: None,
            dumped: false,
            tasks: ActiveTasks::default(),
            config,
        }
    }

    /// [`StateRegistry`](super::StateRegistry) constructor
    pub fn factory(config: &toml::Value) -> Result<Box<dyn State>> {
        Ok(Box::new(Self::new(ServoConfig::from_value(config)?)))
    }

    pub fn phase(&self) -> ServoPhase {
        self.phase
    }

    pub fn stiffness(&self) -> f64 {
        self.stiffness
    }

    pub fn status(&self) -> ServoStatus {
        let visible = |name: &str| {
            self.subscriber
                .as_ref()
                .is_some_and(|s| s.visible(name))
        };
        let robot = &self.config.robot.marker;
        let target = &self.config.target.marker;
        ServoStatus {
            phase: self.phase,
            label: self.phase.label(),
            markers: vec![
                (robot.clone(), visible(robot)),
                (target.clone(), visible(target)),
            ],
            error: self.error.translation.vector.norm(),
            stiffness: self.stiffness,
            max_stiffness: self.max_stiffness,
            actual_max_speed: self.current_speed,
            desired_max_speed: self.desired_speed,
            eval_threshold: self.eval_threshold,
            target_offset: self.servo_offset,
        }
    }

    fn set_phase(&mut self, phase: ServoPhase) {
        if self.phase != phase {
            tracing::info!("[{}] {} -> {}", APPROACH_VISUAL_SERVOING, self.phase, phase);
            self.phase = phase;
        }
    }

    fn fail_no_vision(&mut self, reason: &str) {
        tracing::error!("[{}] {}", APPROACH_VISUAL_SERVOING, reason);
        self.output = Some(ServoOutput::NoVision);
        self.set_phase(ServoPhase::Failed);
    }

    fn geometry(&self) -> Result<&Geometry> {
        self.geometry
            .as_ref()
            .ok_or_else(|| VisionError::Config("state not started".to_string()))
    }

    fn subscriber(&self) -> Result<&Arc<VisionSubscriber>> {
        self.subscriber
            .as_ref()
            .ok_or_else(|| VisionError::Config("no vision subscriber".to_string()))
    }

    // ------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------

    fn resolve_geometry(&self, frames: &dyn FrameProvider, subscriber: &VisionSubscriber) -> Result<Geometry> {
        let robot_marker = subscriber.lookup(&self.config.robot.marker).map_err(|_| {
            VisionError::Config(format!(
                "robot marker \"{}\" is not registered with the vision subscriber",
                self.config.robot.marker
            ))
        })?;
        let target_marker = subscriber.lookup(&self.config.target.marker).map_err(|_| {
            VisionError::Config(format!(
                "target marker \"{}\" is not registered with the vision subscriber",
                self.config.target.marker
            ))
        })?;
        let robot_mount = robot_marker.mount;
        let target_mount = target_marker.mount;

        let frame = |robot: &str, name: &str| {
            attachment_pose(frames, robot, name).map_err(|e| VisionError::Config(e.to_string()))
        };
        let x_0_robot_attachment = frame(&robot_mount.robot, &robot_mount.frame)?;
        let x_0_robot_frame = frame(&robot_mount.robot, &self.config.robot.frame)?;
        let x_0_target_attachment = frame(&target_mount.robot, &target_mount.frame)?;
        let x_0_target_frame = frame(&target_mount.robot, &self.config.target.frame)?;

        Ok(Geometry {
            x_rm_frame: resolve_frame_offset(&robot_mount, &x_0_robot_attachment, &x_0_robot_frame),
            robot_mount,
            target_mount,
            x_0_target_attachment,
            x_0_target_frame,
            frame_offset: self.config.target.frame_offset.to_isometry(),
        })
    }

    fn prepare_look_at(&mut self, frames: &dyn FrameProvider, geometry: &Geometry) {
        let Some(look_at) = self.config.look_at.clone() else {
            return;
        };
        let robot = look_at
            .robot
            .unwrap_or_else(|| frames.main_robot().to_string());
        self.look_at = Some(LookAtSpec {
            robot,
            body: look_at.body,
            body_vector: Vector3::from(look_at.body_vector),
            stiffness: look_at.stiffness,
            weight: look_at.weight,
            joints: look_at.joints,
            target: geometry.x_0_target_frame.translation.vector,
        });
    }

    fn start_approach(&mut self, ctl: &mut dyn Controller, geometry: &Geometry) -> Result<()> {
        let approach = &self.config.approach;
        if !approach.enabled {
            tracing::info!("[{}] Approach disabled", APPROACH_VISUAL_SERVOING);
            return Ok(());
        }

        let mut basis = ApproachBasis::from_use_marker(approach.use_marker);
        let mut x_0_marker_observed = mount_pose(&geometry.target_mount, &geometry.x_0_target_attachment);
        if basis == ApproachBasis::Marker {
            let subscriber = self.subscriber()?;
            let target = subscriber.lookup(&self.config.target.marker)?;
            if target.observed {
                x_0_marker_observed = target.pose_world;
            } else {
                tracing::warn!(
                    "[{}] Target marker \"{}\" never observed, approaching the kinematic target frame",
                    APPROACH_VISUAL_SERVOING,
                    self.config.target.marker
                );
                basis = ApproachBasis::Frame;
            }
        }

        let goal = approach_target(
            basis,
            &geometry.target_mount,
            &geometry.x_0_target_attachment,
            &geometry.x_0_target_frame,
            &x_0_marker_observed,
            &geometry.frame_offset,
            &approach.offset.to_isometry(),
        );
        let waypoints = approach
            .waypoints
            .iter()
            .map(|wp| (goal * Point3::from(*wp)).coords)
            .collect();
        let ori_waypoints = approach
            .ori_waypoints
            .iter()
            .map(|(t, rpy)| (*t, (goal * from_rpy(Vector3::from(*rpy))).rotation))
            .collect();

        tracing::info!(
            "[{}] Approach goal for {}: {} ({:?} basis, {:.2}s, completion {})",
            APPROACH_VISUAL_SERVOING,
            self.config.robot.frame,
            describe(&goal),
            basis,
            approach.duration,
            approach.completion.describe()
        );

        let spec = TrajectorySpec {
            robot: geometry.robot_mount.robot.clone(),
            frame: self.config.robot.frame.clone(),
            duration: approach.duration,
            stiffness: approach.stiffness,
            weight: approach.weight,
            target: goal,
            waypoints,
            ori_waypoints,
            paused: approach.paused,
        };
        let completion = CompletionTracker::new(approach.completion.clone(), ctl.dt());
        ctl.solver().add_trajectory(spec);
        self.tasks.trajectory = true;
        self.completion = Some(completion);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Approach
    // ------------------------------------------------------------------

    fn approach_step(&mut self, ctl: &mut dyn Controller) -> Result<()> {
        if self.config.approach.enabled {
            let status = ctl.solver().trajectory_status().unwrap_or_default();
            let done = self
                .completion
                .as_mut()
                .is_some_and(|c| c.completed(&status));
            if done {
                self.approach_count += 1;
            } else {
                self.approach_count = 0;
            }
            if self.approach_count < self.config.debounce_iterations {
                return Ok(());
            }
        }
        self.finish_approach(ctl)
    }

    fn finish_approach(&mut self, ctl: &mut dyn Controller) -> Result<()> {
        if self.tasks.trajectory {
            ctl.solver().remove_trajectory();
            self.tasks.trajectory = false;
        }
        tracing::info!("[{}] Approach completed", APPROACH_VISUAL_SERVOING);

        if let Some(spec) = self.look_at.clone() {
            ctl.solver().add_look_at(spec);
            self.tasks.look_at = true;
            self.update_look_at(ctl);
        }

        if !self.config.visual_servoing.enabled {
            self.output = Some(ServoOutput::Ok);
            self.set_phase(ServoPhase::Converged);
            return Ok(());
        }

        let geometry = self.geometry()?.clone();
        let vs = &self.config.visual_servoing;
        let manual = vs.manual_confirmation;
        let spec = PoseServoSpec {
            robot: geometry.robot_mount.robot.clone(),
            frame: self.config.robot.frame.clone(),
            stiffness: self.stiffness,
            weight: vs.weight,
            joints: vs.joints.clone(),
        };
        let solver = ctl.solver();
        solver.add_pose_servo(spec);
        solver.set_pose_servo_error(Transform::identity());
        self.tasks.servo = true;
        self.error = Transform::identity();
        self.apply_speed(ctl, 0.0);

        if manual {
            tracing::info!("[{}] Waiting for enable", APPROACH_VISUAL_SERVOING);
            self.set_phase(ServoPhase::AwaitingEnable);
            Ok(())
        } else {
            self.enable(ctl);
            self.servo_step(ctl)
        }
    }

    // ------------------------------------------------------------------
    // Servoing
    // ------------------------------------------------------------------

    fn apply_speed(&mut self, ctl: &mut dyn Controller, speed: f64) {
        let Some(geometry) = self.geometry.as_ref() else {
            return;
        };
        let bound = SpeedBound::from_linear(&geometry.robot_mount.robot, &self.config.robot.frame, speed);
        ctl.solver().set_speed_bound(bound);
        self.tasks.speed_bound = true;
        self.current_speed = speed;
    }

    fn zero_servo(&mut self, ctl: &mut dyn Controller) {
        if self.tasks.servo {
            ctl.solver().set_pose_servo_error(Transform::identity());
        }
        self.error = Transform::identity();
        self.apply_speed(ctl, 0.0);
    }

    fn enable(&mut self, ctl: &mut dyn Controller) {
        tracing::info!(
            "[{}] Visual servoing enabled (max speed {:.4} m/s)",
            APPROACH_VISUAL_SERVOING,
            self.desired_speed
        );
        self.set_phase(ServoPhase::Servoing);
        self.was_visible = true;
        self.converge_count = 0;
        self.stall_count = 0;
        self.apply_speed(ctl, self.desired_speed);
    }

    fn markers_visible(&self) -> bool {
        let Some(subscriber) = self.subscriber.as_ref() else {
            return false;
        };
        subscriber.store().all_visible(&[
            self.config.robot.marker.as_str(),
            self.config.target.marker.as_str(),
        ])
    }

    /// One closed-loop update: visibility, error, then convergence and
    /// stiffness ramp.
    fn servo_step(&mut self, ctl: &mut dyn Controller) -> Result<()> {
        self.update_look_at(ctl);
        if !self.markers_visible() {
            if self.was_visible {
                tracing::warn!(
                    "[{}] Markers lost, holding position until re-acquired",
                    APPROACH_VISUAL_SERVOING
                );
            }
            self.was_visible = false;
            self.converge_count = 0;
            self.stall_count = 0;
            self.zero_servo(ctl);
            self.set_phase(ServoPhase::AwaitingReacquire);
            return Ok(());
        }

        if !self.was_visible {
            tracing::info!("[{}] Markers acquired", APPROACH_VISUAL_SERVOING);
            self.apply_speed(ctl, self.desired_speed);
            self.was_visible = true;
        }

        let error = self.compute_error()?;
        self.error = error;
        ctl.solver().set_pose_servo_error(error);

        let eval = error.translation.vector.norm();
        let speed = ctl
            .solver()
            .pose_servo_status()
            .map(|s| linear_norm(&s.speed))
            .unwrap_or(0.0);

        if eval < self.eval_threshold && speed < self.speed_threshold {
            self.converge_count += 1;
        } else {
            self.converge_count = 0;
        }
        if self.converge_count >= self.config.debounce_iterations {
            return self.converge(ctl, eval, speed);
        }

        if speed < self.speed_threshold {
            self.stall_count += 1;
        } else {
            self.stall_count = 0;
        }
        if self.stall_count >= self.config.stiffness_ramp_iterations {
            self.stall_count = 0;
            let ramped = (2.0 * self.stiffness).min(self.max_stiffness);
            if ramped > self.stiffness {
                tracing::info!(
                    "[{}] Stalled at {:.4} m, stiffness {:.2} -> {:.2}",
                    APPROACH_VISUAL_SERVOING,
                    eval,
                    self.stiffness,
                    ramped
                );
                self.stiffness = ramped;
                ctl.solver().set_pose_servo_stiffness(ramped);
            }
        }
        Ok(())
    }

    fn compute_error(&mut self) -> Result<Transform> {
        let geometry = self.geometry()?;
        let subscriber = self.subscriber()?;
        let x_camera_tm = subscriber.camera_relative_pose(&self.config.target.marker)?;
        let x_camera_rm = subscriber.camera_relative_pose(&self.config.robot.marker)?;
        let x_tm_goal = geometry.target_offset(&self.servo_offset);
        let error = servo_error(&x_camera_tm, &x_tm_goal, &x_camera_rm, &geometry.x_rm_frame);

        if !self.dumped {
            tracing::debug!("[{}] First error chain:", APPROACH_VISUAL_SERVOING);
            tracing::debug!("  camera -> target marker: {}", describe(&x_camera_tm));
            tracing::debug!("  target marker -> goal:   {}", describe(&x_tm_goal));
            tracing::debug!("  camera -> robot marker:  {}", describe(&x_camera_rm));
            tracing::debug!("  robot marker -> frame:   {}", describe(&geometry.x_rm_frame));
            tracing::debug!("  error (frame in goal):   {}", describe(&error));
            self.dumped = true;
        }
        Ok(error)
    }

    fn update_look_at(&mut self, ctl: &mut dyn Controller) {
        if !self.tasks.look_at {
            return;
        }
        let Some(geometry) = self.geometry.as_ref() else {
            return;
        };
        let frames = ctl.frames();
        let target = attachment_pose(frames, &geometry.target_mount.robot, &geometry.target_mount.frame);
        let robot = attachment_pose(frames, &geometry.robot_mount.robot, &geometry.robot_mount.frame);
        match (target, robot) {
            (Ok(x_0_ta), Ok(x_0_ra)) => {
                let point = look_at_point(
                    &mount_pose(&geometry.target_mount, &x_0_ta),
                    &mount_pose(&geometry.robot_mount, &x_0_ra),
                );
                ctl.solver().set_look_at_target(point);
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::trace!("[{}] Look-at target not updated: {}", APPROACH_VISUAL_SERVOING, e);
            }
        }
    }

    fn converge(&mut self, ctl: &mut dyn Controller, eval: f64, speed: f64) -> Result<()> {
        tracing::info!(
            "[{}] Converged: error {:.4} m < {:.4}, speed {:.4} m/s < {:.4}",
            APPROACH_VISUAL_SERVOING,
            eval,
            self.eval_threshold,
            speed,
            self.speed_threshold
        );
        if self.tasks.servo {
            ctl.solver().remove_pose_servo();
            self.tasks.servo = false;
        }
        self.apply_speed(ctl, 0.0);
        self.output = Some(ServoOutput::Ok);
        self.set_phase(ServoPhase::Converged);
        Ok(())
    }

    fn reacquire_step(&mut self, ctl: &mut dyn Controller) -> Result<()> {
        if self.markers_visible() {
            self.set_phase(ServoPhase::Servoing);
            return self.servo_step(ctl);
        }
        self.update_look_at(ctl);
        Ok(())
    }

    fn completion(&self) -> RunStatus {
        match self.output {
            Some(output) if self.phase.is_terminal() => RunStatus::Completed(output),
            _ => RunStatus::Running,
        }
    }
}

impl State for ApproachVisualServoing {
    fn name(&self) -> &str {
        APPROACH_VISUAL_SERVOING
    }

    fn start(&mut self, ctl: &mut dyn Controller) -> Result<()> {
        let subscriber = match VisionSubscriber::find(ctl.datastore()) {
            Some(s) => s,
            None => {
                self.fail_no_vision("No vision subscriber in the datastore, is the vision plugin installed?");
                return Ok(());
            }
        };
        if subscriber.mode() == FeedMode::None {
            self.fail_no_vision("Vision subscriber has no feed (mode = none)");
            return Ok(());
        }

        let geometry = self.resolve_geometry(ctl.frames(), &subscriber)?;
        tracing::debug!(
            "[{}] robot marker -> {}: {}",
            APPROACH_VISUAL_SERVOING,
            self.config.robot.frame,
            describe(&geometry.x_rm_frame)
        );
        tracing::debug!(
            "[{}] target marker -> goal: {}",
            APPROACH_VISUAL_SERVOING,
            describe(&geometry.target_offset(&self.servo_offset))
        );

        self.subscriber = Some(subscriber);
        self.geometry = Some(geometry.clone());
        self.prepare_look_at(ctl.frames(), &geometry);
        self.start_approach(ctl, &geometry)?;
        self.set_phase(ServoPhase::Approaching);
        Ok(())
    }

    fn run(&mut self, ctl: &mut dyn Controller) -> Result<RunStatus> {
        match self.phase {
            ServoPhase::Approaching => self.approach_step(ctl)?,
            ServoPhase::Servoing => self.servo_step(ctl)?,
            ServoPhase::AwaitingReacquire => self.reacquire_step(ctl)?,
            ServoPhase::AwaitingEnable
            | ServoPhase::Paused
            | ServoPhase::Converged
            | ServoPhase::Failed => {}
        }
        Ok(self.completion())
    }

    fn teardown(&mut self, ctl: &mut dyn Controller) {
        let solver = ctl.solver();
        if self.tasks.trajectory {
            solver.remove_trajectory();
        }
        if self.tasks.servo {
            solver.remove_pose_servo();
        }
        if self.tasks.look_at {
            solver.remove_look_at();
        }
        if self.tasks.speed_bound {
            if let Some(geometry) = self.geometry.as_ref() {
                solver.remove_speed_bound(&geometry.robot_mount.robot, &self.config.robot.frame);
            }
        }
        self.tasks = ActiveTasks::default();
        self.current_speed = 0.0;
    }

    fn status_line(&self) -> Option<String> {
        Some(format!("[{}] {}", self.config.category.join("/"), self.status()))
    }

    fn handle_command(&mut self, command: ServoCommand, ctl: &mut dyn Controller) -> Result<()> {
        match command {
            ServoCommand::Enable => {
                if self.phase == ServoPhase::AwaitingEnable {
                    self.enable(ctl);
                } else {
                    tracing::warn!("[{}] Enable ignored in {}", APPROACH_VISUAL_SERVOING, self.phase);
                }
            }
            ServoCommand::Pause => {
                if matches!(self.phase, ServoPhase::Servoing | ServoPhase::AwaitingReacquire) {
                    self.zero_servo(ctl);
                    self.converge_count = 0;
                    self.set_phase(ServoPhase::Paused);
                } else {
                    tracing::warn!("[{}] Pause ignored in {}", APPROACH_VISUAL_SERVOING, self.phase);
                }
            }
            ServoCommand::Resume => {
                if self.phase == ServoPhase::Paused {
                    self.was_visible = false;
                    self.stall_count = 0;
                    self.set_phase(ServoPhase::Servoing);
                } else {
                    tracing::warn!("[{}] Resume ignored in {}", APPROACH_VISUAL_SERVOING, self.phase);
                }
            }
            ServoCommand::SetMaxSpeed(speed) => {
                non_negative("max speed", speed)?;
                self.desired_speed = speed;
                if self.phase == ServoPhase::Servoing && self.was_visible {
                    self.apply_speed(ctl, speed);
                }
            }
            ServoCommand::SetMaxStiffness(max) => {
                non_negative("max stiffness", max)?;
                self.max_stiffness = max;
                if self.stiffness > max {
                    self.stiffness = max;
                    if self.tasks.servo {
                        ctl.solver().set_pose_servo_stiffness(max);
                    }
                }
            }
            ServoCommand::SetEvalThreshold(eval) => {
                non_negative("eval threshold", eval)?;
                self.eval_threshold = eval;
            }
            ServoCommand::SetTargetOffset(offset) => {
                tracing::info!("[{}] Target offset: {}", APPROACH_VISUAL_SERVOING, describe(&offset));
                self.servo_offset = offset;
            }
        }
        Ok(())
    }
}

fn non_negative(what: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(VisionError::Config(format!("{} must be non-negative, got {}", what, value)))
    }
}
