//! Interfaces to the host robot controller.
//!
//! The host owns kinematics, the task solver and the shared datastore. This
//! crate only talks to them through the traits defined here:
//!
//! - [`FrameProvider`]: live world poses of named robot frames
//! - [`Solver`]: trajectory, pose-servo, look-at tasks and speed bounds
//! - [`Datastore`]: typed named-object registry for handoff between components
//! - [`Logger`]: named pose sources sampled by the host's data logger
//! - [`Controller`]: what a state sees of the host during one tick

mod completion;
mod datastore;
mod frames;
mod logger;
mod solver;

pub use completion::{CompletionCriteria, CompletionTracker};
pub use datastore::Datastore;
pub use frames::{FrameProvider, StaticFrames, attachment_pose};
pub use logger::{LogTable, Logger, TransformSource};
pub use solver::{LookAtSpec, PoseServoSpec, Solver, SpeedBound, TaskStatus, TrajectorySpec};

/// Host view handed to states on every lifecycle call.
pub trait Controller {
    fn frames(&self) -> &dyn FrameProvider;
    fn solver(&mut self) -> &mut dyn Solver;
    fn datastore(&self) -> &Datastore;

    /// Control period (seconds)
    fn dt(&self) -> f64;
}
