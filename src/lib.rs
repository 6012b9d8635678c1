//! DrishtiServo - Fiducial marker tracking and visual servoing for robot controllers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     servo/                          │  ← State machine
//! │     (approach, servoing, convergence, registry)     │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │              subscriber / offsets                   │  ← Vision plumbing
//! │   (feed draining, datastore handoff, transforms)    │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                feed/  ·  markers/                   │  ← Observations
//! │      (live TCP, simulated, pose store + decay)      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                core/  ·  host/                      │  ← Foundation
//! │   (transforms, solver/frames/datastore interfaces)  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Data flow
//!
//! ```text
//! PoseFeed ──channel──▶ VisionSubscriber::tick ──▶ MarkerStore
//!                                                     │
//!                         offsets::servo_error ◀──────┘
//!                                 │
//!                  ApproachVisualServoing::run ──▶ Solver
//! ```
//!
//! The host calls [`VisionSubscriber::tick`] and then the active state's
//! [`State::run`] once per control cycle. Observations arrive asynchronously
//! and are only applied inside `tick`, so a state always sees a consistent
//! snapshot for the whole cycle.
//!
//! [`sim`] provides a kinematic host used by the `drishti-servo` binary and
//! the integration tests.

pub mod config;
pub mod core;
pub mod error;
pub mod feed;
pub mod host;
pub mod markers;
pub mod offsets;
pub mod servo;
pub mod sim;
pub mod subscriber;

pub use crate::config::{FeedMode, ServoConfig, VisionConfig};
pub use crate::core::{Transform, TransformConfig};
pub use crate::error::{Result, VisionError};
pub use crate::feed::FeedStatus;
pub use crate::host::{
    Controller, Datastore, FrameProvider, LogTable, Logger, Solver, StaticFrames,
};
pub use crate::markers::{MarkerMount, MarkerStore, Observation, TrackedMarker};
pub use crate::servo::{
    APPROACH_VISUAL_SERVOING, ApproachVisualServoing, RunStatus, ServoCommand, ServoOutput,
    ServoPhase, ServoStatus, State, StateRegistry,
};
pub use crate::sim::{KinematicSim, SimHost};
pub use crate::subscriber::{SUBSCRIBER_KEY, VisionSubscriber, marker_key};
