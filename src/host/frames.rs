//! Access to named robot frames.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::core::Transform;
use crate::error::{Result, VisionError};

/// Live world poses of kinematic frames, addressed by `(robot, frame)`.
///
/// Implementations must be shareable with the simulated feed thread.
pub trait FrameProvider: Send + Sync {
    /// World pose of `frame` on `robot`, if that frame exists.
    fn frame_pose(&self, robot: &str, frame: &str) -> Option<Transform>;

    /// Name of the robot used when a configuration omits one.
    fn main_robot(&self) -> &str;
}

/// World pose of a frame, treating an empty frame name as the world itself.
pub fn attachment_pose(frames: &dyn FrameProvider, robot: &str, frame: &str) -> Result<Transform> {
    if frame.is_empty() {
        return Ok(Transform::identity());
    }
    frames
        .frame_pose(robot, frame)
        .ok_or_else(|| VisionError::NotFound(format!("frame {}/{}", robot, frame)))
}

/// Frame table with explicitly set poses.
///
/// Backs the demo simulation and tests. Poses can be moved at any time from
/// any thread.
#[derive(Debug)]
pub struct StaticFrames {
    main_robot: String,
    frames: RwLock<HashMap<(String, String), Transform>>,
}

impl StaticFrames {
    pub fn new(main_robot: impl Into<String>) -> Self {
        Self {
            main_robot: main_robot.into(),
            frames: RwLock::new(HashMap::new()),
        }
    }

    /// Set (or create) a frame pose.
    pub fn set(&self, robot: &str, frame: &str, pose: Transform) {
        self.frames
            .write()
            .insert((robot.to_string(), frame.to_string()), pose);
    }

    /// Builder-style variant of [`StaticFrames::set`].
    pub fn with(self, robot: &str, frame: &str, pose: Transform) -> Self {
        self.set(robot, frame, pose);
        self
    }
}

impl FrameProvider for StaticFrames {
    fn frame_pose(&self, robot: &str, frame: &str) -> Option<Transform> {
        self.frames
            .read()
            .get(&(robot.to_string(), frame.to_string()))
            .copied()
    }

    fn main_robot(&self) -> &str {
        &self.main_robot
    }
}
