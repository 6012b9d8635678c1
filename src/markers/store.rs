//! Per-marker pose state with time-based visibility decay.
//!
//! The store keeps its own clock, advanced by [`MarkerStore::tick`]. An
//! observation stamped at `t` keeps the marker visible until the clock passes
//! `t + visibility_timeout`. Only `tick` can clear visibility.
//!
//! All access goes through one lock; every operation copies a few fields in
//! or out and never blocks on anything else while holding it.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::core::Transform;
use crate::error::{Result, VisionError};

/// Where a marker is physically mounted.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerMount {
    /// Robot owning the attachment frame
    pub robot: String,
    /// Attachment frame; empty means world-fixed
    pub frame: String,
    /// Attachment frame to marker
    pub frame_offset: Transform,
}

impl MarkerMount {
    pub fn new(robot: impl Into<String>, frame: impl Into<String>, frame_offset: Transform) -> Self {
        Self {
            robot: robot.into(),
            frame: frame.into(),
            frame_offset,
        }
    }

    /// Marker fixed in the world at `pose`.
    pub fn world_fixed(robot: impl Into<String>, pose: Transform) -> Self {
        Self::new(robot, "", pose)
    }
}

/// Snapshot of one tracked marker.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedMarker {
    pub name: String,
    pub mount: MarkerMount,
    /// Latest camera-relative pose
    pub pose: Transform,
    /// Latest world pose
    pub pose_world: Transform,
    /// Store time of the latest accepted observation
    pub last_update: f64,
    pub visible: bool,
    /// Whether any observation was ever accepted
    pub observed: bool,
}

impl TrackedMarker {
    fn new(name: &str, mount: MarkerMount) -> Self {
        Self {
            name: name.to_string(),
            mount,
            pose: Transform::identity(),
            pose_world: Transform::identity(),
            last_update: 0.0,
            visible: false,
            observed: false,
        }
    }
}

/// What happened to an ingested observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stored; first observation of this marker
    First,
    /// Stored
    Updated,
    /// Marker name not registered
    Unregistered,
    /// Older than the last accepted observation
    Stale,
}

impl IngestOutcome {
    pub fn accepted(self) -> bool {
        matches!(self, IngestOutcome::First | IngestOutcome::Updated)
    }
}

#[derive(Debug)]
struct StoreInner {
    markers: HashMap<String, TrackedMarker>,
    now: f64,
}

/// Thread-safe marker table.
#[derive(Debug)]
pub struct MarkerStore {
    inner: Mutex<StoreInner>,
    visibility_timeout: f64,
}

impl MarkerStore {
    pub fn new(visibility_timeout: f64) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                markers: HashMap::new(),
                now: 0.0,
            }),
            visibility_timeout,
        }
    }

    pub fn visibility_timeout(&self) -> f64 {
        self.visibility_timeout
    }

    /// Declare a marker of interest.
    ///
    /// Registering the same mount twice is a no-op. Registering a different
    /// mount under an existing name replaces the mount and keeps the
    /// observation state.
    pub fn register_marker(&self, name: &str, mount: MarkerMount) {
        let mut inner = self.inner.lock();
        match inner.markers.get_mut(name) {
            Some(existing) if existing.mount == mount => {}
            Some(existing) => {
                tracing::warn!(
                    "[MarkerStore] Marker \"{}\" re-registered with a different mount ({}/{}), overwriting",
                    name,
                    mount.robot,
                    mount.frame
                );
                existing.mount = mount;
            }
            None => {
                tracing::debug!(
                    "[MarkerStore] Registered marker \"{}\" on {}/{}",
                    name,
                    mount.robot,
                    if mount.frame.is_empty() { "<world>" } else { mount.frame.as_str() }
                );
                inner
                    .markers
                    .insert(name.to_string(), TrackedMarker::new(name, mount));
            }
        }
    }

    /// Record a camera-relative observation taken at store time `timestamp`.
    pub fn ingest(
        &self,
        name: &str,
        camera_relative_pose: Transform,
        camera_pose: &Transform,
        timestamp: f64,
    ) -> IngestOutcome {
        let mut inner = self.inner.lock();
        let Some(marker) = inner.markers.get_mut(name) else {
            return IngestOutcome::Unregistered;
        };
        if marker.observed && timestamp < marker.last_update {
            return IngestOutcome::Stale;
        }
        let first = !marker.observed;
        marker.pose = camera_relative_pose;
        marker.pose_world = camera_pose * camera_relative_pose;
        marker.last_update = timestamp;
        marker.visible = true;
        marker.observed = true;
        if first {
            IngestOutcome::First
        } else {
            IngestOutcome::Updated
        }
    }

    /// Advance the clock by `dt` and expire silent markers.
    pub fn tick(&self, dt: f64) {
        let mut inner = self.inner.lock();
        inner.now += dt;
        let deadline = inner.now - self.visibility_timeout;
        for marker in inner.markers.values_mut() {
            if marker.visible && marker.last_update <= deadline {
                marker.visible = false;
            }
        }
    }

    /// Current store time.
    pub fn now(&self) -> f64 {
        self.inner.lock().now
    }

    /// Consistent snapshot of a registered marker.
    pub fn lookup(&self, name: &str) -> Result<TrackedMarker> {
        self.inner
            .lock()
            .markers
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    /// Whether the marker is registered and currently visible.
    pub fn visible(&self, name: &str) -> bool {
        self.inner
            .lock()
            .markers
            .get(name)
            .is_some_and(|m| m.visible)
    }

    /// Whether every named marker is registered and visible, read atomically.
    pub fn all_visible(&self, names: &[&str]) -> bool {
        let inner = self.inner.lock();
        names
            .iter()
            .all(|n| inner.markers.get(*n).is_some_and(|m| m.visible))
    }

    pub fn camera_relative_pose(&self, name: &str) -> Result<Transform> {
        self.inner
            .lock()
            .markers
            .get(name)
            .map(|m| m.pose)
            .ok_or_else(|| not_found(name))
    }

    pub fn world_pose(&self, name: &str) -> Result<Transform> {
        self.inner
            .lock()
            .markers
            .get(name)
            .map(|m| m.pose_world)
            .ok_or_else(|| not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().markers.contains_key(name)
    }

    /// Registered marker names and mounts, sorted by name.
    pub fn mounts(&self) -> Vec<(String, MarkerMount)> {
        let inner = self.inner.lock();
        let mut mounts: Vec<(String, MarkerMount)> = inner
            .markers
            .iter()
            .map(|(name, m)| (name.clone(), m.mount.clone()))
            .collect();
        mounts.sort_by(|a, b| a.0.cmp(&b.0));
        mounts
    }
}

fn not_found(name: &str) -> VisionError {
    VisionError::NotFound(format!("marker \"{}\"", name))
}
