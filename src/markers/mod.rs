//! Marker tracking: the pose store and its observation records.

mod store;

pub use store::{IngestOutcome, MarkerMount, MarkerStore, TrackedMarker};

use crate::core::Transform;

/// One camera-relative marker observation, as emitted by a pose feed.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub name: String,
    pub pose: Transform,
}

impl Observation {
    pub fn new(name: impl Into<String>, pose: Transform) -> Self {
        Self {
            name: name.into(),
            pose,
        }
    }
}
