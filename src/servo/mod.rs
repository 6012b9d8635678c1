//! Approach + visual servoing state and the state registry.

mod machine;
mod registry;
mod state;

pub use machine::ApproachVisualServoing;
pub use registry::{APPROACH_VISUAL_SERVOING, State, StateFactory, StateRegistry};
pub use state::{RunStatus, ServoCommand, ServoOutput, ServoPhase, ServoStatus};
