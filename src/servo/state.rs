//! Phase, command and status types of the servoing state.

use crate::core::Transform;

/// Phase of the approach + visual servoing sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServoPhase {
    /// Trajectory task driving the robot frame toward the approach goal
    Approaching,
    /// Approach done, waiting for an explicit enable
    AwaitingEnable,
    /// Closed-loop correction from marker observations
    Servoing,
    /// Servoing with at least one marker occluded
    AwaitingReacquire,
    /// Servoing suspended by the operator
    Paused,
    /// Terminal: goal reached
    Converged,
    /// Terminal: no vision available
    Failed,
}

impl ServoPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ServoPhase::Converged | ServoPhase::Failed)
    }

    /// Operator-facing status label
    pub fn label(self) -> &'static str {
        match self {
            ServoPhase::Paused => "paused",
            ServoPhase::Approaching | ServoPhase::AwaitingEnable | ServoPhase::Failed => "not enabled",
            ServoPhase::Servoing | ServoPhase::AwaitingReacquire => "active",
            ServoPhase::Converged => "converged",
        }
    }
}

impl std::fmt::Display for ServoPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServoPhase::Approaching => "Approaching",
            ServoPhase::AwaitingEnable => "AwaitingEnable",
            ServoPhase::Servoing => "Servoing",
            ServoPhase::AwaitingReacquire => "AwaitingReacquire",
            ServoPhase::Paused => "Paused",
            ServoPhase::Converged => "Converged",
            ServoPhase::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Operator commands, applied between control ticks.
#[derive(Clone, Debug, PartialEq)]
pub enum ServoCommand {
    /// Start servoing after the approach (manual confirmation)
    Enable,
    Pause,
    Resume,
    /// Desired max end-effector speed (m/s)
    SetMaxSpeed(f64),
    SetMaxStiffness(f64),
    /// Convergence threshold on the translational error (m)
    SetEvalThreshold(f64),
    /// Final offset of the robot frame with respect to the target frame
    SetTargetOffset(Transform),
}

/// Outward completion signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServoOutput {
    Ok,
    NoVision,
}

impl ServoOutput {
    pub fn as_str(self) -> &'static str {
        match self {
            ServoOutput::Ok => "OK",
            ServoOutput::NoVision => "NoVision",
        }
    }
}

impl std::fmt::Display for ServoOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one `run` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed(ServoOutput),
}

impl RunStatus {
    pub fn is_completed(self) -> bool {
        matches!(self, RunStatus::Completed(_))
    }
}

/// Snapshot for status displays.
#[derive(Clone, Debug, PartialEq)]
pub struct ServoStatus {
    pub phase: ServoPhase,
    pub label: &'static str,
    /// `(marker name, visible)` for the robot then the target marker
    pub markers: Vec<(String, bool)>,
    /// Translational servo error norm (m)
    pub error: f64,
    pub stiffness: f64,
    pub max_stiffness: f64,
    /// Speed bound currently applied (m/s)
    pub actual_max_speed: f64,
    /// Speed bound applied while actively servoing (m/s)
    pub desired_max_speed: f64,
    pub eval_threshold: f64,
    pub target_offset: Transform,
}

impl ServoStatus {
    pub fn visibility_label(visible: bool) -> &'static str {
        if visible { "visible" } else { "not visible" }
    }
}

impl std::fmt::Display for ServoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label)?;
        for (name, visible) in &self.markers {
            write!(f, " | {}: {}", name, Self::visibility_label(*visible))?;
        }
        write!(
            f,
            " | error {:.4} m (< {:.4}) | stiffness {:.2}/{:.2} | max speed {:.4}/{:.4} m/s",
            self.error,
            self.eval_threshold,
            self.stiffness,
            self.max_stiffness,
            self.actual_max_speed,
            self.desired_max_speed
        )
    }
}
