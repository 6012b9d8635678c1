//! Configuration loading for DrishtiServo
//!
//! Two sections are consumed by the library:
//! - [`VisionConfig`]: which markers to track and where observations come from
//! - [`ServoConfig`]: the approach + visual servoing state
//!
//! ```toml
//! [vision]
//! mode = "simulation"
//! rate_hz = 30.0
//! visibility_timeout = 0.5
//! camera = { translation = [0.0, 0.0, 1.5], rpy = [3.1416, 0.0, 0.0] }
//!
//! [vision.markers.gripper]
//! frame = "gripper"
//! offset = { translation = [0.0, 0.0, 0.05] }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::core::TransformConfig;
use crate::error::{Result, VisionError};
use crate::host::CompletionCriteria;

/// Where marker observations come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    /// Subscribe to an external channel carrying observation batches
    Live,
    /// Generate observations from the robot kinematics
    Simulation,
    /// No observation source
    #[default]
    None,
}

/// Vision (marker tracking) configuration
#[derive(Clone, Debug, Deserialize)]
pub struct VisionConfig {
    #[serde(default)]
    pub mode: FeedMode,

    /// Channel name for the live feed, a `host:port` endpoint
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Simulated feed rate in Hz (default: 30)
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,

    /// Silence period after which a marker is reported not visible (seconds)
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout: f64,

    /// Camera pose in world frame
    #[serde(default)]
    pub camera: TransformConfig,

    /// Capacity of the observation queue between feed and store
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Markers of interest, by name
    #[serde(default)]
    pub markers: BTreeMap<String, MarkerConfig>,
}

/// Declared mount of a tracked marker
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MarkerConfig {
    /// Robot owning the attachment frame (default: the main robot)
    #[serde(default)]
    pub robot: Option<String>,

    /// Attachment frame; empty means world-fixed
    #[serde(default)]
    pub frame: String,

    /// Attachment frame to marker mount
    #[serde(default)]
    pub offset: TransformConfig,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            mode: FeedMode::None,
            channel: default_channel(),
            rate_hz: default_rate_hz(),
            visibility_timeout: default_visibility_timeout(),
            camera: TransformConfig::default(),
            queue_capacity: default_queue_capacity(),
            markers: BTreeMap::new(),
        }
    }
}

/// Approach + visual servoing state configuration
#[derive(Clone, Debug, Deserialize)]
pub struct ServoConfig {
    /// Observability category for status and commands
    #[serde(default = "default_category")]
    pub category: Vec<String>,

    pub robot: EndpointConfig,
    pub target: EndpointConfig,

    #[serde(default)]
    pub approach: ApproachConfig,

    #[serde(default)]
    pub visual_servoing: VisualServoingConfig,

    #[serde(default)]
    pub look_at: Option<LookAtConfig>,

    /// Consecutive ticks a condition must hold before acting on it
    #[serde(default = "default_debounce_iterations")]
    pub debounce_iterations: usize,

    /// Consecutive stalled ticks before the task stiffness is doubled
    #[serde(default = "default_stiffness_ramp_iterations")]
    pub stiffness_ramp_iterations: usize,
}

/// Marker + semantic frame pair for one side of the servoing problem
#[derive(Clone, Debug, Deserialize)]
pub struct EndpointConfig {
    pub marker: String,
    pub frame: String,
    /// Only meaningful on the target side: offset applied to the target frame
    #[serde(default)]
    pub frame_offset: TransformConfig,
}

/// Approach trajectory configuration
#[derive(Clone, Debug, Deserialize)]
pub struct ApproachConfig {
    #[serde(default = "default_true", rename = "use")]
    pub enabled: bool,

    /// Compute the approach goal from the observed target marker instead of
    /// the target robot kinematics
    #[serde(default)]
    pub use_marker: bool,

    /// Offset of the approach goal with respect to the target frame
    #[serde(default)]
    pub offset: TransformConfig,

    /// Translation control points, relative to the approach goal
    #[serde(default)]
    pub waypoints: Vec<[f64; 3]>,

    /// Orientation waypoints `(time, rpy)`, relative to the approach goal
    #[serde(default)]
    pub ori_waypoints: Vec<(f64, [f64; 3])>,

    #[serde(default = "default_approach_duration")]
    pub duration: f64,

    #[serde(default = "default_approach_stiffness")]
    pub stiffness: f64,

    #[serde(default = "default_approach_weight")]
    pub weight: f64,

    /// Start the trajectory paused
    #[serde(default)]
    pub paused: bool,

    #[serde(default)]
    pub completion: CompletionCriteria,
}

impl Default for ApproachConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_marker: false,
            offset: TransformConfig::default(),
            waypoints: Vec::new(),
            ori_waypoints: Vec::new(),
            duration: default_approach_duration(),
            stiffness: default_approach_stiffness(),
            weight: default_approach_weight(),
            paused: false,
            completion: CompletionCriteria::default(),
        }
    }
}

/// Closed-loop pose correction configuration
#[derive(Clone, Debug, Deserialize)]
pub struct VisualServoingConfig {
    #[serde(default = "default_true", rename = "use")]
    pub enabled: bool,

    /// Final offset of the robot frame with respect to the target frame
    #[serde(default)]
    pub offset: TransformConfig,

    #[serde(default = "default_servo_stiffness")]
    pub stiffness: f64,

    #[serde(default = "default_servo_stiffness")]
    pub max_stiffness: f64,

    #[serde(default = "default_servo_weight")]
    pub weight: f64,

    #[serde(default)]
    pub joints: Option<Vec<String>>,

    /// Wait for an explicit enable command after the approach
    #[serde(default = "default_true")]
    pub manual_confirmation: bool,

    /// Convergence threshold on the translational error (m)
    #[serde(default = "default_eval_threshold")]
    pub eval: f64,

    /// Convergence threshold on the translational speed (m/s)
    #[serde(default = "default_speed_threshold")]
    pub speed: f64,

    /// Desired max end-effector speed while servoing (m/s)
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
}

impl Default for VisualServoingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            offset: TransformConfig::default(),
            stiffness: default_servo_stiffness(),
            max_stiffness: default_servo_stiffness(),
            weight: default_servo_weight(),
            joints: None,
            manual_confirmation: true,
            eval: default_eval_threshold(),
            speed: default_speed_threshold(),
            max_speed: default_max_speed(),
        }
    }
}

/// Look-at task keeping the camera pointed at the work area
#[derive(Clone, Debug, Deserialize)]
pub struct LookAtConfig {
    #[serde(default)]
    pub robot: Option<String>,
    pub body: String,
    pub body_vector: [f64; 3],
    #[serde(default = "default_look_at_stiffness")]
    pub stiffness: f64,
    #[serde(default = "default_look_at_weight")]
    pub weight: f64,
    #[serde(default)]
    pub joints: Option<Vec<String>>,
}

impl ServoConfig {
    /// Parse from a TOML table (state configuration section)
    pub fn from_value(value: &toml::Value) -> Result<Self> {
        let config: ServoConfig = value.clone().try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot be acted on
    pub fn validate(&self) -> Result<()> {
        if self.robot.marker.is_empty() || self.target.marker.is_empty() {
            return Err(VisionError::Config(
                "robot.marker and target.marker must be set".to_string(),
            ));
        }
        if self.debounce_iterations == 0 {
            return Err(VisionError::Config(
                "debounce_iterations must be at least 1".to_string(),
            ));
        }
        if self.stiffness_ramp_iterations == 0 {
            return Err(VisionError::Config(
                "stiffness_ramp_iterations must be at least 1".to_string(),
            ));
        }
        let vs = &self.visual_servoing;
        if vs.eval < 0.0 || vs.speed < 0.0 || vs.max_speed < 0.0 {
            return Err(VisionError::Config(
                "visual_servoing thresholds and max_speed must be non-negative".to_string(),
            ));
        }
        if vs.max_stiffness < vs.stiffness {
            return Err(VisionError::Config(format!(
                "visual_servoing.max_stiffness ({}) is below stiffness ({})",
                vs.max_stiffness, vs.stiffness
            )));
        }
        if self.approach.enabled && self.approach.duration <= 0.0 {
            return Err(VisionError::Config(
                "approach.duration must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl VisionConfig {
    /// Load the `[vision]` section from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        #[derive(Deserialize)]
        struct Wrapper {
            vision: VisionConfig,
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| VisionError::Config(format!("Failed to read config file: {}", e)))?;
        let wrapper: Wrapper = toml::from_str(&content)?;
        Ok(wrapper.vision)
    }
}

// Default value functions
fn default_channel() -> String {
    "127.0.0.1:7700".to_string()
}
fn default_rate_hz() -> f64 {
    30.0
}
fn default_visibility_timeout() -> f64 {
    0.5
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_category() -> Vec<String> {
    vec!["ApproachVisualServoing".to_string()]
}
fn default_true() -> bool {
    true
}
fn default_debounce_iterations() -> usize {
    10
}
fn default_stiffness_ramp_iterations() -> usize {
    100
}

// Approach defaults
fn default_approach_duration() -> f64 {
    5.0
}
fn default_approach_stiffness() -> f64 {
    10.0
}
fn default_approach_weight() -> f64 {
    1000.0
}

// Visual servoing defaults
fn default_servo_stiffness() -> f64 {
    2.0
}
fn default_servo_weight() -> f64 {
    500.0
}
fn default_eval_threshold() -> f64 {
    0.02
}
fn default_speed_threshold() -> f64 {
    0.02
}
fn default_max_speed() -> f64 {
    0.01
}

// Look-at defaults
fn default_look_at_stiffness() -> f64 {
    2.0
}
fn default_look_at_weight() -> f64 {
    100.0
}
