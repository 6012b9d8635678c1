//! Lockstep harness around [`SimHost`] and [`VisionSubscriber`].

use std::collections::HashSet;
use std::sync::Arc;

use nalgebra::Vector3;

use drishti_servo::core::from_translation;
use drishti_servo::feed::simulated::simulate_observations;
use drishti_servo::{
    FeedMode, FrameProvider, RunStatus, ServoConfig, ServoOutput, SimHost, State, StaticFrames,
    Transform, TransformConfig, VisionConfig, VisionSubscriber,
};
use drishti_servo::config::MarkerConfig;

/// Control period used by every scenario
pub const DT: f64 = 0.01;

/// World layout and state configuration for one run.
#[derive(Clone)]
pub struct Scenario {
    /// Initial tool position
    pub tool: Vector3<f64>,
    /// Slot (target frame) position
    pub slot: Vector3<f64>,
    pub mode: FeedMode,
    pub approach: bool,
    pub approach_offset: [f64; 3],
    pub manual_confirmation: bool,
    pub max_speed: f64,
    pub eval: f64,
    pub visibility_timeout: f64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            tool: Vector3::new(0.3, 0.0, 0.5),
            slot: Vector3::new(0.6, 0.0, 0.2),
            // Live with an unusable channel: no feed thread, observations
            // are injected by the harness
            mode: FeedMode::Live,
            approach: true,
            approach_offset: [0.0, 0.0, 0.1],
            manual_confirmation: false,
            max_speed: 0.05,
            eval: 0.005,
            visibility_timeout: 0.2,
        }
    }
}

impl Scenario {
    pub fn vision_config(&self) -> VisionConfig {
        let mut config = VisionConfig {
            mode: self.mode,
            channel: "offline".to_string(),
            visibility_timeout: self.visibility_timeout,
            ..VisionConfig::default()
        };
        config.markers.insert(
            "gripper".to_string(),
            MarkerConfig {
                robot: None,
                frame: "tool".to_string(),
                offset: TransformConfig {
                    translation: [0.0, 0.0, 0.05],
                    rpy: [0.0, 0.0, 0.0],
                },
            },
        );
        config.markers.insert(
            "target".to_string(),
            MarkerConfig {
                robot: Some("env".to_string()),
                frame: "slot".to_string(),
                offset: TransformConfig::default(),
            },
        );
        config
    }

    pub fn servo_config(&self) -> ServoConfig {
        let [x, y, z] = self.approach_offset;
        let toml = format!(
            r#"
[robot]
marker = "gripper"
frame = "tool"

[target]
marker = "target"
frame = "slot"

[approach]
use = {approach}
offset = {{ translation = [{x:?}, {y:?}, {z:?}] }}
duration = 1.0

[visual_servoing]
manual_confirmation = {manual}
stiffness = 2.0
max_stiffness = 8.0
eval = {eval:?}
speed = 0.02
max_speed = {max_speed:?}
"#,
            approach = self.approach,
            manual = self.manual_confirmation,
            eval = self.eval,
            max_speed = self.max_speed,
        );
        let value: toml::Value = toml::from_str(&toml).expect("scenario servo config");
        ServoConfig::from_value(&value).expect("valid servo config")
    }
}

/// Host, subscriber and occlusion control for one scenario.
pub struct Harness {
    pub host: SimHost,
    pub subscriber: Arc<VisionSubscriber>,
    frames: Arc<StaticFrames>,
    camera: Transform,
    occluded: HashSet<String>,
    ticks: usize,
}

impl Harness {
    pub fn new(scenario: &Scenario) -> Self {
        let frames = Arc::new(
            StaticFrames::new("robot")
                .with("robot", "tool", from_translation(scenario.tool))
                .with("env", "slot", from_translation(scenario.slot)),
        );
        let host = SimHost::new(Arc::clone(&frames), DT);
        let provider: Arc<dyn FrameProvider> = Arc::clone(&frames) as Arc<dyn FrameProvider>;
        let subscriber =
            VisionSubscriber::install(&scenario.vision_config(), provider, host.shared_datastore())
                .expect("subscriber installs");
        let camera = subscriber.camera_pose();
        Self {
            host,
            subscriber,
            frames,
            camera,
            occluded: HashSet::new(),
            ticks: 0,
        }
    }

    pub fn tool(&self) -> Transform {
        self.frames.frame_pose("robot", "tool").expect("tool frame")
    }

    pub fn occlude(&mut self, marker: &str) {
        self.occluded.insert(marker.to_string());
    }

    pub fn reveal(&mut self, marker: &str) {
        self.occluded.remove(marker);
    }

    pub fn ticks(&self) -> usize {
        self.ticks
    }

    /// One control cycle: observe, subscriber tick, state run, robot step.
    pub fn tick(&mut self, state: &mut dyn State) -> RunStatus {
        if self.subscriber.mode() != FeedMode::None {
            let store = self.subscriber.store();
            for obs in simulate_observations(self.frames.as_ref(), store, &self.camera) {
                if !self.occluded.contains(&obs.name) {
                    store.ingest(&obs.name, obs.pose, &self.camera, store.now());
                }
            }
        }
        self.subscriber.tick(DT);
        let status = state.run(&mut self.host).expect("state run");
        self.host.step();
        self.ticks += 1;
        status
    }

    /// Tick until the state completes or `max_ticks` elapse.
    pub fn run_to_completion(&mut self, state: &mut dyn State, max_ticks: usize) -> Option<ServoOutput> {
        for _ in 0..max_ticks {
            if let RunStatus::Completed(output) = self.tick(state) {
                return Some(output);
            }
        }
        None
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.subscriber.uninstall();
    }
}
