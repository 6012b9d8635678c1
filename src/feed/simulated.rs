//! Simulated observation feed.
//!
//! Runs at a fixed rate and reports every registered marker where the robot
//! kinematics say it is, expressed in the camera frame:
//!
//! `x_camera_marker = x_world_camera⁻¹ · x_world_attachment · frame_offset`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::RwLock;

use super::PoseFeed;
use crate::core::Transform;
use crate::error::{Result, VisionError};
use crate::host::{FrameProvider, attachment_pose};
use crate::markers::{MarkerStore, Observation};
use crate::offsets::mount_pose;

/// Camera-relative poses of every registered marker whose attachment frame
/// resolves.
pub fn simulate_observations(
    frames: &dyn FrameProvider,
    store: &MarkerStore,
    camera: &Transform,
) -> Vec<Observation> {
    let x_camera_world = camera.inverse();
    store
        .mounts()
        .into_iter()
        .filter_map(|(name, mount)| {
            match attachment_pose(frames, &mount.robot, &mount.frame) {
                Ok(x_0_attachment) => {
                    let pose = x_camera_world * mount_pose(&mount, &x_0_attachment);
                    Some(Observation::new(name, pose))
                }
                Err(e) => {
                    tracing::trace!("[VisionFeed] Skipping simulated marker \"{}\": {}", name, e);
                    None
                }
            }
        })
        .collect()
}

/// Start the simulation thread.
pub fn start_simulated(
    frames: Arc<dyn FrameProvider>,
    store: Arc<MarkerStore>,
    camera: Arc<RwLock<Transform>>,
    rate_hz: f64,
    tx: Sender<Observation>,
) -> Result<PoseFeed> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return Err(VisionError::Config(format!(
            "simulation rate must be positive, got {}",
            rate_hz
        )));
    }
    let interval = Duration::from_secs_f64(1.0 / rate_hz);
    let shutdown = Arc::new(AtomicBool::new(false));
    let thread_shutdown = Arc::clone(&shutdown);

    let handle = thread::Builder::new()
        .name("vision-sim".to_string())
        .spawn(move || {
            tracing::info!("[VisionFeed] Simulation loop started: interval={:?}", interval);
            let mut dropped = 0u64;

            'outer: while !thread_shutdown.load(Ordering::Relaxed) {
                let loop_start = Instant::now();

                let camera_pose = *camera.read();
                for obs in simulate_observations(frames.as_ref(), &store, &camera_pose) {
                    if !super::forward(&tx, obs, &mut dropped) {
                        break 'outer;
                    }
                }

                let elapsed = loop_start.elapsed();
                if elapsed < interval {
                    thread::sleep(interval - elapsed);
                }
            }

            tracing::info!("[VisionFeed] Simulation loop terminated");
        })?;

    Ok(PoseFeed::simulation(shutdown, handle))
}
