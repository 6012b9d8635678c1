//! Vision subscriber: owns the marker store and its observation feed.
//!
//! Installed once per controller. States find it in the datastore under
//! [`SUBSCRIBER_KEY`]; every marker world pose is also published there as
//! `(pose, timestamp)` under [`marker_key`].
//!
//! With a [`Logger`] attached, every observed marker gets two log entries:
//! `VisionMarkers_<name>` (camera-relative) and `VisionMarkers_<name>_World`.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};

use crate::config::{FeedMode, VisionConfig};
use crate::core::Transform;
use crate::error::{Result, VisionError};
use crate::feed::{FeedStatus, PoseFeed, start_live, start_simulated};
use crate::host::{Datastore, FrameProvider, Logger};
use crate::markers::{IngestOutcome, MarkerMount, MarkerStore, Observation, TrackedMarker};

/// Datastore key of the shared subscriber handle
pub const SUBSCRIBER_KEY: &str = "VisionPlugin::Subscriber";

/// Datastore key of a marker's `(world pose, timestamp)` entry
pub fn marker_key(name: &str) -> String {
    format!("VisionPlugin::Marker::{}", name)
}

fn log_entry_names(name: &str) -> [String; 2] {
    [
        format!("VisionMarkers_{}", name),
        format!("VisionMarkers_{}_World", name),
    ]
}

pub struct VisionSubscriber {
    mode: FeedMode,
    channel: String,
    store: Arc<MarkerStore>,
    camera: Arc<RwLock<Transform>>,
    receiver: Receiver<Observation>,
    feed: Mutex<PoseFeed>,
    last_status: Mutex<FeedStatus>,
    datastore: Weak<Datastore>,
    logger: RwLock<Option<Arc<dyn Logger>>>,
}

impl VisionSubscriber {
    /// Build the store, register the configured markers and start the feed.
    pub fn new(
        config: &VisionConfig,
        frames: Arc<dyn FrameProvider>,
        datastore: &Arc<Datastore>,
    ) -> Result<Self> {
        if config.visibility_timeout <= 0.0 {
            return Err(VisionError::Config(format!(
                "visibility_timeout must be positive, got {}",
                config.visibility_timeout
            )));
        }
        let store = Arc::new(MarkerStore::new(config.visibility_timeout));
        for (name, marker) in &config.markers {
            let robot = marker
                .robot
                .clone()
                .unwrap_or_else(|| frames.main_robot().to_string());
            store.register_marker(
                name,
                MarkerMount::new(robot, marker.frame.clone(), marker.offset.to_isometry()),
            );
        }

        let camera = Arc::new(RwLock::new(config.camera.to_isometry()));
        let (tx, receiver) = crossbeam_channel::bounded(config.queue_capacity.max(1));
        let feed = match config.mode {
            FeedMode::Live => start_live(&config.channel, tx),
            FeedMode::Simulation => start_simulated(
                frames,
                Arc::clone(&store),
                Arc::clone(&camera),
                config.rate_hz,
                tx,
            )?,
            FeedMode::None => PoseFeed::disabled(),
        };
        let status = feed.status();

        tracing::info!(
            "[VisionPlugin] Tracking {} markers, feed {} ({})",
            config.markers.len(),
            status.label(),
            match config.mode {
                FeedMode::Live => config.channel.as_str(),
                FeedMode::Simulation => "kinematics",
                FeedMode::None => "none",
            }
        );

        Ok(Self {
            mode: config.mode,
            channel: config.channel.clone(),
            store,
            camera,
            receiver,
            feed: Mutex::new(feed),
            last_status: Mutex::new(status),
            datastore: Arc::downgrade(datastore),
            logger: RwLock::new(None),
        })
    }

    /// Create the subscriber and publish it under [`SUBSCRIBER_KEY`].
    pub fn install(
        config: &VisionConfig,
        frames: Arc<dyn FrameProvider>,
        datastore: &Arc<Datastore>,
    ) -> Result<Arc<Self>> {
        let subscriber = Arc::new(Self::new(config, frames, datastore)?);
        datastore.make(SUBSCRIBER_KEY, Arc::clone(&subscriber))?;
        Ok(subscriber)
    }

    /// Stop the feed and remove every datastore entry this subscriber owns.
    pub fn uninstall(&self) {
        self.shutdown();
        if let Some(datastore) = self.datastore.upgrade() {
            datastore.remove(SUBSCRIBER_KEY);
            for (name, _) in self.store.mounts() {
                datastore.remove(&marker_key(&name));
            }
        }
        if let Some(logger) = self.logger.write().take() {
            for (name, _) in self.store.mounts() {
                for entry in log_entry_names(&name) {
                    logger.remove_log_entry(&entry);
                }
            }
        }
    }

    /// Attach the host logger. Markers already observed are logged at once,
    /// the others on their first observation.
    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        for (name, _) in self.store.mounts() {
            if self.store.lookup(&name).is_ok_and(|m| m.observed) {
                self.add_log_entries(logger.as_ref(), &name);
            }
        }
        *self.logger.write() = Some(logger);
    }

    fn add_log_entries(&self, logger: &dyn Logger, name: &str) {
        let [relative, world] = log_entry_names(name);
        let store = Arc::clone(&self.store);
        let marker = name.to_string();
        logger.add_log_entry(
            &relative,
            Box::new(move || store.camera_relative_pose(&marker).unwrap_or_else(|_| Transform::identity())),
        );
        let store = Arc::clone(&self.store);
        let marker = name.to_string();
        logger.add_log_entry(
            &world,
            Box::new(move || store.world_pose(&marker).unwrap_or_else(|_| Transform::identity())),
        );
    }

    /// Subscriber installed in `datastore`, if any.
    pub fn find(datastore: &Datastore) -> Option<Arc<Self>> {
        datastore.get::<Arc<Self>>(SUBSCRIBER_KEY).ok()
    }

    /// Per-control-cycle update: ingest queued observations, publish world
    /// poses, then advance visibility decay by `dt`.
    pub fn tick(&self, dt: f64) {
        self.update_connectivity();

        let camera = *self.camera.read();
        let mut updated = BTreeSet::new();
        while let Ok(obs) = self.receiver.try_recv() {
            let now = self.store.now();
            match self.store.ingest(&obs.name, obs.pose, &camera, now) {
                IngestOutcome::First => {
                    tracing::info!("[VisionPlugin] New marker: {}", obs.name);
                    if let Some(logger) = self.logger.read().as_ref() {
                        self.add_log_entries(logger.as_ref(), &obs.name);
                    }
                    updated.insert(obs.name);
                }
                IngestOutcome::Updated => {
                    updated.insert(obs.name);
                }
                IngestOutcome::Unregistered | IngestOutcome::Stale => {}
            }
        }

        if !updated.is_empty() {
            self.publish(&updated);
        }
        self.store.tick(dt);
    }

    fn publish(&self, names: &BTreeSet<String>) {
        let Some(datastore) = self.datastore.upgrade() else {
            return;
        };
        for name in names {
            let Ok(marker) = self.store.lookup(name) else {
                continue;
            };
            if let Err(e) = datastore.assign(&marker_key(name), (marker.pose_world, marker.last_update)) {
                tracing::warn!("[VisionPlugin] Failed to publish marker \"{}\": {}", name, e);
            }
        }
    }

    fn update_connectivity(&self) {
        let status = self.feed.lock().status();
        let mut last = self.last_status.lock();
        if *last != status {
            match status {
                FeedStatus::Connected => {
                    tracing::info!("[VisionPlugin] Connected to {}", self.channel)
                }
                FeedStatus::Disconnected => {
                    tracing::warn!("[VisionPlugin] Disconnected from {}", self.channel)
                }
                _ => {}
            }
            *last = status;
        }
    }

    /// Declare an additional marker of interest at runtime.
    pub fn register_marker(&self, name: &str, mount: MarkerMount) {
        self.store.register_marker(name, mount);
    }

    pub fn visible(&self, name: &str) -> bool {
        self.store.visible(name)
    }

    pub fn camera_relative_pose(&self, name: &str) -> Result<Transform> {
        self.store.camera_relative_pose(name)
    }

    pub fn world_pose(&self, name: &str) -> Result<Transform> {
        self.store.world_pose(name)
    }

    pub fn lookup(&self, name: &str) -> Result<TrackedMarker> {
        self.store.lookup(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.store.contains(name)
    }

    pub fn camera_pose(&self) -> Transform {
        *self.camera.read()
    }

    /// Move the camera. Applies to observations ingested from now on.
    pub fn set_camera_pose(&self, pose: Transform) {
        *self.camera.write() = pose;
    }

    pub fn mode(&self) -> FeedMode {
        self.mode
    }

    pub fn status(&self) -> FeedStatus {
        self.feed.lock().status()
    }

    pub fn status_label(&self) -> &'static str {
        self.status().label()
    }

    /// Address of the live feed endpoint, once bound.
    pub fn feed_address(&self) -> Option<SocketAddr> {
        self.feed.lock().local_addr()
    }

    pub fn store(&self) -> &Arc<MarkerStore> {
        &self.store
    }

    /// Stop feed threads. Idempotent.
    pub fn shutdown(&self) {
        self.feed.lock().shutdown();
    }
}

impl std::fmt::Debug for VisionSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionSubscriber")
            .field("mode", &self.mode)
            .field("channel", &self.channel)
            .field("status", &self.status())
            .finish()
    }
}
