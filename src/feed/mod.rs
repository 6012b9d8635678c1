//! Observation sources feeding the marker store.
//!
//! A feed runs on its own threads and pushes [`Observation`]s into a bounded
//! channel. It never touches the store's observation state; the subscriber
//! drains the channel on the control thread.
//!
//! - [`live`]: TCP endpoint accepting publisher connections
//! - [`simulated`]: observations computed from the robot kinematics

pub mod live;
pub mod simulated;
pub mod wire;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crate::markers::Observation;

pub use live::start_live;
pub use simulated::start_simulated;

/// Connectivity as reported to status displays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedStatus {
    /// Simulated feed running
    Simulation,
    /// Live feed with at least one publisher attached
    Connected,
    /// Live feed without publishers, or failed to open its channel
    Disconnected,
    /// No feed configured
    Disabled,
}

impl FeedStatus {
    pub fn label(self) -> &'static str {
        match self {
            FeedStatus::Simulation => "simulation",
            FeedStatus::Connected => "connected",
            FeedStatus::Disconnected => "disconnected",
            FeedStatus::Disabled => "disabled",
        }
    }
}

#[derive(Debug)]
enum FeedKind {
    Disabled,
    Simulation,
    Live {
        publishers: Arc<AtomicUsize>,
        local_addr: Option<SocketAddr>,
    },
}

/// Handle on a running feed. Stops and joins its threads on drop.
#[derive(Debug)]
pub struct PoseFeed {
    kind: FeedKind,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl PoseFeed {
    /// Feed producing nothing.
    pub fn disabled() -> Self {
        Self {
            kind: FeedKind::Disabled,
            shutdown: Arc::new(AtomicBool::new(true)),
            threads: Vec::new(),
        }
    }

    /// Live feed that could not open its channel; stays disconnected.
    pub(crate) fn dead_live() -> Self {
        Self {
            kind: FeedKind::Live {
                publishers: Arc::new(AtomicUsize::new(0)),
                local_addr: None,
            },
            shutdown: Arc::new(AtomicBool::new(true)),
            threads: Vec::new(),
        }
    }

    pub(crate) fn live(
        publishers: Arc<AtomicUsize>,
        local_addr: SocketAddr,
        shutdown: Arc<AtomicBool>,
        thread: JoinHandle<()>,
    ) -> Self {
        Self {
            kind: FeedKind::Live {
                publishers,
                local_addr: Some(local_addr),
            },
            shutdown,
            threads: vec![thread],
        }
    }

    pub(crate) fn simulation(shutdown: Arc<AtomicBool>, thread: JoinHandle<()>) -> Self {
        Self {
            kind: FeedKind::Simulation,
            shutdown,
            threads: vec![thread],
        }
    }

    pub fn status(&self) -> FeedStatus {
        match &self.kind {
            FeedKind::Disabled => FeedStatus::Disabled,
            FeedKind::Simulation => FeedStatus::Simulation,
            FeedKind::Live { publishers, .. } => {
                if publishers.load(Ordering::Relaxed) > 0 {
                    FeedStatus::Connected
                } else {
                    FeedStatus::Disconnected
                }
            }
        }
    }

    /// Address the live feed is listening on.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.kind {
            FeedKind::Live { local_addr, .. } => *local_addr,
            _ => None,
        }
    }

    /// Signal the feed threads to stop and wait for them.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Feed thread panicked");
            }
        }
    }
}

impl Drop for PoseFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Push an observation without blocking, reporting whether the consumer is
/// still there.
pub(crate) fn forward(
    tx: &crossbeam_channel::Sender<Observation>,
    observation: Observation,
    dropped: &mut u64,
) -> bool {
    match tx.try_send(observation) {
        Ok(()) => true,
        Err(crossbeam_channel::TrySendError::Full(_)) => {
            *dropped += 1;
            if *dropped % 100 == 1 {
                tracing::warn!("Observation queue full, {} observations dropped", dropped);
            }
            true
        }
        Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_feed() {
        let mut feed = PoseFeed::disabled();
        assert_eq!(feed.status(), FeedStatus::Disabled);
        assert!(feed.local_addr().is_none());
        feed.shutdown();
    }

    #[test]
    fn test_dead_live_feed_is_disconnected() {
        let feed = PoseFeed::dead_live();
        assert_eq!(feed.status(), FeedStatus::Disconnected);
        assert_eq!(feed.status().label(), "disconnected");
    }

    #[test]
    fn test_forward_full_queue() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut dropped = 0;
        let obs = Observation::new("a", crate::core::Transform::identity());
        assert!(forward(&tx, obs.clone(), &mut dropped));
        assert!(forward(&tx, obs.clone(), &mut dropped));
        assert_eq!(dropped, 1);
        drop(rx);
        assert!(!forward(&tx, obs, &mut dropped));
    }
}
