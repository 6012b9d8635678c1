//! Live observation feed over TCP.
//!
//! The feed listens on the configured channel (`host:port`). Any number of
//! publishers may connect; each gets a reader thread decoding frames (see
//! [`super::wire`]) into observations.
//!
//! # Connection Lifecycle
//!
//! ```text
//! 1. Publisher connects to the channel address
//! 2. Accept thread spawns a reader for this publisher
//! 3. Reader forwards observations until the publisher disconnects
//! 4. Feed reports "connected" while at least one reader is alive
//! ```
//!
//! A channel that cannot be parsed or bound leaves the feed disconnected for
//! good. This is logged but never fatal.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;

use super::PoseFeed;
use super::wire::{FrameReader, decode_payload};
use crate::error::{Result, VisionError};
use crate::markers::Observation;

const ACCEPT_POLL: Duration = Duration::from_millis(10);
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Open the live feed on `channel`.
pub fn start_live(channel: &str, tx: Sender<Observation>) -> PoseFeed {
    match open(channel, tx) {
        Ok(feed) => feed,
        Err(e) => {
            tracing::warn!(
                "[VisionFeed] Live channel \"{}\" unavailable, all markers will stay not visible: {}",
                channel,
                e
            );
            PoseFeed::dead_live()
        }
    }
}

fn open(channel: &str, tx: Sender<Observation>) -> Result<PoseFeed> {
    let addr: SocketAddr = channel
        .parse()
        .map_err(|e| VisionError::Connectivity(format!("invalid channel \"{}\": {}", channel, e)))?;
    let listener = TcpListener::bind(addr)
        .map_err(|e| VisionError::Connectivity(format!("failed to bind {}: {}", addr, e)))?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let publishers = Arc::new(AtomicUsize::new(0));

    let accept_shutdown = Arc::clone(&shutdown);
    let accept_publishers = Arc::clone(&publishers);
    let handle = thread::Builder::new()
        .name("vision-accept".to_string())
        .spawn(move || accept_loop(listener, tx, accept_publishers, accept_shutdown))?;

    tracing::info!("[VisionFeed] Listening for marker publishers on {}", local_addr);
    Ok(PoseFeed::live(publishers, local_addr, shutdown, handle))
}

fn accept_loop(
    listener: TcpListener,
    tx: Sender<Observation>,
    publishers: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
) {
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    let mut next_id = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    tracing::warn!("[VisionFeed] Failed to set blocking mode for {}: {}", addr, e);
                    continue;
                }
                if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
                    tracing::warn!("[VisionFeed] Failed to set read timeout for {}: {}", addr, e);
                }

                next_id += 1;
                let tx = tx.clone();
                let publishers = Arc::clone(&publishers);
                let shutdown = Arc::clone(&shutdown);
                let spawned = thread::Builder::new()
                    .name(format!("vision-reader-{}", next_id))
                    .spawn(move || read_publisher(stream, addr, tx, publishers, shutdown));
                match spawned {
                    Ok(handle) => readers.push(handle),
                    Err(e) => tracing::error!("[VisionFeed] Failed to spawn reader for {}: {}", addr, e),
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                tracing::error!("[VisionFeed] Error accepting publisher: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
        readers.retain(|h| !h.is_finished());
    }

    for handle in readers {
        let _ = handle.join();
    }
    tracing::debug!("[VisionFeed] Accept thread exiting");
}

fn read_publisher(
    mut stream: TcpStream,
    addr: SocketAddr,
    tx: Sender<Observation>,
    publishers: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
) {
    if publishers.fetch_add(1, Ordering::Relaxed) == 0 {
        tracing::info!("[VisionFeed] Connected: publisher {}", addr);
    } else {
        tracing::info!("[VisionFeed] Additional publisher {}", addr);
    }

    let mut reader = FrameReader::new();
    let mut frames = 0u64;
    let mut dropped = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        match reader.read_frame(&mut stream) {
            Ok(Some(payload)) => match decode_payload(&payload) {
                Ok(observations) => {
                    frames += 1;
                    let consumer_alive = observations
                        .into_iter()
                        .all(|obs| super::forward(&tx, obs, &mut dropped));
                    if !consumer_alive {
                        break;
                    }
                }
                Err(e) => tracing::warn!("[VisionFeed] Discarding malformed frame from {}: {}", addr, e),
            },
            Ok(None) => {}
            Err(VisionError::Io(ref e)) if is_disconnect(e) => break,
            Err(e) => {
                tracing::warn!("[VisionFeed] Closing publisher {}: {}", addr, e);
                break;
            }
        }
    }

    let _ = stream.shutdown(std::net::Shutdown::Both);
    let remaining = publishers.fetch_sub(1, Ordering::Relaxed) - 1;
    tracing::debug!("[VisionFeed] Publisher {} sent {} frames", addr, frames);
    if remaining == 0 {
        tracing::info!("[VisionFeed] Disconnected: last publisher {} left", addr);
    } else {
        tracing::info!("[VisionFeed] Publisher {} left, {} remaining", addr, remaining);
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
    )
}
