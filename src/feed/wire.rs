//! Marker observation wire format
//!
//! Publishers push length-prefixed frames over TCP:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Payload (variable)       │
//! │ Big-endian u32   │ JSON record list         │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! The payload is an ordered list of records:
//!
//! ```json
//! [{"name": "gripper", "pose": {"position": [0.1, 0.0, 0.8], "orientation": [0.0, 0.0, 0.0, 1.0]}}]
//! ```
//!
//! Orientation is a quaternion `[x, y, z, w]` of the marker in the camera
//! frame. Non-unit quaternions are normalized; zero quaternions are dropped.
//!
//! ## Error Handling
//!
//! - **Oversized frame**: connection closed
//! - **Malformed payload**: frame logged and discarded, connection remains open

use std::io::{ErrorKind, Read};

use nalgebra::{Quaternion, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

use crate::core::Transform;
use crate::error::{Result, VisionError};
use crate::markers::Observation;

/// Maximum payload size (1 MiB)
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const MIN_QUATERNION_NORM: f64 = 1e-9;

/// Camera-relative pose as carried on the wire
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WirePose {
    pub position: [f64; 3],
    /// `[x, y, z, w]`
    pub orientation: [f64; 4],
}

/// One named marker observation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub name: String,
    pub pose: WirePose,
}

impl WirePose {
    pub fn from_transform(x: &Transform) -> Self {
        let q = x.rotation.quaternion();
        let t = x.translation.vector;
        Self {
            position: [t.x, t.y, t.z],
            orientation: [q.i, q.j, q.k, q.w],
        }
    }

    /// Rigid transform, or `None` for a degenerate orientation
    pub fn to_transform(&self) -> Option<Transform> {
        let [x, y, z, w] = self.orientation;
        let q = Quaternion::new(w, x, y, z);
        let norm = q.norm();
        if !norm.is_finite() || norm < MIN_QUATERNION_NORM {
            return None;
        }
        let [px, py, pz] = self.position;
        if !(px.is_finite() && py.is_finite() && pz.is_finite()) {
            return None;
        }
        Some(Transform::from_parts(
            Translation3::new(px, py, pz),
            UnitQuaternion::new_normalize(q),
        ))
    }
}

impl MarkerRecord {
    pub fn new(name: impl Into<String>, pose: &Transform) -> Self {
        Self {
            name: name.into(),
            pose: WirePose::from_transform(pose),
        }
    }
}

/// Serialize records into one length-prefixed frame
pub fn encode_frame(records: &[MarkerRecord]) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(records)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(VisionError::Wire(format!(
            "Frame too large: {} bytes",
            payload.len()
        )));
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a payload into observations, skipping degenerate poses
pub fn decode_payload(payload: &[u8]) -> Result<Vec<Observation>> {
    let records: Vec<MarkerRecord> = serde_json::from_slice(payload)?;
    let mut observations = Vec::with_capacity(records.len());
    for record in records {
        match record.pose.to_transform() {
            Some(pose) => observations.push(Observation::new(record.name, pose)),
            None => {
                tracing::debug!("Dropping degenerate pose for marker \"{}\"", record.name);
            }
        }
    }
    Ok(observations)
}

/// Incremental frame reader over a stream with a read timeout.
///
/// Partial frames survive timeouts: bytes already read are kept until the
/// frame completes.
#[derive(Debug, Default)]
pub struct FrameReader {
    header: [u8; 4],
    header_filled: usize,
    payload: Vec<u8>,
    payload_len: Option<usize>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read until one full payload is available.
    ///
    /// Returns `Ok(None)` on timeout, an `Io` error with `UnexpectedEof` when
    /// the peer closes the connection, and a `Wire` error for oversized frames.
    pub fn read_frame<R: Read>(&mut self, stream: &mut R) -> Result<Option<Vec<u8>>> {
        loop {
            let Some(len) = self.payload_len else {
                if !self.fill_header(stream)? {
                    return Ok(None);
                }
                continue;
            };

            let filled = self.payload.len();
            if filled == len {
                self.payload_len = None;
                self.header_filled = 0;
                return Ok(Some(std::mem::take(&mut self.payload)));
            }

            let mut chunk = vec![0u8; (len - filled).min(64 * 1024)];
            match stream.read(&mut chunk) {
                Ok(0) => return Err(eof()),
                Ok(n) => self.payload.extend_from_slice(&chunk[..n]),
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(VisionError::Io(e)),
            }
        }
    }

    fn fill_header<R: Read>(&mut self, stream: &mut R) -> Result<bool> {
        while self.header_filled < 4 {
            match stream.read(&mut self.header[self.header_filled..]) {
                Ok(0) => return Err(eof()),
                Ok(n) => self.header_filled += n,
                Err(e) if is_timeout(&e) => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(VisionError::Io(e)),
            }
        }
        let len = u32::from_be_bytes(self.header) as usize;
        if len > MAX_FRAME_LEN {
            return Err(VisionError::Wire(format!("Message too large: {} bytes", len)));
        }
        self.payload = Vec::with_capacity(len);
        self.payload_len = Some(len);
        Ok(true)
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn eof() -> VisionError {
    VisionError::Io(std::io::Error::new(
        ErrorKind::UnexpectedEof,
        "peer closed connection",
    ))
}
