//! Integration tests for drishti-servo
//!
//! The servoing scenarios run the vision subscriber, the servo state and the
//! kinematic host in lockstep on the test thread: observations are computed
//! from the frame table and injected directly into the marker store, so runs
//! are deterministic. The live feed tests go through a real TCP endpoint.
//!
//! ```bash
//! cargo test --test integration -- --nocapture
//! ```

mod harness;
mod live_feed;
mod servoing;

pub use harness::{Harness, Scenario};
