//! Burst forwarding between RX and TX queues.
//!
//! A [`Session`] pairs an ingress queue with an egress queue and a
//! [`Transform`]. A [`Forwarder`] polls its sessions until a cancellation
//! token fires:
//!
//! ```text
//! Idle -> Running -> Draining -> Stopped
//! ```

mod forwarder;
mod stats;
mod transform;

pub use forwarder::{Forwarder, IdlePolicy, LoopState, Session};
pub use stats::{FwdStats, FwdSummary};
pub use transform::{Transform, TransformMode};

/// Default number of packets requested per receive.
pub const BURST_SIZE: usize = 32;
