//! Polling-mode, burst-oriented Layer-2 forwarding.
//!
//! The crate is split in two layers:
//! - [`api`]: buffer pool, packet buffers, ports and RX/TX queues on top of a
//!   pluggable device layer ([`api::dev::driver::EthDriver`]).
//! - [`fwd`]: the forwarding loop that moves bursts between an ingress and an
//!   egress queue.

pub mod api;
pub mod fwd;
