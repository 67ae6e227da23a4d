#[cfg(target_os = "linux")]
pub mod af_packet;
pub mod driver;
pub mod eth;
pub mod mbuf;
pub mod pktmbuf;
pub mod queue;
pub mod ring;
