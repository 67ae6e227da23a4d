//! Application layer for the `l2fwd` forwarding engine.
//!
//! [`L2FwdApp`] owns the buffer pool and the two forwarding ports. It brings
//! them up in order, runs the forwarding loop until a cancellation token
//! fires, and tears everything down again.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use l2fwd::api::dev::ring::RingDriver;
//! use l2fwd_util::{AppConfig, L2FwdApp};
//! use tokio_util::sync::CancellationToken;
//!
//! let driver = Arc::new(RingDriver::new(2));
//! let app = L2FwdApp::initialize(driver, AppConfig::new()).unwrap();
//!
//! let stop = CancellationToken::new();
//! let timer = stop.clone();
//! std::thread::spawn(move || {
//!     std::thread::sleep(Duration::from_secs(1));
//!     timer.cancel();
//! });
//!
//! let summary = app.run(&stop).unwrap();
//! println!("forwarded {} packets", summary.tx_packets);
//! let report = app.shutdown();
//! assert!(report.is_clean());
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod frames;
pub mod meter;
pub mod traffic;

pub use app::{L2FwdApp, ShutdownReport};
pub use config::AppConfig;
pub use error::{Direction, Error};
pub use meter::Meter;
