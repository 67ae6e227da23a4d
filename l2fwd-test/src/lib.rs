//! Test support for the `l2fwd` workspace.
//!
//! Everything runs on the software ring device, so no privileges or NICs are
//! needed.

pub mod harness;

pub use l2fwd_util::{frames, traffic};

pub mod util {
    use tracing_subscriber::EnvFilter;

    /// Install a test subscriber honoring `RUST_LOG`. Safe to call from
    /// every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}
