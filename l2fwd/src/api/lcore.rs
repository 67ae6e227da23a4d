//! Lcore (logical core) APIs.
//!
//! An lcore is a worker thread pinned to one CPU. The forwarding loop runs on
//! one so that its busy polling does not migrate between cores.
//!
//! # Example
//!
//! ```no_run
//! use l2fwd::api::lcore::Lcore;
//!
//! let lcore = Lcore::from_id(1).expect("cpu 1 present");
//! let handle = lcore.launch(move || {
//!     println!("Hello from lcore {}", lcore.id());
//!     42
//! }).unwrap();
//! assert_eq!(handle.join().unwrap(), 42);
//! ```

use std::io;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::api::Result;

/// A handle to a logical core.
///
/// This type is `Copy`: it names a CPU, it does not own a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lcore {
    id: usize,
}

impl Lcore {
    /// Create an Lcore handle from a CPU index.
    ///
    /// Returns `None` if the index is not below [`Lcore::count()`].
    pub fn from_id(id: usize) -> Option<Self> {
        (id < Self::count()).then_some(Self { id })
    }

    /// Get the number of CPUs available to this process.
    pub fn count() -> usize {
        thread::available_parallelism().map_or(1, |n| n.get())
    }

    /// Iterate over all available lcores.
    pub fn all() -> impl Iterator<Item = Lcore> {
        (0..Self::count()).map(|id| Lcore { id })
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Pin the calling thread to this lcore's CPU.
    #[cfg(target_os = "linux")]
    pub fn pin_current(&self) -> Result<()> {
        use nix::sched::{CpuSet, sched_setaffinity};
        use nix::unistd::Pid;

        let mut set = CpuSet::new();
        set.set(self.id)?;
        sched_setaffinity(Pid::from_raw(0), &set)
    }

    /// Pinning is only supported on Linux; elsewhere this is a no-op.
    #[cfg(not(target_os = "linux"))]
    pub fn pin_current(&self) -> Result<()> {
        Ok(())
    }

    /// Launch a closure on a new thread pinned to this lcore.
    ///
    /// The thread is named `lcore-<id>`. A failure to pin is logged and the
    /// closure runs unpinned.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use l2fwd::api::lcore::Lcore;
    ///
    /// for lcore in Lcore::all() {
    ///     lcore.launch(move || println!("worker {}", lcore.id())).unwrap();
    /// }
    /// ```
    pub fn launch<F, T>(self, f: F) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        thread::Builder::new()
            .name(format!("lcore-{}", self.id))
            .spawn(move || {
                match self.pin_current() {
                    Ok(()) => debug!(lcore = self.id, "thread pinned"),
                    Err(errno) => warn!(lcore = self.id, %errno, "failed to pin thread"),
                }
                f()
            })
    }

    /// Launch a closure and wait for it to complete.
    pub fn run<F, T>(self, f: F) -> io::Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.launch(f)?
            .join()
            .map_err(|_| io::Error::other(format!("lcore {} worker panicked", self.id)))
    }
}
