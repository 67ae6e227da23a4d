pub mod dev;
mod error;
pub mod lcore;

pub use error::{Errno, Result, check_success, io_errno};
