use std::io;

pub type Errno = nix::errno::Errno;

/// Result type alias using nix's Errno for device and pool operations
pub type Result<T> = std::result::Result<T, Errno>;

/// Map a raw libc return value to a `Result`, reading `errno` on failure.
pub fn check_success(ret: i32) -> Result<()> {
    if ret < 0 { Err(Errno::last()) } else { Ok(()) }
}

/// The errno behind an I/O error, `EIO` if it carries none.
pub fn io_errno(err: &io::Error) -> Errno {
    err.raw_os_error().map_or(Errno::EIO, Errno::from_raw)
}
