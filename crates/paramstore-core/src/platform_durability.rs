//! Platform-specific durable sync implementations
//!
//! A commit is durable once both the value bytes and the directory entry
//! pointing at them have reached persistent storage. This module maps the
//! two flushes onto the strongest primitive each platform offers.

use std::fs::File;
use std::io;
use std::path::Path;

/// Flushes a value file's contents to stable storage.
///
/// A value file is written once, never appended to, and only becomes
/// visible through a rename, so its data and length are all a reader needs.
/// That makes a data-only flush enough; timestamps may lag.
///
/// - Linux: `fdatasync`, which still flushes the size change
/// - macOS/iOS: `fcntl(F_FULLFSYNC)`, since plain `fsync` stops at the drive cache
/// - Windows: `FlushFileBuffers`
/// - elsewhere: `File::sync_data`
///
/// Can block for a long time under heavy I/O; never call it holding the root lock.
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor belongs to `file`, which is open for the call.
        check_zero(unsafe { libc::fdatasync(file.as_raw_fd()) })
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor belongs to `file`, which is open for the call.
        check_zero(unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) })
    }

    #[cfg(windows)]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        // SAFETY: the handle belongs to `file`, which is open for the call.
        let flushed = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
        if flushed == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", windows)))]
    {
        file.sync_data()
    }
}

/// Map a libc `0 on success, -1 and errno on failure` return code.
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "ios"))]
fn check_zero(ret: libc::c_int) -> io::Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Flushes a directory's entries so a rename inside it survives a crash.
///
/// Unix opens the directory read-only and fsyncs it. Windows offers no
/// directory handle flush for this purpose; NTFS journals renames, so this
/// is a no-op there.
pub fn sync_directory(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        let handle = File::open(dir)?;
        // fsync rather than fdatasync: the directory's entries are its metadata.
        handle.sync_all()
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}
