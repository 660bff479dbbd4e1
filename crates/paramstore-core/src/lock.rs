//! Root-wide exclusive lock guarding the rename step of every commit.
//!
//! One lock per store root serializes all commits to that root, whichever
//! key they write. Processes coordinate through an OS advisory lock on
//! `<root>/.lock`; tests can swap in [`MemoryLock`] through the
//! [`ExclusiveLock`] trait.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::{StoreError, StoreResult};

/// Name of the lock file directly under the store root
pub const LOCK_FILE_NAME: &str = ".lock";

/// Capability for acquiring the exclusive lock of a store root.
pub trait ExclusiveLock: Send + Sync {
    /// Block until the lock for `root` is held by the returned handle.
    fn acquire(&self, root: &Path) -> StoreResult<LockHandle>;
}

/// Exclusive ownership of a root lock. Dropping the handle releases it.
#[must_use = "the lock is released as soon as the handle is dropped"]
pub struct LockHandle {
    _guard: Box<dyn Send>,
}

impl LockHandle {
    /// Wrap any guard whose `Drop` performs the release.
    pub fn new<G: Send + 'static>(guard: G) -> Self {
        Self { _guard: Box::new(guard) }
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle").finish_non_exhaustive()
    }
}

/// OS advisory lock on `<root>/.lock` (flock on unix, LockFileEx on windows).
///
/// The lock file is created on first use and never removed. Locks belong to
/// the open file, so two stores in the same process exclude each other too.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLock;

impl ExclusiveLock for FileLock {
    fn acquire(&self, root: &Path) -> StoreResult<LockHandle> {
        let path = root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::lock(&path, &e))?;

        lock_exclusive(&file).map_err(|e| StoreError::lock(&path, &e))?;
        trace!(target: "paramstore::lock", path = %path.display(), "acquired");

        Ok(LockHandle::new(FileLockGuard { file, path }))
    }
}

struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock as well; unlock first so
        // waiters do not depend on close ordering.
        let _ = unlock(&self.file);
        trace!(target: "paramstore::lock", path = %self.path.display(), "released");
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = file.as_raw_fd();
    loop {
        // SAFETY: fd comes from a live File reference, so it is open.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if result == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: fd comes from a live File reference, so it is open.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(windows)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::LockFileEx;
    use winapi::um::minwinbase::{LOCKFILE_EXCLUSIVE_LOCK, OVERLAPPED};

    // SAFETY: OVERLAPPED is plain data; all-zero means offset 0, no event.
    let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
    // SAFETY: handle comes from a live File reference; overlapped outlives the call.
    let result = unsafe {
        LockFileEx(
            file.as_raw_handle() as *mut _,
            LOCKFILE_EXCLUSIVE_LOCK,
            0,
            !0,
            !0,
            &mut overlapped,
        )
    };
    if result == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(windows)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::UnlockFileEx;
    use winapi::um::minwinbase::OVERLAPPED;

    // SAFETY: OVERLAPPED is plain data; all-zero means offset 0, no event.
    let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
    // SAFETY: handle comes from a live File reference; overlapped outlives the call.
    let result =
        unsafe { UnlockFileEx(file.as_raw_handle() as *mut _, 0, !0, !0, &mut overlapped) };
    if result == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(any(unix, windows)))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "file locking not supported on this platform"))
}

#[cfg(not(any(unix, windows)))]
fn unlock(_file: &File) -> io::Result<()> {
    Ok(())
}

/// In-process stand-in for [`FileLock`].
///
/// Clones share one lock regardless of the root passed to `acquire`, so a
/// single `MemoryLock` handed to several stores models one shared root.
#[derive(Clone, Default)]
pub struct MemoryLock {
    inner: Arc<MemoryLockInner>,
}

#[derive(Default)]
struct MemoryLockInner {
    held: Mutex<bool>,
    released: Condvar,
    acquisitions: AtomicU64,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total successful acquisitions across all clones.
    pub fn acquisitions(&self) -> u64 {
        self.inner.acquisitions.load(Ordering::Relaxed)
    }

    pub fn is_held(&self) -> bool {
        *self.inner.held.lock()
    }
}

impl fmt::Debug for MemoryLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLock")
            .field("held", &self.is_held())
            .field("acquisitions", &self.acquisitions())
            .finish()
    }
}

impl ExclusiveLock for MemoryLock {
    fn acquire(&self, _root: &Path) -> StoreResult<LockHandle> {
        let mut held = self.inner.held.lock();
        while *held {
            self.inner.released.wait(&mut held);
        }
        *held = true;
        self.inner.acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(LockHandle::new(MemoryLockGuard {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryLockGuard {
    inner: Arc<MemoryLockInner>,
}

impl Drop for MemoryLockGuard {
    fn drop(&mut self) {
        *self.inner.held.lock() = false;
        self.inner.released.notify_one();
    }
}
