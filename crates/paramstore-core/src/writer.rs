//! Atomic writer — one crash-safe commit of one value.
//!
//! Commit protocol, every step in this exact order:
//!
//! 1. create `.tmp_value_XXXXXX` directly in the root (same filesystem as the target)
//! 2. write every value byte to it
//! 3. durable_sync the temp file
//! 4. take the root lock
//! 5. rename the temp file onto `<root>/<key>`
//! 6. sync the root directory so the rename itself is durable
//! 7. release the lock (handle drop)
//!
//! The rename is the only step that changes what readers see, so the key
//! file always holds a complete older commit or the complete new one.
//! If the process dies before step 5 the temp file is orphaned and the key
//! file is untouched. Failures at steps 1-5 remove the temp file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::lock::{ExclusiveLock, LOCK_FILE_NAME};
use crate::platform_durability::{durable_sync, sync_directory};

/// Prefix of transient temp files under the store root
pub const TEMP_FILE_PREFIX: &str = ".tmp_value_";

/// Performs commits into one store root under one lock.
pub struct AtomicWriter {
    root: PathBuf,
    lock: Arc<dyn ExclusiveLock>,
    max_key_size: usize,
    max_value_size: usize,
}

impl AtomicWriter {
    pub fn new(config: &Config, lock: Arc<dyn ExclusiveLock>) -> Self {
        Self {
            root: config.root.clone(),
            lock,
            max_key_size: config.max_key_size,
            max_value_size: config.max_value_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `key`'s value file. Does not validate the key.
    pub fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Check that `key` names a plain file directly under the root and
    /// cannot collide with the lock file or temp files.
    pub fn validate_key(&self, key: &str) -> StoreResult<()> {
        let reason = if key.is_empty() {
            Some("empty".to_string())
        } else if key.len() > self.max_key_size {
            Some(format!("{} bytes exceeds limit of {}", key.len(), self.max_key_size))
        } else if key.starts_with('.') {
            Some(format!("leading '.' is reserved ({LOCK_FILE_NAME}, {TEMP_FILE_PREFIX}*)"))
        } else if key.contains(['/', '\\', '\0']) {
            Some("contains a path separator or NUL".to_string())
        } else {
            None
        };

        match reason {
            Some(reason) => Err(StoreError::InvalidKey { key: key.to_string(), reason }),
            None => Ok(()),
        }
    }

    /// Durably replace `key`'s value with `value`.
    pub fn commit(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.validate_key(key)?;
        if value.len() > self.max_value_size {
            return Err(StoreError::ValueTooLarge {
                key: key.to_string(),
                size: value.len(),
                max_size: self.max_value_size,
            });
        }

        // Steps 1-3 run without the lock; temp names are unique.
        let staged = self.stage(value)?;

        // Step 4: held until this function returns, on every path
        let _lock = self.lock.acquire(&self.root)?;

        // Step 5: the single atomic swap
        let target = self.key_path(key);
        let temp_path = staged.path().to_path_buf();
        if let Err(e) = staged.persist(&target) {
            let err = StoreError::rename(&temp_path, &target, &e.error);
            discard(e.file);
            return Err(err);
        }

        // Step 6
        sync_directory(&self.root).map_err(|e| StoreError::sync(&self.root, &e))?;

        debug!(target: "paramstore::writer", key, bytes = value.len(), "committed");
        Ok(())
    }

    /// Steps 1-3: a synced temp file holding `value`, or an error with the
    /// temp file already removed.
    fn stage(&self, value: &[u8]) -> StoreResult<NamedTempFile> {
        let mut staged = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .rand_bytes(6)
            .tempfile_in(&self.root)
            .map_err(|e| StoreError::temp_file(&self.root, &e))?;

        // write_all turns a short write into an error
        if let Err(e) = staged.as_file_mut().write_all(value) {
            let err = StoreError::write(staged.path(), &e);
            discard(staged);
            return Err(err);
        }

        if let Err(e) = durable_sync(staged.as_file()) {
            let err = StoreError::sync(staged.path(), &e);
            discard(staged);
            return Err(err);
        }

        Ok(staged)
    }
}

/// Remove a temp file that will never be renamed into place.
fn discard(staged: NamedTempFile) {
    let path = staged.path().to_path_buf();
    if let Err(e) = staged.close() {
        warn!(
            target: "paramstore::writer",
            path = %path.display(),
            error = %e,
            "failed to remove temp file"
        );
    }
}
