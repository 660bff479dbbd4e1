//! Configuration for a ParamStore instance
//!
//! Resolving a default root (home directory and the like) is the caller's
//! job; a config always names its root explicitly.

use std::path::PathBuf;

use crate::error::{StoreError, StoreResult};

/// Default background writer thread name
pub const DEFAULT_WORKER_NAME: &str = "paramstore-writer";

/// ParamStore configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Store root: one file per key plus the lock file
    pub root: PathBuf,
    /// Maximum key name length in bytes
    pub max_key_size: usize,
    /// Maximum value size in bytes
    pub max_value_size: usize,
    /// Refuse writes to keys missing from the registry
    pub enforce_registered_keys: bool,
    /// Thread name for the async write worker
    pub worker_name: String,
}

impl Config {
    /// Production settings rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_key_size: 256,
            max_value_size: 16 * 1024 * 1024,
            enforce_registered_keys: true,
            worker_name: DEFAULT_WORKER_NAME.to_string(),
        }
    }

    /// Same limits as `new`, but any well-formed key name may be written.
    pub fn for_tests(root: impl Into<PathBuf>) -> Self {
        Self {
            enforce_registered_keys: false,
            ..Self::new(root)
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> StoreResult<()> {
        let invalid = |reason: &str| -> StoreResult<()> {
            Err(StoreError::InvalidConfig {
                reason: reason.into(),
            })
        };

        if self.root.as_os_str().is_empty() {
            return invalid("root must not be empty");
        }
        if self.max_key_size == 0 || self.max_key_size > 4096 {
            return invalid("max_key_size must be in [1, 4096]");
        }
        if self.max_value_size == 0 || self.max_value_size > 128 * 1024 * 1024 {
            return invalid("max_value_size must be in [1, 128MB]");
        }
        if self.worker_name.is_empty() {
            return invalid("worker_name must not be empty");
        }
        Ok(())
    }
}
