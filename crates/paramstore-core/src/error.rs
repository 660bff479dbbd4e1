//! Error types for ParamStore operations
//!
//! Every failure of the commit protocol maps to exactly one `StoreError`
//! variant naming the phase that failed, so a caller of `put` can tell a
//! short write from a failed fsync from a lock it could not take.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::registry::ParamKeyType;

/// ParamStore error types with detailed context.
///
/// `Clone` so the async write queue can retain the most recent failure
/// for callers who were no longer around when it happened.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Store root directory could not be created
    #[error("failed to create store root {}: {message} ({kind})", .path.display())]
    PathCreation {
        path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },

    /// Temp file could not be created inside the store root
    #[error("failed to create temp file in {}: {message} ({kind})", .path.display())]
    TempFile {
        path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },

    /// Short or failed write of the value bytes to the temp file
    #[error("write to {} failed: {message} ({kind})", .path.display())]
    Write {
        path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },

    /// fsync of a temp file or of the store root directory failed
    #[error("sync of {} failed: {message} ({kind})", .path.display())]
    Sync {
        path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },

    /// Root lock file could not be opened or locked
    #[error("failed to lock {}: {message} ({kind})", .path.display())]
    Lock {
        path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },

    /// Atomic rename of the temp file onto the key file failed
    #[error("rename {} -> {} failed: {message} ({kind})", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },

    /// Key name cannot be used as a file name directly under the root
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// Value exceeds the configured maximum size
    #[error("value for {key:?} too large: {size} bytes exceeds limit of {max_size} bytes")]
    ValueTooLarge {
        key: String,
        size: usize,
        max_size: usize,
    },

    /// Key is not present in the registry
    #[error("unknown key {key:?}")]
    UnknownKey { key: String },

    /// Typed write whose value type differs from the declared key type
    #[error("type mismatch for {key:?}: declared {expected}, got {actual}")]
    TypeMismatch {
        key: String,
        expected: ParamKeyType,
        actual: ParamKeyType,
    },

    /// Stored bytes (or the default) do not parse as the declared type
    #[error("cannot decode {key:?} as {key_type}: {reason}")]
    Decode {
        key: String,
        key_type: ParamKeyType,
        reason: String,
    },

    /// Configuration rejected by `Config::validate`
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Fieldless discriminant of [`StoreError`], for callers that only branch
/// on which phase failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    PathCreation,
    TempFile,
    Write,
    Sync,
    Lock,
    Rename,
    InvalidKey,
    ValueTooLarge,
    UnknownKey,
    TypeMismatch,
    Decode,
    InvalidConfig,
}

impl StoreError {
    /// Which phase or check produced this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            StoreError::PathCreation { .. } => FailureKind::PathCreation,
            StoreError::TempFile { .. } => FailureKind::TempFile,
            StoreError::Write { .. } => FailureKind::Write,
            StoreError::Sync { .. } => FailureKind::Sync,
            StoreError::Lock { .. } => FailureKind::Lock,
            StoreError::Rename { .. } => FailureKind::Rename,
            StoreError::InvalidKey { .. } => FailureKind::InvalidKey,
            StoreError::ValueTooLarge { .. } => FailureKind::ValueTooLarge,
            StoreError::UnknownKey { .. } => FailureKind::UnknownKey,
            StoreError::TypeMismatch { .. } => FailureKind::TypeMismatch,
            StoreError::Decode { .. } => FailureKind::Decode,
            StoreError::InvalidConfig { .. } => FailureKind::InvalidConfig,
        }
    }

    pub(crate) fn path_creation(path: &Path, err: &io::Error) -> Self {
        StoreError::PathCreation {
            path: path.to_path_buf(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub(crate) fn temp_file(path: &Path, err: &io::Error) -> Self {
        StoreError::TempFile {
            path: path.to_path_buf(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub(crate) fn write(path: &Path, err: &io::Error) -> Self {
        StoreError::Write {
            path: path.to_path_buf(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub(crate) fn sync(path: &Path, err: &io::Error) -> Self {
        StoreError::Sync {
            path: path.to_path_buf(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub(crate) fn lock(path: &Path, err: &io::Error) -> Self {
        StoreError::Lock {
            path: path.to_path_buf(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub(crate) fn rename(from: &Path, to: &Path, err: &io::Error) -> Self {
        StoreError::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub(crate) fn unknown_key(key: &str) -> Self {
        StoreError::UnknownKey { key: key.to_string() }
    }

    pub(crate) fn decode(key: &str, key_type: ParamKeyType, reason: impl Into<String>) -> Self {
        StoreError::Decode {
            key: key.to_string(),
            key_type,
            reason: reason.into(),
        }
    }
}

/// Result type alias for ParamStore operations
pub type StoreResult<T> = Result<T, StoreError>;
