//! ParamStore Core — durable file-per-key parameter storage
//!
//! Each parameter lives in its own file under a store root, holding the raw
//! bytes of its last committed value. Writes are crash-safe and may come
//! from several processes at once.
//!
//! # Architecture
//!
//! - **Commit**: temp file → fsync → root lock → rename → directory fsync
//! - **Exclusion**: one advisory lock file per root serializes all commits
//! - **Deferred writes**: FIFO queue drained by an on-demand worker thread
//! - **Reads**: plain file reads, never blocked by the lock
//!
//! # On-disk layout
//!
//! ```text
//! <root>/.lock                 lock file
//! <root>/<key>                 raw value bytes, no framing
//! <root>/.tmp_value_XXXXXX     transient, gone after a successful commit
//! ```
//!
//! # Example
//!
//! ```no_run
//! use paramstore_core::{Config, KeyRegistry, ParamStore};
//!
//! let store = ParamStore::open(Config::new("/data/params"), KeyRegistry::builtin())?;
//! store.put("IsMetric", "1")?;
//! store.put_nonblocking("MapboxToken", "pk.abc")?;
//! store.drain();
//! assert_eq!(store.get("IsMetric"), b"1");
//! # Ok::<(), paramstore_core::StoreError>(())
//! ```

pub mod config;
pub mod error;
pub mod lock;
pub mod platform_durability;
pub mod queue;
pub mod registry;
pub mod store;
pub mod value;
pub mod writer;

// Re-export key types for convenience
pub use config::Config;
pub use error::{FailureKind, StoreError, StoreResult};
pub use lock::{ExclusiveLock, FileLock, LockHandle, MemoryLock, LOCK_FILE_NAME};
pub use queue::{AsyncWriteQueue, FailureHook, QueueStats, WriteTask};
pub use registry::{KeyRegistry, KeyRegistryBuilder, ParamKey, ParamKeyType};
pub use store::ParamStore;
pub use value::ParamValue;
pub use writer::{AtomicWriter, TEMP_FILE_PREFIX};
