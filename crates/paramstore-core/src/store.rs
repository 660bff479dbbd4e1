//! ParamStore — the public facade.
//!
//! Combines the key registry, the atomic writer and the async write queue
//! over one store root.
//!
//! **Read path**: straight from `<root>/<key>`, no lock, may be stale
//! **Write path**: `put` commits on the caller's thread
//! **Deferred path**: `put_nonblocking` queues for the background writer
//!
//! Dropping a store blocks until every queued write has been committed.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::lock::{ExclusiveLock, FileLock};
use crate::queue::{AsyncWriteQueue, FailureHook, QueueStats};
use crate::registry::{KeyRegistry, ParamKeyType};
use crate::value::ParamValue;
use crate::writer::AtomicWriter;

/// Durable file-per-key parameter store.
///
/// All methods take `&self`; share a store across threads with `Arc`.
/// Several stores (in one or many processes) may point at the same root;
/// the root lock serializes their commits.
pub struct ParamStore {
    registry: Arc<KeyRegistry>,
    config: Config,
    writer: Arc<AtomicWriter>,
    queue: AsyncWriteQueue,
}

impl ParamStore {
    /// Open a store over `config.root`, creating the directory if needed,
    /// with the OS file lock.
    pub fn open(config: Config, registry: impl Into<Arc<KeyRegistry>>) -> StoreResult<Self> {
        Self::open_with_lock(config, registry, Arc::new(FileLock))
    }

    /// Open a store with a caller-supplied lock implementation.
    pub fn open_with_lock(
        config: Config,
        registry: impl Into<Arc<KeyRegistry>>,
        lock: Arc<dyn ExclusiveLock>,
    ) -> StoreResult<Self> {
        config.validate()?;
        ensure_root(&config.root)?;

        let registry = registry.into();
        let writer = Arc::new(AtomicWriter::new(&config, lock));
        let queue = AsyncWriteQueue::new(Arc::clone(&writer), config.worker_name.clone());

        info!(
            target: "paramstore::store",
            root = %config.root.display(),
            keys = registry.len(),
            "opened"
        );

        Ok(Self {
            registry,
            config,
            writer,
            queue,
        })
    }

    /// Store root directory.
    pub fn params_path(&self) -> &Path {
        self.writer.root()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    pub fn check_key(&self, key: &str) -> bool {
        self.registry.check_key(key)
    }

    pub fn get_key_type(&self, key: &str) -> StoreResult<ParamKeyType> {
        self.registry.key_type(key).ok_or_else(|| StoreError::unknown_key(key))
    }

    pub fn get_key_default_value(&self, key: &str) -> StoreResult<&str> {
        self.registry.default_value(key).ok_or_else(|| StoreError::unknown_key(key))
    }

    /// Current value of `key`, or empty if it was never written or cannot
    /// be read. An empty result is indistinguishable from an empty value;
    /// use [`try_get`](Self::try_get) when the difference matters.
    pub fn get(&self, key: &str) -> Vec<u8> {
        self.try_get(key).unwrap_or_default()
    }

    /// Current value of `key`, `None` if no value file exists or it cannot be read.
    pub fn try_get(&self, key: &str) -> Option<Vec<u8>> {
        if self.writer.validate_key(key).is_err() {
            return None;
        }
        match fs::read(self.writer.key_path(key)) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(
                        target: "paramstore::store",
                        key,
                        error = %e,
                        "value unreadable, treating as unset"
                    );
                }
                None
            }
        }
    }

    /// Whether a value file exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.writer.validate_key(key).is_ok() && self.writer.key_path(key).is_file()
    }

    /// Durably write `value` for `key`, blocking until committed or failed.
    pub fn put(&self, key: &str, value: impl AsRef<[u8]>) -> StoreResult<()> {
        self.check_writable(key)?;
        self.writer.commit(key, value.as_ref())
    }

    /// Queue a write for the background worker and return immediately.
    ///
    /// Only key and size checks happen here. Commit failures surface via
    /// [`queue_stats`](Self::queue_stats), [`last_async_error`](Self::last_async_error)
    /// and the hook set with [`on_async_failure`](Self::on_async_failure).
    pub fn put_nonblocking(&self, key: &str, value: impl Into<Vec<u8>>) -> StoreResult<()> {
        self.check_writable(key)?;
        let value = value.into();
        if value.len() > self.config.max_value_size {
            return Err(StoreError::ValueTooLarge {
                key: key.to_string(),
                size: value.len(),
                max_size: self.config.max_value_size,
            });
        }
        self.queue.enqueue(key, value);
        Ok(())
    }

    /// Block until all non-blocking writes issued so far are committed.
    pub fn drain(&self) {
        self.queue.drain();
    }

    /// Stored value, else the registered default (base64-decoded for BYTES keys).
    pub fn get_or_default(&self, key: &str) -> StoreResult<Vec<u8>> {
        let param = self.registry.get(key).ok_or_else(|| StoreError::unknown_key(key))?;
        if let Some(bytes) = self.try_get(key) {
            return Ok(bytes);
        }
        match param.key_type {
            ParamKeyType::Bytes => {
                let value = ParamValue::decode_default(key, param.key_type, &param.default_value)?;
                Ok(value.encode())
            }
            _ => Ok(param.default_value.as_bytes().to_vec()),
        }
    }

    /// Stored value (or default) decoded as the key's declared type.
    pub fn get_typed(&self, key: &str) -> StoreResult<ParamValue> {
        let param = self.registry.get(key).ok_or_else(|| StoreError::unknown_key(key))?;
        match self.try_get(key) {
            Some(bytes) => ParamValue::decode(key, param.key_type, &bytes),
            None => ParamValue::decode_default(key, param.key_type, &param.default_value),
        }
    }

    /// Type-checked synchronous write.
    pub fn put_typed(&self, key: &str, value: &ParamValue) -> StoreResult<()> {
        let expected = self.get_key_type(key)?;
        if value.key_type() != expected {
            return Err(StoreError::TypeMismatch {
                key: key.to_string(),
                expected,
                actual: value.key_type(),
            });
        }
        self.put(key, value.encode())
    }

    /// `true` only when the value (or default) reads as a true bool.
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(
            self.raw_or_default(key)
                .and_then(|b| ParamValue::decode(key, ParamKeyType::Bool, &b).ok()),
            Some(ParamValue::Bool(true))
        )
    }

    /// Integer value (or default), `0` when missing or unparsable.
    pub fn get_int(&self, key: &str) -> i64 {
        match self
            .raw_or_default(key)
            .and_then(|b| ParamValue::decode(key, ParamKeyType::Int, &b).ok())
        {
            Some(ParamValue::Int(i)) => i,
            _ => 0,
        }
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Most recent background commit failure.
    pub fn last_async_error(&self) -> Option<StoreError> {
        self.queue.last_error()
    }

    /// Run `hook` on the writer thread for every failed background commit.
    pub fn on_async_failure(&self, hook: FailureHook) {
        self.queue.set_failure_hook(hook);
    }

    fn raw_or_default(&self, key: &str) -> Option<Vec<u8>> {
        self.try_get(key)
            .or_else(|| self.registry.default_value(key).map(|d| d.as_bytes().to_vec()))
    }

    fn check_writable(&self, key: &str) -> StoreResult<()> {
        if self.config.enforce_registered_keys && !self.registry.check_key(key) {
            return Err(StoreError::unknown_key(key));
        }
        self.writer.validate_key(key)
    }
}

impl Drop for ParamStore {
    fn drop(&mut self) {
        let pending = self.queue.pending();
        if pending > 0 {
            debug!(target: "paramstore::store", pending, "waiting for queued writes before close");
        }
        self.queue.drain();
    }
}

/// Create the root if absent. An existing directory is fine.
fn ensure_root(root: &Path) -> StoreResult<()> {
    fs::create_dir_all(root).map_err(|e| StoreError::path_creation(root, &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::lock::MemoryLock;
    use tempfile::TempDir;

    fn test_store() -> (ParamStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ParamStore::open(Config::new(dir.path()), KeyRegistry::builtin()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_put_get_scenario() {
        let (store, _dir) = test_store();

        store.put("IsMetric", "1").unwrap();
        assert_eq!(store.get("IsMetric"), b"1");

        store.put_nonblocking("MapboxToken", "abc").unwrap();
        let early = store.get("MapboxToken");
        assert!(early.is_empty() || early == b"abc");

        store.drain();
        assert_eq!(store.get("MapboxToken"), b"abc");
    }

    #[test]
    fn test_missing_key_is_empty() {
        let (store, _dir) = test_store();
        assert!(store.get("NeverSetKey").is_empty());
        assert_eq!(store.try_get("NeverSetKey"), None);
        assert!(!store.contains("NeverSetKey"));
        // Names that can never be value files read as unset too
        assert!(store.get("../etc/passwd").is_empty());
        assert!(store.get(".lock").is_empty());
    }

    #[test]
    fn test_empty_value_vs_missing() {
        let (store, _dir) = test_store();
        store.put("MapboxToken", "").unwrap();
        assert!(store.get("MapboxToken").is_empty());
        assert_eq!(store.try_get("MapboxToken"), Some(Vec::new()));
        assert!(store.contains("MapboxToken"));
    }

    #[test]
    fn test_key_metadata() {
        let (store, _dir) = test_store();
        assert!(store.check_key("MapboxSettings"));
        assert!(!store.check_key("Nope"));
        assert_eq!(store.get_key_type("MapboxSettings").unwrap(), ParamKeyType::Json);
        assert_eq!(store.get_key_default_value("IsMetric").unwrap(), "false");
        assert_eq!(store.get_key_type("Nope").unwrap_err().kind(), FailureKind::UnknownKey);
        let err = store.get_key_default_value("Nope").unwrap_err();
        assert_eq!(err.kind(), FailureKind::UnknownKey);
    }

    #[test]
    fn test_unregistered_writes_refused() {
        let (store, dir) = test_store();
        assert_eq!(store.put("Rogue", "x").unwrap_err().kind(), FailureKind::UnknownKey);
        let err = store.put_nonblocking("Rogue", "x").unwrap_err();
        assert_eq!(err.kind(), FailureKind::UnknownKey);
        store.drain();
        assert!(!dir.path().join("Rogue").exists());
        assert_eq!(store.queue_stats().enqueued, 0);
    }

    #[test]
    fn test_unregistered_writes_allowed_when_not_enforced() {
        let dir = TempDir::new().unwrap();
        let store =
            ParamStore::open(Config::for_tests(dir.path()), KeyRegistry::default()).unwrap();
        store.put("Anything", "goes").unwrap();
        assert_eq!(store.get("Anything"), b"goes");
        assert_eq!(store.put(".lock", "x").unwrap_err().kind(), FailureKind::InvalidKey);
    }

    #[test]
    fn test_round_trip_typed_builtin_keys() {
        let (store, _dir) = test_store();
        let cases = [
            ("IsMetric", ParamValue::Bool(true)),
            ("MapboxToken", ParamValue::String("pk.test-token".into())),
            ("MapboxSettings", ParamValue::Json(serde_json::json!({"zoom": 14, "style": "night"}))),
        ];
        for (key, value) in cases {
            store.put_typed(key, &value).unwrap();
            assert_eq!(store.get_typed(key).unwrap(), value, "key {key}");
            assert_eq!(store.get(key), value.encode());
        }
    }

    #[test]
    fn test_typed_defaults_and_mismatch() {
        let (store, _dir) = test_store();
        assert_eq!(store.get_typed("IsMetric").unwrap(), ParamValue::Bool(false));
        assert_eq!(
            store.get_typed("MapboxSettings").unwrap(),
            ParamValue::Json(serde_json::Value::Null)
        );

        let err = store.put_typed("IsMetric", &ParamValue::Int(1)).unwrap_err();
        assert_eq!(err.kind(), FailureKind::TypeMismatch);
        assert_eq!(store.get_typed("Nope").unwrap_err().kind(), FailureKind::UnknownKey);
    }

    #[test]
    fn test_get_or_default() {
        let dir = TempDir::new().unwrap();
        let registry = KeyRegistry::builder()
            .key("IsMetric", ParamKeyType::Bool, "false")
            .key("Blob", ParamKeyType::Bytes, "dGVzdCBieXRlcw==")
            .build();
        let store = ParamStore::open(Config::new(dir.path()), registry).unwrap();

        assert_eq!(store.get_or_default("IsMetric").unwrap(), b"false");
        assert_eq!(store.get_or_default("Blob").unwrap(), b"test bytes");
        store.put("IsMetric", "1").unwrap();
        assert_eq!(store.get_or_default("IsMetric").unwrap(), b"1");
        assert_eq!(store.get_or_default("Nope").unwrap_err().kind(), FailureKind::UnknownKey);
    }

    #[test]
    fn test_lenient_accessors() {
        let dir = TempDir::new().unwrap();
        let registry = KeyRegistry::builder()
            .key("IsMetric", ParamKeyType::Bool, "true")
            .key("Retries", ParamKeyType::Int, "3")
            .key("Broken", ParamKeyType::Int, "")
            .build();
        let store = ParamStore::open(Config::new(dir.path()), registry).unwrap();

        assert!(store.get_bool("IsMetric"));
        assert_eq!(store.get_int("Retries"), 3);
        assert_eq!(store.get_int("Broken"), 0);
        assert_eq!(store.get_int("Unregistered"), 0);
        assert!(!store.get_bool("Unregistered"));

        store.put("Retries", "not_a_number").unwrap();
        assert_eq!(store.get_int("Retries"), 0);
        store.put("IsMetric", "0").unwrap();
        assert!(!store.get_bool("IsMetric"));
    }

    #[test]
    fn test_open_creates_root_idempotently() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested").join("params");

        let first = ParamStore::open(Config::new(&root), KeyRegistry::builtin()).unwrap();
        assert!(root.is_dir());
        assert_eq!(first.params_path(), root.as_path());
        first.put("IsMetric", "1").unwrap();
        drop(first);

        let second = ParamStore::open(Config::new(&root), KeyRegistry::builtin()).unwrap();
        assert_eq!(second.get("IsMetric"), b"1");
    }

    #[test]
    fn test_open_fails_when_root_is_a_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"not a directory").unwrap();

        let err = ParamStore::open(Config::new(&file), KeyRegistry::builtin()).err().unwrap();
        assert_eq!(err.kind(), FailureKind::PathCreation);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new(dir.path());
        config.max_value_size = 0;
        let err = ParamStore::open(config, KeyRegistry::builtin()).err().unwrap();
        assert_eq!(err.kind(), FailureKind::InvalidConfig);
    }

    #[test]
    fn test_nonblocking_value_too_large() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new(dir.path());
        config.max_value_size = 4;
        let store = ParamStore::open(config, KeyRegistry::builtin()).unwrap();
        let err = store.put_nonblocking("MapboxToken", "12345").unwrap_err();
        assert_eq!(err.kind(), FailureKind::ValueTooLarge);
    }

    #[test]
    fn test_drop_drains_queue() {
        let dir = TempDir::new().unwrap();
        {
            let store = ParamStore::open(Config::new(dir.path()), KeyRegistry::builtin()).unwrap();
            for i in 0..100 {
                store.put_nonblocking("MapboxToken", format!("t{i}")).unwrap();
            }
            store.put_nonblocking("IsMetric", "1").unwrap();
        }
        assert_eq!(std::fs::read(dir.path().join("MapboxToken")).unwrap(), b"t99");
        assert_eq!(std::fs::read(dir.path().join("IsMetric")).unwrap(), b"1");
    }

    #[test]
    fn test_memory_lock_store() {
        let dir = TempDir::new().unwrap();
        let lock = MemoryLock::new();
        let store = ParamStore::open_with_lock(
            Config::new(dir.path()),
            KeyRegistry::builtin(),
            Arc::new(lock.clone()),
        )
        .unwrap();

        store.put("IsMetric", "1").unwrap();
        store.put_nonblocking("MapboxToken", "abc").unwrap();
        store.drain();

        assert_eq!(lock.acquisitions(), 2);
        // No OS lock file when the in-memory lock is used
        assert!(!dir.path().join(crate::lock::LOCK_FILE_NAME).exists());
    }

    #[test]
    fn test_rename_failure_releases_lock_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let lock = MemoryLock::new();
        let store = ParamStore::open_with_lock(
            Config::new(dir.path()),
            KeyRegistry::builtin(),
            Arc::new(lock.clone()),
        )
        .unwrap();

        // A non-empty directory where the value file belongs cannot be replaced
        let blocker = dir.path().join("IsMetric");
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("occupant"), b"x").unwrap();

        let err = store.put("IsMetric", "1").unwrap_err();
        assert_eq!(err.kind(), FailureKind::Rename);
        assert!(!lock.is_held());
        assert_eq!(lock.acquisitions(), 1);
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .map_or(false, |n| n.starts_with(crate::writer::TEMP_FILE_PREFIX))
            })
            .count();
        assert_eq!(leftovers, 0, "temp file left after failed rename");

        fs::remove_dir_all(&blocker).unwrap();
        store.put("IsMetric", "1").unwrap();
        assert_eq!(store.get("IsMetric"), b"1");
        assert!(!lock.is_held());
    }
}
