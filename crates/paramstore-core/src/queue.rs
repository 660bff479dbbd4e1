//! Async write queue — deferred commits on a background worker.
//!
//! `enqueue` appends to an in-memory FIFO and returns without touching disk.
//! A single worker thread is spawned on demand, drains the FIFO through the
//! [`AtomicWriter`], and exits once it finds the queue empty.
//!
//! The "is a worker running" flag lives under the same mutex as the FIFO.
//! `enqueue` pushes and decides whether to spawn in one critical section,
//! and the worker clears the flag in the same critical section in which it
//! observes the queue empty. A task can therefore never be left queued with
//! no worker to pick it up.
//!
//! Commit failures cannot reach the caller who enqueued the write. They are
//! logged, counted, kept as `last_error`, and passed to the failure hook.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::writer::AtomicWriter;

/// A write waiting for the background worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTask {
    pub key: String,
    pub value: Vec<u8>,
}

/// Called on the worker thread for every failed background commit.
pub type FailureHook = Arc<dyn Fn(&WriteTask, &StoreError) + Send + Sync>;

/// Snapshot of queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Tasks accepted by `enqueue` since creation
    pub enqueued: u64,
    /// Tasks committed successfully
    pub committed: u64,
    /// Tasks whose commit failed
    pub failed: u64,
    /// Tasks still waiting in the FIFO
    pub pending: usize,
}

struct QueueState {
    tasks: VecDeque<WriteTask>,
    worker_active: bool,
    worker: Option<JoinHandle<()>>,
}

struct QueueShared {
    state: Mutex<QueueState>,
    /// Signalled when a worker stops
    idle: Condvar,
    writer: Arc<AtomicWriter>,
    worker_name: String,
    enqueued: AtomicU64,
    committed: AtomicU64,
    failed: AtomicU64,
    last_error: Mutex<Option<StoreError>>,
    on_failure: Mutex<Option<FailureHook>>,
}

impl QueueShared {
    fn commit(&self, task: &WriteTask) {
        match self.writer.commit(&task.key, &task.value) {
            Ok(()) => {
                self.committed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    target: "paramstore::queue",
                    key = %task.key,
                    error = %e,
                    "background commit failed"
                );
                let hook = self.on_failure.lock().clone();
                if let Some(hook) = hook {
                    hook(task, &e);
                }
                *self.last_error.lock() = Some(e);
            }
        }
    }
}

/// Unbounded FIFO of pending writes with an on-demand worker thread.
///
/// Dropping the queue blocks until every queued task has been committed.
pub struct AsyncWriteQueue {
    shared: Arc<QueueShared>,
}

impl AsyncWriteQueue {
    pub fn new(writer: Arc<AtomicWriter>, worker_name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    worker_active: false,
                    worker: None,
                }),
                idle: Condvar::new(),
                writer,
                worker_name: worker_name.into(),
                enqueued: AtomicU64::new(0),
                committed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                last_error: Mutex::new(None),
                on_failure: Mutex::new(None),
            }),
        }
    }

    /// Queue a write. Never waits for disk or for the root lock.
    pub fn enqueue(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        let task = WriteTask {
            key: key.into(),
            value: value.into(),
        };
        self.shared.enqueued.fetch_add(1, Ordering::Relaxed);

        let mut state = self.shared.state.lock();
        state.tasks.push_back(task);
        if state.worker_active {
            return;
        }

        // A finished worker's handle is simply detached when replaced.
        state.worker_active = true;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.shared.worker_name.clone())
            .spawn(move || worker_loop(&shared));
        match spawned {
            Ok(handle) => state.worker = Some(handle),
            Err(e) => {
                // Tasks stay queued; drain() commits them on the caller's thread.
                state.worker_active = false;
                warn!(target: "paramstore::queue", error = %e, "failed to spawn writer thread");
            }
        }
    }

    /// Block until the queue is empty and no worker is running.
    pub fn drain(&self) {
        loop {
            let (finished, run_inline) = {
                let mut state = self.shared.state.lock();
                while state.worker_active {
                    self.shared.idle.wait(&mut state);
                }
                let run_inline = !state.tasks.is_empty();
                if run_inline {
                    // Claim the worker role so concurrent enqueues keep FIFO order.
                    state.worker_active = true;
                }
                (state.worker.take(), run_inline)
            };

            if let Some(handle) = finished {
                let _ = handle.join();
            }
            if !run_inline {
                return;
            }

            warn!(
                target: "paramstore::queue",
                "no writer thread running; committing queued writes inline"
            );
            worker_loop(&self.shared);
        }
    }

    /// Tasks not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    /// True when nothing is queued and no worker is running.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        state.tasks.is_empty() && !state.worker_active
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.shared.enqueued.load(Ordering::Relaxed),
            committed: self.shared.committed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }

    /// Most recent background commit failure, if any.
    pub fn last_error(&self) -> Option<StoreError> {
        self.shared.last_error.lock().clone()
    }

    /// Install (or replace) the hook run for each failed background commit.
    pub fn set_failure_hook(&self, hook: FailureHook) {
        *self.shared.on_failure.lock() = Some(hook);
    }
}

impl fmt::Debug for AsyncWriteQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncWriteQueue")
            .field("worker_name", &self.shared.worker_name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for AsyncWriteQueue {
    fn drop(&mut self) {
        self.drain();
    }
}

/// Clears the active flag if a commit or hook panics, so `drain` can take over.
struct ActiveGuard<'a> {
    shared: &'a QueueShared,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.shared.state.lock().worker_active = false;
            self.shared.idle.notify_all();
        }
    }
}

/// Runs on the worker thread (or inline from `drain`) with `worker_active` already set.
fn worker_loop(shared: &QueueShared) {
    let _guard = ActiveGuard { shared };
    debug!(target: "paramstore::queue", "writer started");

    loop {
        let task = {
            let mut state = shared.state.lock();
            match state.tasks.pop_front() {
                Some(task) => task,
                None => {
                    state.worker_active = false;
                    shared.idle.notify_all();
                    debug!(target: "paramstore::queue", "writer idle, exiting");
                    return;
                }
            }
        };
        shared.commit(&task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::FailureKind;
    use crate::lock::FileLock;
    use tempfile::TempDir;

    fn test_queue() -> (AsyncWriteQueue, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = Config::for_tests(dir.path());
        let writer = Arc::new(AtomicWriter::new(&config, Arc::new(FileLock)));
        (AsyncWriteQueue::new(writer, "test-writer"), dir)
    }

    fn read(dir: &TempDir, key: &str) -> Vec<u8> {
        std::fs::read(dir.path().join(key)).unwrap()
    }

    #[test]
    fn test_last_write_wins_after_drain() {
        let (queue, dir) = test_queue();
        for i in 0..100 {
            queue.enqueue("MapboxToken", format!("token-{i}"));
        }
        queue.drain();

        assert_eq!(read(&dir, "MapboxToken"), b"token-99");
        let stats = queue.stats();
        assert_eq!(stats.enqueued, 100);
        assert_eq!(stats.committed, 100);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.pending, 0);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_interleaved_keys_keep_order() {
        let (queue, dir) = test_queue();
        for i in 0..30 {
            queue.enqueue("A", format!("a{i}"));
            queue.enqueue("B", format!("b{i}"));
        }
        queue.drain();
        assert_eq!(read(&dir, "A"), b"a29");
        assert_eq!(read(&dir, "B"), b"b29");
    }

    #[test]
    fn test_drop_commits_everything() {
        let dir = TempDir::new().unwrap();
        {
            let config = Config::for_tests(dir.path());
            let writer = Arc::new(AtomicWriter::new(&config, Arc::new(FileLock)));
            let queue = AsyncWriteQueue::new(writer, "test-writer");
            for i in 0..50 {
                queue.enqueue(format!("key{i:02}"), format!("val{i}"));
            }
        }
        for i in 0..50 {
            let value = std::fs::read(dir.path().join(format!("key{i:02}"))).unwrap();
            assert_eq!(value, format!("val{i}").as_bytes());
        }
    }

    #[test]
    fn test_enqueue_after_worker_exit_respawns() {
        let (queue, dir) = test_queue();
        for i in 0..300 {
            queue.enqueue("Counter", i.to_string());
            if i % 3 == 0 {
                // Give the worker a chance to find the queue empty and exit
                thread::yield_now();
            }
            if i % 50 == 0 {
                queue.drain();
                assert!(queue.is_idle());
            }
        }
        queue.drain();
        assert_eq!(read(&dir, "Counter"), b"299");
        assert_eq!(queue.stats().committed, 300);
    }

    #[test]
    fn test_concurrent_producers() {
        let (queue, dir) = test_queue();
        let queue = Arc::new(queue);

        let mut handles = vec![];
        for t in 0..4 {
            let q = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    q.enqueue(format!("producer{t}"), format!("{t}:{i}"));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        queue.drain();

        for t in 0..4 {
            assert_eq!(read(&dir, &format!("producer{t}")), format!("{t}:49").as_bytes());
        }
        assert_eq!(queue.stats().committed, 200);
    }

    #[test]
    fn test_failures_are_observable() {
        let (queue, dir) = test_queue();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            queue.set_failure_hook(Arc::new(move |task: &WriteTask, err: &StoreError| {
                seen.lock().push((task.key.clone(), err.kind()));
            }));
        }

        queue.enqueue(".hidden", "x");
        queue.enqueue("Good", "ok");
        queue.drain();

        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.committed, 1);
        assert_eq!(queue.last_error().map(|e| e.kind()), Some(FailureKind::InvalidKey));
        assert_eq!(*seen.lock(), vec![(".hidden".to_string(), FailureKind::InvalidKey)]);
        assert_eq!(read(&dir, "Good"), b"ok");
    }

    #[test]
    fn test_drain_empty_queue_returns() {
        let (queue, _dir) = test_queue();
        queue.drain();
        assert!(queue.is_idle());
        assert_eq!(queue.stats(), QueueStats::default());
    }
}
