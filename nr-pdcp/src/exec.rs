//! Task executors: serial per-UE workers and the shared crypto worker pool.
//!
//! `execute` is non-blocking: a full queue rejects the task and the caller
//! drops the associated PDU. Crypto workers publish their index in a
//! thread-local so per-worker security engines can be selected without
//! locking.

use std::cell::Cell;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait TaskExecutor: Send + Sync {
    /// Submits a task; returns false when the queue is full or stopped.
    fn execute(&self, task: Task) -> bool;
}

thread_local! {
    static WORKER_INDEX: Cell<usize> = const { Cell::new(0) };
}

/// Index of the calling thread within its worker pool. Zero outside a pool.
pub fn current_worker_index() -> usize {
    WORKER_INDEX.get()
}

fn set_worker_index(index: usize) {
    WORKER_INDEX.set(index);
}

/// A serial executor backed by one thread and a bounded queue. Tasks run in
/// submission order; all state owned by this executor is effectively
/// single-threaded.
pub struct SingleWorkerExecutor {
    tx: Mutex<Option<Sender<Task>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SingleWorkerExecutor {
    pub fn new(name: &str, queue_size: usize) -> Self {
        let (tx, rx) = bounded::<Task>(queue_size);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                set_worker_index(0);
                for task in rx {
                    task();
                }
            })
            .expect("failed to spawn worker thread");
        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Closes the queue and waits for queued tasks to finish.
    pub fn stop(&self) {
        drop(self.tx.lock().take());
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl TaskExecutor for SingleWorkerExecutor {
    fn execute(&self, task: Task) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.try_send(task).is_ok(),
            None => false,
        }
    }
}

impl Drop for SingleWorkerExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A pool of crypto workers sharing one bounded queue. Each worker sets its
/// thread-local index at start; the index selects the per-worker security
/// engine inside the PDCP entities.
pub struct CryptoWorkerPool {
    tx: Mutex<Option<Sender<Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    nof_workers: usize,
}

impl CryptoWorkerPool {
    pub fn new(name: &str, nof_workers: usize, queue_size: usize) -> Self {
        assert!(nof_workers > 0, "pool needs at least one worker");
        let (tx, rx) = bounded::<Task>(queue_size);
        let mut handles = Vec::with_capacity(nof_workers);
        for i in 0..nof_workers {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}#{i}"))
                .spawn(move || {
                    set_worker_index(i);
                    for task in rx {
                        task();
                    }
                })
                .expect("failed to spawn crypto worker");
            handles.push(handle);
        }
        Self {
            tx: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            nof_workers,
        }
    }

    pub fn nof_workers(&self) -> usize {
        self.nof_workers
    }

    pub fn stop(&self) {
        drop(self.tx.lock().take());
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

impl TaskExecutor for CryptoWorkerPool {
    fn execute(&self, task: Task) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.try_send(task).is_ok(),
            None => false,
        }
    }
}

impl Drop for CryptoWorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Test executor that queues tasks for explicit draining, so tests control
/// execution order and interleaving deterministically.
pub struct ManualExecutor {
    queue: Mutex<Vec<Task>>,
    worker_index: Mutex<usize>,
    accepting: Mutex<bool>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            worker_index: Mutex::new(0),
            accepting: Mutex::new(true),
        }
    }

    /// Worker index reported to tasks run from this executor.
    pub fn set_worker_index(&self, index: usize) {
        *self.worker_index.lock() = index;
    }

    /// Makes subsequent `execute` calls fail, emulating a full queue.
    pub fn set_accepting(&self, accepting: bool) {
        *self.accepting.lock() = accepting;
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs the queued task at `index` (submission order).
    pub fn run_at(&self, index: usize) {
        let task = self.queue.lock().remove(index);
        set_worker_index(*self.worker_index.lock());
        task();
        set_worker_index(0);
    }

    /// Runs queued tasks in submission order until the queue is empty,
    /// including tasks enqueued while draining.
    pub fn run_all(&self) {
        loop {
            let task = {
                let mut q = self.queue.lock();
                if q.is_empty() {
                    return;
                }
                q.remove(0)
            };
            set_worker_index(*self.worker_index.lock());
            task();
            set_worker_index(0);
        }
    }
}

impl Default for ManualExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskExecutor for ManualExecutor {
    fn execute(&self, task: Task) -> bool {
        if !*self.accepting.lock() {
            return false;
        }
        self.queue.lock().push(task);
        true
    }
}
