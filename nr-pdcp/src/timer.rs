//! One-shot timers dispatched onto a task executor.
//!
//! A [`TimerService`] owns a dedicated thread with a deadline heap. Each
//! [`UniqueTimer`] is one-shot and generation-tagged: re-arming or stopping
//! bumps the generation, so an already-queued expiry for an older arm is
//! discarded when it surfaces. Expiry callbacks never run on the service
//! thread; they are posted to the executor the timer was created with, which
//! keeps all timer-driven state mutation on the owning UE executor.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::exec::TaskExecutor;

type TimerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

struct TimerShared {
    state: Mutex<TimerState>,
    executor: Arc<dyn TaskExecutor>,
}

struct TimerState {
    duration: Duration,
    callback: Option<TimerCallback>,
    generation: u64,
    running: bool,
}

struct HeapEntry {
    deadline: Instant,
    seq: u64,
    generation: u64,
    timer: Arc<TimerShared>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, the earliest deadline must win.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct ServiceInner {
    heap: Mutex<ServiceState>,
    cond: Condvar,
}

struct ServiceState {
    entries: BinaryHeap<HeapEntry>,
    next_seq: u64,
    shutdown: bool,
}

/// Timer engine shared by all bearers of a cell or test.
pub struct TimerService {
    inner: Arc<ServiceInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    pub fn new() -> Arc<Self> {
        let inner = Arc::new(ServiceInner {
            heap: Mutex::new(ServiceState {
                entries: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });
        let thread_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("timer-svc".to_string())
            .spawn(move || Self::run(thread_inner))
            .expect("failed to spawn timer thread");
        Arc::new(Self {
            inner,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn run(inner: Arc<ServiceInner>) {
        let mut state = inner.heap.lock();
        loop {
            if state.shutdown {
                return;
            }
            let now = Instant::now();
            let next_deadline = state.entries.peek().map(|e| e.deadline);
            match next_deadline {
                Some(deadline) if deadline <= now => {
                    let entry = state.entries.pop().unwrap();
                    drop(state);
                    Self::fire(entry);
                    state = inner.heap.lock();
                }
                Some(deadline) => {
                    inner.cond.wait_until(&mut state, deadline);
                }
                None => {
                    inner.cond.wait(&mut state);
                }
            }
        }
    }

    fn fire(entry: HeapEntry) {
        let mut timer_state = entry.timer.state.lock();
        if timer_state.generation != entry.generation || !timer_state.running {
            return;
        }
        timer_state.running = false;
        let callback = timer_state.callback.clone();
        drop(timer_state);
        if let Some(callback) = callback {
            entry.timer.executor.execute(Box::new(move || callback()));
        }
    }

    /// Current tick point; arrival times recorded against this clock drive
    /// the discard-timer arithmetic.
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    pub fn stop(&self) {
        {
            let mut state = self.inner.heap.lock();
            state.shutdown = true;
        }
        self.cond_notify();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    fn cond_notify(&self) {
        self.inner.cond.notify_all();
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Creates timers bound to one executor, so every expiry callback of a
/// bearer runs serialized with the rest of its state handling.
#[derive(Clone)]
pub struct TimerFactory {
    pub service: Arc<TimerService>,
    pub executor: Arc<dyn TaskExecutor>,
}

impl TimerFactory {
    pub fn new(service: Arc<TimerService>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self { service, executor }
    }

    pub fn create_timer(&self) -> UniqueTimer {
        UniqueTimer {
            shared: Arc::new(TimerShared {
                state: Mutex::new(TimerState {
                    duration: Duration::ZERO,
                    callback: None,
                    generation: 0,
                    running: false,
                }),
                executor: Arc::clone(&self.executor),
            }),
            service: Arc::clone(&self.service),
        }
    }
}

/// One-shot timer handle.
pub struct UniqueTimer {
    shared: Arc<TimerShared>,
    service: Arc<TimerService>,
}

impl UniqueTimer {
    /// Sets duration and expiry callback. Does not arm the timer.
    pub fn set<F: Fn() + Send + Sync + 'static>(&self, duration: Duration, callback: F) {
        let mut state = self.shared.state.lock();
        state.duration = duration;
        state.callback = Some(Arc::new(callback));
    }

    /// Updates the duration used by the next `run`, keeping the callback.
    pub fn set_duration(&self, duration: Duration) {
        self.shared.state.lock().duration = duration;
    }

    /// Arms the timer for its configured duration, replacing any pending arm.
    pub fn run(&self) {
        let (deadline, generation) = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.running = true;
            (Instant::now() + state.duration, state.generation)
        };
        let mut svc = self.service.inner.heap.lock();
        let seq = svc.next_seq;
        svc.next_seq += 1;
        svc.entries.push(HeapEntry {
            deadline,
            seq,
            generation,
            timer: Arc::clone(&self.shared),
        });
        drop(svc);
        self.service.cond_notify();
    }

    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.generation += 1;
        state.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn now(&self) -> Instant {
        self.service.now()
    }
}
