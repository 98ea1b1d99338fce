use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::bounded;
use nr_pdcp::{current_worker_index, CryptoWorkerPool, ManualExecutor, SingleWorkerExecutor, TaskExecutor};

#[test]
fn test_single_worker_runs_tasks_in_order() {
    let exec = SingleWorkerExecutor::new("test-worker", 64);
    let (tx, rx) = bounded(64);
    for i in 0..10 {
        let tx = tx.clone();
        assert!(exec.execute(Box::new(move || {
            tx.send(i).unwrap();
        })));
    }
    exec.stop();
    let received: Vec<i32> = rx.try_iter().collect();
    assert_eq!(received, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_single_worker_rejects_when_full() {
    let exec = SingleWorkerExecutor::new("tiny-queue", 1);
    // Block the worker so the queue fills up.
    let gate = Arc::new((parking_lot::Mutex::new(false), parking_lot::Condvar::new()));
    let gate_worker = Arc::clone(&gate);
    exec.execute(Box::new(move || {
        let (lock, cond) = &*gate_worker;
        let mut open = lock.lock();
        while !*open {
            cond.wait(&mut open);
        }
    }));
    std::thread::sleep(Duration::from_millis(20));

    assert!(exec.execute(Box::new(|| {})));
    // Queue of one is now full.
    let mut rejected = false;
    for _ in 0..3 {
        if !exec.execute(Box::new(|| {})) {
            rejected = true;
            break;
        }
    }
    assert!(rejected);

    let (lock, cond) = &*gate;
    *lock.lock() = true;
    cond.notify_all();
    exec.stop();
}

#[test]
fn test_pool_workers_have_distinct_indices() {
    let pool = CryptoWorkerPool::new("crypto", 4, 64);
    assert_eq!(pool.nof_workers(), 4);
    let (tx, rx) = bounded(64);
    let barrier = Arc::new(std::sync::Barrier::new(4));
    for _ in 0..4 {
        let tx = tx.clone();
        let barrier = Arc::clone(&barrier);
        assert!(pool.execute(Box::new(move || {
            // Hold all workers until each one has picked up a task, so every
            // worker reports exactly once.
            barrier.wait();
            tx.send(current_worker_index()).unwrap();
        })));
    }
    pool.stop();
    let mut indices: Vec<usize> = rx.try_iter().collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[test]
fn test_manual_executor_controls_order() {
    let exec = ManualExecutor::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    for i in 0..3 {
        let order = Arc::clone(&order);
        let counter = Arc::clone(&counter);
        exec.execute(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            order.lock().push(i);
        }));
    }
    assert_eq!(exec.pending(), 3);
    exec.run_at(1);
    exec.run_all();
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(*order.lock(), vec![1, 0, 2]);
}

#[test]
fn test_manual_executor_worker_index() {
    let exec = ManualExecutor::new();
    exec.set_worker_index(2);
    let seen = Arc::new(AtomicUsize::new(usize::MAX));
    let seen_task = Arc::clone(&seen);
    exec.execute(Box::new(move || {
        seen_task.store(current_worker_index(), Ordering::SeqCst);
    }));
    exec.run_all();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[test]
fn test_manual_executor_rejects_when_closed() {
    let exec = ManualExecutor::new();
    exec.set_accepting(false);
    assert!(!exec.execute(Box::new(|| {})));
    exec.set_accepting(true);
    assert!(exec.execute(Box::new(|| {})));
}
