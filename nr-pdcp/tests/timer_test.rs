use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nr_pdcp::{ManualExecutor, TimerFactory, TimerService};

fn factory_with_manual() -> (TimerFactory, Arc<ManualExecutor>) {
    let service = TimerService::new();
    let exec = Arc::new(ManualExecutor::new());
    (TimerFactory::new(service, exec.clone()), exec)
}

#[test]
fn test_timer_fires_on_executor() {
    let (factory, exec) = factory_with_manual();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_cb = Arc::clone(&fired);

    let timer = factory.create_timer();
    timer.set(Duration::from_millis(20), move || {
        fired_cb.fetch_add(1, Ordering::SeqCst);
    });
    timer.run();
    assert!(timer.is_running());

    std::thread::sleep(Duration::from_millis(80));
    // The expiry was posted to the executor but not executed yet.
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(!timer.is_running());
    exec.run_all();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stop_cancels_pending_expiry() {
    let (factory, exec) = factory_with_manual();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_cb = Arc::clone(&fired);

    let timer = factory.create_timer();
    timer.set(Duration::from_millis(30), move || {
        fired_cb.fetch_add(1, Ordering::SeqCst);
    });
    timer.run();
    timer.stop();
    assert!(!timer.is_running());

    std::thread::sleep(Duration::from_millis(80));
    exec.run_all();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn test_rearm_replaces_pending_expiry() {
    let (factory, exec) = factory_with_manual();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_cb = Arc::clone(&fired);

    let timer = factory.create_timer();
    timer.set(Duration::from_millis(25), move || {
        fired_cb.fetch_add(1, Ordering::SeqCst);
    });
    timer.run();
    timer.run(); // restart; the first arm must not fire as well

    std::thread::sleep(Duration::from_millis(100));
    exec.run_all();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_set_duration_applies_to_next_run() {
    let (factory, exec) = factory_with_manual();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_cb = Arc::clone(&fired);

    let timer = factory.create_timer();
    timer.set(Duration::from_secs(60), move || {
        fired_cb.fetch_add(1, Ordering::SeqCst);
    });
    timer.set_duration(Duration::from_millis(10));
    timer.run();

    std::thread::sleep(Duration::from_millis(60));
    exec.run_all();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
