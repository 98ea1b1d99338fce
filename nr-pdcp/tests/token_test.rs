use std::time::Duration;

use nr_pdcp::CryptoTokenManager;

#[test]
fn test_awaitable_sets_when_stopped_with_no_tokens() {
    let mngr = CryptoTokenManager::new();
    let flag = mngr.awaitable();
    assert!(!flag.is_set());
    mngr.stop();
    assert!(flag.is_set());
}

#[test]
fn test_awaitable_waits_for_outstanding_tokens() {
    let mngr = CryptoTokenManager::new();
    let flag = mngr.awaitable();

    let t1 = mngr.try_issue().unwrap();
    let t2 = mngr.try_issue().unwrap();
    mngr.stop();
    assert!(!flag.is_set());

    drop(t1);
    assert!(!flag.is_set());
    drop(t2);
    assert!(flag.is_set());
    assert!(flag.wait_timeout(Duration::from_millis(10)));
}

#[test]
fn test_no_tokens_issued_while_stopped() {
    let mngr = CryptoTokenManager::new();
    mngr.stop();
    assert!(mngr.try_issue().is_none());

    mngr.start();
    let flag = mngr.awaitable();
    assert!(!flag.is_set());
    assert!(mngr.try_issue().is_some());
}

#[test]
fn test_token_released_from_other_thread() {
    let mngr = CryptoTokenManager::new();
    let flag = mngr.awaitable();
    let token = mngr.try_issue().unwrap();
    mngr.stop();

    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        drop(token);
    });
    assert!(flag.wait_timeout(Duration::from_secs(2)));
    handle.join().unwrap();
}
