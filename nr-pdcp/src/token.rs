//! Crypto task accounting.
//!
//! Every task handed to the crypto executor carries a [`CryptoToken`];
//! dropping the token releases its slot. [`CryptoTokenManager::stop`] stops
//! the issuance of new tokens and arms the drain flag: once the last
//! outstanding token drops, the awaitable [`EventFlag`] sets and teardown
//! can proceed knowing no late crypto task will touch freed state.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Manually-reset event flag usable across threads.
#[derive(Clone)]
pub struct EventFlag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl EventFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn set(&self) {
        let (lock, cond) = &*self.inner;
        *lock.lock() = true;
        cond.notify_all();
    }

    pub fn reset(&self) {
        let (lock, _) = &*self.inner;
        *lock.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.inner.0.lock()
    }

    pub fn wait(&self) {
        let (lock, cond) = &*self.inner;
        let mut set = lock.lock();
        while !*set {
            cond.wait(&mut set);
        }
    }

    /// Waits until the flag sets or the timeout elapses; returns whether the
    /// flag is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cond) = &*self.inner;
        let mut set = lock.lock();
        if !*set {
            cond.wait_for(&mut set, timeout);
        }
        *set
    }
}

impl Default for EventFlag {
    fn default() -> Self {
        Self::new()
    }
}

struct TokenShared {
    outstanding: AtomicU32,
    stopped: AtomicBool,
    flag: EventFlag,
}

/// Tracks outstanding crypto tasks of one PDCP entity.
pub struct CryptoTokenManager {
    shared: Arc<TokenShared>,
}

impl CryptoTokenManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(TokenShared {
                outstanding: AtomicU32::new(0),
                stopped: AtomicBool::new(false),
                flag: EventFlag::new(),
            }),
        }
    }

    /// Issues a token for a new crypto task, unless issuance is stopped.
    pub fn try_issue(&self) -> Option<CryptoToken> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return None;
        }
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        Some(CryptoToken {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Stops new-token issuance; the awaitable sets once all outstanding
    /// tokens have been released.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        if self.shared.outstanding.load(Ordering::SeqCst) == 0 {
            self.shared.flag.set();
        }
    }

    /// Resumes token issuance after a stop.
    pub fn start(&self) {
        self.shared.flag.reset();
        self.shared.stopped.store(false, Ordering::SeqCst);
    }

    pub fn awaitable(&self) -> EventFlag {
        self.shared.flag.clone()
    }
}

impl Default for CryptoTokenManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII slot of one in-flight crypto task. Not clonable; moved with the task
/// across executors.
pub struct CryptoToken {
    shared: Arc<TokenShared>,
}

impl Drop for CryptoToken {
    fn drop(&mut self) {
        let prev = self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 && self.shared.stopped.load(Ordering::SeqCst) {
            self.shared.flag.set();
        }
    }
}
