//! Re-entrant-detecting spinlock (§4.B), grounded in `types/lock.c`.
//!
//! Deliberately not `parking_lot::Mutex`: the original's contract is that a
//! thread re-locking its own hold gets told so (`AlreadyLocked`) instead of
//! blocking or panicking, and callers rely on that to short-circuit instead
//! of deadlocking against themselves. That shape has no equivalent in any
//! standard mutex API, so it stays hand-rolled over an atomic, same as the
//! source.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{OxcError, Result};

/// Outcome of attempting to acquire a [`Spinlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquire {
    /// Lock was free and is now held by the caller.
    Acquired,
    /// The caller already holds this lock; it was NOT re-acquired and must
    /// not be unlocked on this path.
    AlreadyLocked,
    /// Another thread held the lock past `max_wait`.
    TimedOut,
}

/// A CAS-based spinlock identifying its holder by OS thread id.
pub struct Spinlock {
    locked_thread_id: AtomicI64,
}

impl Spinlock {
    pub const fn new() -> Self {
        Spinlock {
            locked_thread_id: AtomicI64::new(0),
        }
    }

    fn current_thread_id() -> i64 {
        // std::thread::ThreadId has no stable integer conversion; hash it to
        // a value with the same "nonzero and distinct per thread" property
        // the original gets from Thread_getId's native handle.
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        let id = hasher.finish() as i64;
        if id == 0 {
            1
        } else {
            id
        }
    }

    /// Attempts to acquire the lock, busy-waiting (100µs steps) up to
    /// `max_wait`. `Duration::ZERO` is a try-lock; `Duration::MAX` waits
    /// forever.
    pub fn lock(&self, max_wait: Duration) -> LockAcquire {
        let tid = Self::current_thread_id();

        let prev = self
            .locked_thread_id
            .compare_exchange(0, tid, Ordering::Acquire, Ordering::Acquire)
            .unwrap_or_else(|x| x);

        if prev == tid {
            return LockAcquire::AlreadyLocked;
        }
        if prev == 0 {
            return LockAcquire::Acquired;
        }

        let start = Instant::now();
        loop {
            thread::sleep(Duration::from_micros(100));

            let prev = self
                .locked_thread_id
                .compare_exchange(0, tid, Ordering::Acquire, Ordering::Acquire)
                .unwrap_or_else(|x| x);

            if prev == 0 {
                return LockAcquire::Acquired;
            }

            if max_wait != Duration::MAX && start.elapsed() >= max_wait {
                return LockAcquire::TimedOut;
            }
        }
    }

    /// Releases the lock. Fails if the caller does not currently hold it.
    pub fn unlock(&self) -> Result<()> {
        let tid = Self::current_thread_id();
        match self
            .locked_thread_id
            .compare_exchange(tid, 0, Ordering::Release, Ordering::Relaxed)
        {
            Ok(_) => Ok(()),
            Err(_) => Err(OxcError::InvalidState(
                "unlock called by a thread that does not hold the lock".to_string(),
            )),
        }
    }
}

impl Default for Spinlock {
    fn default() -> Self {
        Self::new()
    }
}

/// Data guarded by a [`Spinlock`] rather than a standard `Mutex`, for the
/// one place the spec requires the re-entrancy-detecting acquire taxonomy
/// to actually gate access to shared state: `AudioDevice`'s
/// `pendingUpdateLock` (§4.B, §5).
pub struct SpinGuarded<T> {
    lock: Spinlock,
    data: UnsafeCell<T>,
}

// SAFETY: `data` is only ever dereferenced from inside `with_lock`, which
// only runs its closure after `lock` reports `Acquired`.
unsafe impl<T: Send> Sync for SpinGuarded<T> {}

impl<T> SpinGuarded<T> {
    pub fn new(value: T) -> Self {
        SpinGuarded {
            lock: Spinlock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Runs `f` with exclusive access to the guarded value, busy-waiting up
    /// to `max_wait` to acquire the lock first. A caller that already holds
    /// the lock on this thread gets `InvalidState` instead of deadlocking or
    /// re-entering (the lock is not re-entrant, per §4.B).
    pub fn with_lock<R>(&self, max_wait: Duration, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        match self.lock.lock(max_wait) {
            LockAcquire::Acquired => {
                // SAFETY: we just acquired the lock and release it below,
                // so this is the only live reference to `data`.
                let result = f(unsafe { &mut *self.data.get() });
                self.lock.unlock()?;
                Ok(result)
            }
            LockAcquire::AlreadyLocked => Err(OxcError::InvalidState(
                "SpinGuarded::with_lock called re-entrantly on the same thread".to_string(),
            )),
            LockAcquire::TimedOut => Err(OxcError::TimedOut(max_wait)),
        }
    }
}
