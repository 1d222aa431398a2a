use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

/// The duration between attempts to lock a [`SpinGuardState`].
const SPIN_GUARD_SLEEP_NANOS: u64 = 10;

/// Lock state for a [`SpinGuard`].
///
/// This is a single [`AtomicBool`], which is lock free on every target we
/// support and thus safe to touch from a signal handler.
#[derive(Debug, Default)]
pub struct SpinGuardState {
    locked: AtomicBool,
}

impl SpinGuardState {
    /// Creates a new, unlocked, state
    #[inline]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Returns true if a [`SpinGuard`] currently holds this state.
    ///
    /// This is only a snapshot, the state can change the moment after this
    /// returns.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// A held lock on a [`SpinGuardState`], released when dropped.
///
/// Acquisition never blocks in the kernel, it spins on a compare and swap,
/// sleeping for a few nanoseconds between attempts, until either the lock is
/// acquired or the caller supplied timeout has elapsed. This makes it usable
/// from a signal or exception handler, where a regular mutex might be held by
/// the very thread that has crashed.
///
/// A guard can be moved, including to another thread, without releasing the
/// lock, the lock is released exactly once, when the guard is dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SpinGuard<'state> {
    state: &'state SpinGuardState,
}

impl<'state> SpinGuard<'state> {
    /// Attempts to lock `state`, giving up once `timeout` has elapsed.
    ///
    /// A `timeout` of zero makes exactly one attempt.
    pub fn try_acquire(state: &'state SpinGuardState, timeout: Duration) -> Option<Self> {
        let timeout_nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let deadline = crate::clock::monotonic_nanos().saturating_add(timeout_nanos);

        loop {
            // compare_exchange_weak is allowed to fail spuriously, which on
            // eg. ARM can cause a zero timeout attempt to fail even when there
            // is no contention at all
            if state
                .locked
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(Self { state });
            }

            if crate::clock::monotonic_nanos() >= deadline {
                return None;
            }

            crate::clock::sleep_nanos(SPIN_GUARD_SLEEP_NANOS);
        }
    }
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        if cfg!(debug_assertions) {
            let was_locked = self.state.locked.swap(false, Ordering::Release);
            debug_assert!(was_locked, "released a spin guard that was not locked");
        } else {
            self.state.locked.store(false, Ordering::Release);
        }
    }
}
