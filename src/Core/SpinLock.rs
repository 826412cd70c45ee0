// Single-writer / multi-reader spin lock guarding "a fork is in progress".

use crossbeam_utils::{Backoff, CachePadded};
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release, SeqCst};

use super::futex::{futex_wait, futex_wake_all};

/// Bit set while a writer holds (or is draining readers for) the lock.
const WRITER: u32 = 1 << 31;

/// The fork lock.
///
/// Ordinary threads take the read side to prove no fork is mutating
/// process-wide state while they act. Only the forking thread takes the write
/// side. The whole lock is a single word so the child copy of a fork can
/// reset it without caring which threads held it in the parent.
pub struct ReadWriteSpinLock {
    /// Bit 31 is the writer flag, the low bits count active readers.
    state: CachePadded<AtomicU32>,
}

impl Default for ReadWriteSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadWriteSpinLock {
    pub const fn new() -> Self {
        Self {
            state: CachePadded::new(AtomicU32::new(0)),
        }
    }

    /// Acquire the read side, spinning (then parking) while a writer is active.
    pub fn read(&self) -> ReadGuard<'_> {
        let backoff = Backoff::new();
        loop {
            let current = self.state.load(Relaxed);
            if current & WRITER == 0 {
                if self
                    .state
                    .compare_exchange_weak(current, current + 1, AcqRel, Relaxed)
                    .is_ok()
                {
                    return ReadGuard { lock: self };
                }
                backoff.spin();
                continue;
            }
            if backoff.is_completed() {
                futex_wait(&self.state, current);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Acquire the write side. New readers are shut out immediately and the
    /// call returns once existing readers have drained.
    pub fn write(&self) -> WriteGuard<'_> {
        let backoff = Backoff::new();
        loop {
            let current = self.state.load(Relaxed);
            if current & WRITER == 0
                && self
                    .state
                    .compare_exchange_weak(current, current | WRITER, AcqRel, Relaxed)
                    .is_ok()
            {
                break;
            }
            if backoff.is_completed() {
                futex_wait(&self.state, current);
            } else {
                backoff.snooze();
            }
        }

        let backoff = Backoff::new();
        loop {
            let current = self.state.load(Acquire);
            if current == WRITER {
                return WriteGuard { lock: self };
            }
            if backoff.is_completed() {
                futex_wait(&self.state, current);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Number of readers currently inside the lock.
    pub fn readers(&self) -> u32 {
        self.state.load(Relaxed) & !WRITER
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.load(Relaxed) & WRITER != 0
    }

    /// Forget all holders, leaving the lock unlocked.
    ///
    /// Only meaningful in the child copy of a fork: the copied word may record
    /// readers or a writer whose threads do not exist in the new image, so it
    /// is reset rather than released.
    pub fn reset_after_fork(&self) {
        self.state.store(0, SeqCst);
    }

    fn read_unlock(&self) {
        let previous = self.state.fetch_sub(1, Release);
        // Last reader out while a writer is draining.
        if previous == WRITER + 1 {
            futex_wake_all(&self.state);
        }
    }

    fn write_unlock(&self) {
        self.state.fetch_and(!WRITER, Release);
        futex_wake_all(&self.state);
    }
}

/// Read side of the fork lock; released on drop.
pub struct ReadGuard<'a> {
    lock: &'a ReadWriteSpinLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.read_unlock();
    }
}

/// Write side of the fork lock; released on drop.
pub struct WriteGuard<'a> {
    lock: &'a ReadWriteSpinLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.write_unlock();
    }
}
