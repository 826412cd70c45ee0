// Mutex + condition variable pair, one per logical resource.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

/// A monitor protecting `T`.
///
/// Every blocking wait in the crate goes through one of these and acquires
/// only its own monitor, so no wait ever spans two resources.
pub struct Monitor<T> {
    state: Mutex<T>,
    cond: Condvar,
}

impl<T: Default> Default for Monitor<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Monitor<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(value),
            cond: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock()
    }

    /// Block until notified. Spurious wakeups are possible.
    pub fn wait(&self, guard: &mut MutexGuard<'_, T>) {
        self.cond.wait(guard);
    }

    /// Block while `condition` holds. There is no timeout.
    pub fn wait_while<F>(&self, guard: &mut MutexGuard<'_, T>, mut condition: F)
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut **guard) {
            self.cond.wait(guard);
        }
    }

    /// Block while `condition` holds or until `deadline`.
    /// Returns `false` if the deadline passed with the condition still true.
    pub fn wait_while_until<F>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        deadline: Instant,
        mut condition: F,
    ) -> bool
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut **guard) {
            if self.cond.wait_until(guard, deadline).timed_out() {
                return !condition(&mut **guard);
            }
        }
        true
    }

    pub fn notify_one(&self) {
        self.cond.notify_one();
    }

    pub fn notify_all(&self) {
        self.cond.notify_all();
    }
}
