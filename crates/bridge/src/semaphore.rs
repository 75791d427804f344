// Chunk: docs/chunks/handshake_semaphore - Poll thread / UI thread turn-taking
//! Counting semaphore that hands the turn back and forth between the UI
//! thread and the poll thread.
//!
//! The poll thread calls [`HandshakeSemaphore::wait`] after posting a drain
//! request; the UI thread calls [`HandshakeSemaphore::release`] once that
//! drain is done. In steady state the count alternates between 0 and 1, so at
//! most one drain request is ever in flight.

#[cfg(test)]
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A counting semaphore, initially zero.
#[derive(Debug, Default)]
pub struct HandshakeSemaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl HandshakeSemaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one permit and wakes a waiter.
    pub fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.available.notify_one();
    }

    /// Blocks until a permit is available, then takes it.
    pub fn wait(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Like [`HandshakeSemaphore::wait`] but gives up after `timeout`.
    ///
    /// Returns true if a permit was taken.
    #[cfg(test)]
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut permits = self.permits.lock();
        let deadline = std::time::Instant::now() + timeout;
        while *permits == 0 {
            if self.available.wait_until(&mut permits, deadline).timed_out() {
                break;
            }
        }
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Current number of permits.
    pub fn permits(&self) -> usize {
        *self.permits.lock()
    }
}
