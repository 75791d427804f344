// Chunk: docs/chunks/wakeup_signal - Coalescing cross-thread wakeup
//! The loop's cross-thread wait handle.
//!
//! [`LoopWaker`] wraps a [`mio::Waker`] registered on the loop's own poll, so
//! calling [`LoopWaker::wake`] from any thread makes a blocked
//! [`Poller::poll`](crate::Poller::poll) return. A `pending` flag coalesces
//! repeated wakes: only the first wake after a [`LoopWaker::consume`] touches
//! the OS primitive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::{Registry, Token};

/// Token reserved for the waker on every loop's poll.
pub(crate) const WAKE_TOKEN: Token = Token(0);

/// Cloneable handle that interrupts the loop's blocking poll.
///
/// `Send + Sync`; every clone shares the same pending flag.
#[derive(Clone)]
pub struct LoopWaker {
    inner: Arc<WakerInner>,
}

struct WakerInner {
    waker: mio::Waker,
    /// True between a wake and the poll owner consuming it
    pending: AtomicBool,
}

impl LoopWaker {
    pub(crate) fn new(registry: &Registry) -> std::io::Result<Self> {
        Ok(Self {
            inner: Arc::new(WakerInner {
                waker: mio::Waker::new(registry, WAKE_TOKEN)?,
                pending: AtomicBool::new(false),
            }),
        })
    }

    /// Wakes the thread blocked in the loop's poll. Never blocks.
    ///
    /// Returns `true` if this call armed a new wakeup, `false` if one was
    /// already pending and this call was coalesced into it.
    pub fn wake(&self) -> bool {
        if self.inner.pending.swap(true, Ordering::AcqRel) {
            return false;
        }

        // The poll may already be gone (thread exited); nothing to wake then.
        if let Err(err) = self.inner.waker.wake() {
            tracing::trace!(%err, "loop waker: wake failed");
        }
        true
    }

    /// Clears the pending wakeup.
    ///
    /// Only the owner of the blocking poll calls this, after the poll
    /// reported the waker's event.
    pub fn consume(&self) {
        self.inner.pending.store(false, Ordering::Release);
    }

    /// Returns true if a wakeup has been armed and not yet consumed.
    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for LoopWaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopWaker")
            .field("pending", &self.is_pending())
            .finish()
    }
}
