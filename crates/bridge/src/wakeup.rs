// Chunk: docs/chunks/wakeup_signal - Coalescing cross-thread wakeup
//! Wakeup signal for the poll thread.
//!
//! `WakeupSignal` is the bridge's view of the secondary loop's injected wait
//! handle. Triggering it makes the poll thread's blocking poll return so it
//! recomputes its timeout and requests a drain. Triggers coalesce: any number
//! of triggers before the poll thread consumes the signal behave as one.

use loop_bridge_reactor::LoopWaker;

/// Cross-thread, coalescing wakeup. Cheap to clone; `Send + Sync`.
#[derive(Clone, Debug)]
pub struct WakeupSignal {
    waker: LoopWaker,
}

impl WakeupSignal {
    pub fn new(waker: LoopWaker) -> Self {
        Self { waker }
    }

    /// Forces the poll thread's blocking poll to return soon.
    ///
    /// Callable from any thread and never blocks. Returns true if this call
    /// armed the wakeup, false if it was coalesced into a pending one.
    pub fn trigger(&self) -> bool {
        let armed = self.waker.wake();
        if armed {
            tracing::trace!("wakeup signal armed");
        }
        armed
    }

    /// Clears the pending state. Called only by the poll thread, after its
    /// poll reported the wakeup.
    pub fn consume(&self) {
        self.waker.consume();
    }

    /// True if triggered and not yet consumed.
    pub fn is_pending(&self) -> bool {
        self.waker.is_pending()
    }
}
