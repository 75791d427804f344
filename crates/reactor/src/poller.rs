// Chunk: docs/chunks/secondary_loop - mio-backed secondary event loop
//! The blocking half of the loop.

use std::io;
use std::time::Duration;

use mio::{Events, Poll};

use crate::io::Readiness;
use crate::waker::WAKE_TOKEN;
use crate::EventLoop;

/// Result of one blocking poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollOutcome {
    /// Number of I/O events queued for the next drain
    pub io_events: usize,
    /// Whether the loop's [`LoopWaker`](crate::LoopWaker) fired
    pub woken: bool,
}

/// Owns the OS selector for one [`EventLoop`].
///
/// There is exactly one `Poller` per loop. It is `Send`, so it can be moved to
/// a dedicated thread that does nothing but block in [`Poller::poll`] while
/// another thread drains callbacks.
pub struct Poller {
    poll: Poll,
    events: Events,
    event_loop: EventLoop,
}

impl Poller {
    pub(crate) fn new(poll: Poll, capacity: usize, event_loop: EventLoop) -> Self {
        Self {
            poll,
            events: Events::with_capacity(capacity),
            event_loop,
        }
    }

    /// Blocks until a registered source is ready, the waker fires, or
    /// `timeout` elapses (`None` waits indefinitely).
    ///
    /// Ready I/O is queued on the loop for the next drain; no callback runs
    /// here. The waker's pending state is left for the caller to
    /// [`consume`](crate::LoopWaker::consume). An interrupted system call is
    /// reported as an empty outcome.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<PollOutcome> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                return Ok(PollOutcome::default());
            }
            Err(err) => return Err(err),
        }

        let mut outcome = PollOutcome::default();
        let mut ready = Vec::new();
        for event in self.events.iter() {
            if event.token() == WAKE_TOKEN {
                outcome.woken = true;
            } else {
                ready.push((event.token(), Readiness::from(event)));
            }
        }

        outcome.io_events = ready.len();
        if !ready.is_empty() {
            self.event_loop.queue_ready(ready);
        }
        Ok(outcome)
    }

    /// The loop this poller belongs to.
    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller").finish_non_exhaustive()
    }
}
