// Chunk: docs/chunks/embed_poll_thread - Background thread blocking on the secondary loop
//! The embed poll thread.
//!
//! This thread never runs secondary-loop callbacks. Each iteration it:
//!
//! 1. refreshes the loop time,
//! 2. computes how long the loop may sleep (next timer, or forever),
//! 3. blocks in the loop's poll, watching its I/O handles and the wakeup signal,
//! 4. exits if the bridge is closed, otherwise asks the UI thread to drain
//!    and waits on the handshake semaphore until that drain has finished.
//!
//! ```text
//!   poll thread                         UI thread
//!   ───────────                         ─────────
//!   poll() ──returns──► request_drain ──PostTask──► drain()
//!   handshake.wait() ◄───────────── release ◄────────┘
//!   poll() ...
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use loop_bridge_reactor::{EventLoop, PollOutcome, Poller};

use crate::semaphore::HandshakeSemaphore;
use crate::wakeup::WakeupSignal;

/// Everything the poll thread owns or shares with the bridge.
pub(crate) struct PollContext {
    pub event_loop: EventLoop,
    pub poller: Poller,
    pub signal: WakeupSignal,
    pub handshake: Arc<HandshakeSemaphore>,
    /// The bridge's closed flag
    pub closed: Arc<AtomicBool>,
    pub max_poll_timeout: Option<Duration>,
    /// Set when the thread exits because its poll failed
    pub poll_failed: Arc<AtomicBool>,
    /// Posts one drain task to the UI thread
    pub request_drain: Box<dyn Fn() + Send>,
}

/// Handle to the running poll thread.
pub(crate) struct EmbedPollThread {
    handle: JoinHandle<()>,
}

impl EmbedPollThread {
    pub fn spawn(name: &str, stack_size: Option<usize>, context: PollContext) -> io::Result<Self> {
        let mut builder = thread::Builder::new().name(name.to_string());
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }
        let handle = builder.spawn(move || run(context))?;
        Ok(Self { handle })
    }

    /// Waits for the thread to exit. The caller must have set the closed flag
    /// and unblocked the thread first.
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!("poll thread panicked");
        }
    }
}

fn run(context: PollContext) {
    let PollContext {
        event_loop,
        mut poller,
        signal,
        handshake,
        closed,
        max_poll_timeout,
        poll_failed,
        request_drain,
    } = context;

    tracing::debug!("poll thread started");

    while !closed.load(Ordering::Acquire) {
        event_loop.update_time();
        let timeout = cap_timeout(event_loop.next_timeout(), max_poll_timeout);

        if !handle_poll_result(poller.poll(timeout), &signal, &poll_failed) {
            break;
        }

        if closed.load(Ordering::Acquire) {
            break;
        }

        request_drain();
        handshake.wait();
    }

    tracing::debug!("poll thread exiting");
}

/// Consumes the wakeup after a successful poll, or records a failed one.
///
/// Returns false if the thread must stop.
fn handle_poll_result(
    result: io::Result<PollOutcome>,
    signal: &WakeupSignal,
    poll_failed: &AtomicBool,
) -> bool {
    match result {
        Ok(outcome) => {
            if outcome.woken {
                signal.consume();
            }
            tracing::trace!(
                io_events = outcome.io_events,
                woken = outcome.woken,
                "poll returned"
            );
            true
        }
        Err(err) => {
            poll_failed.store(true, Ordering::Release);
            tracing::error!(
                %err,
                "secondary loop poll failed; no further drains will be requested"
            );
            false
        }
    }
}

/// Applies the configured cap to the loop's timeout (`None` is infinite).
fn cap_timeout(timeout: Option<Duration>, cap: Option<Duration>) -> Option<Duration> {
    match (timeout, cap) {
        (Some(timeout), Some(cap)) => Some(timeout.min(cap)),
        (None, cap) => cap,
        (timeout, None) => timeout,
    }
}
