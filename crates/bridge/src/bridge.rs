// Chunk: docs/chunks/loop_bridge - Host message loop / secondary loop integration
//! The loop bridge.
//!
//! `LoopBridge` owns the secondary loop, the poll thread and the handshake
//! between them. The host UI thread sees two entry points:
//!
//! - drain tasks the poll thread posts through the [`HostScheduler`], each of
//!   which runs the secondary loop once and hands the turn back to the poll
//!   thread
//! - [`LoopBridge::run_secondary_loop_once`], an opportunistic drain that does
//!   not touch the handshake
//!
//! # State machine
//!
//! ```text
//! Unprepared ──prepare_integration──► Integrated ──shutdown──► Closing ──join──► Closed
//! ```
//!
//! Secondary-loop callbacks only ever run on the UI thread, and only while
//! the bridge is `Integrated` (or on the thread inside `run_forever`).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, ThreadId};

use loop_bridge_reactor::{EventLoop, Poller, RunMode};
use parking_lot::Mutex;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::poll_thread::{EmbedPollThread, PollContext};
use crate::scheduler::HostScheduler;
use crate::semaphore::HandshakeSemaphore;
use crate::wakeup::WakeupSignal;

/// Lifecycle of a [`LoopBridge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Created; no poll thread yet.
    Unprepared,
    /// The poll thread is running and drains are accepted.
    Integrated,
    /// Shutdown requested; waiting for the poll thread to exit.
    Closing,
    /// The poll thread has been joined. Terminal.
    Closed,
}

/// Counters describing the bridge's activity so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Drain tasks posted to the host scheduler by the poll thread.
    pub drain_requests: u64,
    /// Poll-initiated drains that ran while integrated.
    pub poll_drains: u64,
    /// Opportunistic drains that ran while integrated.
    pub idle_drains: u64,
    /// Secondary-loop callbacks executed by drains.
    pub callbacks_run: u64,
    /// Most drain requests ever outstanding at once.
    pub max_outstanding: usize,
    /// The poll thread stopped because its poll failed. No poll-initiated
    /// drains happen after this; only opportunistic ones.
    pub poll_failed: bool,
}

/// Which path asked for a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainOrigin {
    /// A drain task posted by the poll thread; owes the handshake a release.
    PollThread,
    /// An opportunistic call from the host.
    Idle,
}

#[derive(Default)]
struct Counters {
    drain_requests: AtomicU64,
    /// Drain tasks posted but not yet started
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
    poll_drains: AtomicU64,
    idle_drains: AtomicU64,
    callbacks_run: AtomicU64,
    poll_failed: Arc<AtomicBool>,
}

impl Counters {
    fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            drain_requests: self.drain_requests.load(Ordering::Relaxed),
            poll_drains: self.poll_drains.load(Ordering::Relaxed),
            idle_drains: self.idle_drains.load(Ordering::Relaxed),
            callbacks_run: self.callbacks_run.load(Ordering::Relaxed),
            max_outstanding: self.max_outstanding.load(Ordering::Relaxed),
            poll_failed: self.poll_failed.load(Ordering::Acquire),
        }
    }
}

struct BridgeInner {
    event_loop: EventLoop,
    /// Taken by the poll thread at prepare, or borrowed by `run_forever`
    poller: Mutex<Option<Poller>>,
    scheduler: Arc<dyn HostScheduler>,
    signal: WakeupSignal,
    handshake: Arc<HandshakeSemaphore>,
    closed: Arc<AtomicBool>,
    state: Mutex<BridgeState>,
    embed_thread: Mutex<Option<EmbedPollThread>>,
    ui_thread: OnceLock<ThreadId>,
    running_forever: AtomicBool,
    counters: Arc<Counters>,
    config: BridgeConfig,
}

/// Interleaves a host UI message loop with a secondary event loop.
///
/// Construct it on the UI thread, call [`prepare_integration`] once, and call
/// [`shutdown`] (or drop it) before the host loop goes away.
///
/// [`prepare_integration`]: LoopBridge::prepare_integration
/// [`shutdown`]: LoopBridge::shutdown
pub struct LoopBridge {
    inner: Arc<BridgeInner>,
}

impl LoopBridge {
    /// Creates a bridge over a fresh secondary loop.
    pub fn create(
        scheduler: impl HostScheduler,
        config: BridgeConfig,
    ) -> Result<Self, BridgeError> {
        let (event_loop, poller) =
            EventLoop::with_capacity(config.events_capacity).map_err(BridgeError::CreateLoop)?;
        Ok(Self::new(event_loop, poller, Arc::new(scheduler), config))
    }

    /// Creates a bridge over an existing loop and its poller.
    pub fn new(
        event_loop: EventLoop,
        poller: Poller,
        scheduler: Arc<dyn HostScheduler>,
        config: BridgeConfig,
    ) -> Self {
        let signal = WakeupSignal::new(event_loop.waker());
        Self {
            inner: Arc::new(BridgeInner {
                event_loop,
                poller: Mutex::new(Some(poller)),
                scheduler,
                signal,
                handshake: Arc::new(HandshakeSemaphore::new()),
                closed: Arc::new(AtomicBool::new(false)),
                state: Mutex::new(BridgeState::Unprepared),
                embed_thread: Mutex::new(None),
                ui_thread: OnceLock::new(),
                running_forever: AtomicBool::new(false),
                counters: Arc::new(Counters::default()),
                config,
            }),
        }
    }

    /// The secondary loop. Schedule timers, immediates and watchers here.
    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    /// A clone of the poll thread's wakeup signal.
    pub fn wakeup_signal(&self) -> WakeupSignal {
        self.inner.signal.clone()
    }

    /// Makes the poll thread re-evaluate the secondary loop soon.
    ///
    /// Call this after queueing secondary-loop work from outside a drain.
    /// Callable from any thread; triggers coalesce.
    pub fn wakeup_embed_thread(&self) {
        self.inner.signal.trigger();
    }

    pub fn state(&self) -> BridgeState {
        *self.inner.state.lock()
    }

    pub fn stats(&self) -> BridgeStats {
        self.inner.counters.snapshot()
    }

    /// Starts the poll thread. Call once, from the UI thread.
    ///
    /// The calling thread becomes the UI thread: every drain must run there.
    /// Calling this in any state other than `Unprepared` is misuse: it asserts
    /// in debug builds and is otherwise a logged no-op.
    pub fn prepare_integration(&self) -> Result<(), BridgeError> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if *state != BridgeState::Unprepared {
            tracing::error!(state = ?*state, "prepare_integration called more than once");
            debug_assert!(false, "prepare_integration called in state {:?}", *state);
            return Ok(());
        }

        let poller = inner
            .poller
            .lock()
            .take()
            .ok_or(BridgeError::PollerUnavailable)?;

        let _ = inner.ui_thread.set(thread::current().id());

        let context = PollContext {
            event_loop: inner.event_loop.clone(),
            poller,
            signal: inner.signal.clone(),
            handshake: inner.handshake.clone(),
            closed: inner.closed.clone(),
            max_poll_timeout: inner.config.max_poll_timeout(),
            poll_failed: inner.counters.poll_failed.clone(),
            request_drain: drain_requester(inner),
        };

        let thread = EmbedPollThread::spawn(
            &inner.config.thread_name,
            inner.config.stack_size,
            context,
        )
        .map_err(|err| {
            tracing::error!(%err, "failed to spawn poll thread");
            BridgeError::SpawnThread(err)
        })?;

        *inner.embed_thread.lock() = Some(thread);
        *state = BridgeState::Integrated;
        tracing::info!(thread = %inner.config.thread_name, "secondary loop integrated");
        Ok(())
    }

    /// Runs every secondary-loop callback that is ready now, without blocking.
    ///
    /// For opportunistic use on the UI thread (idle time). It never releases
    /// the handshake, so the poll thread keeps its single outstanding request.
    /// A logged no-op unless the bridge is `Integrated`. Returns the number of
    /// callbacks executed.
    pub fn run_secondary_loop_once(&self) -> usize {
        drain(&self.inner, DrainOrigin::Idle)
    }

    /// Runs the secondary loop on the calling thread until it has no work left
    /// or [`shutdown`](LoopBridge::shutdown) is called.
    ///
    /// For processes whose primary loop is the secondary loop; no poll thread
    /// or handshake is involved. Calling it on an integrated bridge is misuse.
    pub fn run_forever(&self) -> Result<(), BridgeError> {
        let inner = &self.inner;
        {
            let state = inner.state.lock();
            if *state != BridgeState::Unprepared {
                tracing::error!(state = ?*state, "run_forever called on a prepared bridge");
                debug_assert!(
                    *state != BridgeState::Integrated,
                    "run_forever called while integrated"
                );
                return Err(BridgeError::PollerUnavailable);
            }
        }

        let mut poller = inner
            .poller
            .lock()
            .take()
            .ok_or(BridgeError::PollerUnavailable)?;

        inner.running_forever.store(true, Ordering::SeqCst);
        tracing::debug!("running secondary loop forever");
        let result = inner.event_loop.run(&mut poller, RunMode::Default);
        inner.running_forever.store(false, Ordering::SeqCst);
        *inner.poller.lock() = Some(poller);

        let alive = result.map_err(BridgeError::Poll)?;
        tracing::debug!(alive, "secondary loop returned");
        Ok(())
    }

    /// Stops the poll thread and waits for it to exit. Idempotent.
    ///
    /// Without a prior `prepare_integration` this only stops a loop running
    /// in [`run_forever`](LoopBridge::run_forever); the bridge stays
    /// `Unprepared` and can still be integrated later. Drain tasks still
    /// queued in the host run as no-ops.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if *state != BridgeState::Integrated {
                drop(state);
                if inner.running_forever.load(Ordering::SeqCst) {
                    inner.event_loop.stop();
                }
                return;
            }
            inner.closed.store(true, Ordering::SeqCst);
            *state = BridgeState::Closing;
        }
        tracing::debug!("shutting down loop bridge");

        inner.signal.trigger();
        // The poll thread may be waiting for a drain that will never run.
        inner.handshake.release();

        if let Some(thread) = inner.embed_thread.lock().take() {
            thread.join();
        }

        *inner.state.lock() = BridgeState::Closed;
        tracing::info!("loop bridge closed");
    }
}

impl Drop for LoopBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LoopBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopBridge")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Builds the closure the poll thread calls to request a drain.
fn drain_requester(inner: &Arc<BridgeInner>) -> Box<dyn Fn() + Send> {
    let weak = Arc::downgrade(inner);
    let scheduler = inner.scheduler.clone();
    let counters = inner.counters.clone();

    Box::new(move || {
        counters.drain_requests.fetch_add(1, Ordering::Relaxed);
        let outstanding = counters.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        counters
            .max_outstanding
            .fetch_max(outstanding, Ordering::Relaxed);

        let weak: Weak<BridgeInner> = weak.clone();
        scheduler.post_task(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.counters.outstanding.fetch_sub(1, Ordering::AcqRel);
            drain(&inner, DrainOrigin::PollThread);
        }));
    })
}

/// Releases the handshake when dropped, including during unwinding.
struct HandshakeRelease<'a>(&'a HandshakeSemaphore);

impl Drop for HandshakeRelease<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

fn drain(inner: &BridgeInner, origin: DrainOrigin) -> usize {
    let state = *inner.state.lock();
    if state != BridgeState::Integrated {
        tracing::debug!(?state, ?origin, "drain ignored: bridge not integrated");
        return 0;
    }

    debug_assert!(
        inner
            .ui_thread
            .get()
            .map_or(true, |id| *id == thread::current().id()),
        "secondary loop drained off the UI thread"
    );

    // Hands the turn back even if a callback panics.
    let _release = match origin {
        DrainOrigin::PollThread => Some(HandshakeRelease(&inner.handshake)),
        DrainOrigin::Idle => None,
    };

    let executed = inner.event_loop.run_once_nowait();

    let counters = &inner.counters;
    counters
        .callbacks_run
        .fetch_add(executed as u64, Ordering::Relaxed);
    match origin {
        DrainOrigin::PollThread => {
            counters.poll_drains.fetch_add(1, Ordering::Relaxed);
        }
        DrainOrigin::Idle => {
            counters.idle_drains.fetch_add(1, Ordering::Relaxed);
        }
    }
    tracing::trace!(?origin, executed, "drained secondary loop");
    executed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Task;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// A scheduler that drops every task: nothing is ever drained by the
    /// poll thread, so only opportunistic drains run.
    fn discarding_scheduler() -> impl HostScheduler {
        |_task: Task| {}
    }

    #[test]
    fn test_new_bridge_is_unprepared() {
        let bridge = LoopBridge::create(discarding_scheduler(), BridgeConfig::default()).unwrap();
        assert_eq!(bridge.state(), BridgeState::Unprepared);
        assert_eq!(bridge.stats(), BridgeStats::default());
    }

    #[test]
    fn test_drain_before_prepare_is_a_noop() {
        let bridge = LoopBridge::create(discarding_scheduler(), BridgeConfig::default()).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        bridge.event_loop().post(move |_| {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bridge.run_secondary_loop_once(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.stats().idle_drains, 0);
    }

    #[test]
    fn test_idle_drain_runs_work_without_releasing_handshake() {
        let bridge = LoopBridge::create(discarding_scheduler(), BridgeConfig::default()).unwrap();
        bridge.prepare_integration().unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = ran.clone();
            bridge.event_loop().post(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(bridge.run_secondary_loop_once(), 3);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert_eq!(bridge.inner.handshake.permits(), 0);

        let stats = bridge.stats();
        assert_eq!(stats.idle_drains, 1);
        assert_eq!(stats.poll_drains, 0);
        assert_eq!(stats.callbacks_run, 3);

        bridge.shutdown();
    }

    #[test]
    fn test_poll_drain_releases_handshake_once() {
        let bridge = LoopBridge::create(discarding_scheduler(), BridgeConfig::default()).unwrap();
        *bridge.inner.state.lock() = BridgeState::Integrated;

        drain(&bridge.inner, DrainOrigin::PollThread);
        assert_eq!(bridge.inner.handshake.permits(), 1);
        drain(&bridge.inner, DrainOrigin::Idle);
        assert_eq!(bridge.inner.handshake.permits(), 1);
    }

    #[test]
    fn test_poll_thread_requests_through_scheduler() {
        let posted = Arc::new(AtomicUsize::new(0));
        let posted_clone = posted.clone();
        let scheduler = move |_task: Task| {
            posted_clone.fetch_add(1, Ordering::SeqCst);
        };

        let bridge = LoopBridge::create(scheduler, BridgeConfig::default()).unwrap();
        bridge.prepare_integration().unwrap();
        bridge.wakeup_embed_thread();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while posted.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        // The task was dropped, so the poll thread is parked on the handshake
        // and has exactly one request outstanding.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(posted.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.stats().drain_requests, 1);
        assert_eq!(bridge.stats().max_outstanding, 1);

        bridge.shutdown();
        assert_eq!(bridge.state(), BridgeState::Closed);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "prepare_integration called")]
    fn test_double_prepare_asserts_in_debug() {
        let bridge = LoopBridge::create(discarding_scheduler(), BridgeConfig::default()).unwrap();
        bridge.prepare_integration().unwrap();
        let _ = bridge.prepare_integration();
    }

    #[test]
    fn test_shutdown_without_prepare_is_noop() {
        let mut message_loop = crate::MessageLoop::new();
        let bridge = LoopBridge::create(message_loop.proxy(), BridgeConfig::default()).unwrap();
        bridge.shutdown();
        assert_eq!(bridge.state(), BridgeState::Unprepared);
        bridge.shutdown();
        assert_eq!(bridge.state(), BridgeState::Unprepared);

        // The bridge is still fully usable afterwards.
        bridge.prepare_integration().unwrap();
        assert_eq!(bridge.state(), BridgeState::Integrated);

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        bridge
            .event_loop()
            .set_timeout(Duration::from_millis(10), move |_| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            });
        assert!(message_loop.run_until(Duration::from_secs(2), || {
            fired.load(Ordering::SeqCst) == 1
        }));
        assert!(bridge.stats().drain_requests >= 1);

        bridge.shutdown();
        assert_eq!(bridge.state(), BridgeState::Closed);
    }

    #[test]
    fn test_run_forever_after_shutdown_without_prepare_still_runs() {
        let bridge = LoopBridge::create(discarding_scheduler(), BridgeConfig::default()).unwrap();
        bridge.shutdown();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        bridge
            .event_loop()
            .set_timeout(Duration::from_millis(5), move |_| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            });

        bridge.run_forever().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_poll_drain_still_releases_handshake() {
        let bridge = LoopBridge::create(discarding_scheduler(), BridgeConfig::default()).unwrap();
        *bridge.inner.state.lock() = BridgeState::Integrated;
        bridge.event_loop().post(|_| panic!("callback failed"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            drain(&bridge.inner, DrainOrigin::PollThread)
        }));
        assert!(result.is_err());
        assert_eq!(bridge.inner.handshake.permits(), 1);
    }

    #[test]
    fn test_run_forever_runs_to_completion() {
        let bridge = LoopBridge::create(discarding_scheduler(), BridgeConfig::default()).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        bridge
            .event_loop()
            .set_timeout(Duration::from_millis(5), move |_| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            });

        bridge.run_forever().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!bridge.event_loop().is_alive());
    }
}
