// Chunk: docs/chunks/secondary_loop - mio-backed secondary event loop
//! The secondary event loop.
//!
//! # Threading
//!
//! [`EventLoop`] is a cloneable `Send + Sync` handle. Its state sits behind a
//! mutex that is never held while a callback runs, so callbacks may freely
//! schedule more work. Two kinds of threads touch it:
//!
//! - The **drainer** runs callbacks through [`EventLoop::run_once_nowait`].
//!   A guard flag ensures at most one drain executes at a time; a nested or
//!   concurrent drain returns immediately.
//! - The **poller owner** only calls [`EventLoop::update_time`],
//!   [`EventLoop::next_timeout`] and [`Poller::poll`], none of which run
//!   callbacks.
//!
//! In self-driven mode ([`EventLoop::run`]) both roles are the same thread.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Interest, Poll, Registry, Token};
use parking_lot::Mutex;

use crate::io::{IoEvent, Readiness, Watch, Watcher, WatcherId};
use crate::poller::Poller;
use crate::timers::{TimerCallback, TimerHeap, TimerId};
use crate::waker::{LoopWaker, WAKE_TOKEN};

/// Default capacity of the poller's events buffer.
const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Deadline used for delays too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

type Immediate = Box<dyn FnOnce(&EventLoop) + Send>;

/// How [`EventLoop::run`] drives the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run until the loop is no longer alive or [`EventLoop::stop`] is called.
    Default,
    /// Drain, block for one poll if still alive, then drain again.
    Once,
    /// Drain once without blocking.
    NoWait,
}

/// Handle to a secondary event loop.
#[derive(Clone)]
pub struct EventLoop {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<LoopState>,
    /// Registry clone so sources can be (de)registered while the poll blocks
    registry: Registry,
    waker: LoopWaker,
    /// Set while a drain is executing callbacks
    draining: AtomicBool,
}

struct LoopState {
    /// Cached loop time, refreshed by `update_time` and at the start of a drain
    now: Instant,
    timers: TimerHeap,
    immediates: VecDeque<Immediate>,
    /// I/O readiness collected by the poller, waiting for a drain
    ready: Vec<(Token, Readiness)>,
    watchers: HashMap<Token, Box<dyn Watch>>,
    /// Watchers checked out of the table while their callback runs
    dispatching: HashSet<Token>,
    /// Watchers deregistered from inside their own callback
    cancelled: HashSet<Token>,
    next_token: usize,
    stop_requested: bool,
}

/// `delay` from now, clamped for delays such as `Duration::MAX`.
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Releases the single-drainer flag, including during unwinding.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| DrainGuard(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl EventLoop {
    /// Creates a loop and its poller.
    pub fn new() -> io::Result<(EventLoop, Poller)> {
        Self::with_capacity(DEFAULT_EVENTS_CAPACITY)
    }

    /// Creates a loop whose poller collects up to `events_capacity` events
    /// per poll.
    pub fn with_capacity(events_capacity: usize) -> io::Result<(EventLoop, Poller)> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = LoopWaker::new(poll.registry())?;

        let event_loop = EventLoop {
            shared: Arc::new(Shared {
                state: Mutex::new(LoopState {
                    now: Instant::now(),
                    timers: TimerHeap::default(),
                    immediates: VecDeque::new(),
                    ready: Vec::new(),
                    watchers: HashMap::new(),
                    dispatching: HashSet::new(),
                    cancelled: HashSet::new(),
                    next_token: WAKE_TOKEN.0 + 1,
                    stop_requested: false,
                }),
                registry,
                waker,
                draining: AtomicBool::new(false),
            }),
        };
        let poller = Poller::new(poll, events_capacity.max(1), event_loop.clone());
        Ok((event_loop, poller))
    }

    /// Returns the loop's cross-thread waker.
    pub fn waker(&self) -> LoopWaker {
        self.shared.waker.clone()
    }

    /// Cached loop time.
    pub fn now(&self) -> Instant {
        self.shared.state.lock().now
    }

    /// Refreshes the cached loop time. Runs no callbacks.
    pub fn update_time(&self) {
        self.shared.state.lock().now = Instant::now();
    }

    /// How long the poller may block before the loop has work to do.
    ///
    /// `Some(ZERO)` if work is already queued or a stop was requested,
    /// the time to the earliest timer relative to the cached loop time
    /// otherwise, and `None` if no timer is armed.
    pub fn next_timeout(&self) -> Option<Duration> {
        let mut state = self.shared.state.lock();
        if state.stop_requested || !state.ready.is_empty() || !state.immediates.is_empty() {
            return Some(Duration::ZERO);
        }
        let now = state.now;
        state
            .timers
            .earliest()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// True while any timer, watcher or queued callback exists.
    pub fn is_alive(&self) -> bool {
        let state = self.shared.state.lock();
        state.timers.len() > 0
            || !state.watchers.is_empty()
            || !state.dispatching.is_empty()
            || !state.immediates.is_empty()
            || !state.ready.is_empty()
    }

    /// Runs `callback` once after `delay`.
    pub fn set_timeout(
        &self,
        delay: Duration,
        callback: impl FnOnce(&EventLoop) + Send + 'static,
    ) -> TimerId {
        self.arm_timer(delay, TimerCallback::Once(Box::new(callback)))
    }

    /// Runs `callback` every `period` until cleared.
    pub fn set_interval(
        &self,
        period: Duration,
        callback: impl FnMut(&EventLoop) + Send + 'static,
    ) -> TimerId {
        self.arm_timer(
            period,
            TimerCallback::Repeat {
                callback: Box::new(callback),
                period,
            },
        )
    }

    fn arm_timer(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        let (id, is_earliest) = {
            let mut state = self.shared.state.lock();
            let deadline = deadline_after(delay);
            let previous = state.timers.earliest();
            let id = state.timers.insert(deadline, callback);
            (id, previous.map_or(true, |earliest| deadline < earliest))
        };

        // A blocked poll computed its timeout from the old earliest deadline.
        if is_earliest {
            self.shared.waker.wake();
        }
        id
    }

    /// Cancels a timer. Returns false if it already fired or was cleared.
    pub fn clear_timer(&self, id: TimerId) -> bool {
        self.shared.state.lock().timers.remove(id)
    }

    /// Queues `callback` for the next drain. Callable from any thread.
    pub fn post(&self, callback: impl FnOnce(&EventLoop) + Send + 'static) {
        self.shared
            .state
            .lock()
            .immediates
            .push_back(Box::new(callback));
        self.shared.waker.wake();
    }

    /// Watches `source` for `interest`; `callback` runs during drains while
    /// the source is ready.
    pub fn register<S, F>(&self, mut source: S, interest: Interest, callback: F) -> io::Result<WatcherId>
    where
        S: Source + Send + 'static,
        F: FnMut(&EventLoop, IoEvent<'_, S>) + Send + 'static,
    {
        // Registered under the state lock so no drain can see readiness for
        // a token whose watcher is not in the table yet.
        let mut state = self.shared.state.lock();
        let token = Token(state.next_token);
        self.shared.registry.register(&mut source, token, interest)?;
        state.next_token += 1;
        state.watchers.insert(token, Box::new(Watcher { source, callback }));
        Ok(WatcherId(token))
    }

    /// Stops watching a source and drops it.
    ///
    /// May be called from inside the watcher's own callback, in which case
    /// the source is deregistered once the callback returns. Returns false if
    /// the watcher is unknown.
    pub fn deregister(&self, id: WatcherId) -> io::Result<bool> {
        let mut state = self.shared.state.lock();
        state.ready.retain(|(token, _)| *token != id.0);

        if let Some(mut watcher) = state.watchers.remove(&id.0) {
            drop(state);
            watcher.deregister(&self.shared.registry)?;
            return Ok(true);
        }
        if state.dispatching.contains(&id.0) {
            state.cancelled.insert(id.0);
            return Ok(true);
        }
        Ok(false)
    }

    /// Asks a running [`EventLoop::run`] to return after its current pass.
    pub fn stop(&self) {
        self.shared.state.lock().stop_requested = true;
        self.shared.waker.wake();
    }

    /// Runs every callback that is ready now, without blocking.
    ///
    /// A pass runs, in order: timers due at the start of the pass, callbacks
    /// for I/O readiness collected by the poller, and immediates queued before
    /// the pass began. Work created during the pass waits for the next one.
    ///
    /// Returns the number of callbacks executed. Returns 0 immediately if
    /// another drain is already executing (nested or on another thread).
    pub fn run_once_nowait(&self) -> usize {
        let Some(_guard) = DrainGuard::acquire(&self.shared.draining) else {
            tracing::trace!("drain skipped: loop is already draining");
            return 0;
        };

        let (due, ready, immediates) = {
            let mut state = self.shared.state.lock();
            state.now = Instant::now();
            let now = state.now;
            (
                state.timers.take_due(now),
                std::mem::take(&mut state.ready),
                std::mem::take(&mut state.immediates),
            )
        };

        let mut executed = 0;
        for (id, callback) in due {
            self.fire_timer(id, callback);
            executed += 1;
        }
        for (token, readiness) in ready {
            if self.dispatch_io(token, readiness) {
                executed += 1;
            }
        }
        for immediate in immediates {
            immediate(self);
            executed += 1;
        }
        executed
    }

    fn fire_timer(&self, id: TimerId, callback: TimerCallback) {
        match callback {
            TimerCallback::Once(callback) => callback(self),
            TimerCallback::Repeat {
                mut callback,
                period,
            } => {
                callback(self);
                let deadline = deadline_after(period);
                self.shared.state.lock().timers.rearm(
                    id,
                    deadline,
                    TimerCallback::Repeat { callback, period },
                );
            }
        }
    }

    fn dispatch_io(&self, token: Token, readiness: Readiness) -> bool {
        let mut watcher = {
            let mut state = self.shared.state.lock();
            match state.watchers.remove(&token) {
                Some(watcher) => {
                    state.dispatching.insert(token);
                    watcher
                }
                None => return false,
            }
        };

        watcher.dispatch(self, WatcherId(token), readiness);

        let mut state = self.shared.state.lock();
        state.dispatching.remove(&token);
        if state.cancelled.remove(&token) {
            drop(state);
            if let Err(err) = watcher.deregister(&self.shared.registry) {
                tracing::warn!(%err, ?token, "failed to deregister watcher");
            }
        } else {
            state.watchers.insert(token, watcher);
        }
        true
    }

    /// Queues readiness reported by the poller, merging repeats per watcher.
    pub(crate) fn queue_ready(&self, events: Vec<(Token, Readiness)>) {
        let mut state = self.shared.state.lock();
        for (token, readiness) in events {
            match state.ready.iter_mut().find(|(queued, _)| *queued == token) {
                Some(entry) => entry.1 = entry.1.merge(readiness),
                None => state.ready.push((token, readiness)),
            }
        }
    }

    fn take_stop_request(&self) -> bool {
        std::mem::take(&mut self.shared.state.lock().stop_requested)
    }

    /// Drives the loop on the calling thread.
    ///
    /// Returns whether the loop is still alive when `run` returns, i.e. true
    /// if it returned because of [`EventLoop::stop`] or `mode` with work left.
    pub fn run(&self, poller: &mut Poller, mode: RunMode) -> io::Result<bool> {
        debug_assert!(
            Arc::ptr_eq(&poller.event_loop().shared, &self.shared),
            "poller belongs to a different loop"
        );

        loop {
            self.run_once_nowait();
            if self.take_stop_request() || mode == RunMode::NoWait || !self.is_alive() {
                break;
            }

            self.update_time();
            let outcome = poller.poll(self.next_timeout())?;
            if outcome.woken {
                self.shared.waker.consume();
            }

            if mode == RunMode::Once {
                self.run_once_nowait();
                break;
            }
        }
        Ok(self.is_alive())
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}
