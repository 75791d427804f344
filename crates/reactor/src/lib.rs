// Chunk: docs/chunks/secondary_loop - mio-backed secondary event loop
//! loop-bridge-reactor: the secondary event loop.
//!
//! This crate provides a small libuv-style event loop with timers, immediate
//! callbacks and I/O watchers over `mio`. It can be driven in two ways:
//!
//! - **Self-driven**: the owning thread calls [`EventLoop::run`] with the
//!   [`Poller`], which blocks in the OS selector and drains callbacks until the
//!   loop has nothing left to do.
//! - **Split**: a dedicated thread owns the [`Poller`] and only blocks, while
//!   another thread (the host UI thread) drains ready callbacks with
//!   [`EventLoop::run_once_nowait`]. This is how `loop-bridge` integrates the
//!   loop with a host message loop.
//!
//! # Operations used by the bridge
//!
//! | Operation | Method |
//! | :-- | :-- |
//! | refresh loop time without running anything | [`EventLoop::update_time`] |
//! | block on I/O handles and the waker | [`Poller::poll`] |
//! | run ready callbacks, non-blocking | [`EventLoop::run_once_nowait`] |
//! | next timer deadline as a timeout | [`EventLoop::next_timeout`] |
//! | wait handle triggerable from any thread | [`EventLoop::waker`] |
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use loop_bridge_reactor::{EventLoop, RunMode};
//!
//! let (event_loop, mut poller) = EventLoop::new().unwrap();
//! event_loop.set_timeout(Duration::from_millis(5), |_| println!("fired"));
//!
//! // Runs until no timers, watchers or immediates remain.
//! let alive = event_loop.run(&mut poller, RunMode::Default).unwrap();
//! assert!(!alive);
//! ```

mod event_loop;
mod io;
mod poller;
mod timers;
mod waker;

pub use event_loop::{EventLoop, RunMode};
pub use io::{IoEvent, Readiness, WatcherId};
pub use poller::{PollOutcome, Poller};
pub use timers::TimerId;
pub use waker::LoopWaker;

// Re-export the mio types callers need to register sources.
pub use mio::{event::Source, Interest};
