// Chunk: docs/chunks/loop_bridge - Host message loop / secondary loop integration
//! loop-bridge: run a secondary event loop inside a host UI message loop.
//!
//! The host UI loop and the secondary loop each want to own the thread. The
//! bridge splits the secondary loop's work in two:
//!
//! - a dedicated **poll thread** blocks in the secondary loop's selector and
//!   never runs callbacks
//! - the **UI thread** runs every secondary-loop callback, in drain tasks the
//!   poll thread posts through a [`HostScheduler`]
//!
//! A [`HandshakeSemaphore`] keeps at most one drain request in flight, and a
//! [`WakeupSignal`] lets any thread interrupt the poll when it queues work.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use loop_bridge::{BridgeConfig, LoopBridge, MessageLoop};
//!
//! let mut message_loop = MessageLoop::new();
//! let bridge = LoopBridge::create(message_loop.proxy(), BridgeConfig::default()).unwrap();
//! bridge.prepare_integration().unwrap();
//!
//! let proxy = message_loop.proxy();
//! bridge.event_loop().set_timeout(Duration::from_millis(50), move |_| {
//!     // Runs on the UI thread.
//!     proxy.quit();
//! });
//!
//! message_loop.run();
//! bridge.shutdown();
//! ```

mod bridge;
mod config;
mod error;
#[cfg(target_os = "macos")]
mod main_queue;
mod message_loop;
mod poll_thread;
mod scheduler;
mod semaphore;
mod wakeup;

pub use bridge::{BridgeState, BridgeStats, LoopBridge};
pub use config::{BridgeConfig, SCHEMA_VERSION};
pub use error::{BridgeError, ConfigError};
#[cfg(target_os = "macos")]
pub use main_queue::MainQueueScheduler;
pub use message_loop::{MessageLoop, MessageLoopProxy};
pub use scheduler::{HostScheduler, Task};
pub use semaphore::HandshakeSemaphore;
pub use wakeup::WakeupSignal;

pub use loop_bridge_reactor as reactor;
