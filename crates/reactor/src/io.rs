// Chunk: docs/chunks/secondary_loop - mio-backed secondary event loop
//! I/O watcher types.

use mio::event::Source;
use mio::{Registry, Token};

use crate::EventLoop;

/// Identifies a registered I/O watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(pub(crate) Token);

/// Readiness reported by the OS selector for one watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub read_closed: bool,
    pub write_closed: bool,
    pub error: bool,
}

impl Readiness {
    /// Merges two readiness reports for the same watcher.
    pub fn merge(self, other: Readiness) -> Readiness {
        Readiness {
            readable: self.readable || other.readable,
            writable: self.writable || other.writable,
            read_closed: self.read_closed || other.read_closed,
            write_closed: self.write_closed || other.write_closed,
            error: self.error || other.error,
        }
    }
}

impl From<&mio::event::Event> for Readiness {
    fn from(event: &mio::event::Event) -> Self {
        Readiness {
            readable: event.is_readable(),
            writable: event.is_writable(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

/// What a watcher callback receives when its source becomes ready.
pub struct IoEvent<'a, S> {
    /// The watcher being dispatched (for deregistering from inside the callback)
    pub id: WatcherId,
    /// The watched source
    pub source: &'a mut S,
    pub readiness: Readiness,
}

/// Type-erased watcher stored in the loop's watcher table.
pub(crate) trait Watch: Send {
    fn dispatch(&mut self, event_loop: &EventLoop, id: WatcherId, readiness: Readiness);
    fn deregister(&mut self, registry: &Registry) -> std::io::Result<()>;
}

pub(crate) struct Watcher<S, F> {
    pub source: S,
    pub callback: F,
}

impl<S, F> Watch for Watcher<S, F>
where
    S: Source + Send,
    F: FnMut(&EventLoop, IoEvent<'_, S>) + Send,
{
    fn dispatch(&mut self, event_loop: &EventLoop, id: WatcherId, readiness: Readiness) {
        (self.callback)(
            event_loop,
            IoEvent {
                id,
                source: &mut self.source,
                readiness,
            },
        );
    }

    fn deregister(&mut self, registry: &Registry) -> std::io::Result<()> {
        registry.deregister(&mut self.source)
    }
}
