// Chunk: docs/chunks/host_scheduler - Host message loop seam
//! The seam to the host application's message loop.
//!
//! The bridge needs exactly one thing from the host: a way to run a closure
//! "soon" on the UI thread, callable from any thread, FIFO relative to other
//! posted tasks. Anything that can do that implements [`HostScheduler`]:
//!
//! - [`MessageLoopProxy`](crate::MessageLoopProxy), the portable loop in this crate
//! - [`MainQueueScheduler`](crate::MainQueueScheduler) on macOS (GCD main queue)
//! - any `Fn(Task) + Send + Sync` closure, which is handy in tests

/// A unit of work posted to the UI thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Schedules tasks onto the host UI thread.
pub trait HostScheduler: Send + Sync + 'static {
    /// Queues `task` to run on the UI thread at some later point.
    ///
    /// Must not block and must be safe to call from any thread.
    fn post_task(&self, task: Task);
}

impl<F> HostScheduler for F
where
    F: Fn(Task) + Send + Sync + 'static,
{
    fn post_task(&self, task: Task) {
        self(task)
    }
}
