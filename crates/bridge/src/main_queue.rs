// Chunk: docs/chunks/host_scheduler - GCD main queue as the host scheduler
//! Host scheduler backed by the macOS main dispatch queue.
//!
//! On macOS the UI thread's run loop services the main dispatch queue, so
//! `dispatch_async` onto it is exactly "run this soon on the UI thread".
//! Tasks run in FIFO order with other main-queue blocks.

use dispatch2::DispatchQueue;

use crate::scheduler::{HostScheduler, Task};

/// Posts tasks to the main dispatch queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct MainQueueScheduler;

impl MainQueueScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl HostScheduler for MainQueueScheduler {
    fn post_task(&self, task: Task) {
        DispatchQueue::main().exec_async(move || task());
    }
}
