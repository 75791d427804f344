// Chunk: docs/chunks/host_scheduler - Host message loop seam
//! A portable host message loop.
//!
//! `MessageLoop` plays the role of the host application's UI message loop on
//! platforms (and in tests) where there is no native one to hook into. The
//! thread that runs it is the UI thread. Tasks reach it through a cloneable
//! [`MessageLoopProxy`], which implements [`HostScheduler`].
//!
//! # Design
//!
//! We use an unbounded `crossbeam_channel` because:
//! - posting must never block (the poll thread posts drain requests)
//! - the receiver side wants `recv_deadline` for bounded runs in tests
//! - FIFO order across all producers is preserved
//!
//! An optional idle handler runs whenever the queue is empty, before the loop
//! blocks. It is where a host would opportunistically drain the secondary
//! loop during idle time.

use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::scheduler::{HostScheduler, Task};

enum Message {
    Task(Task),
    Quit,
}

/// The UI-thread side of the message loop. Stays on the thread that runs it.
pub struct MessageLoop {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    idle_handler: Option<Box<dyn FnMut()>>,
}

/// Cloneable, `Send` handle for posting to a [`MessageLoop`].
#[derive(Clone)]
pub struct MessageLoopProxy {
    sender: Sender<Message>,
}

impl MessageLoop {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            idle_handler: None,
        }
    }

    /// Returns a proxy that posts to this loop.
    pub fn proxy(&self) -> MessageLoopProxy {
        MessageLoopProxy {
            sender: self.sender.clone(),
        }
    }

    /// Installs a handler that runs each time the queue runs dry.
    pub fn set_idle_handler(&mut self, handler: impl FnMut() + 'static) {
        self.idle_handler = Some(Box::new(handler));
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Runs tasks until [`MessageLoopProxy::quit`] is received.
    pub fn run(&mut self) {
        while let Some(message) = self.next_message(None) {
            match message {
                Message::Task(task) => task(),
                Message::Quit => return,
            }
        }
    }

    /// Runs every task that is already queued (and any they queue), without
    /// blocking. Returns the number of tasks run.
    pub fn run_until_idle(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                Message::Task(task) => {
                    task();
                    ran += 1;
                }
                Message::Quit => break,
            }
        }
        ran
    }

    /// Runs tasks for `duration`. Returns the number of tasks run.
    pub fn run_for(&mut self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut ran = 0;
        while let Some(message) = self.next_message(Some(deadline)) {
            match message {
                Message::Task(task) => {
                    task();
                    ran += 1;
                }
                Message::Quit => break,
            }
        }
        ran
    }

    /// Runs tasks until `done` returns true or `timeout` elapses.
    ///
    /// `done` is checked after every task and after the idle handler runs.
    /// Returns its final value.
    pub fn run_until(&mut self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while !done() {
            if let Ok(message) = self.receiver.try_recv() {
                match message {
                    Message::Task(task) => task(),
                    Message::Quit => return done(),
                }
                continue;
            }

            if let Some(idle) = self.idle_handler.as_mut() {
                idle();
                if done() {
                    return true;
                }
            }

            match self.receiver.recv_deadline(deadline) {
                Ok(Message::Task(task)) => task(),
                Ok(Message::Quit) | Err(_) => return done(),
            }
        }
        true
    }

    /// Next message, running the idle handler first if the queue is empty.
    ///
    /// Returns `None` once `deadline` passes.
    fn next_message(&mut self, deadline: Option<Instant>) -> Option<Message> {
        if let Ok(message) = self.receiver.try_recv() {
            return Some(message);
        }

        if let Some(idle) = self.idle_handler.as_mut() {
            idle();
            if let Ok(message) = self.receiver.try_recv() {
                return Some(message);
            }
        }

        match deadline {
            None => self.receiver.recv().ok(),
            Some(deadline) => self.receiver.recv_deadline(deadline).ok(),
        }
    }
}

impl Default for MessageLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLoopProxy {
    /// Posts a closure to the loop.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.post_task(Box::new(task));
    }

    /// Makes [`MessageLoop::run`] return once it reaches this message.
    pub fn quit(&self) {
        // The loop owns a sender too, so the channel cannot be disconnected.
        let _ = self.sender.send(Message::Quit);
    }
}

impl HostScheduler for MessageLoopProxy {
    fn post_task(&self, task: Task) {
        let _ = self.sender.send(Message::Task(task));
    }
}
