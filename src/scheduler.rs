// MIT License - Copyright (c) 2026 Peter Wright

//! Scheduling collaborator supplied by the host platform.
//!
//! The core never creates threads of its own: periodic memory refresh and
//! delayed work are posted through this trait. [`TokioScheduler`] is the
//! stock implementation for hosts that run inside a tokio runtime.

use std::pin::Pin;
use std::time::Duration;

/// A repeatable unit of scheduled work.
pub type TaskFn = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Cancels its scheduled work when dropped.
pub struct ScheduledHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl ScheduledHandle {
    pub fn new(handle: tokio::task::JoinHandle<()>) -> Self {
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for ScheduledHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// "Run after delay" and "run periodically" primitives.
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`.
    fn run_after(&self, delay: Duration, task: TaskFn) -> ScheduledHandle;

    /// Run `task` every `period`, first run one period from now.
    fn run_periodically(&self, period: Duration, task: TaskFn) -> ScheduledHandle;
}

/// Scheduler backed by the ambient tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn run_after(&self, delay: Duration, task: TaskFn) -> ScheduledHandle {
        ScheduledHandle::new(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task().await;
        }))
    }

    fn run_periodically(&self, period: Duration, task: TaskFn) -> ScheduledHandle {
        ScheduledHandle::new(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately; consume it so the first run
            // happens one period from now.
            interval.tick().await;
            loop {
                interval.tick().await;
                task().await;
            }
        }))
    }
}
