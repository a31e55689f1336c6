//! Shared task scheduler.
//!
//! One scheduler drives every delayed and periodic callback in the engine:
//! cache write/read/lifespan cycles, mute expiries, confirmation timeouts,
//! and pet-event despawns. Tasks are independent and fire-and-forget; a
//! [`TaskHandle`] cancels its task but dropping one detaches it instead.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawns delayed and fixed-rate tasks on the ambient tokio runtime.
///
/// Scheduling methods must be called from within a runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler;

impl Scheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Run `task` once after `delay`.
    pub fn schedule_once<F>(&self, delay: Duration, task: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        TaskHandle {
            inner: tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                task.await;
            }),
        }
    }

    /// Run `task` every `period`, starting one period from now.
    ///
    /// Runs do not overlap: a slow run delays the next tick rather than
    /// stacking up behind it.
    pub fn schedule_fixed_rate<F, Fut>(&self, period: Duration, mut task: F) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        TaskHandle {
            inner: tokio::spawn(async move {
                let mut timer = tokio::time::interval(period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick of a tokio interval completes immediately;
                // consume it so the first run lands after one full period.
                timer.tick().await;
                loop {
                    timer.tick().await;
                    task().await;
                }
            }),
        }
    }
}

/// Cancellable handle to a scheduled task.
///
/// Cancellation is race-safe against a task that has already fired; the
/// transitions scheduled through this crate are idempotent on their own.
#[derive(Debug)]
pub struct TaskHandle {
    inner: JoinHandle<()>,
}

impl TaskHandle {
    /// Cancel the task. A task that already ran is unaffected.
    pub fn cancel(&self) {
        self.inner.abort();
    }

    /// Whether the task has finished (ran to completion or was cancelled).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
