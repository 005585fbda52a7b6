//! The scheduler/clock collaborator (spec §1 "Out of scope... referenced
//! only by interface").
//!
//! Like the transport, the scheduler is a pluggable collaborator: the
//! session only needs "run this after N milliseconds, and let me cancel
//! it." A `tokio`-backed default is provided in the same spirit the teacher
//! provides `connection::noop::Noop` — a minimal, always-available concrete
//! implementation so the rest of the crate can be used (and tested) without
//! requiring every caller to bring their own.

use std::time::Duration;

/// Something that can run a task after a delay, and cancel it before it
/// runs.
pub trait Scheduler: Send + Sync {
    /// Schedules `task` to run after `delay`. Returns a handle that cancels
    /// the task if dropped or explicitly cancelled before it fires.
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> TimerHandle;
}

/// A handle for a single scheduled task. Dropping it cancels the task if it
/// has not yet fired (spec §4.5: "scheduling a new one cancels any prior").
pub struct TimerHandle {
    join: Option<tokio::task::JoinHandle<()>>,
}

impl TimerHandle {
    fn new(join: tokio::task::JoinHandle<()>) -> Self {
        Self { join: Some(join) }
    }

    /// Cancels the task if it has not yet run.
    pub fn cancel(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }

    /// A handle representing no scheduled task.
    pub fn none() -> Self {
        Self { join: None }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The default [`Scheduler`], backed by the `tokio` timer wheel and task
/// executor (the same primitives the teacher uses for its own timer-driven
/// logic, e.g. `pending.rs`'s `tokio::time::interval`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let join = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task();
        });
        TimerHandle::new(join)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use super::*;

    #[tokio::test]
    async fn schedule_runs_after_delay() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag2 = flag.clone();
        let _handle =
            TokioScheduler.schedule(Duration::from_millis(1), Box::new(move || flag2.store(true, Ordering::SeqCst)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropping_handle_cancels_task() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag2 = flag.clone();
        let handle = TokioScheduler
            .schedule(Duration::from_millis(50), Box::new(move || flag2.store(true, Ordering::SeqCst)));
        drop(handle);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!flag.load(Ordering::SeqCst));
    }
}
