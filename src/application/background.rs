//! Detached side effects that must never delay or fail a caller.

use std::{future::Future, time::Duration};

use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Spawns best-effort work and keeps track of it so shutdown can drain it.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` detached. Failures are logged under `op` and dropped.
    ///
    /// Outside a Tokio runtime the task is dropped with a warning.
    pub fn spawn<F, E>(&self, op: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        if Handle::try_current().is_err() {
            warn!(
                target = "chartforge::application::background",
                op,
                result = "no_runtime",
                "Background task dropped outside the runtime"
            );
            return;
        }
        self.tracker.spawn(async move {
            match task.await {
                Ok(()) => debug!(
                    target = "chartforge::application::background",
                    op,
                    result = "ok",
                    "Background task finished"
                ),
                Err(err) => warn!(
                    target = "chartforge::application::background",
                    op,
                    result = "error",
                    error = %err,
                    "Background task failed"
                ),
            }
        });
    }

    /// Run `task` detached and hand back its result. Dropping the handle
    /// does not cancel the task; shutdown still waits for it.
    pub fn track<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every tracked task, giving up after `timeout`.
    ///
    /// Returns `true` when all tasks completed in time. The tracker is reopened
    /// afterwards so the handle stays usable.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        self.tracker.reopen();
        if !drained {
            warn!(
                target = "chartforge::application::background",
                op = "background::drain",
                result = "timeout",
                pending = self.tracker.len(),
                timeout_ms = timeout.as_millis() as u64,
                "Background tasks still running at shutdown"
            );
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test]
    async fn drain_waits_for_spawned_tasks_and_swallows_errors() {
        let tasks = BackgroundTasks::new();
        let finished = Arc::new(AtomicUsize::new(0));

        for fail in [false, true] {
            let finished = Arc::clone(&finished);
            tasks.spawn("tests::background", async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                if fail { Err("boom") } else { Ok(()) }
            });
        }

        assert!(tasks.drain(Duration::from_secs(2)).await);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn tracked_task_survives_its_dropped_handle() {
        let tasks = BackgroundTasks::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);

        let handle = tasks.track(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(handle);

        assert!(tasks.drain(Duration::from_secs(2)).await);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn spawn_outside_a_runtime_is_skipped() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("tests::no_runtime", async { Ok::<(), &str>(()) });
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn drain_reports_timeout() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("tests::slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), &str>(())
        });

        assert!(!tasks.drain(Duration::from_millis(20)).await);
    }
}
