//! Bounded, priority-ordered admission in front of the renderer.
//!
//! Two limits apply: at most `concurrency` jobs run at once, and at most
//! `max_depth` jobs are known to the scheduler at all (running plus
//! waiting). A request arriving at a full scheduler is rejected straight
//! away instead of queueing.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use metrics::{counter, gauge};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::application::lock::mutex_lock;

const LOCK_TARGET: &str = "chartforge::application::chart::scheduler";

/// Scheduling class of a request; higher classes are admitted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Anonymous = 0,
    Authenticated = 1,
    Workshop = 2,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Anonymous => "anonymous",
            Priority::Authenticated => "authenticated",
            Priority::Workshop => "workshop",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub concurrency: usize,
    pub max_depth: usize,
    /// Upper bound on waiting plus running time; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("queue is full ({depth} of {max_depth} slots in use)")]
    Capacity { depth: usize, max_depth: usize },
    #[error("job did not complete within {0:?}")]
    Timeout(Duration),
    #[error("scheduler is shutting down")]
    Closed,
}

/// Point-in-time view of the scheduler, served by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    pub running: usize,
    pub pending: usize,
    pub capacity: usize,
    pub concurrency: usize,
}

/// Cloneable handle; clones share one queue.
#[derive(Clone)]
pub struct AdmissionScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    running: usize,
    pending: BinaryHeap<Waiter>,
    next_seq: u64,
}

impl State {
    fn depth(&self) -> usize {
        self.running + self.pending.len()
    }

    /// Pass a freed slot to the best waiter, or give it back.
    fn release(&mut self) {
        while let Some(waiter) = self.pending.pop() {
            if waiter.grant.send(()).is_ok() {
                return;
            }
        }
        self.running = self.running.saturating_sub(1);
    }
}

struct Waiter {
    priority: Priority,
    seq: u64,
    grant: oneshot::Sender<()>,
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl AdmissionScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let config = SchedulerConfig {
            concurrency: config.concurrency.max(1),
            max_depth: config.max_depth.max(1),
            timeout: config.timeout,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Fail fast, before any work is done for a request, when the queue is
    /// already full.
    pub fn ensure_capacity(&self, priority: Priority) -> Result<(), AdmissionError> {
        let depth = {
            let state = mutex_lock(&self.inner.state, LOCK_TARGET, "scheduler::ensure_capacity");
            state.depth()
        };
        if depth >= self.inner.config.max_depth {
            return Err(reject(priority, depth, self.inner.config.max_depth));
        }
        Ok(())
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = mutex_lock(&self.inner.state, LOCK_TARGET, "scheduler::snapshot");
        SchedulerSnapshot {
            running: state.running,
            pending: state.pending.len(),
            capacity: self.inner.config.max_depth,
            concurrency: self.inner.config.concurrency,
        }
    }

    /// Run `job` once a slot is free and return its output.
    ///
    /// The configured timeout covers both the wait and the job itself; when
    /// it fires the job future is dropped.
    pub async fn admit<F, T>(&self, priority: Priority, job: F) -> Result<T, AdmissionError>
    where
        F: Future<Output = T>,
    {
        let work = async {
            let _slot = self.acquire(priority).await?;
            Ok(job.await)
        };

        match self.inner.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => {
                    counter!("chartforge_queue_timeout_total").increment(1);
                    warn!(
                        target = LOCK_TARGET,
                        op = "scheduler::admit",
                        result = "timeout",
                        priority = priority.as_str(),
                        timeout_ms = limit.as_millis() as u64,
                        "Queued job timed out"
                    );
                    Err(AdmissionError::Timeout(limit))
                }
            },
            None => work.await,
        }
    }

    async fn acquire(&self, priority: Priority) -> Result<Slot, AdmissionError> {
        let (seq, grant) = {
            let mut state = mutex_lock(&self.inner.state, LOCK_TARGET, "scheduler::acquire");
            let depth = state.depth();
            let max_depth = self.inner.config.max_depth;
            if depth >= max_depth {
                drop(state);
                return Err(reject(priority, depth, max_depth));
            }

            if state.running < self.inner.config.concurrency && state.pending.is_empty() {
                state.running += 1;
                publish_depth(&state);
                return Ok(Slot::new(Arc::clone(&self.inner)));
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let (tx, rx) = oneshot::channel();
            state.pending.push(Waiter {
                priority,
                seq,
                grant: tx,
            });
            publish_depth(&state);
            debug!(
                target = LOCK_TARGET,
                op = "scheduler::acquire",
                result = "queued",
                priority = priority.as_str(),
                pending = state.pending.len(),
                "Job queued"
            );
            (seq, rx)
        };

        let mut waiting = Waiting {
            inner: self.inner.as_ref(),
            seq,
            grant,
            granted: false,
        };
        match (&mut waiting.grant).await {
            Ok(()) => {
                waiting.granted = true;
                Ok(Slot::new(Arc::clone(&self.inner)))
            }
            Err(_) => Err(AdmissionError::Closed),
        }
    }
}

/// A running job's claim on one concurrency slot.
struct Slot {
    inner: Arc<Inner>,
}

impl Slot {
    fn new(inner: Arc<Inner>) -> Self {
        Self { inner }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        let mut state = mutex_lock(&self.inner.state, LOCK_TARGET, "scheduler::release");
        state.release();
        publish_depth(&state);
    }
}

/// Removes a waiter whose future was dropped before it got a slot.
struct Waiting<'a> {
    inner: &'a Inner,
    seq: u64,
    grant: oneshot::Receiver<()>,
    granted: bool,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        let mut state = mutex_lock(&self.inner.state, LOCK_TARGET, "scheduler::cancel");
        let before = state.pending.len();
        let seq = self.seq;
        state.pending.retain(|waiter| waiter.seq != seq);
        if state.pending.len() == before && self.grant.try_recv().is_ok() {
            // Slot was granted after the caller gave up; hand it on.
            state.release();
        }
        publish_depth(&state);
    }
}

fn reject(priority: Priority, depth: usize, max_depth: usize) -> AdmissionError {
    counter!("chartforge_queue_rejected_total").increment(1);
    warn!(
        target = LOCK_TARGET,
        op = "scheduler::admit",
        result = "rejected",
        priority = priority.as_str(),
        depth,
        max_depth,
        "Queue is full"
    );
    AdmissionError::Capacity { depth, max_depth }
}

fn publish_depth(state: &State) {
    gauge!("chartforge_queue_depth").set(state.depth() as f64);
}
