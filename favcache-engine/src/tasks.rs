//! Background task tracker.
//!
//! Detached work (background cache refreshes) is spawned through a
//! [`BackgroundTaskTracker`] so that it stays observable and can be drained
//! on shutdown. Callers never await tracked work, and a failing task is
//! logged with its name and dropped; nothing it does reaches a caller.
//! The error a failed task ended with is kept in a short
//! [`recent_failures`](BackgroundTaskTracker::recent_failures) history.
//!
//! Each spawned future owns a `LiveGuard`. Whatever way the future ends
//! (completion, error, panic, or abort) the guard's `Drop` removes the task
//! from the live set and publishes the new live count on a watch channel,
//! which is what [`BackgroundTaskTracker::shutdown`] waits on.

use favcache_core::{FavcacheError, FavcacheResult};
use futures_util::FutureExt;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::telemetry::metrics::record_task_outcome;

/// Identifier handed out by [`BackgroundTaskTracker::spawn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle of a task that is still in the live set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Spawned, not yet polled.
    Pending,
    Running,
    /// Abort requested by shutdown; waiting for the runtime to drop it.
    Cancelling,
}

/// How a tracked task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl TaskOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// How many failed tasks [`BackgroundTaskTracker::recent_failures`] keeps.
pub const FAILURE_HISTORY: usize = 32;

/// Snapshot of one live task.
///
/// A task leaves the live set the moment it terminates, so a snapshot never
/// carries an outcome. Terminal outcomes are counted in [`TaskStats`] and
/// failures are kept as [`TaskFailure`] records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundTask {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
}

/// A task that terminated with an error or a panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub id: TaskId,
    pub name: String,
    /// The error's display text, or the panic message.
    pub error: String,
}

/// Terminal outcome counters since the tracker was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub spawned: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl TaskStats {
    /// Tasks that reached any terminal state.
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}

struct TaskEntry {
    name: String,
    status: TaskStatus,
    abort: Option<AbortHandle>,
}

#[derive(Default)]
struct TrackerState {
    closed: bool,
    tasks: HashMap<TaskId, TaskEntry>,
    failures: VecDeque<TaskFailure>,
}

#[derive(Default)]
struct Counters {
    spawned: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

struct TrackerInner {
    state: Mutex<TrackerState>,
    live_tx: watch::Sender<usize>,
    next_id: AtomicU64,
    counters: Counters,
}

impl TrackerInner {
    // A panic inside a tracked task never happens while this lock is held,
    // so a poisoned lock still holds a consistent map.
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_failure(&self, id: TaskId, name: &str, error: String) {
        let mut state = self.lock();
        if state.failures.len() == FAILURE_HISTORY {
            state.failures.pop_front();
        }
        state.failures.push_back(TaskFailure {
            id,
            name: name.to_string(),
            error,
        });
    }

    // Counters move before the live count so that anyone woken by the
    // count reaching zero sees final stats.
    fn finish(&self, id: TaskId, outcome: TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Completed => &self.counters.completed,
            TaskOutcome::Failed => &self.counters.failed,
            TaskOutcome::Cancelled => &self.counters.cancelled,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        record_task_outcome(outcome);

        let mut state = self.lock();
        if state.tasks.remove(&id).is_some() {
            self.live_tx.send_modify(|live| *live = live.saturating_sub(1));
        }
    }
}

/// Moved into every spawned future; reports the task's end when dropped.
struct LiveGuard {
    inner: Arc<TrackerInner>,
    id: TaskId,
    name: String,
    outcome: Option<TaskOutcome>,
}

impl LiveGuard {
    fn mark_running(&self) {
        let mut state = self.inner.lock();
        if let Some(entry) = state.tasks.get_mut(&self.id) {
            if entry.status == TaskStatus::Pending {
                entry.status = TaskStatus::Running;
            }
        }
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let outcome = match self.outcome {
            Some(outcome) => outcome,
            None => {
                info!(task_id = %self.id, task_name = %self.name, "background task cancelled");
                TaskOutcome::Cancelled
            }
        };
        self.inner.finish(self.id, outcome);
    }
}

/// Tracks detached background work and drains it on shutdown.
///
/// The tracker spawns onto the runtime it was given at construction; it
/// never looks up an ambient runtime.
pub struct BackgroundTaskTracker {
    handle: Handle,
    inner: Arc<TrackerInner>,
}

impl BackgroundTaskTracker {
    pub fn new(handle: Handle) -> Self {
        let (live_tx, _) = watch::channel(0usize);
        Self {
            handle,
            inner: Arc::new(TrackerInner {
                state: Mutex::new(TrackerState::default()),
                live_tx,
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    /// Schedule `operation` without awaiting it.
    ///
    /// Returns `None` once [`shutdown`](Self::shutdown) has started; the
    /// operation is dropped unpolled in that case.
    pub fn spawn<F>(&self, name: impl Into<String>, operation: F) -> Option<TaskId>
    where
        F: Future<Output = FavcacheResult<()>> + Send + 'static,
    {
        let name = name.into();
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        {
            let mut state = self.inner.lock();
            if state.closed {
                debug!(task_name = %name, "tracker is shut down, task not scheduled");
                return None;
            }
            state.tasks.insert(
                id,
                TaskEntry {
                    name: name.clone(),
                    status: TaskStatus::Pending,
                    abort: None,
                },
            );
            self.inner.live_tx.send_modify(|live| *live += 1);
        }
        self.inner.counters.spawned.fetch_add(1, Ordering::Relaxed);

        let mut guard = LiveGuard {
            inner: Arc::clone(&self.inner),
            id,
            name,
            outcome: None,
        };

        // Spawning may drop the future inline if the runtime is gone, and
        // the guard then takes the lock, so it must not be held here.
        let join = self.handle.spawn(async move {
            guard.mark_running();
            match AssertUnwindSafe(operation).catch_unwind().await {
                Ok(Ok(())) => {
                    debug!(task_id = %guard.id, task_name = %guard.name, "background task completed");
                    guard.outcome = Some(TaskOutcome::Completed);
                }
                Ok(Err(e)) => {
                    log_failure(&guard.name, guard.id, &e);
                    guard.inner.record_failure(guard.id, &guard.name, e.to_string());
                    guard.outcome = Some(TaskOutcome::Failed);
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        task_id = %guard.id,
                        task_name = %guard.name,
                        panic = message,
                        "background task panicked"
                    );
                    guard
                        .inner
                        .record_failure(guard.id, &guard.name, format!("panicked: {}", message));
                    guard.outcome = Some(TaskOutcome::Failed);
                }
            }
        });

        let mut state = self.inner.lock();
        let closed = state.closed;
        if let Some(entry) = state.tasks.get_mut(&id) {
            if closed {
                entry.status = TaskStatus::Cancelling;
                join.abort();
            } else {
                entry.abort = Some(join.abort_handle());
            }
        }

        Some(id)
    }

    /// Snapshots of every task that has not yet reached a terminal state.
    pub fn live(&self) -> Vec<BackgroundTask> {
        let state = self.inner.lock();
        let mut tasks: Vec<BackgroundTask> = state
            .tasks
            .iter()
            .map(|(id, entry)| BackgroundTask {
                id: *id,
                name: entry.name.clone(),
                status: entry.status,
            })
            .collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// The most recent failed tasks, oldest first, at most
    /// [`FAILURE_HISTORY`] of them.
    pub fn recent_failures(&self) -> Vec<TaskFailure> {
        self.inner.lock().failures.iter().cloned().collect()
    }

    pub fn live_count(&self) -> usize {
        *self.inner.live_tx.borrow()
    }

    pub fn stats(&self) -> TaskStats {
        let c = &self.inner.counters;
        TaskStats {
            spawned: c.spawned.load(Ordering::SeqCst),
            completed: c.completed.load(Ordering::SeqCst),
            failed: c.failed.load(Ordering::SeqCst),
            cancelled: c.cancelled.load(Ordering::SeqCst),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().closed
    }

    /// Wait until the live set is empty without cancelling anything.
    ///
    /// Tasks spawned while waiting extend the wait.
    pub async fn wait_idle(&self) {
        let mut live_rx = self.inner.live_tx.subscribe();
        let _ = live_rx.wait_for(|live| *live == 0).await;
    }

    /// Cancel every live task and wait until all of them are terminal.
    ///
    /// Idempotent; a second call (or a call with nothing live) returns as
    /// soon as the live set is empty.
    pub async fn shutdown(&self) {
        let aborted = {
            let mut state = self.inner.lock();
            state.closed = true;
            let mut aborted = 0usize;
            for entry in state.tasks.values_mut() {
                if let Some(abort) = &entry.abort {
                    abort.abort();
                    entry.status = TaskStatus::Cancelling;
                    aborted += 1;
                }
            }
            aborted
        };

        if aborted > 0 {
            info!(tasks = aborted, "cancelling background tasks");
        }

        let mut live_rx = self.inner.live_tx.subscribe();
        if live_rx.wait_for(|live| *live == 0).await.is_err() {
            // The sender lives in `inner`, which we hold; unreachable in practice.
            warn!("task tracker channel closed during shutdown");
        }

        debug!(stats = ?self.stats(), "background tasks drained");
    }
}

impl fmt::Debug for BackgroundTaskTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTaskTracker")
            .field("live", &self.live_count())
            .field("stats", &self.stats())
            .finish()
    }
}

fn log_failure(name: &str, id: TaskId, err: &FavcacheError) {
    error!(task_id = %id, task_name = %name, error = %err, "background task failed");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// ============================================================================
// TESTS
// ============================================================================
