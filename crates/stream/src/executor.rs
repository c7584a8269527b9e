// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Serialized executor with named timers.
//!
//! An [`AsyncQueue`] runs jobs one at a time, in submission order, on a
//! single tokio task. Delayed jobs are registered under a [`TimerId`] so they
//! can be cancelled, queried and fast-forwarded by identity:
//!
//! ```text
//! enqueue ──────────────┐
//!                       ▼
//! enqueue_after_delay ─► schedule ─► sleep task ─► "fire" job ─► worker task
//!                       │                                         ▲
//! run_scheduled_…_until ┴─────────────────────────────────────────┘
//! ```
//!
//! A fire job only runs an operation that is still present in the schedule,
//! so a cancel performed on the queue always wins over a timer that already
//! elapsed on the wall clock. Work enqueued after [`AsyncQueue::shutdown`] is
//! silently dropped.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Identity of the queue whose job is running on this thread, if any.
    static CURRENT_QUEUE: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Identity of a delayed operation.
///
/// Each stream schedules its idle and backoff timers under fixed ids, so at
/// most one instance of each is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Matches every timer. Only meaningful for queries and fast-forwarding.
    All,
    ListenStreamIdle,
    ListenStreamConnectionBackoff,
    WriteStreamIdle,
    WriteStreamConnectionBackoff,
    OnlineStateTimeout,
}

impl TimerId {
    fn matches(self, other: TimerId) -> bool {
        self == TimerId::All || self == other
    }
}

/// Error type for executor operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// Fast-forward requested for a timer that is not scheduled.
    #[error("no operation scheduled for timer {0:?}")]
    NotScheduled(TimerId),

    /// The queue was shut down before the work could run.
    #[error("queue is shut down")]
    ShutDown,
}

struct Entry {
    seq: u64,
    timer_id: TimerId,
    target: Instant,
    op: Job,
    sleeper: JoinHandle<()>,
}

#[derive(Default)]
struct Schedule {
    next_seq: u64,
    entries: Vec<Entry>,
}

impl Schedule {
    fn remove_seq(&mut self, seq: u64) -> Option<Entry> {
        let pos = self.entries.iter().position(|e| e.seq == seq)?;
        Some(self.entries.remove(pos))
    }

    /// Removes the earliest entry, ordered by target time then scheduling order.
    fn pop_earliest(&mut self, max_seq: u64) -> Option<Entry> {
        let pos = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.seq <= max_seq)
            .min_by_key(|(_, e)| (e.target, e.seq))
            .map(|(pos, _)| pos)?;
        Some(self.entries.remove(pos))
    }
}

struct Shared {
    id: u64,
    jobs: mpsc::UnboundedSender<Job>,
    runtime: Handle,
    shutdown: CancellationToken,
    schedule: Mutex<Schedule>,
}

impl Shared {
    fn schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, job: Job) {
        if self.shutdown.is_cancelled() {
            return;
        }
        // The receiver only goes away once the worker has stopped.
        let _ = self.jobs.send(job);
    }

    /// Runs the scheduled operation `seq` if it is still pending.
    fn fire(&self, seq: u64) {
        let entry = self.schedule().remove_seq(seq);
        if let Some(entry) = entry {
            (entry.op)();
        }
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncQueue").field("id", &self.id).finish()
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let schedule = self.schedule.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in schedule.entries.drain(..) {
            entry.sleeper.abort();
        }
    }
}

/// Handle to a delayed operation, used to cancel it.
///
/// Cancelling an operation that already ran, or that was replaced by a newer
/// operation under the same [`TimerId`], does nothing.
#[derive(Debug)]
pub struct DelayedOperation {
    queue: Weak<Shared>,
    seq: u64,
    timer_id: TimerId,
}

impl DelayedOperation {
    pub fn timer_id(&self) -> TimerId {
        self.timer_id
    }

    /// Removes the operation from the schedule if it has not run yet.
    pub fn cancel(&self) {
        let Some(shared) = self.queue.upgrade() else {
            return;
        };
        let entry = shared.schedule().remove_seq(self.seq);
        if let Some(entry) = entry {
            entry.sleeper.abort();
        }
    }
}

/// Serialized executor. Cheap to clone; all clones share one worker.
#[derive(Debug, Clone)]
pub struct AsyncQueue {
    shared: Arc<Shared>,
}

impl AsyncQueue {
    /// Create a queue whose worker task runs on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        let (jobs, mut receiver) = mpsc::unbounded_channel::<Job>();
        let shutdown = CancellationToken::new();
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);

        let token = shutdown.clone();
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    job = receiver.recv() => match job {
                        Some(job) => run_job(id, job),
                        None => break,
                    },
                }
            }
            tracing::trace!("async queue {} stopped", id);
        });

        AsyncQueue {
            shared: Arc::new(Shared {
                id,
                jobs,
                runtime,
                shutdown,
                schedule: Mutex::new(Schedule::default()),
            }),
        }
    }

    /// Runtime the queue's worker and timers run on.
    pub fn runtime(&self) -> &Handle {
        &self.shared.runtime
    }

    /// Whether the caller is running inside one of this queue's jobs.
    pub fn is_current(&self) -> bool {
        CURRENT_QUEUE.with(|current| current.get() == Some(self.shared.id))
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Enqueue `op` to run after every previously enqueued job.
    pub fn enqueue<F>(&self, op: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.enqueue(Box::new(op));
    }

    /// Enqueue `op` and wait for its result.
    ///
    /// Returns `None` if the queue is shut down before `op` runs.
    pub async fn enqueue_and_wait<F, R>(&self, op: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.enqueue(move || {
            let _ = tx.send(op());
        });
        rx.await.ok()
    }

    /// Schedule `op` to run after `delay` under `timer_id`.
    ///
    /// Any operation already scheduled under the same id is replaced.
    pub fn enqueue_after_delay<F>(&self, delay: Duration, timer_id: TimerId, op: F) -> DelayedOperation
    where
        F: FnOnce() + Send + 'static,
    {
        let weak = Arc::downgrade(&self.shared);
        if self.is_shut_down() {
            return DelayedOperation {
                queue: weak,
                seq: u64::MAX,
                timer_id,
            };
        }

        let mut schedule = self.shared.schedule();
        if let Some(pos) = schedule.entries.iter().position(|e| e.timer_id == timer_id) {
            let replaced = schedule.entries.remove(pos);
            replaced.sleeper.abort();
        }

        let seq = schedule.next_seq;
        schedule.next_seq += 1;

        let sleeper_queue = weak.clone();
        let sleeper = self.shared.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = sleeper_queue.upgrade() else {
                return;
            };
            let fire_queue = sleeper_queue.clone();
            shared.enqueue(Box::new(move || {
                if let Some(shared) = fire_queue.upgrade() {
                    shared.fire(seq);
                }
            }));
        });

        schedule.entries.push(Entry {
            seq,
            timer_id,
            target: Instant::now() + delay,
            op: Box::new(op),
            sleeper,
        });

        DelayedOperation {
            queue: weak,
            seq,
            timer_id,
        }
    }

    /// Whether an operation is scheduled under `timer_id`.
    pub fn is_scheduled(&self, timer_id: TimerId) -> bool {
        self.shared
            .schedule()
            .entries
            .iter()
            .any(|e| timer_id.matches(e.timer_id))
    }

    /// Time left before the operation under `timer_id` is due, if one is
    /// scheduled.
    pub fn time_until(&self, timer_id: TimerId) -> Option<Duration> {
        self.shared
            .schedule()
            .entries
            .iter()
            .filter(|e| timer_id.matches(e.timer_id))
            .map(|e| e.target.saturating_duration_since(Instant::now()))
            .min()
    }

    /// Run scheduled operations in target-time order, up to and including the
    /// first one registered under `last`, without waiting for their delays.
    ///
    /// With [`TimerId::All`], every operation scheduled at the time of the
    /// call is run.
    pub async fn run_scheduled_operations_until(&self, last: TimerId) -> Result<(), ExecutorError> {
        let shared = Arc::downgrade(&self.shared);
        self.enqueue_and_wait(move || match shared.upgrade() {
            Some(shared) => fast_forward(&shared, last),
            None => Err(ExecutorError::ShutDown),
        })
        .await
        .unwrap_or(Err(ExecutorError::ShutDown))
    }

    /// Stop the worker. Pending and future work is dropped.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let entries: Vec<Entry> = self.shared.schedule().entries.drain(..).collect();
        for entry in entries {
            entry.sleeper.abort();
        }
    }
}

fn run_job(queue_id: u64, job: Job) {
    let previous = CURRENT_QUEUE.with(|current| current.replace(Some(queue_id)));
    job();
    CURRENT_QUEUE.with(|current| current.set(previous));
}

fn fast_forward(shared: &Shared, last: TimerId) -> Result<(), ExecutorError> {
    let max_seq = {
        let schedule = shared.schedule();
        if !schedule.entries.iter().any(|e| last.matches(e.timer_id)) {
            return Err(ExecutorError::NotScheduled(last));
        }
        schedule.next_seq.saturating_sub(1)
    };

    loop {
        // Released before running: the operation may schedule new timers.
        let entry = shared.schedule().pop_earliest(max_seq);
        let Some(entry) = entry else {
            return Ok(());
        };
        entry.sleeper.abort();
        let done = last != TimerId::All && last == entry.timer_id;
        (entry.op)();
        if done {
            return Ok(());
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
