//! Job Scheduler
//!
//! Batches effect re-runs into a single flush and models the host's
//! microtask checkpoint as an explicit queue.
//!
//! # Algorithm
//!
//! 1. [`queue_job`] inserts a job into the pending set. Jobs are keyed, so
//!    queuing the same effect twice before a flush collapses to one run.
//! 2. The first job queued while no flush is in flight also queues a
//!    microtask that flushes the pending set.
//! 3. The flush snapshots the pending set, runs it in insertion order and
//!    repeats until nothing is pending, so jobs queued by running jobs
//!    still run in the same flush. A flush that keeps producing work for
//!    [`MAX_FLUSH_PASSES`] passes is aborted.
//! 4. Nothing runs until the owner of the turn calls [`drain`], which is
//!    the microtask checkpoint.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use tracing::{error, trace};

use super::effect::EffectRef;
use super::subscriber::EffectId;
use crate::error::{ReactiveError, Result};

/// Upper bound on flush passes before a flush is considered runaway.
pub const MAX_FLUSH_PASSES: usize = 100;

/// Identity of a queued job, used for deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKey {
    /// Re-run of an effect. One per effect per flush.
    Effect(EffectId),
    /// A closure job. Every `Job::new` gets its own key.
    Task(u64),
}

/// A unit of deferred work.
#[derive(Clone)]
pub struct Job {
    key: JobKey,
    run: Rc<dyn Fn()>,
}

impl Job {
    /// Wrap a closure as a job with a fresh key.
    pub fn new(run: impl Fn() + 'static) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self {
            key: JobKey::Task(COUNTER.fetch_add(1, Ordering::Relaxed)),
            run: Rc::new(run),
        }
    }

    pub fn key(&self) -> JobKey {
        self.key
    }

    pub fn run(&self) {
        (self.run)();
    }
}

impl From<EffectRef> for Job {
    fn from(effect: EffectRef) -> Self {
        Self {
            key: JobKey::Effect(effect.id()),
            run: Rc::new(move || effect.run()),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("key", &self.key).finish()
    }
}

type Microtask = Box<dyn FnOnce() -> Result<()>>;

#[derive(Default)]
struct Queue {
    pending: IndexMap<JobKey, Job>,
    /// A flush is queued or running.
    flushing: bool,
    microtasks: VecDeque<Microtask>,
}

thread_local! {
    static QUEUE: RefCell<Queue> = RefCell::new(Queue::default());
}

/// Queue a job for the next flush.
pub fn queue_job(job: impl Into<Job>) {
    let job = job.into();
    let key = job.key;
    let schedule = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        queue.pending.entry(key).or_insert(job);
        !std::mem::replace(&mut queue.flushing, true)
    });

    trace!(?key, "job queued");
    if schedule {
        push_microtask(Box::new(flush_jobs));
    }
}

/// Resets the in-flight flag when a flush ends, however it ends.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let _ = QUEUE.try_with(|queue| queue.borrow_mut().flushing = false);
    }
}

/// Run every pending job until none is left.
///
/// Normally invoked from the microtask queued by [`queue_job`]; calling it
/// directly flushes synchronously.
pub fn flush_jobs() -> Result<()> {
    let _guard = FlushGuard;

    for pass in 0..MAX_FLUSH_PASSES {
        let jobs: Vec<Job> = QUEUE.with(|queue| {
            queue
                .borrow_mut()
                .pending
                .drain(..)
                .map(|(_, job)| job)
                .collect()
        });
        if jobs.is_empty() {
            return Ok(());
        }

        trace!(pass, jobs = jobs.len(), "flushing jobs");
        for job in jobs {
            job.run();
        }
    }

    let dropped = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        let dropped = queue.pending.len();
        queue.pending.clear();
        dropped
    });
    if dropped == 0 {
        return Ok(());
    }

    error!(passes = MAX_FLUSH_PASSES, dropped, "flush limit exceeded");
    Err(ReactiveError::FlushLimitExceeded {
        passes: MAX_FLUSH_PASSES,
    })
}

fn push_microtask(task: Microtask) {
    QUEUE.with(|queue| queue.borrow_mut().microtasks.push_back(task));
}

/// Run `task` at the next microtask checkpoint.
pub fn queue_microtask(task: impl FnOnce() + 'static) {
    push_microtask(Box::new(move || {
        task();
        Ok(())
    }));
}

/// The microtask checkpoint: run queued microtasks until none is left.
///
/// Microtasks queued while draining run in the same call. Returns how many
/// ran, or the first error a flush reported after running the rest.
pub fn drain() -> Result<usize> {
    let mut ran = 0;
    let mut failure = None;

    while let Some(task) = QUEUE.with(|queue| queue.borrow_mut().microtasks.pop_front()) {
        ran += 1;
        if let Err(err) = task() {
            failure.get_or_insert(err);
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(ran),
    }
}

/// Whether any job or microtask is waiting.
pub fn has_pending() -> bool {
    QUEUE.with(|queue| {
        let queue = queue.borrow();
        !queue.pending.is_empty() || !queue.microtasks.is_empty()
    })
}

/// Number of jobs waiting for the next flush.
pub fn pending_jobs() -> usize {
    QUEUE.with(|queue| queue.borrow().pending.len())
}
