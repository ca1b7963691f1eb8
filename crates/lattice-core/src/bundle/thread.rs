//! Worker threads that run activator callbacks on behalf of a waiting
//! caller, and the single-result slot the two meet at.
//!
//! A worker holds at most one job. After finishing it returns to the idle
//! list and exits once it has been idle for the keep-alive period. A
//! worker whose caller gave up waiting is marked as a zombie: it finishes
//! (or keeps blocking in) the abandoned callback and is never reused.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::bundle::state::{Aborted, AtomicAborted};
use crate::bundle::{AbortCause, BundleError};
use crate::kernel::guard::panic_message;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// What a caller saw while waiting on an [`OperationSlot`].
#[derive(Debug)]
pub(crate) enum SlotWait {
    Completed(Result<(), BundleError>),
    Aborted(AbortCause),
}

#[derive(Default)]
struct SlotState {
    result: Option<Result<(), BundleError>>,
    abort: Option<AbortCause>,
}

/// Rendezvous between a start/stop caller and the worker running the
/// activator. Each dispatched operation gets its own slot.
#[derive(Default)]
pub(crate) struct OperationSlot {
    state: Mutex<SlotState>,
    cond: Condvar,
    settled: AtomicAborted,
}

impl OperationSlot {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claims this operation's outcome for one side: `Aborted::Yes` for the
    /// caller giving up, `Aborted::No` for the worker committing its
    /// result. Only the first claim succeeds.
    pub(crate) fn settle(&self, side: Aborted) -> bool {
        self.settled.transition(Aborted::None, side)
    }

    pub(crate) fn complete(&self, result: Result<(), BundleError>) {
        self.state.lock().result = Some(result);
        self.cond.notify_all();
    }

    /// Wakes the waiting caller early. Has no effect once a result is in.
    pub(crate) fn abort(&self, cause: AbortCause) {
        let mut state = self.state.lock();
        if state.result.is_none() {
            state.abort = Some(cause);
            drop(state);
            self.cond.notify_all();
        }
    }

    /// Waits for the result, an abort request or the timeout.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> SlotWait {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if let Some(result) = state.result.take() {
                return SlotWait::Completed(result);
            }
            if let Some(cause) = state.abort.take() {
                return SlotWait::Aborted(cause);
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        return match state.result.take() {
                            Some(result) => SlotWait::Completed(result),
                            None => SlotWait::Aborted(AbortCause::Timeout),
                        };
                    }
                }
                None => self.cond.wait(&mut state),
            }
        }
    }

    /// Waits for the worker's result, ignoring abort requests.
    pub(crate) fn wait_result(&self) -> Result<(), BundleError> {
        let mut state = self.state.lock();
        loop {
            if let Some(result) = state.result.take() {
                return result;
            }
            self.cond.wait(&mut state);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerMode {
    Idle,
    Busy,
    Zombie,
    Retired,
}

struct Mailbox {
    job: Option<Job>,
    mode: WorkerMode,
}

/// One worker thread and its single-job mailbox.
pub(crate) struct BundleThread {
    number: usize,
    mailbox: Mutex<Mailbox>,
    cond: Condvar,
}

impl BundleThread {
    fn post(&self, job: Job) {
        let mut mailbox = self.mailbox.lock();
        mailbox.job = Some(job);
        mailbox.mode = WorkerMode::Busy;
        drop(mailbox);
        self.cond.notify_one();
    }

    /// Detaches the worker from the pool; it exits after its current job.
    pub(crate) fn make_zombie(&self) {
        self.mailbox.lock().mode = WorkerMode::Zombie;
        log::warn!(target: "lattice::bundle", "Bundle worker #{} abandoned by its caller", self.number);
    }

    fn retire(&self) {
        self.mailbox.lock().mode = WorkerMode::Retired;
        self.cond.notify_one();
    }
}

struct PoolInner {
    idle: Mutex<Vec<Arc<BundleThread>>>,
    live: AtomicUsize,
    spawned: AtomicUsize,
    keep_alive: Duration,
}

impl PoolInner {
    /// Takes `thread` off the idle list if it is still there.
    fn retire_idle(&self, thread: &Arc<BundleThread>) -> bool {
        let mut idle = self.idle.lock();
        match idle.iter().position(|t| Arc::ptr_eq(t, thread)) {
            Some(pos) => {
                idle.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Pool of bundle worker threads.
pub(crate) struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl ThreadPool {
    pub(crate) fn new(keep_alive: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                live: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
                keep_alive,
            }),
        }
    }

    /// Runs `job` on an idle worker, spawning one if none is free.
    pub(crate) fn execute(&self, job: Job) -> Result<Arc<BundleThread>, BundleError> {
        let reused = self.inner.idle.lock().pop();
        let thread = match reused {
            Some(thread) => thread,
            None => self.spawn()?,
        };
        thread.post(job);
        Ok(thread)
    }

    fn spawn(&self) -> Result<Arc<BundleThread>, BundleError> {
        let number = self.inner.spawned.fetch_add(1, Ordering::Relaxed) + 1;
        let thread = Arc::new(BundleThread {
            number,
            mailbox: Mutex::new(Mailbox { job: None, mode: WorkerMode::Idle }),
            cond: Condvar::new(),
        });
        let worker = thread.clone();
        let pool = Arc::downgrade(&self.inner);
        self.inner.live.fetch_add(1, Ordering::AcqRel);
        let spawned = std::thread::Builder::new()
            .name(format!("lattice-bundle-{number}"))
            .spawn(move || worker_loop(worker, pool));
        if let Err(e) = spawned {
            self.inner.live.fetch_sub(1, Ordering::AcqRel);
            return Err(BundleError::WorkerSpawn(Arc::new(e)));
        }
        log::trace!(target: "lattice::bundle", "Spawned bundle worker #{}", number);
        Ok(thread)
    }

    /// Threads that are still running, zombies included.
    pub(crate) fn live_threads(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    pub(crate) fn idle_threads(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Tells every idle worker to exit.
    pub(crate) fn shutdown(&self) {
        let idle: Vec<_> = self.inner.idle.lock().drain(..).collect();
        for thread in idle {
            thread.retire();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn next_job(thread: &Arc<BundleThread>, pool: &Weak<PoolInner>, keep_alive: Duration) -> Option<Job> {
    let mut mailbox = thread.mailbox.lock();
    loop {
        if let Some(job) = mailbox.job.take() {
            return Some(job);
        }
        if mailbox.mode == WorkerMode::Retired {
            return None;
        }
        if thread.cond.wait_for(&mut mailbox, keep_alive).timed_out() && mailbox.job.is_none() {
            // Pool lock before mailbox lock, as in `execute`.
            let retired = MutexGuard::unlocked(&mut mailbox, || match pool.upgrade() {
                Some(pool) => pool.retire_idle(thread),
                None => true,
            });
            if retired {
                return None;
            }
        }
    }
}

fn worker_loop(thread: Arc<BundleThread>, pool: Weak<PoolInner>) {
    let keep_alive = pool.upgrade().map(|p| p.keep_alive).unwrap_or_default();
    while let Some(job) = next_job(&thread, &pool, keep_alive) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            log::error!(
                target: "lattice::bundle",
                "Bundle worker #{} job panicked: {}",
                thread.number,
                panic_message(payload.as_ref())
            );
        }
        let Some(inner) = pool.upgrade() else {
            break;
        };
        let mut mailbox = thread.mailbox.lock();
        if mailbox.mode == WorkerMode::Zombie {
            break;
        }
        mailbox.mode = WorkerMode::Idle;
        drop(mailbox);
        inner.idle.lock().push(thread.clone());
    }
    if let Some(inner) = pool.upgrade() {
        inner.live.fetch_sub(1, Ordering::AcqRel);
    }
    log::trace!(target: "lattice::bundle", "Bundle worker #{} exited", thread.number);
}
