//! Background execution of load jobs.
//!
//! The controller receives its executor at construction time. [`WorkerPool`]
//! runs jobs on a fixed set of OS threads; [`InlineExecutor`] runs them on
//! the calling thread, which keeps tests deterministic.

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// A unit of background work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs and can wait for the ones already scheduled.
pub trait Executor: Send + Sync {
    /// Schedules a job. Never blocks on the job itself.
    fn execute(&self, job: Job);

    /// Blocks until every job scheduled before this call has completed.
    ///
    /// Jobs scheduled while waiting are not waited for, so a steady stream
    /// of new work cannot hold the caller forever.
    fn wait_submitted(&self);

    /// Number of jobs scheduled but not yet completed.
    fn in_flight(&self) -> usize;
}

#[derive(Debug, Default)]
struct Tickets {
    /// Ticket handed to the next scheduled job
    next: u64,
    /// Tickets of jobs that have not completed
    outstanding: BTreeSet<u64>,
}

/// Tracks outstanding jobs by ticket and wakes waiters as they complete.
#[derive(Debug, Default)]
struct Pending {
    tickets: Mutex<Tickets>,
    completed: Condvar,
}

impl Pending {
    fn begin(&self) -> u64 {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;
        tickets.outstanding.insert(ticket);
        ticket
    }

    fn finish(&self, ticket: u64) {
        self.tickets.lock().outstanding.remove(&ticket);
        self.completed.notify_all();
    }

    /// Waits until no job older than the call is outstanding.
    fn wait(&self) {
        let mut tickets = self.tickets.lock();
        let barrier = tickets.next;
        while tickets
            .outstanding
            .first()
            .is_some_and(|&oldest| oldest < barrier)
        {
            self.completed.wait(&mut tickets);
        }
    }

    fn get(&self) -> usize {
        self.tickets.lock().outstanding.len()
    }
}

/// Retires a ticket even if the job panics.
struct FinishGuard<'a> {
    pending: &'a Pending,
    ticket: u64,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.pending.finish(self.ticket);
    }
}

fn run_job(job: Job, pending: &Pending, ticket: u64) {
    let _guard = FinishGuard { pending, ticket };
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("Background job panicked");
    }
}

/// Fixed-size pool of named worker threads fed by a channel.
pub struct WorkerPool {
    sender: Option<Sender<(u64, Job)>>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<Pending>,
}

impl WorkerPool {
    /// Spawns a pool with `threads` workers (at least one).
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = unbounded::<(u64, Job)>();
        let pending = Arc::new(Pending::default());

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver = receiver.clone();
            let pending = Arc::clone(&pending);
            let handle = std::thread::Builder::new()
                .name(format!("chunk-loader-{i}"))
                .spawn(move || {
                    while let Ok((ticket, job)) = receiver.recv() {
                        run_job(job, &pending, ticket);
                    }
                    debug!("Worker exiting");
                })?;
            workers.push(handle);
        }

        info!("Started worker pool with {threads} threads");
        Ok(Self {
            sender: Some(sender),
            workers,
            pending,
        })
    }

    /// Spawns a pool sized to the available parallelism.
    pub fn with_default_threads() -> std::io::Result<Self> {
        Self::new(default_thread_count())
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.workers.len()
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) {
        let Some(sender) = &self.sender else {
            return;
        };
        let ticket = self.pending.begin();
        if let Err(rejected) = sender.send((ticket, job)) {
            // All workers are gone; run it here rather than lose it.
            error!("Worker pool closed, running job inline");
            let (ticket, job) = rejected.into_inner();
            run_job(job, &self.pending, ticket);
        }
    }

    fn wait_submitted(&self) {
        self.pending.wait();
    }

    fn in_flight(&self) -> usize {
        self.pending.get()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers finish queued jobs and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Worker thread panicked during shutdown");
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.workers.len())
            .field("in_flight", &self.pending.get())
            .finish()
    }
}

/// Runs every job immediately on the calling thread.
#[derive(Debug, Default)]
pub struct InlineExecutor {
    pending: Pending,
}

impl InlineExecutor {
    /// Creates a new inline executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        let ticket = self.pending.begin();
        run_job(job, &self.pending, ticket);
    }

    fn wait_submitted(&self) {
        self.pending.wait();
    }

    fn in_flight(&self) -> usize {
        self.pending.get()
    }
}

/// Thread count used when configuration asks for the default.
#[must_use]
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_pool_runs_all_jobs() {
        let pool = WorkerPool::new(4).expect("pool");
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.wait_submitted();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_wait_blocks_until_submitted_jobs_done() {
        let pool = WorkerPool::new(2).expect("pool");
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let done = Arc::clone(&done);
            pool.execute(Box::new(move || {
                std::thread::sleep(Duration::from_millis(20));
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.wait_submitted();
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_wait_ignores_jobs_scheduled_later() {
        let pool = Arc::new(WorkerPool::new(1).expect("pool"));
        pool.execute(Box::new(|| std::thread::sleep(Duration::from_millis(20))));

        let stop = Arc::new(AtomicUsize::new(0));
        let submitter = {
            let pool = Arc::clone(&pool);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while stop.load(Ordering::SeqCst) == 0 {
                    pool.execute(Box::new(|| std::thread::sleep(Duration::from_millis(2))));
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
        };

        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.wait_submitted())
        };
        for _ in 0..500 {
            if waiter.is_finished() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let returned = waiter.is_finished();
        stop.store(1, Ordering::SeqCst);
        submitter.join().expect("submitter");
        waiter.join().expect("waiter");
        assert!(returned, "wait blocked on jobs scheduled after it started");
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1).expect("pool");
        pool.execute(Box::new(|| panic!("boom")));
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        pool.execute(Box::new(move || {
            flag.store(1, Ordering::SeqCst);
        }));
        pool.wait_submitted();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_drop_finishes_queued_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(1).expect("pool");
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                pool.execute(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_inline_executor_runs_immediately() {
        let exec = InlineExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        exec.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(exec.in_flight(), 0);
        exec.wait_submitted();
    }
}
