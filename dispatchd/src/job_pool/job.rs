// SPDX-License-Identifier: MIT

use log::{debug, warn};
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use thiserror::Error;

use crate::job_pool::queue::JobQueue;

pub trait Job: Send + 'static {
    /// Free-form description, used for logging or debugging
    fn desc(&self) -> &str;

    /// Main entry point. Consumes the job and runs it to completion.
    fn run(self: Box<Self>);
}

impl std::fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("desc", &self.desc()).finish()
    }
}

/// Errors returned by [`JobPool`] operations.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool requires at least one worker thread")]
    NoWorkers,
    #[error("pool is stopping; job rejected")]
    Stopping,
    #[error("job queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    Stopping,
}

struct PoolState {
    queue: JobQueue,
    lifecycle: Lifecycle,
}

/// Queue and lifecycle share one lock: the submit-time state check and the
/// `Running -> Stopping` transition are serialized, so no submission can
/// slip in after a shutdown has been observed.
struct Shared {
    state: Mutex<PoolState>,
    signal: Condvar,
}

/// Fixed-size pool of worker threads draining a bounded job queue.
pub struct JobPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobPool {
    /// Spawns `num_workers` workers sharing a queue of `queue_capacity`
    /// slots. If a spawn fails partway, the workers that did start are
    /// stopped and joined before the error is returned.
    pub fn new(num_workers: usize, queue_capacity: usize) -> Result<Self, PoolError> {
        if num_workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                queue: JobQueue::new(queue_capacity),
                lifecycle: Lifecycle::Running,
            }),
            signal: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(num_workers);
        for idx in 0..num_workers {
            let shared_for_worker = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("worker-{idx}"))
                .spawn(move || worker_loop(idx, &shared_for_worker));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Roll back the workers that already started.
                    shared.state.lock().unwrap().lifecycle = Lifecycle::Stopping;
                    shared.signal.notify_all();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Appends a job to the queue and wakes one waiting worker.
    ///
    /// Rejected once the pool is stopping or when the queue is full; the
    /// job is dropped in either case.
    pub fn submit(&self, job: Box<dyn Job>) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.lifecycle != Lifecycle::Running {
            return Err(PoolError::Stopping);
        }
        if state.queue.enqueue(job).is_err() {
            return Err(PoolError::QueueFull {
                capacity: state.queue.capacity(),
            });
        }
        self.shared.signal.notify_one();
        Ok(())
    }

    /// Stops accepting jobs, wakes every worker and joins them all.
    /// Queued jobs are drained before any worker exits.
    ///
    /// Idempotent: the handle lock serializes concurrent calls, so a second
    /// caller blocks until the first has joined everything and then finds
    /// nothing left to do.
    pub fn shutdown(&self) {
        let mut workers = self.workers.lock().unwrap();
        {
            let mut state = self.shared.state.lock().unwrap();
            state.lifecycle = Lifecycle::Stopping;
            self.shared.signal.notify_all();
        }
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked while running a job");
            }
        }
        debug!("all workers joined");
    }

    /// Number of jobs currently queued, taken under the pool lock.
    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().unwrap().lifecycle == Lifecycle::Running
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        self.shutdown();
        // Anything still queued (possible only if workers died early) is
        // discarded without running; dropping the box releases whatever
        // state the job owns.
    }
}

fn worker_loop(idx: usize, shared: &Shared) {
    debug!("worker {idx} started");
    loop {
        let mut state = shared.state.lock().unwrap();

        // Park while running with nothing to do.
        while state.lifecycle == Lifecycle::Running && state.queue.is_empty() {
            state = shared.signal.wait(state).unwrap();
        }

        // Stopping and drained: terminal state for this worker.
        let Some(job) = state.queue.dequeue() else {
            break;
        };
        drop(state);

        debug!("worker {idx}: running job '{}'", job.desc());
        job.run();
    }
    debug!("worker {idx} exiting");
}
