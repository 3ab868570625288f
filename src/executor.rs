//! Shared worker threads for multiplexer coordinators and backend pulls.
//!
//! ## Architecture
//!
//! ```text
//!   Link::send ──► mailbox ──► schedule ──► run queue ──► dispatcher threads
//!                                                           │ drain one mailbox
//!                                                           │ at a time per task
//!                                                           ▼
//!                             pull queue ◄── Job ─── Coordinator::start_pull
//!                                  │
//!                                  ▼
//!                             pull workers ── stream.materialize() ──┐
//!                                                                    │
//!                  mailbox ◄── Message::Pulled ──────────────────────┘
//! ```
//!
//! The thread count is fixed when the executor starts: `dispatchers` threads
//! run coordinator tasks and `pull_workers` threads run backend calls. It
//! does not grow with the number of cached queries. Coordinators never block
//! on the backend, so a few dispatchers serve any number of multiplexers.
//! Pulls beyond `pull_workers` wait in the pull queue.
//!
//! Worker threads hold only the receiving ends. They exit once the executor
//! and every task scheduled on it are gone.

use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};

use crate::error::BuildError;

/// Default number of backend calls that may run at once.
pub const DEFAULT_PULL_WORKERS: usize = 16;

/// A unit of coordinator work, run on a dispatcher thread.
pub(crate) trait Task: Send + Sync {
    fn run(self: Arc<Self>);
}

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queues {
    run: Sender<Arc<dyn Task>>,
    pull: Sender<Job>,
}

/// Handle to a pool of dispatcher and pull-worker threads.
///
/// Cheap to clone. Several stores may share one executor through
/// [`CacheBuilder::executor`](crate::builder::CacheBuilder::executor).
#[derive(Clone)]
pub struct Executor {
    queues: Arc<Queues>,
    dispatchers: usize,
    pull_workers: usize,
}

impl Executor {
    /// Starts `dispatchers` coordinator threads and `pull_workers` backend
    /// threads. Zero counts are raised to one.
    pub fn new(dispatchers: usize, pull_workers: usize) -> Result<Self, BuildError> {
        let dispatchers = dispatchers.max(1);
        let pull_workers = pull_workers.max(1);
        let (run_tx, run_rx) = channel::unbounded::<Arc<dyn Task>>();
        let (pull_tx, pull_rx) = channel::unbounded::<Job>();

        for _ in 0..dispatchers {
            let rx = run_rx.clone();
            spawn("dispatch", move || dispatch_loop(rx))?;
        }
        for _ in 0..pull_workers {
            let rx = pull_rx.clone();
            spawn("pull", move || pull_loop(rx))?;
        }
        tracing::debug!(dispatchers, pull_workers, "executor started");

        Ok(Self {
            queues: Arc::new(Queues {
                run: run_tx,
                pull: pull_tx,
            }),
            dispatchers,
            pull_workers,
        })
    }

    /// One dispatcher per available core, capped at four, and
    /// [`DEFAULT_PULL_WORKERS`] pull workers.
    pub fn with_defaults() -> Result<Self, BuildError> {
        Self::new(default_dispatchers(), DEFAULT_PULL_WORKERS)
    }

    pub fn dispatchers(&self) -> usize {
        self.dispatchers
    }

    pub fn pull_workers(&self) -> usize {
        self.pull_workers
    }

    pub(crate) fn dispatch(&self, task: Arc<dyn Task>) {
        if self.queues.run.send(task).is_err() {
            tracing::warn!("executor has no dispatcher threads left");
        }
    }

    /// Queues a backend call. Returns `false` if no pull worker is left.
    pub(crate) fn submit(&self, job: Job) -> bool {
        self.queues.pull.send(job).is_ok()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("dispatchers", &self.dispatchers)
            .field("pull_workers", &self.pull_workers)
            .field("queued_tasks", &self.queues.run.len())
            .field("queued_pulls", &self.queues.pull.len())
            .finish()
    }
}

pub(crate) fn default_dispatchers() -> usize {
    thread::available_parallelism().map_or(2, |n| n.get().min(4))
}

fn spawn(role: &'static str, body: impl FnOnce() + Send + 'static) -> Result<(), BuildError> {
    thread::Builder::new()
        .name(format!("streamcache-{role}"))
        .spawn(body)
        .map(drop)
        .map_err(|source| BuildError::Spawn { role, source })
}

fn dispatch_loop(rx: Receiver<Arc<dyn Task>>) {
    while let Ok(task) = rx.recv() {
        task.run();
    }
}

fn pull_loop(rx: Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        job();
    }
}
