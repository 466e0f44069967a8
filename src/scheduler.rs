//! Executes batches of build and probe tasks and waits for all of them.
//!
//! The wait is the only ordering guarantee the indices rely on: a shared index
//! is read only after `run_to_completion` returned `Ok`.

use crate::{Error, Result};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Unit of work; may borrow from the caller for the duration of the batch.
pub type BuildTask<'s> = Box<dyn FnOnce() -> Result<()> + Send + 's>;

pub trait TaskScheduler: Send + Sync + fmt::Debug {
    /// Run every task and block until all have finished.
    ///
    /// Returns the first failure if any task failed; panics are reported as
    /// [`Error::Worker`].
    fn run_to_completion<'s>(&self, tasks: Vec<BuildTask<'s>>) -> Result<()>;

    /// Number of tasks that can make progress at once
    fn parallelism(&self) -> usize;
}

fn run_guarded(task: BuildTask<'_>) -> Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "task panicked".to_string());
            Err(Error::Worker(message))
        }
    }
}

/// Runs tasks on a dedicated rayon pool.
#[derive(Clone)]
pub struct RayonScheduler {
    pool: Arc<ThreadPool>,
}

impl RayonScheduler {
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::Config("scheduler needs at least one thread".to_string()));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("hash-exec-{}", i))
            .build()
            .map_err(|e| Error::Config(format!("failed to build thread pool: {}", e)))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }
}

impl fmt::Debug for RayonScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayonScheduler")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl TaskScheduler for RayonScheduler {
    fn run_to_completion<'s>(&self, tasks: Vec<BuildTask<'s>>) -> Result<()> {
        let scheduled = tasks.len();
        let failures: Mutex<Vec<Error>> = Mutex::new(Vec::new());
        self.pool.scope(|s| {
            for task in tasks {
                let failures = &failures;
                s.spawn(move |_| {
                    if let Err(err) = run_guarded(task) {
                        failures.lock().push(err);
                    }
                });
            }
        });

        let mut failures = failures.into_inner();
        if failures.is_empty() {
            debug!(tasks = scheduled, "Task batch completed");
            return Ok(());
        }
        warn!(
            tasks = scheduled,
            failed = failures.len(),
            "Task batch failed"
        );
        Err(failures.swap_remove(0))
    }

    fn parallelism(&self) -> usize {
        self.pool.current_num_threads()
    }
}

/// Runs tasks one after another on the calling thread, stopping at the first failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineScheduler;

impl TaskScheduler for InlineScheduler {
    fn run_to_completion<'s>(&self, tasks: Vec<BuildTask<'s>>) -> Result<()> {
        for task in tasks {
            run_guarded(task)?;
        }
        Ok(())
    }

    fn parallelism(&self) -> usize {
        1
    }
}
