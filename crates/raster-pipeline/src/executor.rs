//! Order-preserving parallel task execution.
//!
//! Tasks run on a bounded rayon pool. Every task owns one slot in a
//! pre-sized result vector indexed by submission order, so the output order
//! never depends on completion order. Each slot holds either the task's
//! value or a [`TaskError`]; a failing or panicking task never discards the
//! work of its siblings.
//!
//! Dispatch happens in batches. A [`CancellationToken`] is checked between
//! batches: in-flight tasks finish, undispatched tasks are marked cancelled.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};

/// Cooperative cancellation flag shared between the caller and the executor.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Tasks already dispatched still complete.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Why a slot holds no result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task function returned an error.
    #[error("task {index} failed: {message}")]
    Failed { index: usize, message: String },

    /// The task function panicked.
    #[error("task {index} panicked: {message}")]
    Panicked { index: usize, message: String },

    /// The task was never dispatched because the batch was cancelled.
    #[error("task {index} cancelled before dispatch")]
    Cancelled { index: usize },
}

impl TaskError {
    /// Submission index of the task.
    pub fn index(&self) -> usize {
        match self {
            Self::Failed { index, .. } | Self::Panicked { index, .. } | Self::Cancelled { index } => {
                *index
            }
        }
    }
}

/// Outcome of one task.
pub type TaskResult<R> = std::result::Result<R, TaskError>;

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker threads; clamped to the available cores.
    pub workers: usize,
    /// Tasks dispatched between cancellation checks.
    pub batch_size: usize,
    /// Log progress every N completed tasks (0 disables).
    pub progress_interval: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: available_cores(),
            batch_size: 256,
            progress_interval: 1000,
        }
    }
}

impl ExecutorConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be > 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        Ok(())
    }

    /// Worker count bounded above by the available cores.
    pub fn effective_workers(&self) -> usize {
        self.workers.clamp(1, available_cores())
    }
}

/// Cores available to this process (at least 1).
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Ordered results of one batch.
#[derive(Debug)]
pub struct BatchReport<R> {
    /// One entry per submitted task, in submission order.
    pub slots: Vec<TaskResult<R>>,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl<R> BatchReport<R> {
    fn from_slots(slots: Vec<TaskResult<R>>) -> Self {
        let mut completed = 0;
        let mut failed = 0;
        let mut cancelled = 0;
        for slot in &slots {
            match slot {
                Ok(_) => completed += 1,
                Err(TaskError::Cancelled { .. }) => cancelled += 1,
                Err(_) => failed += 1,
            }
        }
        Self {
            slots,
            completed,
            failed,
            cancelled,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Every task produced a value.
    pub fn is_complete(&self) -> bool {
        self.completed == self.slots.len()
    }

    /// Errors in submission order.
    pub fn errors(&self) -> impl Iterator<Item = &TaskError> {
        self.slots.iter().filter_map(|s| s.as_ref().err())
    }

    /// Successful values with their submission index.
    pub fn successes(&self) -> impl Iterator<Item = (usize, &R)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().ok().map(|r| (i, r)))
    }

    /// All values if every task succeeded, otherwise the first error.
    pub fn into_results(self) -> TaskResult<Vec<R>> {
        self.slots.into_iter().collect()
    }
}

/// Bounded worker pool that preserves submission order.
pub struct ParallelExecutor {
    pool: rayon::ThreadPool,
    config: ExecutorConfig,
    progress: Arc<AtomicUsize>,
}

impl ParallelExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        config.validate().map_err(PipelineError::config)?;

        let workers = config.effective_workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("rasterize-{}", i))
            .build()
            .map_err(|e| PipelineError::config(e.to_string()))?;

        debug!(workers, batch_size = config.batch_size, "Created worker pool");

        Ok(Self {
            pool,
            config,
            progress: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Shared counter of tasks finished in the current run.
    pub fn progress(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.progress)
    }

    /// Run `task` over `inputs`, returning one slot per input in input order.
    pub fn run<T, R, E, F>(
        &self,
        inputs: &[T],
        task: F,
        cancel: &CancellationToken,
    ) -> BatchReport<R>
    where
        T: Sync,
        R: Send,
        E: std::fmt::Display,
        F: Fn(usize, &T) -> std::result::Result<R, E> + Sync,
    {
        let total = inputs.len();
        self.progress.store(0, Ordering::SeqCst);

        let mut slots: Vec<TaskResult<R>> = (0..total)
            .map(|index| Err(TaskError::Cancelled { index }))
            .collect();

        let batch_size = self.config.batch_size;
        let interval = self.config.progress_interval;
        let progress = &self.progress;
        let task = &task;

        for (batch, (slot_chunk, input_chunk)) in slots
            .chunks_mut(batch_size)
            .zip(inputs.chunks(batch_size))
            .enumerate()
        {
            if cancel.is_cancelled() {
                warn!(
                    dispatched = batch * batch_size,
                    total, "Cancellation requested, stopping dispatch"
                );
                break;
            }

            let offset = batch * batch_size;
            self.pool.install(|| {
                slot_chunk
                    .par_iter_mut()
                    .zip(input_chunk.par_iter())
                    .enumerate()
                    .for_each(|(i, (slot, input))| {
                        let index = offset + i;
                        *slot = run_one(index, input, task);

                        let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
                        if interval > 0 && done % interval == 0 {
                            info!(done, total, "Rasterization progress");
                        }
                    });
            });
        }

        let report = BatchReport::from_slots(slots);
        info!(
            total,
            completed = report.completed,
            failed = report.failed,
            cancelled = report.cancelled,
            "Batch finished"
        );
        report
    }
}

fn run_one<T, R, E, F>(index: usize, input: &T, task: &F) -> TaskResult<R>
where
    E: std::fmt::Display,
    F: Fn(usize, &T) -> std::result::Result<R, E>,
{
    match catch_unwind(AssertUnwindSafe(|| task(index, input))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TaskError::Failed {
            index,
            message: e.to_string(),
        }),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(TaskError::Panicked { index, message })
        }
    }
}
