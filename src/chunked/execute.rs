//! Strategy execution for block jobs
//!
//! Materializing a lazy array is planned as a set of independent block
//! jobs. This module runs a job set under the strategy carried by a
//! [`SchedulerSpec`](crate::scheduler::SchedulerSpec): sequentially, on the
//! shared Rayon pool, on a dedicated pool sized by `num_workers`, or on an
//! externally supplied executor. Jobs may run in any order and
//! concurrently; callers must not rely on cross-block ordering.

use crate::errors::{Result, RuCubeError};
use crate::scheduler::{SchedulerSpec, SchedulerStrategy};
use ndarray::ArrayD;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

/// One evaluated block: its grid index and its data.
#[derive(Debug, Clone)]
pub struct BlockOutput {
    pub index: Vec<usize>,
    pub data: ArrayD<f64>,
}

/// A deferred block evaluation, ready to run on any worker.
pub type BlockJob = Box<dyn FnOnce() -> Result<BlockOutput> + Send>;

/// An externally managed execution backend, passed through the scheduler
/// stack as a strategy in its own right.
///
/// Implementations receive the full job set for one materialization and
/// return every block output. Failures propagate to the caller unmodified;
/// the engine adds no retry logic.
pub trait BlockExecutor: Send + Sync {
    /// Short name used in the merged scheduler kwargs and diagnostics.
    fn name(&self) -> &str;

    /// Run all jobs and collect their outputs, in any order.
    fn execute(&self, jobs: Vec<BlockJob>) -> Result<Vec<BlockOutput>>;
}

/// Run a set of block jobs under the given scheduler strategy.
pub(crate) fn run_jobs(spec: &SchedulerSpec, jobs: Vec<BlockJob>) -> Result<Vec<BlockOutput>> {
    match &spec.strategy {
        SchedulerStrategy::Synchronous => jobs.into_iter().map(|job| job()).collect(),
        SchedulerStrategy::Threads => {
            println!(
                "⚡ Executing {} block jobs across {} threads",
                jobs.len(),
                rayon::current_num_threads()
            );
            jobs.into_par_iter().map(|job| job()).collect()
        }
        SchedulerStrategy::Processes => {
            let num_workers = spec
                .options
                .get("num_workers")
                .and_then(serde_json::Value::as_u64)
                .map_or_else(num_cpus::get, |n| n as usize);
            let pool = ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .build()
                .map_err(|e| {
                    RuCubeError::ThreadPoolError(format!(
                        "Failed to build worker pool with {} workers: {}",
                        num_workers, e
                    ))
                })?;
            println!(
                "⚡ Executing {} block jobs on a dedicated pool of {} workers",
                jobs.len(),
                num_workers
            );
            pool.install(|| jobs.into_par_iter().map(|job| job()).collect())
        }
        SchedulerStrategy::External(executor) => executor.execute(jobs),
    }
}

/// Configuration for the shared Rayon thread pool used by the `threads`
/// strategy.
#[derive(Debug, Clone, Default)]
pub struct ParallelConfig {
    pub num_threads: Option<usize>,
}

impl ParallelConfig {
    /// Use a specific number of threads.
    #[must_use]
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
        }
    }

    /// Use one thread per available CPU core.
    #[must_use]
    pub fn all_cores() -> Self {
        Self {
            num_threads: Some(num_cpus::get()),
        }
    }

    /// Set up the global Rayon thread pool with this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the global pool was already initialized with a
    /// different configuration.
    pub fn setup_global_pool(&self) -> Result<()> {
        if let Some(num_threads) = self.num_threads {
            ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .map_err(|e| {
                    RuCubeError::ThreadPoolError(format!(
                        "Failed to initialize thread pool with {} threads: {}",
                        num_threads, e
                    ))
                })?;
            println!("✅ Configured parallel processing with {} threads", num_threads);
        }
        Ok(())
    }

    /// The number of threads the shared pool currently uses.
    #[must_use]
    pub fn current_threads(&self) -> usize {
        rayon::current_num_threads()
    }
}
