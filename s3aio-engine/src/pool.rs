//! Fixed-size worker pool for chunk fan-out

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;
use s3aio_core::*;

/// Bounded set of worker threads shared by every transfer of one engine
pub struct WorkerPool {
    pool: ThreadPool,
    size: usize,
}

impl WorkerPool {
    /// Create a pool with `num_workers` threads; 0 means available parallelism
    pub fn new(num_workers: usize) -> Result<Self> {
        let size = if num_workers == 0 {
            default_size()
        } else {
            num_workers
        };

        let pool = ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("s3aio-worker-{}", i))
            .build()
            .map_err(|e| S3IoError::Pool(e.to_string()))?;

        debug!("Worker pool started with {} workers", size);
        Ok(WorkerPool { pool, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` over every task in parallel.
    ///
    /// Results come back in task order. Fail-fast: once a task errors the
    /// remaining tasks are skipped where possible and that error is returned;
    /// no partial results are surfaced.
    pub fn map<T, R, F>(&self, tasks: &[T], f: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync + Send,
    {
        self.pool.install(|| tasks.par_iter().map(&f).collect())
    }
}

fn default_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
