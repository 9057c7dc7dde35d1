//! # Job Runners
//!
//! Scatter/gather execution of independent units of work.
//!
//! A [`JobRunner`] takes a list of items and a job function, runs the job once
//! per item (possibly in parallel, in any order), blocks until every unit has
//! finished, and returns the results in submission order. Units share no
//! mutable state; the first failing unit fails the whole run.

#[cfg(feature = "rayon")]
use std::num::NonZeroUsize;

use crate::errors::TWResult;

/// Scatter/gather job execution.
pub trait JobRunner {
    /// Run `job(index, item)` for every item; return the results in item order.
    fn run_jobs<I, O, F>(
        &self,
        items: Vec<I>,
        job: F,
    ) -> TWResult<Vec<O>>
    where
        I: Send,
        O: Send,
        F: Fn(usize, I) -> TWResult<O> + Send + Sync;

    /// Run every job, handing each result to `on_result` once all have finished.
    fn run_jobs_with<I, O, F, C>(
        &self,
        items: Vec<I>,
        job: F,
        mut on_result: C,
    ) -> TWResult<()>
    where
        I: Send,
        O: Send,
        F: Fn(usize, I) -> TWResult<O> + Send + Sync,
        C: FnMut(O),
    {
        for result in self.run_jobs(items, job)? {
            on_result(result);
        }
        Ok(())
    }
}

/// Runs every job on the calling thread, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialJobRunner;

impl JobRunner for SequentialJobRunner {
    fn run_jobs<I, O, F>(
        &self,
        items: Vec<I>,
        job: F,
    ) -> TWResult<Vec<O>>
    where
        I: Send,
        O: Send,
        F: Fn(usize, I) -> TWResult<O> + Send + Sync,
    {
        items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| job(idx, item))
            .collect()
    }
}

/// Runs jobs on a dedicated ``rayon`` pool.
#[cfg(feature = "rayon")]
#[derive(Debug, Clone, Copy, Default)]
pub struct RayonJobRunner {
    /// Upper bound on the pool size; see [`super::threads::resolve_max_pool`].
    pub max_threads: Option<NonZeroUsize>,
}

#[cfg(feature = "rayon")]
impl RayonJobRunner {
    /// Create a runner with at most `max_threads` workers.
    pub fn new(max_threads: Option<NonZeroUsize>) -> Self {
        Self { max_threads }
    }
}

#[cfg(feature = "rayon")]
impl JobRunner for RayonJobRunner {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, items, job)))]
    fn run_jobs<I, O, F>(
        &self,
        items: Vec<I>,
        job: F,
    ) -> TWResult<Vec<O>>
    where
        I: Send,
        O: Send,
        F: Fn(usize, I) -> TWResult<O> + Send + Sync,
    {
        use rayon::prelude::*;

        let num_threads = super::threads::resolve_max_pool(self.max_threads);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| crate::errors::TypewrightError::Worker(e.to_string()))?;

        log::debug!("Running {} jobs on {} threads", items.len(), num_threads);

        pool.install(|| {
            items
                .into_par_iter()
                .enumerate()
                .map(|(idx, item)| job(idx, item))
                .collect()
        })
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        /// The job runner used when none is given.
        pub type DefaultJobRunner = RayonJobRunner;
    } else {
        /// The job runner used when none is given.
        pub type DefaultJobRunner = SequentialJobRunner;
    }
}
