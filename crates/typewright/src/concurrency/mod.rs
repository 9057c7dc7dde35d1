//! # Concurrency Utilities
//!
//! The two bounded worker mechanisms of the lifecycle:
//! * [`JobRunner`] - scatter/gather fan-out for per-file metadata and tensorisation passes.
//! * [`ChunkPrefetcher`] - the ordered, backpressured chunk reader behind chunk streaming.

pub mod job_runner;
pub mod prefetch;
pub mod threads;

#[cfg(feature = "rayon")]
#[doc(inline)]
pub use job_runner::RayonJobRunner;
#[doc(inline)]
pub use job_runner::{DefaultJobRunner, JobRunner, SequentialJobRunner};
#[doc(inline)]
pub use prefetch::ChunkPrefetcher;
