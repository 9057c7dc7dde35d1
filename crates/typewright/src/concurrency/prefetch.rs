//! # Chunk Prefetching
//!
//! A bounded-concurrency, order-preserving reader of chunk files.
//!
//! ```text
//!   feeder ──(path, slot)──▶ [job queue] ──▶ worker 0..N ──▶ slot
//!      │                                                    │
//!      └──────slot receiver──▶ [ordered queue, depth D] ──▶ consumer
//! ```
//!
//! The feeder registers a one-shot result slot on the ordered queue before
//! dispatching each read, so the consumer always receives chunks in path order,
//! and at most `D` chunks are ever buffered ahead of it. The feeder blocks once
//! the ordered queue is full.

use std::{path::PathBuf, thread, thread::JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use serde::de::DeserializeOwned;

use crate::{
    errors::{TWResult, TypewrightError},
    io::read_records,
};

type ChunkResult<S> = TWResult<Vec<S>>;

enum PrefetchState<S> {
    Inline {
        paths: std::vec::IntoIter<PathBuf>,
    },
    Threaded {
        pending: Option<Receiver<Receiver<ChunkResult<S>>>>,
        handles: Vec<JoinHandle<()>>,
    },
}

/// Iterator over the decoded contents of a sequence of chunk files.
pub struct ChunkPrefetcher<S> {
    state: PrefetchState<S>,
}

impl<S> ChunkPrefetcher<S>
where
    S: DeserializeOwned + Send + 'static,
{
    /// Read `paths` in order on the calling thread.
    pub fn inline(paths: Vec<PathBuf>) -> Self {
        Self {
            state: PrefetchState::Inline {
                paths: paths.into_iter(),
            },
        }
    }

    /// Read `paths` with `num_workers` threads, buffering at most `queue_depth` chunks.
    ///
    /// With `num_workers == 0` this is [`Self::inline`].
    pub fn new(
        paths: Vec<PathBuf>,
        num_workers: usize,
        queue_depth: usize,
    ) -> TWResult<Self> {
        if num_workers == 0 {
            return Ok(Self::inline(paths));
        }

        let (job_tx, job_rx) = bounded::<(PathBuf, Sender<ChunkResult<S>>)>(num_workers);
        let (order_tx, order_rx) = bounded::<Receiver<ChunkResult<S>>>(queue_depth.max(1));

        let mut handles = Vec::with_capacity(num_workers + 1);
        for worker_id in 0..num_workers {
            let job_rx = job_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("chunk-reader-{worker_id}"))
                .spawn(move || {
                    for (path, slot) in job_rx.iter() {
                        // The consumer may have gone away; nothing to do then.
                        let _ = slot.send(read_records::<S>(&path));
                    }
                })?;
            handles.push(handle);
        }
        drop(job_rx);

        let feeder = thread::Builder::new()
            .name("chunk-feeder".to_string())
            .spawn(move || {
                for path in paths {
                    let (slot_tx, slot_rx) = bounded(1);
                    if order_tx.send(slot_rx).is_err() {
                        break;
                    }
                    if job_tx.send((path, slot_tx)).is_err() {
                        break;
                    }
                }
            })?;
        handles.push(feeder);

        Ok(Self {
            state: PrefetchState::Threaded {
                pending: Some(order_rx),
                handles,
            },
        })
    }
}

impl<S> Iterator for ChunkPrefetcher<S>
where
    S: DeserializeOwned + Send + 'static,
{
    type Item = ChunkResult<S>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.state {
            PrefetchState::Inline { paths } => paths.next().map(|path| read_records(&path)),
            PrefetchState::Threaded { pending, .. } => {
                let slot = pending.as_ref()?.recv().ok()?;
                Some(slot.recv().unwrap_or_else(|_| {
                    Err(TypewrightError::Worker(
                        "chunk reader exited without a result".to_string(),
                    ))
                }))
            }
        }
    }
}

impl<S> Drop for ChunkPrefetcher<S> {
    fn drop(&mut self) {
        if let PrefetchState::Threaded { pending, handles } = &mut self.state {
            // Closing the ordered queue stops the feeder, which stops the workers.
            pending.take();
            for handle in handles.drain(..) {
                let _ = handle.join();
            }
        }
    }
}
