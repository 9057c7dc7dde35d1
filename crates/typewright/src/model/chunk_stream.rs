//! # Chunk Streaming
//!
//! A [`ChunkStream`] yields every sample of a list of chunk files exactly
//! once, holding only a bounded pool of chunks in memory.
//!
//! ```text
//!   chunk paths ──(shuffled when training)──▶ ChunkPrefetcher
//!                                                  │ open
//!                                                  ▼
//!        pool: [ slot 0 | slot 1 | ... | slot P-1 ]   each slot = (samples, order, used)
//!                     ▲ round-robin cursor
//! ```
//!
//! Each step advances the cursor to the next slot and takes that slot's next
//! sample in its (possibly shuffled) order. An exhausted slot is evicted and
//! one replacement chunk is opened in its place, until the paths run out.
//! With shuffling disabled and a pool of one, iteration is the plain
//! concatenation of the chunks in path order.

use std::path::PathBuf;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::de::DeserializeOwned;

use crate::{
    concurrency::ChunkPrefetcher,
    errors::TWResult,
    options::PipelineOptions,
};

/// One open chunk.
struct OpenChunk<S> {
    samples: Vec<Option<S>>,
    order: Vec<usize>,
    used: usize,
}

impl<S> OpenChunk<S> {
    fn new(
        samples: Vec<S>,
        rng: Option<&mut StdRng>,
    ) -> Self {
        let mut order: Vec<usize> = (0..samples.len()).collect();
        if let Some(rng) = rng {
            order.shuffle(rng);
        }
        Self {
            samples: samples.into_iter().map(Some).collect(),
            order,
            used: 0,
        }
    }

    fn is_exhausted(&self) -> bool {
        self.used >= self.order.len()
    }

    fn take_next(&mut self) -> Option<S> {
        let idx = *self.order.get(self.used)?;
        self.used += 1;
        self.samples[idx].take()
    }
}

/// Bounded-memory, round-robin iteration over chunk files.
pub struct ChunkStream<S> {
    source: ChunkPrefetcher<S>,
    pool: Vec<OpenChunk<S>>,
    pool_size: usize,
    cursor: usize,
    pending_opens: usize,
    rng: Option<StdRng>,
    failed: bool,
}

impl<S> ChunkStream<S>
where
    S: DeserializeOwned + Send + 'static,
{
    /// Stream `chunk_paths`.
    ///
    /// ## Arguments
    /// * `chunk_paths` - the chunk files.
    /// * `is_train` - shuffle chunk order and sample order, and keep
    ///   [`PipelineOptions::train_open_chunks`] chunks open; otherwise iterate
    ///   deterministically with [`PipelineOptions::eval_open_chunks`].
    /// * `seed` - seeds all shuffling; unused when not training.
    /// * `options` - pool and prefetch sizes.
    pub fn new(
        chunk_paths: &[PathBuf],
        is_train: bool,
        seed: u64,
        options: &PipelineOptions,
    ) -> TWResult<Self> {
        let mut paths = chunk_paths.to_vec();
        let rng = if is_train {
            let mut rng = StdRng::seed_from_u64(seed);
            paths.shuffle(&mut rng);
            Some(rng)
        } else {
            None
        };

        let pool_size = options.open_chunks(is_train);
        let source = ChunkPrefetcher::new(
            paths,
            options.prefetch_workers,
            options.prefetch_queue_depth,
        )?;

        Ok(Self {
            source,
            pool: Vec::with_capacity(pool_size),
            pool_size,
            cursor: 0,
            pending_opens: pool_size,
            rng,
            failed: false,
        })
    }

    /// The number of chunks currently held open.
    pub fn open_chunks(&self) -> usize {
        self.pool.len()
    }

    /// Open up to `pending_opens` chunks; stops quietly when the paths run out.
    fn refill(&mut self) -> TWResult<()> {
        while self.pending_opens > 0 {
            self.pending_opens -= 1;
            match self.source.next() {
                None => {
                    self.pending_opens = 0;
                }
                Some(chunk) => {
                    let chunk = OpenChunk::new(chunk?, self.rng.as_mut());
                    self.pool.push(chunk);
                }
            }
        }
        debug_assert!(self.pool.len() <= self.pool_size);
        Ok(())
    }

    fn evict(
        &mut self,
        slot: usize,
    ) {
        self.pool.remove(slot);
        self.pending_opens += 1;
    }
}

impl<S> Iterator for ChunkStream<S>
where
    S: DeserializeOwned + Send + 'static,
{
    type Item = TWResult<S>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            if let Err(err) = self.refill() {
                self.failed = true;
                return Some(Err(err));
            }
            if self.pool.is_empty() {
                return None;
            }

            self.cursor = (self.cursor + 1) % self.pool.len();
            let slot = self.cursor;

            if self.pool[slot].is_exhausted() {
                self.evict(slot);
                continue;
            }

            let sample = self.pool[slot].take_next();
            if self.pool[slot].is_exhausted() {
                self.evict(slot);
            }
            if let Some(sample) = sample {
                return Some(Ok(sample));
            }
        }
    }
}
