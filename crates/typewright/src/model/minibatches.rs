//! # Raw Batch Streams
//!
//! Groups a stream of samples into [`BatchData`] accumulators, using the
//! architecture's batch-growing hooks to decide when a batch is full. A
//! non-empty trailing batch is always yielded, even if under-full.

use crate::{
    errors::TWResult,
    model::{
        architecture::Architecture,
        batch::{BatchData, extend_batch, init_batch},
    },
};

/// A collected, not yet finalised, batch.
#[derive(Debug)]
pub struct RawBatch<B> {
    /// The accumulated batch.
    pub data: BatchData<B>,

    /// Samples in this batch.
    pub samples_in_batch: usize,

    /// Samples yielded so far in this pass, this batch included.
    pub samples_used_so_far: usize,
}

/// Iterator of [`RawBatch`]es over a sample stream.
pub struct RawBatches<'a, A: Architecture, I> {
    architecture: &'a A,
    samples: I,
    current: Option<BatchData<A::Batch>>,
    samples_used_so_far: usize,
}

impl<'a, A, I> RawBatches<'a, A, I>
where
    A: Architecture,
    I: Iterator<Item = TWResult<A::Sample>>,
{
    /// Batch `samples` with the hooks of `architecture`.
    pub fn new(
        architecture: &'a A,
        samples: I,
    ) -> Self {
        Self {
            architecture,
            samples,
            current: Some(init_batch(architecture)),
            samples_used_so_far: 0,
        }
    }

    fn emit(
        &mut self,
        data: BatchData<A::Batch>,
    ) -> RawBatch<A::Batch> {
        let samples_in_batch = data.samples_in_batch;
        self.samples_used_so_far += samples_in_batch;
        RawBatch {
            data,
            samples_in_batch,
            samples_used_so_far: self.samples_used_so_far,
        }
    }
}

impl<A, I> Iterator for RawBatches<'_, A, I>
where
    A: Architecture,
    I: Iterator<Item = TWResult<A::Sample>>,
{
    type Item = TWResult<RawBatch<A::Batch>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let current = self.current.as_mut()?;
            match self.samples.next() {
                Some(Ok(sample)) => {
                    if extend_batch(self.architecture, current, &sample) {
                        let fresh = init_batch(self.architecture);
                        let full = std::mem::replace(current, fresh);
                        return Some(Ok(self.emit(full)));
                    }
                }
                Some(Err(err)) => {
                    self.current = None;
                    return Some(Err(err));
                }
                None => {
                    let last = self.current.take()?;
                    if last.is_empty() {
                        return None;
                    }
                    return Some(Ok(self.emit(last)));
                }
            }
        }
    }
}
