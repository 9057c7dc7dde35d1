//! # Minibatch Assembly
//!
//! [`BatchData`] accumulates samples; [`finalise_batch`] turns it into the
//! [`Minibatch`] an engine consumes. Architecture-specific accumulation lives
//! in the `ext` field and is driven through the
//! [`Architecture`](super::Architecture) batch hooks.

use crate::{
    errors::{TWResult, TypewrightError},
    model::{
        architecture::Architecture,
        graph::{BATCH_SIZE, DROPOUT_KEEP_RATE, ModelGraph},
    },
    tensor::{FlatData, Minibatch},
};

/// A minibatch under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchData<B> {
    /// Samples added so far.
    pub samples_in_batch: usize,

    /// Set once the architecture reports the batch full.
    pub batch_finished: bool,

    /// Architecture-specific accumulators.
    pub ext: B,
}

impl<B> BatchData<B> {
    /// An empty batch around fresh accumulators.
    pub fn new(ext: B) -> Self {
        Self {
            samples_in_batch: 0,
            batch_finished: false,
            ext,
        }
    }

    /// Does the batch hold no sample?
    pub fn is_empty(&self) -> bool {
        self.samples_in_batch == 0
    }
}

/// Start a batch for `architecture`.
pub fn init_batch<A: Architecture>(architecture: &A) -> BatchData<A::Batch> {
    BatchData::new(architecture.init_batch())
}

/// Add one sample; returns `true` once the batch is full.
pub fn extend_batch<A: Architecture>(
    architecture: &A,
    batch: &mut BatchData<A::Batch>,
    sample: &A::Sample,
) -> bool {
    batch.samples_in_batch += 1;
    batch.batch_finished = architecture.extend_batch_with_sample(&mut batch.ext, sample);
    batch.batch_finished
}

/// Writes placeholder values, shaped by their declarations.
pub struct MinibatchWriter<'a> {
    graph: &'a ModelGraph,
    minibatch: Minibatch,
}

impl<'a> MinibatchWriter<'a> {
    /// Start an empty minibatch for `graph`.
    pub fn new(graph: &'a ModelGraph) -> Self {
        Self {
            graph,
            minibatch: Minibatch::new(),
        }
    }

    /// The graph being fed.
    pub fn graph(&self) -> &ModelGraph {
        self.graph
    }

    /// Feed `data` to placeholder `name`.
    ///
    /// Empty data still yields a value, with a zero leading dimension.
    pub fn write<D: Into<FlatData>>(
        &mut self,
        name: &str,
        data: D,
    ) -> TWResult<()> {
        let spec = self
            .graph
            .placeholder(name)
            .ok_or_else(|| TypewrightError::UnknownPlaceholder(name.to_string()))?;
        let value = spec.value_for(data.into())?;
        self.minibatch.insert(name.to_string(), value);
        Ok(())
    }

    /// The finished minibatch.
    pub fn into_minibatch(self) -> Minibatch {
        self.minibatch
    }
}

/// Turn a collected batch into engine inputs.
///
/// The lifecycle's own inputs are written around the architecture's:
/// the dropout keep rate (the configured rate when training, `1.0` otherwise)
/// and the batch size.
pub fn finalise_batch<A: Architecture>(
    architecture: &A,
    metadata: &A::Metadata,
    graph: &ModelGraph,
    batch: BatchData<A::Batch>,
    is_train: bool,
    dropout_keep_rate: f32,
) -> TWResult<Minibatch> {
    let samples_in_batch = batch.samples_in_batch;

    let mut writer = MinibatchWriter::new(graph);
    writer.write(
        DROPOUT_KEEP_RATE,
        if is_train { dropout_keep_rate } else { 1.0 },
    )?;
    architecture.finalise_batch(metadata, batch.ext, &mut writer, is_train)?;
    writer.write(BATCH_SIZE, samples_in_batch as i32)?;

    Ok(writer.into_minibatch())
}
