//! # Architecture Hooks
//!
//! An [`Architecture`] is the fixed capability interface every concrete model
//! implements. The lifecycle in [`Model`](super::Model) calls these hooks; it
//! never looks inside samples, metadata or batch accumulators.
//!
//! Concrete architectures are compositions: each hook first delegates to the
//! components the architecture is built from (an encoder, then one or more
//! heads), then adds its own fields.

use std::fmt::Debug;

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    data::RawSample,
    errors::TWResult,
    hyperparameters::Hyperparameters,
    model::{
        batch::MinibatchWriter,
        graph::{ModelGraph, TARGET_REPRESENTATIONS},
        inference::Annotation,
    },
    tensor::Fetches,
};

/// The lifecycle's own default hyperparameters.
///
/// Architectures layer their defaults on top of these.
pub fn base_default_hyperparameters() -> Hyperparameters {
    Hyperparameters::new()
        .with("optimizer", "Adam")
        .with("seed", 0)
        .with("dropout_keep_rate", 0.9)
        .with("learning_rate", 0.00025)
        .with("learning_rate_decay", 0.98)
        .with("momentum", 0.85)
        .with("gradient_clip", 1)
        .with("max_epochs", 500)
        .with("patience", 10)
}

/// The extension points of the model lifecycle.
pub trait Architecture: Sized + Send + Sync {
    /// Per-file metadata accumulator.
    type RawMetadata: Send;

    /// Merged metadata; persisted with tensorised data and checkpoints.
    type Metadata: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync;

    /// One encoded sample; persisted in chunk files.
    type Sample: Clone + Debug + Serialize + DeserializeOwned + Send + 'static;

    /// Minibatch accumulators.
    type Batch;

    /// The architecture tag stored in checkpoints.
    const MODEL_TYPE: &'static str;

    /// Complete default hyperparameters, lifecycle defaults included.
    fn default_hyperparameters() -> Hyperparameters;

    /// Build the architecture from complete hyperparameters.
    ///
    /// Missing or ill-typed hyperparameters are configuration errors.
    fn from_hyperparameters(hyperparameters: &Hyperparameters) -> TWResult<Self>;

    /// A fresh per-file accumulator.
    fn init_metadata(&self) -> Self::RawMetadata;

    /// Fold one raw sample into an accumulator.
    fn load_metadata_from_sample(
        &self,
        raw_sample: &RawSample,
        raw_metadata: &mut Self::RawMetadata,
    );

    /// Merge every accumulator; the result must not depend on their order.
    fn finalise_metadata(
        &self,
        raw_metadata_list: Vec<Self::RawMetadata>,
    ) -> TWResult<Self::Metadata>;

    /// Encode one raw sample; `Ok(None)` rejects it.
    ///
    /// `raw_sample` has already passed [`RawSample::validate`].
    fn load_data_from_sample(
        &self,
        metadata: &Self::Metadata,
        raw_sample: &RawSample,
        is_train: bool,
    ) -> TWResult<Option<Self::Sample>>;

    /// Declare learnable parameters.
    fn make_parameters(
        &self,
        metadata: &Self::Metadata,
        graph: &mut ModelGraph,
    ) -> TWResult<()>;

    /// Declare minibatch inputs.
    fn make_placeholders(
        &self,
        metadata: &Self::Metadata,
        graph: &mut ModelGraph,
        is_train: bool,
    ) -> TWResult<()>;

    /// Declare outputs; must include [`LOSS`](super::graph::LOSS).
    fn make_model(
        &self,
        metadata: &Self::Metadata,
        graph: &mut ModelGraph,
        is_train: bool,
    ) -> TWResult<()>;

    /// Fresh minibatch accumulators.
    fn init_batch(&self) -> Self::Batch;

    /// Add one sample; returns `true` once the batch is full.
    fn extend_batch_with_sample(
        &self,
        batch: &mut Self::Batch,
        sample: &Self::Sample,
    ) -> bool;

    /// Write the accumulated fields as minibatch inputs.
    fn finalise_batch(
        &self,
        metadata: &Self::Metadata,
        batch: Self::Batch,
        writer: &mut MinibatchWriter<'_>,
        is_train: bool,
    ) -> TWResult<()>;

    /// The output holding one fixed-size vector per target node of a test sample.
    fn encode_one_test_sample(&self) -> &'static str {
        TARGET_REPRESENTATIONS
    }

    /// Outputs that [`Self::annotate_single`] needs.
    fn annotation_outputs(&self) -> Vec<&'static str>;

    /// Derive annotations for one sample from its single-sample outputs.
    fn annotate_single(
        &self,
        metadata: &Self::Metadata,
        raw_sample: &RawSample,
        sample: &Self::Sample,
        fetches: &Fetches,
        provenance: &str,
    ) -> TWResult<Vec<Annotation>>;
}
