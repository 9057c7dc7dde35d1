//! # Graph2Class
//!
//! Code graph encoder followed by the type classification head. The loss is
//! the classification loss alone.

use crate::{
    architectures::{
        type_classification::{CLASSIFICATION_LOSS, PREDICTED_LOGPROB_DIST},
        typed_graph::{
            TypedGraphBatch,
            TypedGraphMetadata,
            TypedGraphModel,
            TypedGraphRawMetadata,
            TypedGraphSample,
        },
    },
    data::RawSample,
    errors::TWResult,
    hyperparameters::Hyperparameters,
    model::{
        Annotation,
        Architecture,
        MinibatchWriter,
        ModelGraph,
        OpSpec,
        graph::LOSS,
    },
    tensor::Fetches,
};

/// The classification architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Graph2Class {
    typed: TypedGraphModel,
}

impl Graph2Class {
    /// The shared encoder and head.
    pub fn typed_graph(&self) -> &TypedGraphModel {
        &self.typed
    }
}

impl Architecture for Graph2Class {
    type RawMetadata = TypedGraphRawMetadata;
    type Metadata = TypedGraphMetadata;
    type Sample = TypedGraphSample;
    type Batch = TypedGraphBatch;

    const MODEL_TYPE: &'static str = "graph2class";

    fn default_hyperparameters() -> Hyperparameters {
        TypedGraphModel::default_hyperparameters()
    }

    fn from_hyperparameters(hyperparameters: &Hyperparameters) -> TWResult<Self> {
        Ok(Self {
            typed: TypedGraphModel::from_hyperparameters(hyperparameters)?,
        })
    }

    fn init_metadata(&self) -> Self::RawMetadata {
        self.typed.init_metadata()
    }

    fn load_metadata_from_sample(
        &self,
        raw_sample: &RawSample,
        raw_metadata: &mut Self::RawMetadata,
    ) {
        self.typed
            .load_metadata_from_sample(raw_sample, raw_metadata)
    }

    fn finalise_metadata(
        &self,
        raw_metadata_list: Vec<Self::RawMetadata>,
    ) -> TWResult<Self::Metadata> {
        Ok(self.typed.finalise_metadata(raw_metadata_list))
    }

    fn load_data_from_sample(
        &self,
        metadata: &Self::Metadata,
        raw_sample: &RawSample,
        is_train: bool,
    ) -> TWResult<Option<Self::Sample>> {
        self.typed
            .load_data_from_sample(metadata, raw_sample, is_train)
    }

    fn make_parameters(
        &self,
        metadata: &Self::Metadata,
        graph: &mut ModelGraph,
    ) -> TWResult<()> {
        self.typed.make_parameters(metadata, graph);
        Ok(())
    }

    fn make_placeholders(
        &self,
        metadata: &Self::Metadata,
        graph: &mut ModelGraph,
        _is_train: bool,
    ) -> TWResult<()> {
        self.typed.make_placeholders(metadata, graph);
        Ok(())
    }

    fn make_model(
        &self,
        metadata: &Self::Metadata,
        graph: &mut ModelGraph,
        _is_train: bool,
    ) -> TWResult<()> {
        self.typed.make_model(metadata, graph);
        graph.add_op(OpSpec::scalar(LOSS).with_attr("terms", CLASSIFICATION_LOSS));
        Ok(())
    }

    fn init_batch(&self) -> Self::Batch {
        self.typed.init_batch()
    }

    fn extend_batch_with_sample(
        &self,
        batch: &mut Self::Batch,
        sample: &Self::Sample,
    ) -> bool {
        self.typed.extend_batch_with_sample(batch, sample)
    }

    fn finalise_batch(
        &self,
        metadata: &Self::Metadata,
        batch: Self::Batch,
        writer: &mut MinibatchWriter<'_>,
        _is_train: bool,
    ) -> TWResult<()> {
        self.typed.finalise_batch(metadata, batch, writer)
    }

    fn annotation_outputs(&self) -> Vec<&'static str> {
        vec![PREDICTED_LOGPROB_DIST]
    }

    fn annotate_single(
        &self,
        metadata: &Self::Metadata,
        raw_sample: &RawSample,
        sample: &Self::Sample,
        fetches: &Fetches,
        provenance: &str,
    ) -> TWResult<Vec<Annotation>> {
        self.typed
            .annotate_with_classifier(metadata, raw_sample, sample, fetches, provenance)
    }
}
