//! # Typed Graph Samples
//!
//! The encoder plus classification head that both graph architectures are
//! built on, and the target selection they share.
//!
//! Targets are supernodes, in node id order. Training keeps only supernodes
//! with a usable annotation and rejects samples left without any; evaluation
//! keeps every supernode, so outputs have one row per supernode.

use serde::{Deserialize, Serialize};

use crate::{
    architectures::{
        code_graph::{
            CodeGraphBatch,
            CodeGraphEncoder,
            CodeGraphMetadata,
            CodeGraphRawMetadata,
            CodeGraphSample,
        },
        type_classification::{
            PREDICTED_LOGPROB_DIST,
            TypeClassificationHead,
            TypeClassificationMetadata,
        },
    },
    data::{Counter, RawSample, ignore_type_annotation},
    errors::{TWResult, TypewrightError},
    hyperparameters::Hyperparameters,
    model::{
        Annotation,
        MinibatchWriter,
        ModelGraph,
        OpSpec,
        PlaceholderSpec,
        base_default_hyperparameters,
        graph::TARGET_REPRESENTATIONS,
    },
    tensor::{DType, Fetches},
};

/// Placeholder holding the batch-global node index of every target.
pub const TARGET_NODE_IDS: &str = "typed_annotation_node_ids";

/// Per-file metadata of typed graph architectures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypedGraphRawMetadata {
    /// Encoder accumulator.
    pub graph: CodeGraphRawMetadata,

    /// Usable annotation counts.
    pub annotation_counts: Counter,
}

/// Merged metadata of typed graph architectures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedGraphMetadata {
    /// Encoder metadata.
    pub graph: CodeGraphMetadata,

    /// Classification head metadata.
    pub classification: TypeClassificationMetadata,
}

/// One encoded sample of a typed graph architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedGraphSample {
    /// The source file locator.
    pub provenance: String,

    /// The encoded graph.
    pub graph: CodeGraphSample,

    /// Target supernodes, as node ids within the sample.
    pub target_node_idxs: Vec<u32>,

    /// Trimmed annotation of every target, type parameters kept; `None` if absent or ignorable.
    pub target_type: Vec<Option<String>>,

    /// Class of every target.
    pub variable_target_class: Vec<u32>,
}

/// Minibatch accumulators of typed graph architectures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypedGraphBatch {
    /// Encoder accumulators.
    pub graph: CodeGraphBatch,

    /// Target node indices, offset into the batch's node space.
    pub target_node_idxs: Vec<i32>,

    /// Target classes.
    pub variable_target_class: Vec<i32>,
}

/// The encoder and classification head, with shared target handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedGraphModel {
    /// The graph encoder.
    pub encoder: CodeGraphEncoder,

    /// The classification head.
    pub classification: TypeClassificationHead,
}

impl TypedGraphModel {
    /// Lifecycle, encoder and classification defaults.
    pub fn default_hyperparameters() -> Hyperparameters {
        let mut hp = base_default_hyperparameters();
        hp.update(&CodeGraphEncoder::default_hyperparameters());
        hp.update(&TypeClassificationHead::default_hyperparameters());
        hp
    }

    /// Read the encoder and head configurations.
    pub fn from_hyperparameters(hyperparameters: &Hyperparameters) -> TWResult<Self> {
        Ok(Self {
            encoder: CodeGraphEncoder::from_hyperparameters(hyperparameters)?,
            classification: TypeClassificationHead::from_hyperparameters(hyperparameters)?,
        })
    }

    /// A fresh per-file accumulator.
    pub fn init_metadata(&self) -> TypedGraphRawMetadata {
        TypedGraphRawMetadata {
            graph: self.encoder.init_metadata(),
            annotation_counts: Counter::new(),
        }
    }

    /// Fold one raw sample into an accumulator.
    pub fn load_metadata_from_sample(
        &self,
        raw_sample: &RawSample,
        raw_metadata: &mut TypedGraphRawMetadata,
    ) {
        self.encoder
            .load_metadata_from_sample(raw_sample, &mut raw_metadata.graph);
        self.classification
            .load_metadata_from_sample(raw_sample, &mut raw_metadata.annotation_counts);
    }

    /// Merge accumulators.
    pub fn finalise_metadata(
        &self,
        raw_metadata_list: Vec<TypedGraphRawMetadata>,
    ) -> TypedGraphMetadata {
        let (graphs, counts): (Vec<_>, Vec<_>) = raw_metadata_list
            .into_iter()
            .map(|raw| (raw.graph, raw.annotation_counts))
            .unzip();
        TypedGraphMetadata {
            graph: self.encoder.finalise_metadata(graphs),
            classification: self.classification.finalise_metadata(counts),
        }
    }

    /// Encode one raw sample, or reject it.
    pub fn load_data_from_sample(
        &self,
        metadata: &TypedGraphMetadata,
        raw_sample: &RawSample,
        is_train: bool,
    ) -> TWResult<Option<TypedGraphSample>> {
        let Some(graph) = self
            .encoder
            .load_data_from_sample(&metadata.graph, raw_sample)
        else {
            return Ok(None);
        };

        let mut sample = TypedGraphSample {
            provenance: raw_sample.filename.clone(),
            graph,
            target_node_idxs: Vec::new(),
            target_type: Vec::new(),
            variable_target_class: Vec::new(),
        };
        for (&node_id, supernode) in &raw_sample.supernodes {
            let annotation = supernode.annotation.as_deref();
            let ignored = ignore_type_annotation(annotation);
            if is_train && ignored {
                continue;
            }
            sample.target_node_idxs.push(node_id);
            sample.target_type.push(match annotation {
                Some(annotation) if !ignored => Some(annotation.trim().to_string()),
                _ => None,
            });
            sample.variable_target_class.push(
                self.classification
                    .target_class(&metadata.classification, annotation),
            );
        }

        if sample.target_node_idxs.is_empty() {
            log::debug!("Skipping '{}': no target nodes.", raw_sample.filename);
            return Ok(None);
        }
        Ok(Some(sample))
    }

    /// Declare encoder and classification parameters.
    pub fn make_parameters(
        &self,
        metadata: &TypedGraphMetadata,
        graph: &mut ModelGraph,
    ) {
        self.encoder.make_parameters(&metadata.graph, graph);
        self.classification
            .make_parameters(&metadata.classification, self.encoder.hidden_size, graph);
    }

    /// Declare encoder, target and class inputs.
    pub fn make_placeholders(
        &self,
        metadata: &TypedGraphMetadata,
        graph: &mut ModelGraph,
    ) {
        self.encoder.make_placeholders(&metadata.graph, graph);
        graph.add_placeholder(PlaceholderSpec::batched(TARGET_NODE_IDS, DType::I32, &[]));
        self.classification.make_placeholders(graph);
    }

    /// Declare node and target representations, and the classification outputs.
    pub fn make_model(
        &self,
        metadata: &TypedGraphMetadata,
        graph: &mut ModelGraph,
    ) {
        self.encoder.make_model(graph);
        graph.add_op(OpSpec::per_row(
            TARGET_REPRESENTATIONS,
            TARGET_NODE_IDS,
            &[self.encoder.hidden_size],
        ));
        self.classification
            .make_model(&metadata.classification, TARGET_NODE_IDS, graph);
    }

    /// Fresh accumulators.
    pub fn init_batch(&self) -> TypedGraphBatch {
        TypedGraphBatch {
            graph: self.encoder.init_batch(),
            ..Default::default()
        }
    }

    /// Add one sample; returns `true` once the encoder's node budget is reached.
    pub fn extend_batch_with_sample(
        &self,
        batch: &mut TypedGraphBatch,
        sample: &TypedGraphSample,
    ) -> bool {
        let offset = batch.graph.cg_node_offset as i32;
        batch.target_node_idxs.extend(
            sample
                .target_node_idxs
                .iter()
                .map(|&node_id| node_id as i32 + offset),
        );
        batch.variable_target_class.extend(
            sample
                .variable_target_class
                .iter()
                .map(|&class| class as i32),
        );
        self.encoder
            .extend_batch_with_sample(&mut batch.graph, &sample.graph)
    }

    /// Write the accumulated inputs.
    pub fn finalise_batch(
        &self,
        metadata: &TypedGraphMetadata,
        batch: TypedGraphBatch,
        writer: &mut MinibatchWriter<'_>,
    ) -> TWResult<()> {
        self.encoder
            .finalise_batch(&metadata.graph, batch.graph, writer)?;
        writer.write(TARGET_NODE_IDS, batch.target_node_idxs)?;
        self.classification
            .finalise_batch(batch.variable_target_class, writer)
    }

    /// Annotate every target of `sample` from the classification output.
    pub fn annotate_with_classifier(
        &self,
        metadata: &TypedGraphMetadata,
        raw_sample: &RawSample,
        sample: &TypedGraphSample,
        fetches: &Fetches,
        provenance: &str,
    ) -> TWResult<Vec<Annotation>> {
        let dist = fetches
            .get(PREDICTED_LOGPROB_DIST)
            .and_then(|v| v.as_f32())
            .ok_or_else(|| TypewrightError::MissingOutput(PREDICTED_LOGPROB_DIST.to_string()))?;
        self.classification.annotate(
            &metadata.classification,
            raw_sample,
            &sample.target_node_idxs,
            dist,
            provenance,
        )
    }
}
