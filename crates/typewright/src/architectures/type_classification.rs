//! # Type Classification Head
//!
//! Predicts, for every target node, a distribution over a closed vocabulary
//! of the most common annotations. Unseen annotations map to the unknown
//! class.

use std::collections::BTreeMap;

use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

use crate::{
    data::{Counter, RawSample, Vocabulary, ignore_type_annotation, strip_type_parameters},
    errors::{TWResult, TypewrightError},
    hyperparameters::Hyperparameters,
    model::{
        Annotation,
        Initializer,
        MinibatchWriter,
        ModelGraph,
        OpSpec,
        ParameterSpec,
        PlaceholderSpec,
    },
    tensor::DType,
};

/// Placeholder holding the class of every target node.
pub const TARGET_CLASS: &str = "variable_target_class";

/// Output holding one log-probability row per target node.
pub const PREDICTED_LOGPROB_DIST: &str = "predicted_annotation_logprob_dist";

/// Output holding the classification loss.
pub const CLASSIFICATION_LOSS: &str = "classification_loss";

/// Classification head configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeClassificationHead {
    /// Maximum number of classes, including the unknown class.
    pub max_vocab_size: usize,

    /// Classify ``List[int]`` as ``List``.
    pub strip_type_parameters: bool,

    /// Candidates reported per annotation.
    pub top_k: usize,
}

/// Classification head metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeClassificationMetadata {
    /// The class vocabulary.
    pub annotation_vocab: Vocabulary,
}

impl TypeClassificationHead {
    /// Default head hyperparameters.
    pub fn default_hyperparameters() -> Hyperparameters {
        Hyperparameters::new()
            .with("max_type_annotation_vocab_size", 100)
            .with("strip_type_parameters", true)
            .with("annotation_top_k", 5)
    }

    /// Read the head configuration.
    pub fn from_hyperparameters(hyperparameters: &Hyperparameters) -> TWResult<Self> {
        let head = Self {
            max_vocab_size: hyperparameters.get_usize("max_type_annotation_vocab_size")?,
            strip_type_parameters: hyperparameters.get_bool("strip_type_parameters")?,
            top_k: hyperparameters.get_usize("annotation_top_k")?,
        };
        if head.max_vocab_size < 2 {
            return Err(TypewrightError::InvalidHyperparameter {
                name: "max_type_annotation_vocab_size".to_string(),
                expected: "at least 2",
                found: head.max_vocab_size.to_string(),
            });
        }
        Ok(head)
    }

    /// The class key of an annotation.
    pub fn normalise<'a>(
        &self,
        annotation: &'a str,
    ) -> &'a str {
        let annotation = annotation.trim();
        if self.strip_type_parameters {
            strip_type_parameters(annotation)
        } else {
            annotation
        }
    }

    /// Count the usable annotations of one raw sample.
    pub fn load_metadata_from_sample(
        &self,
        raw_sample: &RawSample,
        annotation_counts: &mut Counter,
    ) {
        for supernode in raw_sample.supernodes.values() {
            let annotation = supernode.annotation.as_deref();
            if ignore_type_annotation(annotation) {
                continue;
            }
            if let Some(annotation) = annotation {
                annotation_counts.add(self.normalise(annotation));
            }
        }
    }

    /// Keep the most common annotations as classes.
    pub fn finalise_metadata(
        &self,
        counts: Vec<Counter>,
    ) -> TypeClassificationMetadata {
        let mut merged = Counter::new();
        for c in &counts {
            merged.merge(c);
        }
        TypeClassificationMetadata {
            annotation_vocab: Vocabulary::from_counts(&merged, self.max_vocab_size, 1),
        }
    }

    /// The class of an annotation; absent, ignorable and unseen annotations are class 0.
    pub fn target_class(
        &self,
        metadata: &TypeClassificationMetadata,
        annotation: Option<&str>,
    ) -> u32 {
        match annotation {
            Some(annotation) if !ignore_type_annotation(Some(annotation)) => metadata
                .annotation_vocab
                .get_id(self.normalise(annotation)),
            _ => 0,
        }
    }

    /// Declare the projection from `input_size`-wide representations to class scores.
    pub fn make_parameters(
        &self,
        metadata: &TypeClassificationMetadata,
        input_size: usize,
        graph: &mut ModelGraph,
    ) {
        let num_classes = metadata.annotation_vocab.len();
        graph.add_parameter(ParameterSpec::new(
            "type_classification_weights",
            &[input_size, num_classes],
            Initializer::GlorotUniform,
        ));
        graph.add_parameter(ParameterSpec::new(
            "type_classification_bias",
            &[num_classes],
            Initializer::Zeros,
        ));
    }

    /// Declare the target classes.
    pub fn make_placeholders(
        &self,
        graph: &mut ModelGraph,
    ) {
        graph.add_placeholder(PlaceholderSpec::batched(TARGET_CLASS, DType::I32, &[]));
    }

    /// Declare the class distribution, one row per entry of `rows_from`, and its loss.
    pub fn make_model(
        &self,
        metadata: &TypeClassificationMetadata,
        rows_from: &str,
        graph: &mut ModelGraph,
    ) {
        graph.add_op(OpSpec::per_row(
            PREDICTED_LOGPROB_DIST,
            rows_from,
            &[metadata.annotation_vocab.len()],
        ));
        graph.add_op(OpSpec::scalar(CLASSIFICATION_LOSS));
    }

    /// Write the accumulated target classes.
    pub fn finalise_batch(
        &self,
        target_classes: Vec<i32>,
        writer: &mut MinibatchWriter<'_>,
    ) -> TWResult<()> {
        writer.write(TARGET_CLASS, target_classes)
    }

    /// Turn one row of log-probabilities into the `top_k` most probable annotations.
    pub fn top_candidates(
        &self,
        metadata: &TypeClassificationMetadata,
        logprobs: &[f32],
    ) -> BTreeMap<String, f64> {
        let mut ranked: Vec<(usize, f32)> = logprobs.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(self.top_k)
            .filter_map(|(class, logprob)| {
                metadata
                    .annotation_vocab
                    .get_token(class as u32)
                    .map(|token| (token.to_string(), logprob as f64))
            })
            .collect()
    }

    /// Annotate the target nodes `node_ids` from the class distribution output.
    pub fn annotate(
        &self,
        metadata: &TypeClassificationMetadata,
        raw_sample: &RawSample,
        node_ids: &[u32],
        dist: &ArrayD<f32>,
        provenance: &str,
    ) -> TWResult<Vec<Annotation>> {
        if dist.ndim() != 2 || dist.shape()[0] != node_ids.len() {
            return Err(TypewrightError::ShapeMismatch {
                placeholder: PREDICTED_LOGPROB_DIST.to_string(),
                reason: format!(
                    "expected one row per target node ({}), found shape {:?}",
                    node_ids.len(),
                    dist.shape()
                ),
            });
        }

        node_ids
            .iter()
            .zip(dist.axis_iter(Axis(0)))
            .map(|(&node_id, row)| {
                let supernode = raw_sample.supernodes.get(&node_id).ok_or_else(|| {
                    TypewrightError::MalformedSample {
                        provenance: provenance.to_string(),
                        reason: format!("target node {node_id} is not a supernode"),
                    }
                })?;
                let logprobs: Vec<f32> = row.iter().copied().collect();
                Ok(Annotation::for_supernode(
                    provenance,
                    node_id,
                    supernode,
                    self.top_candidates(metadata, &logprobs),
                ))
            })
            .collect()
    }
}
