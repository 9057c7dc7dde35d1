//! # Graph2HybridMetric
//!
//! Code graph encoder followed by both heads: the metric head shapes the
//! target representations directly, and the classification head reads them
//! through a learned linear layer. The loss is the sum of both head losses.
//!
//! Annotation uses the nearest-neighbour vote of an attached
//! [`TypeSpaceIndex`] when there is one, and the classification head otherwise.
//!
//! ```rust,ignore
//! let index = model.create_index(&training_files)?;
//! model.architecture_mut().attach_index(index);
//! for annotation in model.annotate(&test_files) { ... }
//! ```

use std::path::PathBuf;

use ndarray::Axis;

use crate::{
    architectures::{
        type_classification::{CLASSIFICATION_LOSS, PREDICTED_LOGPROB_DIST},
        type_metric::{METRIC_LOSS, MetricBatch, TypeMetricHead, TypeSpaceIndex},
        typed_graph::{
            TypedGraphBatch,
            TypedGraphMetadata,
            TypedGraphModel,
            TypedGraphRawMetadata,
            TypedGraphSample,
        },
    },
    data::RawSample,
    errors::{TWResult, TypewrightError},
    hyperparameters::Hyperparameters,
    model::{
        Annotation,
        Architecture,
        Initializer,
        MinibatchWriter,
        Model,
        ModelGraph,
        OpSpec,
        ParameterSpec,
        graph::{LOSS, TARGET_REPRESENTATIONS},
    },
    tensor::Fetches,
};

/// Parameter projecting metric representations into the classification head.
pub const METRIC_TO_CLASSIFICATION: &str = "metric_to_classification_linear_layer";

/// Minibatch accumulators of [`Graph2HybridMetric`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HybridBatch {
    /// Encoder, target and class accumulators.
    pub typed: TypedGraphBatch,

    /// Batch-local type ids.
    pub metric: MetricBatch,
}

/// The hybrid metric and classification architecture.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph2HybridMetric {
    typed: TypedGraphModel,
    metric: TypeMetricHead,
    index: Option<TypeSpaceIndex>,
}

impl Graph2HybridMetric {
    /// The shared encoder and classification head.
    pub fn typed_graph(&self) -> &TypedGraphModel {
        &self.typed
    }

    /// The metric head.
    pub fn metric_head(&self) -> &TypeMetricHead {
        &self.metric
    }

    /// Annotate through `index` from now on.
    pub fn attach_index(
        &mut self,
        index: TypeSpaceIndex,
    ) {
        self.index = Some(index);
    }

    /// Go back to annotating through the classification head.
    pub fn detach_index(&mut self) -> Option<TypeSpaceIndex> {
        self.index.take()
    }

    /// The attached index.
    pub fn index(&self) -> Option<&TypeSpaceIndex> {
        self.index.as_ref()
    }

    fn annotate_with_index(
        &self,
        index: &TypeSpaceIndex,
        raw_sample: &RawSample,
        sample: &TypedGraphSample,
        fetches: &Fetches,
        provenance: &str,
    ) -> TWResult<Vec<Annotation>> {
        let rows = fetches
            .get(TARGET_REPRESENTATIONS)
            .and_then(|v| v.as_f32())
            .ok_or_else(|| TypewrightError::MissingOutput(TARGET_REPRESENTATIONS.to_string()))?;
        if rows.ndim() != 2 || rows.shape()[0] != sample.target_node_idxs.len() {
            return Err(TypewrightError::ShapeMismatch {
                placeholder: TARGET_REPRESENTATIONS.to_string(),
                reason: format!(
                    "expected one row per target node ({}), found shape {:?}",
                    sample.target_node_idxs.len(),
                    rows.shape()
                ),
            });
        }

        sample
            .target_node_idxs
            .iter()
            .zip(rows.axis_iter(Axis(0)))
            .map(|(&node_id, row)| {
                let supernode = raw_sample.supernodes.get(&node_id).ok_or_else(|| {
                    TypewrightError::MalformedSample {
                        provenance: provenance.to_string(),
                        reason: format!("target node {node_id} is not a supernode"),
                    }
                })?;
                let query: Vec<f32> = row.iter().copied().collect();
                let dist = index.predict(&query, self.metric.num_neighbours)?;
                Ok(Annotation::for_supernode(provenance, node_id, supernode, dist))
            })
            .collect()
    }
}

impl Architecture for Graph2HybridMetric {
    type RawMetadata = TypedGraphRawMetadata;
    type Metadata = TypedGraphMetadata;
    type Sample = TypedGraphSample;
    type Batch = HybridBatch;

    const MODEL_TYPE: &'static str = "graph2hybridmetric";

    fn default_hyperparameters() -> Hyperparameters {
        let mut hp = TypedGraphModel::default_hyperparameters();
        hp.update(&TypeMetricHead::default_hyperparameters());
        hp
    }

    fn from_hyperparameters(hyperparameters: &Hyperparameters) -> TWResult<Self> {
        Ok(Self {
            typed: TypedGraphModel::from_hyperparameters(hyperparameters)?,
            metric: TypeMetricHead::from_hyperparameters(hyperparameters)?,
            index: None,
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
        let h = self.typed.encoder.hidden_size;
        graph.add_parameter(ParameterSpec::new(
            METRIC_TO_CLASSIFICATION,
            &[h, h],
            Initializer::GlorotUniform,
        ));
        Ok(())
    }

    fn make_placeholders(
        &self,
        metadata: &Self::Metadata,
        graph: &mut ModelGraph,
        _is_train: bool,
    ) -> TWResult<()> {
        self.typed.make_placeholders(metadata, graph);
        self.metric.make_placeholders(graph);
        Ok(())
    }

    fn make_model(
        &self,
        metadata: &Self::Metadata,
        graph: &mut ModelGraph,
        _is_train: bool,
    ) -> TWResult<()> {
        self.typed.make_model(metadata, graph);
        self.metric.make_model(graph);
        graph.add_op(
            OpSpec::scalar(LOSS)
                .with_attr("terms", format!("{CLASSIFICATION_LOSS}+{METRIC_LOSS}")),
        );
        Ok(())
    }

    fn init_batch(&self) -> Self::Batch {
        HybridBatch {
            typed: self.typed.init_batch(),
            metric: MetricBatch::default(),
        }
    }

    fn extend_batch_with_sample(
        &self,
        batch: &mut Self::Batch,
        sample: &Self::Sample,
    ) -> bool {
        for target_type in &sample.target_type {
            batch.metric.push(target_type.as_deref());
        }
        self.typed
            .extend_batch_with_sample(&mut batch.typed, sample)
    }

    fn finalise_batch(
        &self,
        metadata: &Self::Metadata,
        batch: Self::Batch,
        writer: &mut MinibatchWriter<'_>,
        _is_train: bool,
    ) -> TWResult<()> {
        self.typed.finalise_batch(metadata, batch.typed, writer)?;
        self.metric.finalise_batch(batch.metric, writer)
    }

    fn annotation_outputs(&self) -> Vec<&'static str> {
        match self.index {
            Some(_) => vec![TARGET_REPRESENTATIONS],
            None => vec![PREDICTED_LOGPROB_DIST],
        }
    }

    fn annotate_single(
        &self,
        metadata: &Self::Metadata,
        raw_sample: &RawSample,
        sample: &Self::Sample,
        fetches: &Fetches,
        provenance: &str,
    ) -> TWResult<Vec<Annotation>> {
        match &self.index {
            Some(index) => self.annotate_with_index(index, raw_sample, sample, fetches, provenance),
            None => self
                .typed
                .annotate_with_classifier(metadata, raw_sample, sample, fetches, provenance),
        }
    }
}

impl Model<Graph2HybridMetric> {
    /// Build a type space index from the representations of the annotated nodes of `paths`.
    ///
    /// Annotations keep their type parameters, so ``List[int]`` and
    /// ``List[str]`` stay distinct neighbours.
    pub fn create_index(
        &mut self,
        paths: &[PathBuf],
    ) -> TWResult<TypeSpaceIndex> {
        let representations = self
            .export_representations(paths)
            .collect::<TWResult<Vec<_>>>()?;
        let index = TypeSpaceIndex::from_representations(representations, |annotation| {
            annotation.trim().to_string()
        })?;
        log::info!(
            "Built type space index of {} representations from {} files.",
            index.len(),
            paths.len()
        );
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        architectures::{
            code_graph::CodeGraphSample,
            type_metric::{IndexedType, METRIC_TYPE_IDS},
        },
        testing::synthetic_raw_sample,
    };

    fn arch() -> Graph2HybridMetric {
        Graph2HybridMetric::from_hyperparameters(&Graph2HybridMetric::default_hyperparameters())
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let hp = Graph2HybridMetric::default_hyperparameters();
        assert_eq!(hp.get_f64("margin").unwrap(), 2.0);
        assert_eq!(hp.get_usize("max_type_annotation_vocab_size").unwrap(), 100);
        assert!(hp.get_bool("strip_type_parameters").unwrap());
    }

    #[test]
    fn test_index_switches_annotation_outputs() {
        let mut arch = arch();
        assert_eq!(arch.annotation_outputs(), vec![PREDICTED_LOGPROB_DIST]);

        let mut index = TypeSpaceIndex::default();
        index
            .insert(IndexedType {
                type_annotation: "int".to_string(),
                provenance: "a.py:1".to_string(),
                representation: vec![0.0; 4],
            })
            .unwrap();
        arch.attach_index(index);
        assert_eq!(arch.annotation_outputs(), vec![TARGET_REPRESENTATIONS]);

        assert!(arch.detach_index().is_some());
        assert!(arch.index().is_none());
    }

    #[test]
    fn test_metric_ids_follow_targets() {
        let arch = arch();
        let sample = TypedGraphSample {
            provenance: "a.py".to_string(),
            graph: CodeGraphSample {
                node_label_ids: vec![0, 0, 0],
                adjacency: Vec::new(),
            },
            target_node_idxs: vec![0, 1, 2],
            target_type: vec![Some("int".to_string()), None, Some("int".to_string())],
            variable_target_class: vec![1, 0, 1],
        };

        let mut batch = arch.init_batch();
        arch.extend_batch_with_sample(&mut batch, &sample);
        arch.extend_batch_with_sample(&mut batch, &sample);
        assert_eq!(batch.metric.type_ids, vec![0, 1, 0, 0, 1, 0]);
        assert_eq!(batch.typed.target_node_idxs, vec![0, 1, 2, 3, 4, 5]);

        let mut graph = ModelGraph::new(false);
        arch.make_placeholders(
            &TypedGraphMetadata {
                graph: arch.typed.encoder.finalise_metadata(vec![]),
                classification: arch.typed.classification.finalise_metadata(vec![]),
            },
            &mut graph,
            false,
        )
        .unwrap();
        assert!(graph.placeholder(METRIC_TYPE_IDS).is_some());
    }

    #[test]
    fn test_parametric_types_stay_distinct_for_the_metric_head() -> TWResult<()> {
        let arch = arch();
        let raw = synthetic_raw_sample("p.py", 4, &[(1, Some("List[int]")), (2, Some(" List[str]"))]);
        let mut raw_metadata = arch.init_metadata();
        arch.load_metadata_from_sample(&raw, &mut raw_metadata);
        let metadata = arch.finalise_metadata(vec![raw_metadata])?;

        let sample = arch
            .load_data_from_sample(&metadata, &raw, true)?
            .unwrap();
        assert_eq!(
            sample.target_type,
            vec![Some("List[int]".to_string()), Some("List[str]".to_string())]
        );
        // The classifier still sees both as ``List``.
        assert_eq!(sample.variable_target_class[0], sample.variable_target_class[1]);
        assert_ne!(sample.variable_target_class[0], 0);

        let mut batch = arch.init_batch();
        arch.extend_batch_with_sample(&mut batch, &sample);
        assert_eq!(batch.metric.type_ids, vec![0, 1]);
        assert_eq!(batch.metric.num_types(), 2);
        Ok(())
    }
}
