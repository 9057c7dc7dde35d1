//! # Path2Annotation
//!
//! Path encoder followed by the type classification head. Each target's
//! representation pools the encodings of the paths leaving it; the loss is
//! the classification loss alone.
//!
//! Targets are selected as in the graph architectures: supernodes in node id
//! order, with training skipping ignorable annotations.

use serde::{Deserialize, Serialize};

use crate::{
    architectures::{
        path_encoder::{PATH_TO_TARGET_MAP, PathBatch, PathEncoder, PathMetadata, PathSample},
        type_classification::{
            CLASSIFICATION_LOSS,
            PREDICTED_LOGPROB_DIST,
            TypeClassificationHead,
            TypeClassificationMetadata,
        },
        typed_graph::TARGET_NODE_IDS,
    },
    data::{Counter, RawSample, ignore_type_annotation},
    errors::{TWResult, TypewrightError},
    hyperparameters::Hyperparameters,
    model::{
        Annotation,
        Architecture,
        MinibatchWriter,
        ModelGraph,
        OpSpec,
        PlaceholderSpec,
        base_default_hyperparameters,
        graph::{LOSS, TARGET_REPRESENTATIONS},
    },
    tensor::{DType, Fetches},
};

/// Per-file metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathAnnotationRawMetadata {
    /// Node label counts.
    pub node_label_counts: Counter,

    /// Usable annotation counts.
    pub annotation_counts: Counter,
}

/// Merged metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAnnotationMetadata {
    /// Path encoder metadata.
    pub paths: PathMetadata,

    /// Classification head metadata.
    pub classification: TypeClassificationMetadata,
}

/// One encoded sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAnnotationSample {
    /// The source file locator.
    pub provenance: String,

    /// Nodes in the sample graph.
    pub num_nodes: u32,

    /// Target supernodes, as node ids within the sample.
    pub target_node_idxs: Vec<u32>,

    /// The paths of every target.
    pub paths: PathSample,

    /// Class of every target.
    pub variable_target_class: Vec<u32>,
}

/// Minibatch accumulators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathAnnotationBatch {
    /// Path encoder accumulators.
    pub paths: PathBatch,

    /// Target node indices, offset by the nodes of earlier samples.
    pub target_node_idxs: Vec<i32>,

    /// Nodes of the samples added so far.
    pub node_offset: usize,

    /// Target classes.
    pub variable_target_class: Vec<i32>,
}

/// The path-based classification architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Path2Annotation {
    /// The path encoder.
    pub encoder: PathEncoder,

    /// The classification head.
    pub classification: TypeClassificationHead,
}

impl Architecture for Path2Annotation {
    type RawMetadata = PathAnnotationRawMetadata;
    type Metadata = PathAnnotationMetadata;
    type Sample = PathAnnotationSample;
    type Batch = PathAnnotationBatch;

    const MODEL_TYPE: &'static str = "path2annotation";

    fn default_hyperparameters() -> Hyperparameters {
        let mut hp = base_default_hyperparameters();
        hp.update(&PathEncoder::default_hyperparameters());
        hp.update(&TypeClassificationHead::default_hyperparameters());
        hp
    }

    fn from_hyperparameters(hyperparameters: &Hyperparameters) -> TWResult<Self> {
        Ok(Self {
            encoder: PathEncoder::from_hyperparameters(hyperparameters)?,
            classification: TypeClassificationHead::from_hyperparameters(hyperparameters)?,
        })
    }

    fn init_metadata(&self) -> Self::RawMetadata {
        PathAnnotationRawMetadata {
            node_label_counts: self.encoder.init_metadata(),
            annotation_counts: Counter::new(),
        }
    }

    fn load_metadata_from_sample(
        &self,
        raw_sample: &RawSample,
        raw_metadata: &mut Self::RawMetadata,
    ) {
        self.encoder
            .load_metadata_from_sample(raw_sample, &mut raw_metadata.node_label_counts);
        self.classification
            .load_metadata_from_sample(raw_sample, &mut raw_metadata.annotation_counts);
    }

    fn finalise_metadata(
        &self,
        raw_metadata_list: Vec<Self::RawMetadata>,
    ) -> TWResult<Self::Metadata> {
        let (labels, annotations): (Vec<_>, Vec<_>) = raw_metadata_list
            .into_iter()
            .map(|raw| (raw.node_label_counts, raw.annotation_counts))
            .unzip();
        Ok(PathAnnotationMetadata {
            paths: self.encoder.finalise_metadata(labels),
            classification: self.classification.finalise_metadata(annotations),
        })
    }

    fn load_data_from_sample(
        &self,
        metadata: &Self::Metadata,
        raw_sample: &RawSample,
        is_train: bool,
    ) -> TWResult<Option<Self::Sample>> {
        let mut target_node_idxs = Vec::new();
        let mut variable_target_class = Vec::new();
        for (&node_id, supernode) in &raw_sample.supernodes {
            let annotation = supernode.annotation.as_deref();
            if is_train && ignore_type_annotation(annotation) {
                continue;
            }
            target_node_idxs.push(node_id);
            variable_target_class.push(
                self.classification
                    .target_class(&metadata.classification, annotation),
            );
        }
        if target_node_idxs.is_empty() {
            log::debug!("Skipping '{}': no target nodes.", raw_sample.filename);
            return Ok(None);
        }

        let Some(paths) =
            self.encoder
                .load_data_from_sample(&metadata.paths, raw_sample, &target_node_idxs)
        else {
            return Ok(None);
        };
        Ok(Some(PathAnnotationSample {
            provenance: raw_sample.filename.clone(),
            num_nodes: raw_sample.num_nodes() as u32,
            target_node_idxs,
            paths,
            variable_target_class,
        }))
    }

    fn make_parameters(
        &self,
        metadata: &Self::Metadata,
        graph: &mut ModelGraph,
    ) -> TWResult<()> {
        self.encoder.make_parameters(&metadata.paths, graph);
        self.classification
            .make_parameters(&metadata.classification, self.encoder.encoding_size, graph);
        Ok(())
    }

    fn make_placeholders(
        &self,
        _metadata: &Self::Metadata,
        graph: &mut ModelGraph,
        _is_train: bool,
    ) -> TWResult<()> {
        self.encoder.make_placeholders(graph);
        graph.add_placeholder(PlaceholderSpec::batched(TARGET_NODE_IDS, DType::I32, &[]));
        self.classification.make_placeholders(graph);
        Ok(())
    }

    fn make_model(
        &self,
        metadata: &Self::Metadata,
        graph: &mut ModelGraph,
        _is_train: bool,
    ) -> TWResult<()> {
        self.encoder.make_model(graph);
        graph.add_op(
            OpSpec::per_row(
                TARGET_REPRESENTATIONS,
                TARGET_NODE_IDS,
                &[self.encoder.encoding_size],
            )
            .with_attr("pool_from", PATH_TO_TARGET_MAP),
        );
        self.classification
            .make_model(&metadata.classification, TARGET_NODE_IDS, graph);
        graph.add_op(OpSpec::scalar(LOSS).with_attr("terms", CLASSIFICATION_LOSS));
        Ok(())
    }

    fn init_batch(&self) -> Self::Batch {
        PathAnnotationBatch {
            paths: self.encoder.init_batch(),
            ..Default::default()
        }
    }

    fn extend_batch_with_sample(
        &self,
        batch: &mut Self::Batch,
        sample: &Self::Sample,
    ) -> bool {
        let offset = batch.node_offset as i32;
        batch.target_node_idxs.extend(
            sample
                .target_node_idxs
                .iter()
                .map(|&node_id| node_id as i32 + offset),
        );
        batch.node_offset += sample.num_nodes as usize;
        batch.variable_target_class.extend(
            sample
                .variable_target_class
                .iter()
                .map(|&class| class as i32),
        );
        self.encoder
            .extend_batch_with_sample(&mut batch.paths, &sample.paths)
    }

    fn finalise_batch(
        &self,
        _metadata: &Self::Metadata,
        batch: Self::Batch,
        writer: &mut MinibatchWriter<'_>,
        _is_train: bool,
    ) -> TWResult<()> {
        self.encoder.finalise_batch(batch.paths, writer)?;
        writer.write(TARGET_NODE_IDS, batch.target_node_idxs)?;
        self.classification
            .finalise_batch(batch.variable_target_class, writer)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        architectures::path_encoder::{PATH_ENCODINGS, PATH_LABEL_IDS},
        testing::synthetic_raw_sample,
    };

    fn arch() -> Path2Annotation {
        Path2Annotation::from_hyperparameters(
            &Path2Annotation::default_hyperparameters()
                .with("path_encoding_size", 8)
                .with("max_path_length", 2)
                .with("path_node_label_count_threshold", 1),
        )
        .unwrap()
    }

    fn metadata_for(
        arch: &Path2Annotation,
        samples: &[RawSample],
    ) -> PathAnnotationMetadata {
        let mut raw = arch.init_metadata();
        for s in samples {
            arch.load_metadata_from_sample(s, &mut raw);
        }
        arch.finalise_metadata(vec![raw]).unwrap()
    }

    #[test]
    fn test_train_targets_skip_ignorable_annotations() -> TWResult<()> {
        let raw = synthetic_raw_sample("m.py", 4, &[(1, Some("int")), (2, Some("Any")), (3, None)]);
        let arch = arch();
        let metadata = metadata_for(&arch, std::slice::from_ref(&raw));

        let train = arch
            .load_data_from_sample(&metadata, &raw, true)?
            .unwrap();
        assert_eq!(train.target_node_idxs, vec![1]);
        assert_eq!(train.variable_target_class, vec![1]);
        // Chain 0-1-2-3: from node 1, nodes 0 and 2 at one step, 3 at two.
        assert_eq!(train.paths.paths[0].len(), 3);

        let eval = arch
            .load_data_from_sample(&metadata, &raw, false)?
            .unwrap();
        assert_eq!(eval.target_node_idxs, vec![1, 2, 3]);
        assert_eq!(eval.variable_target_class, vec![1, 0, 0]);
        assert_eq!(eval.paths.paths.len(), 3);
        Ok(())
    }

    #[test]
    fn test_rejects_samples_without_targets_or_paths() -> TWResult<()> {
        let arch = arch();
        let ignorable = synthetic_raw_sample("any.py", 3, &[(1, Some("Any"))]);
        let isolated = synthetic_raw_sample("one.py", 1, &[(0, Some("int"))]);
        let metadata = metadata_for(&arch, &[ignorable.clone(), isolated.clone()]);

        assert!(arch.load_data_from_sample(&metadata, &ignorable, true)?.is_none());
        assert!(arch.load_data_from_sample(&metadata, &ignorable, false)?.is_some());
        assert!(arch.load_data_from_sample(&metadata, &isolated, true)?.is_none());
        Ok(())
    }

    #[test]
    fn test_batch_offsets_target_nodes() -> TWResult<()> {
        let arch = arch();
        let a = synthetic_raw_sample("a.py", 4, &[(1, Some("int")), (3, Some("str"))]);
        let b = synthetic_raw_sample("b.py", 3, &[(0, Some("int"))]);
        let metadata = metadata_for(&arch, &[a.clone(), b.clone()]);

        let mut batch = arch.init_batch();
        for raw in [&a, &b] {
            let sample = arch
                .load_data_from_sample(&metadata, raw, true)?
                .unwrap();
            assert!(!arch.extend_batch_with_sample(&mut batch, &sample));
        }
        assert_eq!(batch.target_node_idxs, vec![1, 3, 4]);
        assert_eq!(batch.node_offset, 7);
        assert_eq!(batch.paths.target_offset, 3);
        assert_eq!(batch.variable_target_class.len(), 3);
        // Node 3 of "a.py" reaches 2 and 1; node 0 of "b.py" reaches 1 and 2.
        assert_eq!(batch.paths.path_to_target, vec![0, 0, 0, 1, 1, 2, 2]);
        Ok(())
    }

    #[test]
    fn test_declared_graph() -> TWResult<()> {
        let arch = arch();
        let metadata = metadata_for(
            &arch,
            &[synthetic_raw_sample("m.py", 4, &[(1, Some("int"))])],
        );

        let mut graph = ModelGraph::new(true);
        arch.make_parameters(&metadata, &mut graph)?;
        arch.make_placeholders(&metadata, &mut graph, true)?;
        arch.make_model(&metadata, &mut graph, true)?;

        assert!(graph.placeholder(TARGET_NODE_IDS).is_some());
        assert!(graph.placeholder(PATH_LABEL_IDS).is_some());
        assert_eq!(graph.op(PATH_ENCODINGS).unwrap().shape, vec![None, Some(8)]);
        assert_eq!(graph.op(TARGET_REPRESENTATIONS).unwrap().shape, vec![None, Some(8)]);
        assert_eq!(graph.op(PREDICTED_LOGPROB_DIST).unwrap().shape, vec![None, Some(2)]);
        assert!(graph.op(LOSS).is_some());
        assert_eq!(
            graph
                .parameters()
                .iter()
                .find(|p| p.name == "type_classification_weights")
                .unwrap()
                .shape,
            vec![8, 2]
        );
        Ok(())
    }
}
