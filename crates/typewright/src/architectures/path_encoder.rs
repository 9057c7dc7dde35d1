//! # Path Encoder
//!
//! Represents every target node by the label paths leading away from it.
//!
//! Edges of every type are walked in both directions. From each target, a
//! breadth-first walk visits nodes in order of distance (ties broken by node
//! id); the tree path to each visited node, read as node labels starting at
//! the target, is one path. At most `max_num_paths_per_target` paths of at
//! most `max_path_length` steps are kept per target, nearest first.
//!
//! Paths are packed flat per minibatch:
//!
//! ```text
//!   path_label_ids     = labels of path 0 ++ labels of path 1 ++ ...
//!   path_lengths[p]    = number of labels of path p
//!   path_to_target[p]  = batch-wide index of the target path p belongs to
//! ```
//!
//! A batch is full once it holds `max_num_paths_in_batch` paths.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{
    data::{Counter, RawSample, Vocabulary},
    errors::{TWResult, TypewrightError},
    hyperparameters::Hyperparameters,
    model::{Initializer, MinibatchWriter, ModelGraph, OpSpec, ParameterSpec, PlaceholderSpec},
    tensor::DType,
};

/// Placeholder holding the label ids of all paths, concatenated.
pub const PATH_LABEL_IDS: &str = "path_label_ids";

/// Placeholder holding the number of labels of every path.
pub const PATH_LENGTHS: &str = "path_lengths";

/// Placeholder mapping every path to its target.
pub const PATH_TO_TARGET_MAP: &str = "path_to_target_map";

/// Output holding one encoding row per path.
pub const PATH_ENCODINGS: &str = "path_encodings";

/// Encoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathEncoder {
    /// Width of path encodings, and of the target representations pooled from them.
    pub encoding_size: usize,

    /// Maximum steps per path; a path holds one more label than steps.
    pub max_path_length: usize,

    /// Paths kept per target.
    pub max_paths_per_target: usize,

    /// Maximum node label vocabulary size, including the unknown token.
    pub node_label_vocab_size: usize,

    /// Labels seen fewer times are left out of the vocabulary.
    pub node_label_count_threshold: u64,

    /// Path budget of one minibatch.
    pub max_paths_in_batch: usize,
}

/// Merged encoder metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMetadata {
    /// Node label vocabulary.
    pub node_label_vocab: Vocabulary,
}

/// The paths of every target of one sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSample {
    /// Label ids of every path, per target.
    pub paths: Vec<Vec<Vec<u32>>>,
}

impl PathSample {
    /// Paths over all targets.
    pub fn num_paths(&self) -> usize {
        self.paths.iter().map(Vec::len).sum()
    }
}

/// The encoder part of a minibatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathBatch {
    /// Concatenated label ids.
    pub path_label_ids: Vec<i32>,

    /// Labels per path.
    pub path_lengths: Vec<i32>,

    /// Batch-wide target index of every path.
    pub path_to_target: Vec<i32>,

    /// Targets added so far; the offset of the next sample's targets.
    pub target_offset: usize,
}

/// Nodes adjacent to every node, over all edge types and in both directions.
fn undirected_neighbours(raw_sample: &RawSample) -> Vec<BTreeSet<u32>> {
    let mut neighbours = vec![BTreeSet::new(); raw_sample.num_nodes()];
    for adjacency in raw_sample.edges.values() {
        for (&src, targets) in adjacency {
            for &dst in targets {
                if src == dst {
                    continue;
                }
                neighbours[src as usize].insert(dst);
                neighbours[dst as usize].insert(src);
            }
        }
    }
    neighbours
}

impl PathEncoder {
    /// Default encoder hyperparameters.
    pub fn default_hyperparameters() -> Hyperparameters {
        Hyperparameters::new()
            .with("path_encoding_size", 64)
            .with("max_path_length", 8)
            .with("max_num_paths_per_target", 20)
            .with("path_node_label_vocab_size", 10000)
            .with("path_node_label_count_threshold", 2)
            .with("max_num_paths_in_batch", 5000)
    }

    /// Read the encoder configuration.
    pub fn from_hyperparameters(hyperparameters: &Hyperparameters) -> TWResult<Self> {
        let encoder = Self {
            encoding_size: hyperparameters.get_usize("path_encoding_size")?,
            max_path_length: hyperparameters.get_usize("max_path_length")?,
            max_paths_per_target: hyperparameters.get_usize("max_num_paths_per_target")?,
            node_label_vocab_size: hyperparameters.get_usize("path_node_label_vocab_size")?,
            node_label_count_threshold: hyperparameters
                .get_usize("path_node_label_count_threshold")?
                as u64,
            max_paths_in_batch: hyperparameters.get_usize("max_num_paths_in_batch")?,
        };
        for (name, value) in [
            ("path_encoding_size", encoder.encoding_size),
            ("max_path_length", encoder.max_path_length),
            ("max_num_paths_per_target", encoder.max_paths_per_target),
            ("max_num_paths_in_batch", encoder.max_paths_in_batch),
        ] {
            if value == 0 {
                return Err(TypewrightError::InvalidHyperparameter {
                    name: name.to_string(),
                    expected: "a positive integer",
                    found: value.to_string(),
                });
            }
        }
        Ok(encoder)
    }

    /// A fresh per-file accumulator of node label counts.
    pub fn init_metadata(&self) -> Counter {
        Counter::new()
    }

    /// Count node labels.
    pub fn load_metadata_from_sample(
        &self,
        raw_sample: &RawSample,
        node_label_counts: &mut Counter,
    ) {
        for label in &raw_sample.nodes {
            node_label_counts.add(label);
        }
    }

    /// Merge label counts into the vocabulary.
    pub fn finalise_metadata(
        &self,
        raw_metadata_list: Vec<Counter>,
    ) -> PathMetadata {
        let mut counts = Counter::new();
        for raw in &raw_metadata_list {
            counts.merge(raw);
        }
        PathMetadata {
            node_label_vocab: Vocabulary::from_counts(
                &counts,
                self.node_label_vocab_size,
                self.node_label_count_threshold,
            ),
        }
    }

    /// The label-id paths leaving `start`, nearest first.
    fn paths_from(
        &self,
        metadata: &PathMetadata,
        raw_sample: &RawSample,
        neighbours: &[BTreeSet<u32>],
        start: u32,
    ) -> Vec<Vec<u32>> {
        let mut parent: Vec<Option<u32>> = vec![None; raw_sample.num_nodes()];
        let mut depth = vec![0usize; raw_sample.num_nodes()];
        let mut seen = vec![false; raw_sample.num_nodes()];
        seen[start as usize] = true;

        let mut queue = VecDeque::from([start]);
        let mut paths = Vec::new();
        while let Some(node) = queue.pop_front() {
            if node != start {
                let mut path = vec![node];
                let mut cur = node;
                while let Some(prev) = parent[cur as usize] {
                    path.push(prev);
                    cur = prev;
                }
                path.reverse();
                paths.push(
                    path.iter()
                        .map(|&n| {
                            metadata
                                .node_label_vocab
                                .get_id(&raw_sample.nodes[n as usize])
                        })
                        .collect(),
                );
                if paths.len() == self.max_paths_per_target {
                    break;
                }
            }
            if depth[node as usize] == self.max_path_length {
                continue;
            }
            for &next in &neighbours[node as usize] {
                if !seen[next as usize] {
                    seen[next as usize] = true;
                    parent[next as usize] = Some(node);
                    depth[next as usize] = depth[node as usize] + 1;
                    queue.push_back(next);
                }
            }
        }
        paths
    }

    /// Collect the paths of every target in `target_node_idxs`.
    ///
    /// Samples yielding no path at all, or more paths than a whole minibatch
    /// holds, are rejected.
    pub fn load_data_from_sample(
        &self,
        metadata: &PathMetadata,
        raw_sample: &RawSample,
        target_node_idxs: &[u32],
    ) -> Option<PathSample> {
        let neighbours = undirected_neighbours(raw_sample);
        let sample = PathSample {
            paths: target_node_idxs
                .iter()
                .map(|&target| self.paths_from(metadata, raw_sample, &neighbours, target))
                .collect(),
        };

        let num_paths = sample.num_paths();
        if num_paths == 0 || num_paths > self.max_paths_in_batch {
            log::debug!(
                "Skipping '{}': {num_paths} paths do not fit a minibatch.",
                raw_sample.filename
            );
            return None;
        }
        Some(sample)
    }

    /// Declare the label embeddings and the path recurrence.
    pub fn make_parameters(
        &self,
        metadata: &PathMetadata,
        graph: &mut ModelGraph,
    ) {
        let h = self.encoding_size;
        graph.add_parameter(ParameterSpec::new(
            "path_node_label_embeddings",
            &[metadata.node_label_vocab.len(), h],
            Initializer::Uniform { scale: 0.1 },
        ));
        graph.add_parameter(ParameterSpec::new(
            "path_rnn_kernel",
            &[2 * h, 3 * h],
            Initializer::GlorotUniform,
        ));
        graph.add_parameter(ParameterSpec::new(
            "path_rnn_bias",
            &[3 * h],
            Initializer::Zeros,
        ));
    }

    /// Declare the path inputs.
    pub fn make_placeholders(
        &self,
        graph: &mut ModelGraph,
    ) {
        graph.add_placeholder(PlaceholderSpec::batched(PATH_LABEL_IDS, DType::I32, &[]));
        graph.add_placeholder(PlaceholderSpec::batched(PATH_LENGTHS, DType::I32, &[]));
        graph.add_placeholder(PlaceholderSpec::batched(PATH_TO_TARGET_MAP, DType::I32, &[]));
    }

    /// Declare the path encodings.
    pub fn make_model(
        &self,
        graph: &mut ModelGraph,
    ) {
        graph.add_op(
            OpSpec::per_row(PATH_ENCODINGS, PATH_LENGTHS, &[self.encoding_size])
                .with_attr("max_path_length", self.max_path_length),
        );
    }

    /// Fresh accumulators.
    pub fn init_batch(&self) -> PathBatch {
        PathBatch::default()
    }

    /// Append one sample's paths, with targets offset into the batch's target space.
    ///
    /// Returns `true` once the path budget is reached.
    pub fn extend_batch_with_sample(
        &self,
        batch: &mut PathBatch,
        sample: &PathSample,
    ) -> bool {
        for (target_idx, paths) in sample.paths.iter().enumerate() {
            let target = (batch.target_offset + target_idx) as i32;
            for path in paths {
                batch
                    .path_label_ids
                    .extend(path.iter().map(|&id| id as i32));
                batch.path_lengths.push(path.len() as i32);
                batch.path_to_target.push(target);
            }
        }
        batch.target_offset += sample.paths.len();
        batch.path_lengths.len() >= self.max_paths_in_batch
    }

    /// Write the accumulated inputs.
    pub fn finalise_batch(
        &self,
        batch: PathBatch,
        writer: &mut MinibatchWriter<'_>,
    ) -> TWResult<()> {
        writer.write(PATH_LABEL_IDS, batch.path_label_ids)?;
        writer.write(PATH_LENGTHS, batch.path_lengths)?;
        writer.write(PATH_TO_TARGET_MAP, batch.path_to_target)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn encoder(
        max_path_length: usize,
        max_paths_per_target: usize,
    ) -> PathEncoder {
        PathEncoder::from_hyperparameters(
            &PathEncoder::default_hyperparameters()
                .with("max_path_length", max_path_length)
                .with("max_num_paths_per_target", max_paths_per_target)
                .with("max_num_paths_in_batch", 6),
        )
        .unwrap()
    }

    // 0 - 1 - 2 - 3, with 4 hanging off 1.
    fn tree() -> RawSample {
        RawSample {
            filename: "t.py".to_string(),
            nodes: ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect(),
            edges: BTreeMap::from([
                (
                    "CHILD".to_string(),
                    BTreeMap::from([(0, vec![1]), (1, vec![2, 4])]),
                ),
                ("NEXT_TOKEN".to_string(), BTreeMap::from([(2, vec![3])])),
            ]),
            supernodes: BTreeMap::new(),
        }
    }

    fn metadata() -> PathMetadata {
        PathMetadata {
            node_label_vocab: Vocabulary::from_tokens(["a", "b", "c", "d", "e"]),
        }
    }

    #[test]
    fn test_paths_are_nearest_first_and_bounded() {
        let sample = encoder(2, 20)
            .load_data_from_sample(&metadata(), &tree(), &[1])
            .unwrap();
        // From b: a, c, e at one step; d at two steps.
        assert_eq!(
            sample.paths,
            vec![vec![vec![2, 1], vec![2, 3], vec![2, 5], vec![2, 3, 4]]]
        );

        let short = encoder(1, 20)
            .load_data_from_sample(&metadata(), &tree(), &[3])
            .unwrap();
        assert_eq!(short.paths, vec![vec![vec![4, 3]]]);

        let capped = encoder(8, 2)
            .load_data_from_sample(&metadata(), &tree(), &[1])
            .unwrap();
        assert_eq!(capped.paths, vec![vec![vec![2, 1], vec![2, 3]]]);
    }

    #[test]
    fn test_rejects_pathless_and_oversized_samples() {
        let isolated = RawSample {
            filename: "i.py".to_string(),
            nodes: vec!["a".to_string()],
            edges: BTreeMap::new(),
            supernodes: BTreeMap::new(),
        };
        let encoder = encoder(8, 20);
        assert!(
            encoder
                .load_data_from_sample(&metadata(), &isolated, &[0])
                .is_none()
        );
        // Two targets with four paths each exceed the six-path budget.
        assert!(
            encoder
                .load_data_from_sample(&metadata(), &tree(), &[0, 1])
                .is_none()
        );
    }

    #[test]
    fn test_batch_offsets_targets() {
        let encoder = encoder(1, 20);
        let s0 = encoder
            .load_data_from_sample(&metadata(), &tree(), &[0, 3])
            .unwrap();
        let s1 = encoder
            .load_data_from_sample(&metadata(), &tree(), &[4])
            .unwrap();

        let mut batch = encoder.init_batch();
        assert!(!encoder.extend_batch_with_sample(&mut batch, &s0));
        assert!(!encoder.extend_batch_with_sample(&mut batch, &s1));
        assert_eq!(batch.path_label_ids, vec![1, 2, 4, 3, 5, 2]);
        assert_eq!(batch.path_lengths, vec![2, 2, 2]);
        assert_eq!(batch.path_to_target, vec![0, 1, 2]);
        assert_eq!(batch.target_offset, 3);
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(
            PathEncoder::from_hyperparameters(
                &PathEncoder::default_hyperparameters().with("max_path_length", 0),
            )
            .is_err()
        );
    }
}
