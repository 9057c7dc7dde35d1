//! # Code Graph Encoder
//!
//! The shared encoder of every graph architecture: a gated graph network over
//! the sample's labelled nodes and typed edges.
//!
//! Samples are packed into one disjoint union graph per minibatch:
//!
//! ```text
//!   sample 0: nodes 0..n0          edges (s, d)
//!   sample 1: nodes n0..n0+n1      edges (s + n0, d + n0)
//!   ...
//!   cg_node_to_graph_map[i] = index of the sample owning node i
//! ```
//!
//! A batch is full once it holds `max_num_cg_nodes_in_batch` nodes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    data::{Counter, RawSample, Vocabulary},
    errors::{TWResult, TypewrightError},
    hyperparameters::Hyperparameters,
    model::{Initializer, MinibatchWriter, ModelGraph, OpSpec, ParameterSpec, PlaceholderSpec},
    tensor::DType,
};

/// Placeholder holding the label id of every node.
pub const NODE_LABEL_IDS: &str = "cg_node_label_ids";

/// Placeholder mapping every node to its sample.
pub const NODE_TO_GRAPH_MAP: &str = "cg_node_to_graph_map";

/// Output holding one representation row per node.
pub const NODE_REPRESENTATIONS: &str = "cg_node_representations";

/// Placeholder holding the ``(source, target)`` pairs of edge type `edge_type_idx`.
pub fn adjacency_placeholder(edge_type_idx: usize) -> String {
    format!("cg_adjacency_{edge_type_idx}")
}

/// Parameter holding the message weights of edge type `edge_type_idx`.
fn edge_weights_parameter(edge_type_idx: usize) -> String {
    format!("cg_edge_weights_{edge_type_idx}")
}

/// Encoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeGraphEncoder {
    /// Width of node representations.
    pub hidden_size: usize,

    /// Maximum node label vocabulary size, including the unknown token.
    pub node_label_vocab_size: usize,

    /// Labels seen fewer times are left out of the vocabulary.
    pub node_label_count_threshold: u64,

    /// Node budget of one minibatch.
    pub max_nodes_in_batch: usize,

    /// Message passing rounds.
    pub num_timesteps: usize,
}

/// Per-file encoder metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeGraphRawMetadata {
    /// Node label counts.
    pub node_label_counts: Counter,

    /// Every edge type seen.
    pub edge_types: BTreeSet<String>,
}

/// Merged encoder metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeGraphMetadata {
    /// Node label vocabulary.
    pub node_label_vocab: Vocabulary,

    /// Edge types, sorted; the position is the edge type index.
    pub edge_types: Vec<String>,
}

/// The encoder part of one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeGraphSample {
    /// Label id of every node.
    pub node_label_ids: Vec<u32>,

    /// ``(source, target)`` pairs, per edge type index.
    pub adjacency: Vec<Vec<(u32, u32)>>,
}

impl CodeGraphSample {
    /// Nodes in the sample.
    pub fn num_nodes(&self) -> usize {
        self.node_label_ids.len()
    }
}

/// The encoder part of a minibatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeGraphBatch {
    /// Label ids of all nodes.
    pub node_label_ids: Vec<i32>,

    /// Flattened, offset ``(source, target)`` pairs per edge type index.
    pub adjacency: Vec<Vec<i32>>,

    /// Sample index of every node.
    pub node_to_graph: Vec<i32>,

    /// Nodes added so far; the offset of the next sample's nodes.
    pub cg_node_offset: usize,

    /// Samples added so far.
    pub num_graphs: usize,
}

impl CodeGraphEncoder {
    /// Default encoder hyperparameters.
    pub fn default_hyperparameters() -> Hyperparameters {
        Hyperparameters::new()
            .with("cg_ggnn_hidden_size", 64)
            .with("cg_ggnn_num_timesteps", 8)
            .with("cg_node_label_vocab_size", 10000)
            .with("cg_node_label_count_threshold", 2)
            .with("max_num_cg_nodes_in_batch", 10000)
    }

    /// Read the encoder configuration.
    pub fn from_hyperparameters(hyperparameters: &Hyperparameters) -> TWResult<Self> {
        let encoder = Self {
            hidden_size: hyperparameters.get_usize("cg_ggnn_hidden_size")?,
            num_timesteps: hyperparameters.get_usize("cg_ggnn_num_timesteps")?,
            node_label_vocab_size: hyperparameters.get_usize("cg_node_label_vocab_size")?,
            node_label_count_threshold: hyperparameters.get_usize("cg_node_label_count_threshold")?
                as u64,
            max_nodes_in_batch: hyperparameters.get_usize("max_num_cg_nodes_in_batch")?,
        };
        for (name, value) in [
            ("cg_ggnn_hidden_size", encoder.hidden_size),
            ("max_num_cg_nodes_in_batch", encoder.max_nodes_in_batch),
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

    /// A fresh per-file accumulator.
    pub fn init_metadata(&self) -> CodeGraphRawMetadata {
        CodeGraphRawMetadata::default()
    }

    /// Count node labels and collect edge types.
    pub fn load_metadata_from_sample(
        &self,
        raw_sample: &RawSample,
        raw_metadata: &mut CodeGraphRawMetadata,
    ) {
        for label in &raw_sample.nodes {
            raw_metadata.node_label_counts.add(label);
        }
        raw_metadata
            .edge_types
            .extend(raw_sample.edges.keys().cloned());
    }

    /// Merge accumulators into the label vocabulary and the sorted edge types.
    pub fn finalise_metadata(
        &self,
        raw_metadata_list: Vec<CodeGraphRawMetadata>,
    ) -> CodeGraphMetadata {
        let mut counts = Counter::new();
        let mut edge_types = BTreeSet::new();
        for raw in raw_metadata_list {
            counts.merge(&raw.node_label_counts);
            edge_types.extend(raw.edge_types);
        }
        CodeGraphMetadata {
            node_label_vocab: Vocabulary::from_counts(
                &counts,
                self.node_label_vocab_size,
                self.node_label_count_threshold,
            ),
            edge_types: edge_types.into_iter().collect(),
        }
    }

    /// Encode the graph of one raw sample.
    ///
    /// Empty graphs, and graphs larger than a whole minibatch, are rejected.
    /// Edges of types unknown to the metadata are dropped.
    pub fn load_data_from_sample(
        &self,
        metadata: &CodeGraphMetadata,
        raw_sample: &RawSample,
    ) -> Option<CodeGraphSample> {
        let num_nodes = raw_sample.num_nodes();
        if num_nodes == 0 || num_nodes > self.max_nodes_in_batch {
            log::debug!(
                "Skipping '{}': {num_nodes} nodes do not fit a minibatch.",
                raw_sample.filename
            );
            return None;
        }

        let node_label_ids = raw_sample
            .nodes
            .iter()
            .map(|label| metadata.node_label_vocab.get_id(label))
            .collect();

        let adjacency = metadata
            .edge_types
            .iter()
            .map(|edge_type| {
                raw_sample
                    .edges
                    .get(edge_type)
                    .map(|adjacency| {
                        adjacency
                            .iter()
                            .flat_map(|(&src, targets)| targets.iter().map(move |&dst| (src, dst)))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();

        Some(CodeGraphSample {
            node_label_ids,
            adjacency,
        })
    }

    /// Declare the label embeddings, the per-edge-type message weights and the state update.
    pub fn make_parameters(
        &self,
        metadata: &CodeGraphMetadata,
        graph: &mut ModelGraph,
    ) {
        let h = self.hidden_size;
        graph.add_parameter(ParameterSpec::new(
            "cg_node_label_embeddings",
            &[metadata.node_label_vocab.len(), h],
            Initializer::Uniform { scale: 0.1 },
        ));
        for idx in 0..metadata.edge_types.len() {
            graph.add_parameter(ParameterSpec::new(
                edge_weights_parameter(idx),
                &[h, h],
                Initializer::GlorotUniform,
            ));
        }
        graph.add_parameter(ParameterSpec::new(
            "cg_state_update_kernel",
            &[2 * h, 3 * h],
            Initializer::GlorotUniform,
        ));
        graph.add_parameter(ParameterSpec::new(
            "cg_state_update_bias",
            &[3 * h],
            Initializer::Zeros,
        ));
    }

    /// Declare the node, edge and node-to-sample inputs.
    pub fn make_placeholders(
        &self,
        metadata: &CodeGraphMetadata,
        graph: &mut ModelGraph,
    ) {
        graph.add_placeholder(PlaceholderSpec::batched(NODE_LABEL_IDS, DType::I32, &[]));
        graph.add_placeholder(PlaceholderSpec::batched(NODE_TO_GRAPH_MAP, DType::I32, &[]));
        for idx in 0..metadata.edge_types.len() {
            graph.add_placeholder(PlaceholderSpec::batched(
                adjacency_placeholder(idx),
                DType::I32,
                &[2],
            ));
        }
    }

    /// Declare the node representations.
    pub fn make_model(
        &self,
        graph: &mut ModelGraph,
    ) {
        graph.add_op(
            OpSpec::per_row(NODE_REPRESENTATIONS, NODE_LABEL_IDS, &[self.hidden_size])
                .with_attr("num_timesteps", self.num_timesteps),
        );
    }

    /// Fresh accumulators.
    pub fn init_batch(&self) -> CodeGraphBatch {
        CodeGraphBatch::default()
    }

    /// Append one sample's graph, offset into the batch's node space.
    ///
    /// Returns `true` once the node budget is reached.
    pub fn extend_batch_with_sample(
        &self,
        batch: &mut CodeGraphBatch,
        sample: &CodeGraphSample,
    ) -> bool {
        let offset = batch.cg_node_offset as i32;
        let graph_idx = batch.num_graphs as i32;

        batch
            .node_label_ids
            .extend(sample.node_label_ids.iter().map(|&id| id as i32));
        batch
            .node_to_graph
            .extend(std::iter::repeat_n(graph_idx, sample.num_nodes()));

        if batch.adjacency.len() < sample.adjacency.len() {
            batch.adjacency.resize(sample.adjacency.len(), Vec::new());
        }
        for (flat, pairs) in batch.adjacency.iter_mut().zip(&sample.adjacency) {
            for &(src, dst) in pairs {
                flat.push(src as i32 + offset);
                flat.push(dst as i32 + offset);
            }
        }

        batch.cg_node_offset += sample.num_nodes();
        batch.num_graphs += 1;
        batch.cg_node_offset >= self.max_nodes_in_batch
    }

    /// Write the accumulated inputs; edge types with no edge get an empty ``[0, 2]`` input.
    pub fn finalise_batch(
        &self,
        metadata: &CodeGraphMetadata,
        batch: CodeGraphBatch,
        writer: &mut MinibatchWriter<'_>,
    ) -> TWResult<()> {
        writer.write(NODE_LABEL_IDS, batch.node_label_ids)?;
        writer.write(NODE_TO_GRAPH_MAP, batch.node_to_graph)?;

        let mut adjacency = batch.adjacency.into_iter();
        for idx in 0..metadata.edge_types.len() {
            writer.write(
                &adjacency_placeholder(idx),
                adjacency.next().unwrap_or_default(),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn raw_sample(
        filename: &str,
        labels: &[&str],
        edges: &[(&str, u32, u32)],
    ) -> RawSample {
        let mut edge_map: BTreeMap<String, BTreeMap<u32, Vec<u32>>> = BTreeMap::new();
        for &(edge_type, src, dst) in edges {
            edge_map
                .entry(edge_type.to_string())
                .or_default()
                .entry(src)
                .or_default()
                .push(dst);
        }
        RawSample {
            filename: filename.to_string(),
            nodes: labels.iter().map(|s| s.to_string()).collect(),
            edges: edge_map,
            supernodes: BTreeMap::new(),
        }
    }

    fn encoder(max_nodes: usize) -> CodeGraphEncoder {
        CodeGraphEncoder::from_hyperparameters(
            &CodeGraphEncoder::default_hyperparameters()
                .with("max_num_cg_nodes_in_batch", max_nodes)
                .with("cg_node_label_count_threshold", 1),
        )
        .unwrap()
    }

    #[test]
    fn test_metadata_is_order_independent() {
        let encoder = encoder(100);
        let a = raw_sample("a.py", &["x", "y", "x"], &[("CHILD", 0, 1)]);
        let b = raw_sample("b.py", &["z"], &[("NEXT", 0, 0)]);

        let mut raw_a = encoder.init_metadata();
        encoder.load_metadata_from_sample(&a, &mut raw_a);
        let mut raw_b = encoder.init_metadata();
        encoder.load_metadata_from_sample(&b, &mut raw_b);

        let ab = encoder.finalise_metadata(vec![raw_a.clone(), raw_b.clone()]);
        let ba = encoder.finalise_metadata(vec![raw_b, raw_a]);
        assert_eq!(ab, ba);
        assert_eq!(ab.edge_types, vec!["CHILD".to_string(), "NEXT".to_string()]);
        assert_eq!(ab.node_label_vocab.get_token(1), Some("x"));
    }

    #[test]
    fn test_rejects_empty_and_oversized_graphs() {
        let encoder = encoder(2);
        let metadata = encoder.finalise_metadata(vec![]);
        assert!(
            encoder
                .load_data_from_sample(&metadata, &raw_sample("e.py", &[], &[]))
                .is_none()
        );
        assert!(
            encoder
                .load_data_from_sample(&metadata, &raw_sample("big.py", &["a", "b", "c"], &[]))
                .is_none()
        );
        assert!(
            encoder
                .load_data_from_sample(&metadata, &raw_sample("ok.py", &["a", "b"], &[]))
                .is_some()
        );
    }

    #[test]
    fn test_batch_offsets_node_indices() {
        let encoder = encoder(5);
        let metadata = CodeGraphMetadata {
            node_label_vocab: Vocabulary::from_tokens(["a", "b"]),
            edge_types: vec!["CHILD".to_string(), "NEXT".to_string()],
        };
        let s0 = encoder
            .load_data_from_sample(
                &metadata,
                &raw_sample("0.py", &["a", "b"], &[("CHILD", 0, 1)]),
            )
            .unwrap();
        let s1 = encoder
            .load_data_from_sample(
                &metadata,
                &raw_sample("1.py", &["b", "q", "a"], &[("CHILD", 0, 2), ("CHILD", 1, 0)]),
            )
            .unwrap();

        let mut batch = encoder.init_batch();
        assert!(!encoder.extend_batch_with_sample(&mut batch, &s0));
        assert!(encoder.extend_batch_with_sample(&mut batch, &s1));

        assert_eq!(batch.node_label_ids, vec![1, 2, 2, 0, 1]);
        assert_eq!(batch.node_to_graph, vec![0, 0, 1, 1, 1]);
        assert_eq!(batch.adjacency[0], vec![0, 1, 2, 4, 3, 2]);
        assert!(batch.adjacency[1].is_empty());
        assert_eq!(batch.cg_node_offset, 5);
    }
}
