//! # Type Metric Head and Type Space Index
//!
//! The metric head trains target representations so that nodes of the same
//! annotation lie close together and nodes of different annotations at least
//! `margin` apart. Annotations are compared within a minibatch only, through
//! batch-local dense ids:
//!
//! ```text
//!   targets:          int   str   int   <none>   List
//!   metric_type_ids:   0     1     0      2        3
//! ```
//!
//! A [`TypeSpaceIndex`] holds the representations of known annotated nodes;
//! a new node is annotated by an inverse-distance vote of its nearest
//! neighbours.

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    data::UNK_TOKEN,
    errors::{TWResult, TypewrightError},
    hyperparameters::Hyperparameters,
    io::{read_json_gz, write_json_gz},
    model::{AnnotationRepresentation, MinibatchWriter, ModelGraph, OpSpec, PlaceholderSpec},
    tensor::DType,
};

/// Placeholder holding the batch-local type id of every target node.
pub const METRIC_TYPE_IDS: &str = "metric_type_ids";

/// Output holding the metric loss.
pub const METRIC_LOSS: &str = "metric_loss";

/// Distances below this are treated as this.
const MIN_DISTANCE: f32 = 1e-6;

/// Metric head configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypeMetricHead {
    /// Minimum separation of different annotations.
    pub margin: f64,

    /// Neighbours consulted per query.
    pub num_neighbours: usize,
}

/// Batch-local dense type ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricBatch {
    /// The id of every target node.
    pub type_ids: Vec<i32>,

    ids: BTreeMap<String, i32>,
}

impl MetricBatch {
    /// Assign the next target's id; the same key always gets the same id.
    pub fn push(
        &mut self,
        target_type: Option<&str>,
    ) {
        let key = target_type.unwrap_or(UNK_TOKEN);
        let next = self.ids.len() as i32;
        let id = *self.ids.entry(key.to_string()).or_insert(next);
        self.type_ids.push(id);
    }

    /// Distinct keys seen so far.
    pub fn num_types(&self) -> usize {
        self.ids.len()
    }
}

impl TypeMetricHead {
    /// Default head hyperparameters.
    pub fn default_hyperparameters() -> Hyperparameters {
        Hyperparameters::new()
            .with("margin", 2)
            .with("knn_num_neighbours", 10)
    }

    /// Read the head configuration.
    pub fn from_hyperparameters(hyperparameters: &Hyperparameters) -> TWResult<Self> {
        let head = Self {
            margin: hyperparameters.get_f64("margin")?,
            num_neighbours: hyperparameters.get_usize("knn_num_neighbours")?,
        };
        if head.margin.is_nan() || head.margin <= 0.0 {
            return Err(TypewrightError::InvalidHyperparameter {
                name: "margin".to_string(),
                expected: "a positive number",
                found: head.margin.to_string(),
            });
        }
        if head.num_neighbours == 0 {
            return Err(TypewrightError::InvalidHyperparameter {
                name: "knn_num_neighbours".to_string(),
                expected: "a positive integer",
                found: "0".to_string(),
            });
        }
        Ok(head)
    }

    /// Declare the type ids.
    pub fn make_placeholders(
        &self,
        graph: &mut ModelGraph,
    ) {
        graph.add_placeholder(PlaceholderSpec::batched(METRIC_TYPE_IDS, DType::I32, &[]));
    }

    /// Declare the margin loss.
    pub fn make_model(
        &self,
        graph: &mut ModelGraph,
    ) {
        graph.add_op(OpSpec::scalar(METRIC_LOSS).with_attr("margin", self.margin));
    }

    /// Write the accumulated type ids.
    pub fn finalise_batch(
        &self,
        batch: MetricBatch,
        writer: &mut MinibatchWriter<'_>,
    ) -> TWResult<()> {
        writer.write(METRIC_TYPE_IDS, batch.type_ids)
    }
}

/// One indexed representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedType {
    /// The annotation.
    pub type_annotation: String,

    /// Where the annotated node came from.
    pub provenance: String,

    /// Its representation.
    pub representation: Vec<f32>,
}

/// Nearest-neighbour index over representations of annotated nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeSpaceIndex {
    dim: usize,
    entries: Vec<IndexedType>,
}

impl TypeSpaceIndex {
    /// Build an index; `annotation_key` maps each exported annotation to its index key.
    pub fn from_representations<I, F>(
        representations: I,
        annotation_key: F,
    ) -> TWResult<Self>
    where
        I: IntoIterator<Item = AnnotationRepresentation>,
        F: Fn(&str) -> String,
    {
        let mut index = Self::default();
        for r in representations {
            index.insert(IndexedType {
                type_annotation: annotation_key(&r.type_annotation),
                provenance: r.provenance,
                representation: r.representation,
            })?;
        }
        Ok(index)
    }

    /// Add one entry; every entry must have the same width.
    pub fn insert(
        &mut self,
        entry: IndexedType,
    ) -> TWResult<()> {
        if self.entries.is_empty() {
            self.dim = entry.representation.len();
        } else {
            self.check_dim(&entry.representation)?;
        }
        self.entries.push(entry);
        Ok(())
    }

    fn check_dim(
        &self,
        vector: &[f32],
    ) -> TWResult<()> {
        if vector.len() != self.dim {
            return Err(TypewrightError::ShapeMismatch {
                placeholder: "type space index".to_string(),
                reason: format!("expected width {}, found {}", self.dim, vector.len()),
            });
        }
        Ok(())
    }

    /// Entries in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the index empty?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Representation width.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The entries, in insertion order.
    pub fn entries(&self) -> &[IndexedType] {
        &self.entries
    }

    /// The `k` entries nearest to `query`, closest first; ties keep insertion order.
    pub fn nearest(
        &self,
        query: &[f32],
        k: usize,
    ) -> TWResult<Vec<(&IndexedType, f32)>> {
        if self.is_empty() {
            return Err(TypewrightError::IndexNotBuilt);
        }
        self.check_dim(query)?;

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, euclidean(query, &e.representation)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, d)| (&self.entries[i], d))
            .collect())
    }

    /// Log-probabilities of annotations for `query`.
    ///
    /// Each of the `k` nearest neighbours votes for its annotation with weight
    /// ``1 / distance``; votes are normalised to sum to one.
    pub fn predict(
        &self,
        query: &[f32],
        k: usize,
    ) -> TWResult<BTreeMap<String, f64>> {
        let mut votes: BTreeMap<String, f64> = BTreeMap::new();
        for (entry, distance) in self.nearest(query, k)? {
            *votes.entry(entry.type_annotation.clone()).or_default() +=
                1.0 / distance.max(MIN_DISTANCE) as f64;
        }
        let total: f64 = votes.values().sum();
        Ok(votes
            .into_iter()
            .map(|(annotation, weight)| (annotation, (weight / total).ln()))
            .collect())
    }

    /// Save the index to `path`.
    pub fn save(
        &self,
        path: &Path,
    ) -> TWResult<()> {
        write_json_gz(path, self)
    }

    /// Load an index saved by [`Self::save`].
    pub fn load(path: &Path) -> TWResult<Self> {
        read_json_gz(path)
    }
}

fn euclidean(
    a: &[f32],
    b: &[f32],
) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
