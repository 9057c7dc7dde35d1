//! # Persisted Model State
//!
//! Two gzip-compressed JSON documents:
//! * [`Checkpoint`] - everything needed to rebuild a runnable model.
//! * [`MetadataSummary`] - what tensorisation used, so later runs can reuse it.

use std::path::Path;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    errors::TWResult,
    hyperparameters::Hyperparameters,
    io::{read_json_gz, write_json_gz},
    tensor::Weights,
};

/// A saved model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<M> {
    /// The architecture tag.
    pub model_type: String,

    /// The complete hyperparameters of the run.
    pub hyperparameters: Hyperparameters,

    /// The finalised metadata.
    pub metadata: M,

    /// Learnable parameter values.
    pub weights: Weights,

    /// The run name.
    pub run_name: String,
}

impl<M: Serialize + DeserializeOwned> Checkpoint<M> {
    /// Write the checkpoint, replacing any previous file.
    pub fn save(
        &self,
        path: &Path,
    ) -> TWResult<()> {
        write_json_gz(path, self)
    }

    /// Read a checkpoint.
    pub fn load(path: &Path) -> TWResult<Self> {
        read_json_gz(path)
    }
}

/// The summary written next to tensorised chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSummary<M> {
    /// The hyperparameters used for tensorisation.
    pub hyperparameters: Hyperparameters,

    /// The metadata used for tensorisation.
    pub metadata: M,

    /// Samples kept.
    pub num_used_samples: usize,

    /// Samples seen, rejected ones included.
    pub num_all_samples: usize,
}

impl<M: Serialize + DeserializeOwned> MetadataSummary<M> {
    /// Write the summary, replacing any previous file.
    pub fn save(
        &self,
        path: &Path,
    ) -> TWResult<()> {
        write_json_gz(path, self)
    }

    /// Read a summary.
    pub fn load(path: &Path) -> TWResult<Self> {
        read_json_gz(path)
    }
}
