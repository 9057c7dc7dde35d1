#![allow(dead_code)]

use std::path::{Path, PathBuf};

use typewright::{
    hyperparameters::Hyperparameters,
    options::{ModelOptions, PipelineOptions},
};

/// Small graphs, every node label kept.
pub fn small_hyperparameters() -> Hyperparameters {
    Hyperparameters::new()
        .with("cg_ggnn_hidden_size", 4)
        .with("cg_node_label_count_threshold", 1)
        .with("patience", 3)
        .with("max_epochs", 50)
}

/// Save checkpoints and logs under `dir`.
pub fn model_options(dir: &Path) -> ModelOptions {
    ModelOptions::default()
        .with_model_save_dir(dir.join("models"))
        .with_log_save_dir(dir.join("logs"))
}

/// Read chunks on the calling thread.
pub fn inline_pipeline() -> PipelineOptions {
    PipelineOptions::default().with_prefetch_workers(0)
}

pub struct Dirs {
    pub raw_train: PathBuf,
    pub raw_valid: PathBuf,
    pub train: PathBuf,
    pub valid: PathBuf,
}

impl Dirs {
    pub fn new(root: &Path) -> Self {
        Self {
            raw_train: root.join("raw/train"),
            raw_valid: root.join("raw/valid"),
            train: root.join("tensorised/train"),
            valid: root.join("tensorised/valid"),
        }
    }
}
