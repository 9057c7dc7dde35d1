//! # Pipeline and Model Options

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default cumulative byte budget of raw files tensorised into one chunk.
pub const DEFAULT_CHUNK_BYTE_BUDGET: u64 = 40 * 1024 * 1024;

/// Default number of chunks held open while streaming training data.
pub const DEFAULT_TRAIN_OPEN_CHUNKS: usize = 25;

/// Default number of chunks held open while streaming evaluation data.
pub const DEFAULT_EVAL_OPEN_CHUNKS: usize = 1;

/// Default number of chunk-reading worker threads.
pub const DEFAULT_PREFETCH_WORKERS: usize = 5;

/// Default depth of the chunk prefetch queue.
pub const DEFAULT_PREFETCH_QUEUE_DEPTH: usize = 25;

/// Options for tensorisation and chunk streaming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Cumulative raw-file byte budget per chunk.
    pub chunk_byte_budget: u64,

    /// Open chunk pool size while training.
    pub train_open_chunks: usize,

    /// Open chunk pool size while evaluating.
    pub eval_open_chunks: usize,

    /// Number of chunk-reading worker threads; 0 reads on the calling thread.
    pub prefetch_workers: usize,

    /// Maximum number of chunks in flight ahead of the consumer.
    pub prefetch_queue_depth: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_byte_budget: DEFAULT_CHUNK_BYTE_BUDGET,
            train_open_chunks: DEFAULT_TRAIN_OPEN_CHUNKS,
            eval_open_chunks: DEFAULT_EVAL_OPEN_CHUNKS,
            prefetch_workers: DEFAULT_PREFETCH_WORKERS,
            prefetch_queue_depth: DEFAULT_PREFETCH_QUEUE_DEPTH,
        }
    }
}

impl PipelineOptions {
    /// Set the chunk byte budget.
    pub fn with_chunk_byte_budget(
        self,
        chunk_byte_budget: u64,
    ) -> Self {
        Self {
            chunk_byte_budget,
            ..self
        }
    }

    /// Set the training open chunk pool size.
    pub fn with_train_open_chunks(
        self,
        train_open_chunks: usize,
    ) -> Self {
        Self {
            train_open_chunks: train_open_chunks.max(1),
            ..self
        }
    }

    /// Set the evaluation open chunk pool size.
    pub fn with_eval_open_chunks(
        self,
        eval_open_chunks: usize,
    ) -> Self {
        Self {
            eval_open_chunks: eval_open_chunks.max(1),
            ..self
        }
    }

    /// Set the number of prefetch workers.
    pub fn with_prefetch_workers(
        self,
        prefetch_workers: usize,
    ) -> Self {
        Self {
            prefetch_workers,
            ..self
        }
    }

    /// Set the prefetch queue depth.
    pub fn with_prefetch_queue_depth(
        self,
        prefetch_queue_depth: usize,
    ) -> Self {
        Self {
            prefetch_queue_depth: prefetch_queue_depth.max(1),
            ..self
        }
    }

    /// The open chunk pool size for a pass.
    pub fn open_chunks(
        &self,
        is_train: bool,
    ) -> usize {
        if is_train {
            self.train_open_chunks
        } else {
            self.eval_open_chunks
        }
    }
}

/// Naming and location options for a model run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelOptions {
    /// The run name; defaults to the architecture tag.
    pub run_name: Option<String>,

    /// Where checkpoints are written; defaults to `.`.
    pub model_save_dir: Option<PathBuf>,

    /// Where run log files are written; defaults to `.`.
    pub log_save_dir: Option<PathBuf>,
}

impl ModelOptions {
    /// Set the run name.
    pub fn with_run_name<S: Into<String>>(
        mut self,
        run_name: S,
    ) -> Self {
        self.run_name = Some(run_name.into());
        self
    }

    /// Set the model save directory.
    pub fn with_model_save_dir<P: AsRef<Path>>(
        mut self,
        dir: P,
    ) -> Self {
        self.model_save_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the log directory.
    pub fn with_log_save_dir<P: AsRef<Path>>(
        mut self,
        dir: P,
    ) -> Self {
        self.log_save_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// The resolved model save directory.
    pub fn model_save_dir(&self) -> PathBuf {
        self.model_save_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// The resolved log directory.
    pub fn log_save_dir(&self) -> PathBuf {
        self.log_save_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_options() {
        let options = PipelineOptions::default();
        assert_eq!(options.chunk_byte_budget, 40 * 1024 * 1024);
        assert_eq!(options.open_chunks(true), 25);
        assert_eq!(options.open_chunks(false), 1);
        assert_eq!(options.prefetch_workers, 5);
        assert_eq!(options.prefetch_queue_depth, 25);

        let options = options
            .with_chunk_byte_budget(1024)
            .with_train_open_chunks(0)
            .with_eval_open_chunks(2)
            .with_prefetch_workers(0)
            .with_prefetch_queue_depth(3);
        assert_eq!(options.chunk_byte_budget, 1024);
        assert_eq!(options.open_chunks(true), 1);
        assert_eq!(options.open_chunks(false), 2);
        assert_eq!(options.prefetch_workers, 0);
        assert_eq!(options.prefetch_queue_depth, 3);
    }

    #[test]
    fn test_model_options() {
        let options = ModelOptions::default();
        assert_eq!(options.model_save_dir(), PathBuf::from("."));
        assert_eq!(options.log_save_dir(), PathBuf::from("."));

        let options = options
            .with_run_name("exp")
            .with_model_save_dir("/tmp/models")
            .with_log_save_dir("/tmp/logs");
        assert_eq!(options.run_name.as_deref(), Some("exp"));
        assert_eq!(options.model_save_dir(), PathBuf::from("/tmp/models"));
        assert_eq!(options.log_save_dir(), PathBuf::from("/tmp/logs"));
    }
}
