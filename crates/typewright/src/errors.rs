//! # Error Types

use std::path::PathBuf;

/// Errors from typewright operations.
#[derive(Debug, thiserror::Error)]
pub enum TypewrightError {
    /// A required hyperparameter is absent.
    #[error("missing hyperparameter '{name}'")]
    MissingHyperparameter {
        /// The hyperparameter name.
        name: String,
    },

    /// A hyperparameter holds a value of the wrong kind.
    #[error("hyperparameter '{name}' expected {expected}, found '{found}'")]
    InvalidHyperparameter {
        /// The hyperparameter name.
        name: String,
        /// The expected value kind.
        expected: &'static str,
        /// The value that was found.
        found: String,
    },

    /// The configured optimizer is not known.
    #[error("unknown optimizer \"{0}\"")]
    UnknownOptimizer(String),

    /// A checkpoint was written by a different architecture.
    #[error("checkpoint holds a '{found}' model, expected '{expected}'")]
    ModelTypeMismatch {
        /// The architecture tag of the model being restored.
        expected: String,
        /// The architecture tag stored in the checkpoint.
        found: String,
    },

    /// A data file could not be read or written.
    #[error("I/O error on '{path}': {source}")]
    DataFile {
        /// The offending path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A data file could not be decoded or encoded.
    #[error("format error in '{path}': {source}")]
    DataFormat {
        /// The offending path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A raw sample is structurally invalid.
    #[error("malformed sample from '{provenance}': {reason}")]
    MalformedSample {
        /// Where the sample came from.
        provenance: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The loss of a minibatch was NaN or infinite.
    #[error("non-finite loss {loss} in epoch '{epoch}' at minibatch {minibatch}")]
    NonFiniteLoss {
        /// The epoch label.
        epoch: String,
        /// The minibatch counter within the epoch.
        minibatch: usize,
        /// The offending loss.
        loss: f64,
    },

    /// A minibatch value does not fit its placeholder.
    #[error("placeholder '{placeholder}': {reason}")]
    ShapeMismatch {
        /// The placeholder name.
        placeholder: String,
        /// What is wrong with the value.
        reason: String,
    },

    /// A placeholder was written that the model graph does not declare.
    #[error("unknown placeholder '{0}'")]
    UnknownPlaceholder(String),

    /// The execution engine did not produce a requested output.
    #[error("missing output '{0}'")]
    MissingOutput(String),

    /// An operation needs metadata that has not been computed or loaded.
    #[error("metadata has not been loaded")]
    MetadataNotLoaded,

    /// An operation needs an execution engine that has not been built.
    #[error("model graph has not been built; call make_model first")]
    EngineNotBuilt,

    /// Training was requested on a graph built for inference.
    #[error("model graph was built for inference; rebuild it with is_train = true")]
    NotInTrainingMode,

    /// An operation needs a nearest-neighbour index that has not been built.
    #[error("type space index has not been built")]
    IndexNotBuilt,

    /// A parallel worker failed without producing a result.
    #[error("worker failed: {0}")]
    Worker(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error from an external component.
    #[error("{0}")]
    External(String),
}

/// Result type for typewright operations.
pub type TWResult<T> = core::result::Result<T, TypewrightError>;
