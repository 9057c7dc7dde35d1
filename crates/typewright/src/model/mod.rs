//! # Model Lifecycle
//!
//! The architecture-independent machinery of a type annotation model:
//!
//! * [`Architecture`] - the hooks a concrete model implements.
//! * [`Model`] - metadata, tensorisation, training, checkpointing and inference.
//! * [`ModelGraph`] / [`ExecutionEngine`] / [`EngineFactory`] - the boundary
//!   to the tensor framework.
//! * [`ChunkStream`] / [`RawBatches`] - bounded-memory epoch iteration.

pub mod architecture;
pub mod batch;
pub mod checkpoint;
pub mod chunk_stream;
pub mod engine;
pub mod graph;
pub mod inference;
pub mod lifecycle;
pub mod metadata;
pub mod minibatches;
pub mod run_log;
pub mod tensorise;
pub mod training;

#[doc(inline)]
pub use architecture::{Architecture, base_default_hyperparameters};
#[doc(inline)]
pub use batch::{BatchData, MinibatchWriter};
#[doc(inline)]
pub use checkpoint::{Checkpoint, MetadataSummary};
#[doc(inline)]
pub use chunk_stream::ChunkStream;
#[doc(inline)]
pub use engine::{EngineFactory, ExecutionEngine};
#[doc(inline)]
pub use graph::{
    Initializer,
    ModelGraph,
    OpSpec,
    OptimizerConfig,
    ParameterSpec,
    PlaceholderSpec,
    TrainStepSpec,
};
#[doc(inline)]
pub use inference::{Annotation, AnnotationRepresentation, AnnotationStream, RepresentationStream};
#[doc(inline)]
pub use lifecycle::Model;
#[doc(inline)]
pub use minibatches::{RawBatch, RawBatches};
#[doc(inline)]
pub use run_log::{LogKind, RunLog};
#[doc(inline)]
pub use tensorise::TensoriseSummary;
#[doc(inline)]
pub use training::{EpochData, EpochLosses, EpochResult, StopReason, TrainingReport};
