//! # `typewright` Type Annotation Model Lifecycle
//!
//! The architecture-independent machinery for training and applying graph
//! neural network models that predict type annotations for source code.
//!
//! See:
//! * [`model::Model`] for the lifecycle: metadata, tensorisation, training
//!   with early stopping, checkpointing, annotation and representation export.
//! * [`model::Architecture`] for the hooks a concrete model implements.
//! * [`architectures`] for the graph-based models built on those hooks.
//! * [`model::ExecutionEngine`] / [`model::EngineFactory`] for the boundary to
//!   a tensor framework.
//!
//! ## Data Flow
//!
//! ```text
//!   raw *.gz files ──metadata──▶ Metadata
//!         │                         │
//!         └──────tensorise──────────┴─▶ chunk_0000.json.gz ... + metadata.json.gz
//!                                               │
//!                           ChunkStream ─▶ RawBatches ─▶ Minibatch ─▶ ExecutionEngine
//! ```
//!
//! ## Crate Features
//!
//! #### feature: ``default``
//!
//! * ``rayon``
//!
//! #### feature: ``rayon``
//!
//! This enables the ``rayon`` powered [`concurrency::RayonJobRunner`], used by
//! default for the per-file metadata and tensorisation passes.
//!
//! #### feature: ``tracing``
//!
//! This enables a number of ``tracing`` instrumentation points.
//! This is only useful for timing tracing of the library itself.
//!
//! ## Example
//!
//! ```rust,ignore
//! use typewright::architectures::Graph2Class;
//! use typewright::concurrency::DefaultJobRunner;
//! use typewright::hyperparameters::Hyperparameters;
//! use typewright::model::Model;
//! use typewright::options::ModelOptions;
//!
//! let mut model: Model<Graph2Class> =
//!     Model::new(&Hyperparameters::new(), ModelOptions::default())?;
//! let runner = DefaultJobRunner::default();
//! model.load_metadata(&train_dir, None, &runner)?;
//! let train = model.tensorise_data_in_dir(&train_dir, &out_dir.join("train"), false, None, &runner)?;
//! let valid = model.tensorise_data_in_dir(&valid_dir, &out_dir.join("valid"), false, None, &runner)?;
//!
//! model.make_model(true, &engine_factory)?;
//! let report = model.train(&train.chunk_paths, &valid.chunk_paths, false, false)?;
//! ```
#![warn(missing_docs, unused)]

pub mod architectures;
pub mod concurrency;
pub mod data;
pub mod errors;
pub mod hyperparameters;
pub mod io;
pub mod model;
pub mod options;
pub mod tensor;
pub mod testing;

#[doc(inline)]
pub use errors::{TWResult, TypewrightError};
