//! # Execution Engine Contract
//!
//! The lifecycle never does tensor math itself. It declares a
//! [`ModelGraph`], asks an [`EngineFactory`] for an [`ExecutionEngine`], and
//! drives that engine one minibatch at a time.

use crate::{
    errors::TWResult,
    hyperparameters::Hyperparameters,
    model::graph::ModelGraph,
    tensor::{Fetches, Minibatch, Weights},
};

/// A runnable model.
pub trait ExecutionEngine: Send {
    /// Compute the named outputs for one minibatch.
    ///
    /// Fetching [`TRAIN_STEP`](super::graph::TRAIN_STEP) also applies one
    /// parameter update; the pseudo-output itself is not returned.
    fn run(
        &mut self,
        fetches: &[&str],
        minibatch: &Minibatch,
    ) -> TWResult<Fetches>;

    /// The current values of every learnable parameter.
    fn weights(&self) -> TWResult<Weights>;

    /// Replace learnable parameter values.
    fn load_weights(
        &mut self,
        weights: Weights,
    ) -> TWResult<()>;
}

/// Builds [`ExecutionEngine`]s from graph declarations.
pub trait EngineFactory {
    /// Build an engine for `graph`.
    fn build(
        &self,
        graph: &ModelGraph,
        hyperparameters: &Hyperparameters,
        is_train: bool,
    ) -> TWResult<Box<dyn ExecutionEngine>>;
}
