//! # Model Lifecycle
//!
//! [`Model`] owns everything a run accumulates: hyperparameters, the
//! architecture, finalised metadata, the declared graph and the execution
//! engine built from it.
//!
//! ```text
//!   new ─▶ load_metadata | load_existing_metadata ─▶ make_model ─▶ train ─▶ checkpoint
//!   restore(checkpoint) ─────────────────────────────▶ make_model ─▶ annotate | export
//! ```
//!
//! The data-side passes live in sibling modules as further `impl` blocks:
//! metadata in `metadata`, tensorisation in `tensorise`, epochs and the
//! training loop in `training`, annotation and export in `inference`.

use std::path::{Path, PathBuf};

use rand::{SeedableRng, rngs::StdRng};

use crate::{
    errors::{TWResult, TypewrightError},
    hyperparameters::Hyperparameters,
    options::{ModelOptions, PipelineOptions},
    model::{
        architecture::Architecture,
        checkpoint::Checkpoint,
        engine::{EngineFactory, ExecutionEngine},
        graph::{LOSS, ModelGraph, TrainStepSpec, initialise_parameters},
        run_log::{LogKind, RunLog},
    },
    tensor::Weights,
};

/// Suffix of saved model files.
pub const MODEL_FILE_SUFFIX: &str = "model_best.json.gz";

/// A model of architecture `A`, through its whole lifecycle.
pub struct Model<A: Architecture> {
    pub(crate) hyperparameters: Hyperparameters,
    pub(crate) architecture: A,
    pub(crate) options: ModelOptions,
    pub(crate) pipeline: PipelineOptions,
    pub(crate) run_name: String,
    pub(crate) metadata: Option<A::Metadata>,
    pub(crate) graph: Option<ModelGraph>,
    pub(crate) engine: Option<Box<dyn ExecutionEngine>>,
    pub(crate) rng: StdRng,
    pub(crate) train_log: RunLog,
    pub(crate) test_log: RunLog,
}

impl<A: Architecture> Model<A> {
    /// Create a model.
    ///
    /// `hyperparameters` are layered over [`Architecture::default_hyperparameters`].
    /// Configuration errors, such as an unknown optimizer, surface here.
    pub fn new(
        hyperparameters: &Hyperparameters,
        options: ModelOptions,
    ) -> TWResult<Self> {
        let mut merged = A::default_hyperparameters();
        merged.update(hyperparameters);

        TrainStepSpec::from_hyperparameters(&merged)?;
        let architecture = A::from_hyperparameters(&merged)?;
        let seed = merged.get_i64("seed")? as u64;

        let run_name = options
            .run_name
            .clone()
            .unwrap_or_else(|| A::MODEL_TYPE.to_string());
        let run_id = merged.get("run_id").map(|v| v.to_string());
        let log_dir = options.log_save_dir();
        let train_log = RunLog::new(&log_dir, &run_name, run_id.as_deref(), LogKind::Train);
        let test_log = RunLog::new(&log_dir, &run_name, run_id.as_deref(), LogKind::Test);

        Ok(Self {
            hyperparameters: merged,
            architecture,
            options,
            pipeline: PipelineOptions::default(),
            run_name,
            metadata: None,
            graph: None,
            engine: None,
            rng: StdRng::seed_from_u64(seed),
            train_log,
            test_log,
        })
    }

    /// Replace the pipeline options.
    pub fn with_pipeline_options(
        mut self,
        pipeline: PipelineOptions,
    ) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// The complete hyperparameters.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    /// The architecture.
    pub fn architecture(&self) -> &A {
        &self.architecture
    }

    /// The architecture, mutably.
    pub fn architecture_mut(&mut self) -> &mut A {
        &mut self.architecture
    }

    /// The pipeline options.
    pub fn pipeline_options(&self) -> &PipelineOptions {
        &self.pipeline
    }

    /// The run name.
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// The finalised metadata.
    pub fn metadata(&self) -> TWResult<&A::Metadata> {
        self.metadata.as_ref().ok_or(TypewrightError::MetadataNotLoaded)
    }

    /// Adopt externally computed metadata.
    pub fn set_metadata(
        &mut self,
        metadata: A::Metadata,
    ) {
        self.metadata = Some(metadata);
    }

    /// The declared graph.
    pub fn graph(&self) -> TWResult<&ModelGraph> {
        self.graph.as_ref().ok_or(TypewrightError::EngineNotBuilt)
    }

    /// Was the model built for training?
    pub fn is_train(&self) -> bool {
        self.graph.as_ref().is_some_and(ModelGraph::is_train)
    }

    /// Record a line in the training log.
    pub fn train_log(
        &self,
        msg: &str,
    ) -> TWResult<()> {
        self.train_log.log(msg)
    }

    /// Record a line in the test log.
    pub fn test_log(
        &self,
        msg: &str,
    ) -> TWResult<()> {
        self.test_log.log(msg)
    }

    /// Where [`Self::train`] saves the best model.
    ///
    /// ``<model_dir>/<run_name>_<run_id>_model_best.json.gz``, or
    /// ``<model_dir>/<run_name>_model_best.json.gz`` without a ``run_id``.
    pub fn model_save_path(&self) -> PathBuf {
        let file_name = match self.hyperparameters.get("run_id") {
            Some(run_id) => format!("{}_{}_{}", self.run_name, run_id, MODEL_FILE_SUFFIX),
            None => format!("{}_{}", self.run_name, MODEL_FILE_SUFFIX),
        };
        self.options.model_save_dir().join(file_name)
    }

    /// Declare the graph and build an engine for it.
    ///
    /// Parameters are left to the engine; call [`Self::initialise_parameters`]
    /// or load weights before running.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, factory)))]
    pub fn make_model(
        &mut self,
        is_train: bool,
        factory: &dyn EngineFactory,
    ) -> TWResult<()> {
        let metadata = self.metadata()?;

        let mut graph = ModelGraph::new(is_train);
        self.architecture.make_parameters(metadata, &mut graph)?;
        self.architecture
            .make_placeholders(metadata, &mut graph, is_train)?;
        self.architecture.make_model(metadata, &mut graph, is_train)?;
        if graph.op(LOSS).is_none() {
            return Err(TypewrightError::MissingOutput(LOSS.to_string()));
        }
        if is_train {
            graph.set_train_step(TrainStepSpec::from_hyperparameters(&self.hyperparameters)?);
        }

        log::debug!(
            "Built {} graph: {} parameters, {} placeholders",
            A::MODEL_TYPE,
            graph.parameters().len(),
            graph.placeholders().count()
        );

        let engine = factory.build(&graph, &self.hyperparameters, is_train)?;
        self.graph = Some(graph);
        self.engine = Some(engine);
        Ok(())
    }

    /// Draw fresh parameter values from the run's seeded rng and load them.
    pub fn initialise_parameters(&mut self) -> TWResult<()> {
        let graph = self.graph.as_ref().ok_or(TypewrightError::EngineNotBuilt)?;
        let weights = initialise_parameters(graph.parameters(), &mut self.rng);
        self.engine_mut()?.load_weights(weights)
    }

    pub(crate) fn engine_mut(&mut self) -> TWResult<&mut Box<dyn ExecutionEngine>> {
        self.engine.as_mut().ok_or(TypewrightError::EngineNotBuilt)
    }

    /// The current parameter values.
    pub fn weights(&self) -> TWResult<Weights> {
        self.engine
            .as_ref()
            .ok_or(TypewrightError::EngineNotBuilt)?
            .weights()
    }

    /// The full model state.
    pub fn checkpoint(&self) -> TWResult<Checkpoint<A::Metadata>> {
        Ok(Checkpoint {
            model_type: A::MODEL_TYPE.to_string(),
            hyperparameters: self.hyperparameters.clone(),
            metadata: self.metadata()?.clone(),
            weights: self.weights()?,
            run_name: self.run_name.clone(),
        })
    }

    /// Save the full model state to `path`.
    pub fn save(
        &self,
        path: &Path,
    ) -> TWResult<()> {
        self.checkpoint()?.save(path)
    }

    /// Rebuild a saved model.
    ///
    /// ## Arguments
    /// * `path` - the checkpoint.
    /// * `is_train` - build the graph for training (to resume) or inference.
    /// * `factory` - builds the engine.
    /// * `overrides` - hyperparameters to change; differences are logged.
    /// * `options` - save/log locations; the run name defaults to the saved one.
    pub fn restore(
        path: &Path,
        is_train: bool,
        factory: &dyn EngineFactory,
        overrides: &Hyperparameters,
        options: ModelOptions,
    ) -> TWResult<Self> {
        let checkpoint = Checkpoint::<A::Metadata>::load(path)?;
        if checkpoint.model_type != A::MODEL_TYPE {
            return Err(TypewrightError::ModelTypeMismatch {
                expected: A::MODEL_TYPE.to_string(),
                found: checkpoint.model_type,
            });
        }

        let mut hyperparameters = checkpoint.hyperparameters;
        let mut updated = hyperparameters.clone();
        updated.update(overrides);
        for mismatch in updated.diff(&hyperparameters) {
            log::info!(
                "Hyperparameter {} now has value '{}' but was '{}' when saved.",
                mismatch.name,
                display_opt(mismatch.new.as_ref()),
                display_opt(mismatch.old.as_ref()),
            );
        }
        hyperparameters = updated;

        let options = if options.run_name.is_some() {
            options
        } else {
            options.with_run_name(checkpoint.run_name)
        };

        let mut model = Self::new(&hyperparameters, options)?;
        model.metadata = Some(checkpoint.metadata);
        model.make_model(is_train, factory)?;
        model.engine_mut()?.load_weights(checkpoint.weights)?;
        Ok(model)
    }
}

pub(crate) fn display_opt<T: std::fmt::Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "None".to_string(), ToString::to_string)
}
