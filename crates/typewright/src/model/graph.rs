//! # Model Graph Declarations
//!
//! A [`ModelGraph`] is the engine-independent declaration of a model: its
//! learnable parameters, its input placeholders, its named outputs and, for
//! training, the optimizer step. Architectures fill it in through their
//! ``make_parameters`` / ``make_placeholders`` / ``make_model`` hooks; an
//! [`EngineFactory`](super::EngineFactory) turns it into something runnable.

use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};
use rand::{Rng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{TWResult, TypewrightError},
    hyperparameters::{HyperValue, Hyperparameters},
    tensor::{DType, FlatData, Minibatch, Value, Weights, shape_slot_value},
};

/// Placeholder holding the number of samples in a minibatch.
pub const BATCH_SIZE: &str = "batch_size";

/// Placeholder holding the dropout keep rate.
pub const DROPOUT_KEEP_RATE: &str = "dropout_keep_rate";

/// The output every model must declare.
pub const LOSS: &str = "loss";

/// The pseudo-output that applies one optimizer update when fetched.
pub const TRAIN_STEP: &str = "train_step";

/// The output holding one representation row per target node.
pub const TARGET_REPRESENTATIONS: &str = "target_representations";

/// How a parameter is initialised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Initializer {
    /// All zeros.
    Zeros,
    /// Uniform in ``[-scale, scale]``.
    Uniform {
        /// Half-width of the interval.
        scale: f32,
    },
    /// Glorot/Xavier uniform, from the first and last dimensions.
    GlorotUniform,
}

/// A learnable parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Unique parameter name.
    pub name: String,

    /// Fixed shape.
    pub shape: Vec<usize>,

    /// Initialisation scheme.
    pub init: Initializer,
}

impl ParameterSpec {
    /// Declare a parameter.
    pub fn new<S: Into<String>>(
        name: S,
        shape: &[usize],
        init: Initializer,
    ) -> Self {
        Self {
            name: name.into(),
            shape: shape.to_vec(),
            init,
        }
    }
}

/// A named minibatch input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderSpec {
    /// Unique placeholder name.
    pub name: String,

    /// Element type.
    pub dtype: DType,

    /// Shape; `None` marks the dynamic leading dimension.
    pub shape: Vec<Option<usize>>,
}

impl PlaceholderSpec {
    /// A 0-dimensional placeholder.
    pub fn scalar<S: Into<String>>(
        name: S,
        dtype: DType,
    ) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape: Vec::new(),
        }
    }

    /// A placeholder with a dynamic leading dimension and fixed trailing dimensions.
    pub fn batched<S: Into<String>>(
        name: S,
        dtype: DType,
        trailing: &[usize],
    ) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape: std::iter::once(None)
                .chain(trailing.iter().copied().map(Some))
                .collect(),
        }
    }

    /// Shape `data` into a value for this placeholder.
    pub fn value_for(
        &self,
        data: FlatData,
    ) -> TWResult<Value> {
        shape_slot_value(&self.name, self.dtype, &self.shape, data)
    }

    /// Does `value` fit this placeholder?
    pub fn accepts(
        &self,
        value: &Value,
    ) -> bool {
        value.dtype() == self.dtype
            && value.shape().len() == self.shape.len()
            && value
                .shape()
                .iter()
                .zip(&self.shape)
                .all(|(&actual, declared)| declared.is_none_or(|d| d == actual))
    }
}

/// A named model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpSpec {
    /// Unique output name.
    pub name: String,

    /// Element type.
    pub dtype: DType,

    /// Shape; `None` marks the dynamic leading dimension.
    pub shape: Vec<Option<usize>>,

    /// The placeholder whose leading dimension the output's leading dimension follows.
    pub rows_from: Option<String>,

    /// Settings the engine needs to compute the output, such as a loss margin.
    #[serde(default)]
    pub attrs: BTreeMap<String, HyperValue>,
}

impl OpSpec {
    /// A scalar float output, such as a loss.
    pub fn scalar<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            dtype: DType::F32,
            shape: Vec::new(),
            rows_from: None,
            attrs: BTreeMap::new(),
        }
    }

    /// A float output with one row per entry of placeholder `rows_from`.
    pub fn per_row<S: Into<String>, R: Into<String>>(
        name: S,
        rows_from: R,
        trailing: &[usize],
    ) -> Self {
        Self {
            name: name.into(),
            dtype: DType::F32,
            shape: std::iter::once(None)
                .chain(trailing.iter().copied().map(Some))
                .collect(),
            rows_from: Some(rows_from.into()),
            attrs: BTreeMap::new(),
        }
    }

    /// Attach a setting, builder style.
    pub fn with_attr<K: Into<String>, V: Into<HyperValue>>(
        mut self,
        name: K,
        value: V,
    ) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Look up a setting.
    pub fn attr(
        &self,
        name: &str,
    ) -> Option<&HyperValue> {
        self.attrs.get(name)
    }
}

/// Optimizer selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OptimizerConfig {
    /// Plain gradient descent.
    Sgd {
        /// Step size.
        learning_rate: f64,
    },
    /// RMSProp.
    RmsProp {
        /// Step size.
        learning_rate: f64,
        /// Moving-average decay.
        decay: f64,
        /// Momentum.
        momentum: f64,
    },
    /// Adam.
    Adam {
        /// Step size.
        learning_rate: f64,
    },
}

impl OptimizerConfig {
    /// Select the optimizer named by the ``optimizer`` hyperparameter.
    ///
    /// Names are case-insensitive: ``sgd``, ``rmsprop`` or ``adam``.
    pub fn from_hyperparameters(hyperparameters: &Hyperparameters) -> TWResult<Self> {
        let name = hyperparameters.get_str("optimizer")?;
        let learning_rate = hyperparameters.get_f64("learning_rate")?;
        match name.to_lowercase().as_str() {
            "sgd" => Ok(OptimizerConfig::Sgd { learning_rate }),
            "rmsprop" => Ok(OptimizerConfig::RmsProp {
                learning_rate,
                decay: hyperparameters.get_f64("learning_rate_decay")?,
                momentum: hyperparameters.get_f64("momentum")?,
            }),
            "adam" => Ok(OptimizerConfig::Adam { learning_rate }),
            _ => Err(TypewrightError::UnknownOptimizer(name.to_string())),
        }
    }
}

/// The training step: gradients of [`LOSS`], clipped by global norm, then applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainStepSpec {
    /// The optimizer.
    pub optimizer: OptimizerConfig,

    /// Global-norm gradient clip.
    pub gradient_clip: f64,
}

impl TrainStepSpec {
    /// Read the training step from hyperparameters.
    pub fn from_hyperparameters(hyperparameters: &Hyperparameters) -> TWResult<Self> {
        Ok(Self {
            optimizer: OptimizerConfig::from_hyperparameters(hyperparameters)?,
            gradient_clip: hyperparameters.get_f64("gradient_clip")?,
        })
    }
}

/// The declared structure of a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelGraph {
    is_train: bool,
    parameters: Vec<ParameterSpec>,
    placeholders: BTreeMap<String, PlaceholderSpec>,
    ops: BTreeMap<String, OpSpec>,
    train_step: Option<TrainStepSpec>,
}

impl ModelGraph {
    /// Start a graph with the lifecycle's own placeholders.
    pub fn new(is_train: bool) -> Self {
        let mut graph = Self {
            is_train,
            ..Default::default()
        };
        graph.add_placeholder(PlaceholderSpec::scalar(BATCH_SIZE, DType::I32));
        graph.add_placeholder(PlaceholderSpec::scalar(DROPOUT_KEEP_RATE, DType::F32));
        graph
    }

    /// Was this graph declared for training?
    pub fn is_train(&self) -> bool {
        self.is_train
    }

    /// Declare a parameter; a later declaration of the same name replaces it.
    pub fn add_parameter(
        &mut self,
        spec: ParameterSpec,
    ) {
        match self.parameters.iter_mut().find(|p| p.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.parameters.push(spec),
        }
    }

    /// Declare a placeholder.
    pub fn add_placeholder(
        &mut self,
        spec: PlaceholderSpec,
    ) {
        self.placeholders.insert(spec.name.clone(), spec);
    }

    /// Declare an output.
    pub fn add_op(
        &mut self,
        spec: OpSpec,
    ) {
        self.ops.insert(spec.name.clone(), spec);
    }

    /// Attach the training step.
    pub fn set_train_step(
        &mut self,
        spec: TrainStepSpec,
    ) {
        self.train_step = Some(spec);
    }

    /// Parameters, in declaration order.
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    /// Look up a placeholder.
    pub fn placeholder(
        &self,
        name: &str,
    ) -> Option<&PlaceholderSpec> {
        self.placeholders.get(name)
    }

    /// All placeholders, by name.
    pub fn placeholders(&self) -> impl Iterator<Item = &PlaceholderSpec> {
        self.placeholders.values()
    }

    /// Look up an output.
    pub fn op(
        &self,
        name: &str,
    ) -> Option<&OpSpec> {
        self.ops.get(name)
    }

    /// All outputs, by name.
    pub fn ops(&self) -> impl Iterator<Item = &OpSpec> {
        self.ops.values()
    }

    /// The training step, for training graphs.
    pub fn train_step(&self) -> Option<&TrainStepSpec> {
        self.train_step.as_ref()
    }

    /// Check that a fetch list only names declared outputs.
    pub fn check_fetches(
        &self,
        fetches: &[&str],
    ) -> TWResult<()> {
        for &name in fetches {
            let known = self.ops.contains_key(name) || (name == TRAIN_STEP && self.train_step.is_some());
            if !known {
                return Err(TypewrightError::MissingOutput(name.to_string()));
            }
        }
        Ok(())
    }

    /// Check that `minibatch` feeds every placeholder with a fitting value, and nothing else.
    pub fn check_minibatch(
        &self,
        minibatch: &Minibatch,
    ) -> TWResult<()> {
        if let Some(name) = minibatch.keys().find(|k| !self.placeholders.contains_key(*k)) {
            return Err(TypewrightError::UnknownPlaceholder(name.clone()));
        }
        for spec in self.placeholders.values() {
            let value = minibatch
                .get(&spec.name)
                .ok_or_else(|| TypewrightError::ShapeMismatch {
                    placeholder: spec.name.clone(),
                    reason: "not fed".to_string(),
                })?;
            if !spec.accepts(value) {
                return Err(TypewrightError::ShapeMismatch {
                    placeholder: spec.name.clone(),
                    reason: format!(
                        "{:?}{:?} does not fit {:?}{:?}",
                        value.dtype(),
                        value.shape(),
                        spec.dtype,
                        spec.shape
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Draw initial values for `parameters` from `rng`.
///
/// The same specs and the same rng state always yield the same weights.
pub fn initialise_parameters(
    parameters: &[ParameterSpec],
    rng: &mut StdRng,
) -> Weights {
    parameters
        .iter()
        .map(|spec| {
            let len: usize = spec.shape.iter().product();
            let data: Vec<f32> = match spec.init {
                Initializer::Zeros => vec![0.0; len],
                Initializer::Uniform { scale } => uniform(rng, len, scale),
                Initializer::GlorotUniform => {
                    let fan_in = spec.shape.first().copied().unwrap_or(1);
                    let fan_out = spec.shape.last().copied().unwrap_or(1);
                    let scale = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
                    uniform(rng, len, scale)
                }
            };
            let array = ArrayD::from_shape_vec(IxDyn(&spec.shape), data)
                .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&spec.shape)));
            (spec.name.clone(), array)
        })
        .collect()
}

fn uniform(
    rng: &mut StdRng,
    len: usize,
    scale: f32,
) -> Vec<f32> {
    if scale <= 0.0 {
        return vec![0.0; len];
    }
    (0..len).map(|_| rng.random_range(-scale..=scale)).collect()
}
