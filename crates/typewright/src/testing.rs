//! # Test Support
//!
//! A scripted [`ExecutionEngine`] and synthetic raw data, so the whole
//! lifecycle can be driven without a tensor framework.
//!
//! The [`ScriptedEngine`] checks every minibatch against the declared graph,
//! records it, and answers fetches deterministically:
//!
//! * [`LOSS`] comes from a loss schedule over the number of training steps
//!   applied so far. The step counter is kept among the weights, so saved and
//!   restored models remember it.
//! * A per-row output has one row per entry of its `rows_from` placeholder;
//!   entry ``[i, j]`` is ``key_i - j``, where ``key_i`` is the placeholder's
//!   ``i``-th integer value.
//! * Other outputs can be scripted with [`ScriptedEngineFactory::with_output`].

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use ndarray::{ArrayD, IxDyn};

use crate::{
    data::{RawSample, Supernode},
    errors::{TWResult, TypewrightError},
    hyperparameters::Hyperparameters,
    io::write_records,
    model::{
        EngineFactory,
        ExecutionEngine,
        ModelGraph,
        graph::{BATCH_SIZE, DROPOUT_KEEP_RATE, LOSS, TRAIN_STEP},
    },
    tensor::{Fetches, Minibatch, Value, Weights},
};

/// The weight holding the number of training steps applied.
pub const TRAIN_STEPS_WEIGHT: &str = "scripted/train_steps";

/// Loss as a function of the training steps applied so far.
pub type LossSchedule = Arc<dyn Fn(u64) -> f64 + Send + Sync>;

/// A scripted output.
pub type OutputFn = Arc<dyn Fn(&Minibatch) -> TWResult<Value> + Send + Sync>;

/// One call of [`ExecutionEngine::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    /// The fetched names.
    pub fetches: Vec<String>,

    /// The fed minibatch.
    pub minibatch: Minibatch,
}

impl RunRecord {
    /// The fed batch size.
    pub fn batch_size(&self) -> Option<i64> {
        self.minibatch
            .get(BATCH_SIZE)
            .and_then(Value::to_scalar)
            .map(|x| x as i64)
    }

    /// The fed dropout keep rate.
    pub fn dropout_keep_rate(&self) -> Option<f64> {
        self.minibatch.get(DROPOUT_KEEP_RATE).and_then(Value::to_scalar)
    }

    /// Was this a training step?
    pub fn is_train_step(&self) -> bool {
        self.fetches.iter().any(|f| f == TRAIN_STEP)
    }

    /// The integer values fed to `placeholder`, flattened.
    pub fn i32_input(
        &self,
        placeholder: &str,
    ) -> Option<Vec<i32>> {
        self.minibatch
            .get(placeholder)
            .and_then(Value::as_i32)
            .map(|a| a.iter().copied().collect())
    }
}

/// Builds [`ScriptedEngine`]s that share one loss schedule and one run record.
#[derive(Clone)]
pub struct ScriptedEngineFactory {
    loss: LossSchedule,
    outputs: BTreeMap<String, OutputFn>,
    runs: Arc<Mutex<Vec<RunRecord>>>,
}

impl Default for ScriptedEngineFactory {
    fn default() -> Self {
        Self::new(|_| 1.0)
    }
}

impl ScriptedEngineFactory {
    /// A factory whose engines report `loss(train_steps)`.
    pub fn new<F>(loss: F) -> Self
    where
        F: Fn(u64) -> f64 + Send + Sync + 'static,
    {
        Self {
            loss: Arc::new(loss),
            outputs: BTreeMap::new(),
            runs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Script the output `name`.
    pub fn with_output<S, F>(
        mut self,
        name: S,
        output: F,
    ) -> Self
    where
        S: Into<String>,
        F: Fn(&Minibatch) -> TWResult<Value> + Send + Sync + 'static,
    {
        self.outputs.insert(name.into(), Arc::new(output));
        self
    }

    /// Every run of every engine built so far, in call order.
    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Forget recorded runs.
    pub fn clear_runs(&self) {
        if let Ok(mut runs) = self.runs.lock() {
            runs.clear();
        }
    }
}

impl EngineFactory for ScriptedEngineFactory {
    fn build(
        &self,
        graph: &ModelGraph,
        _hyperparameters: &Hyperparameters,
        is_train: bool,
    ) -> TWResult<Box<dyn ExecutionEngine>> {
        if is_train != graph.is_train() {
            return Err(TypewrightError::External(format!(
                "graph declared with is_train = {}, engine requested with {is_train}",
                graph.is_train()
            )));
        }
        Ok(Box::new(ScriptedEngine {
            graph: graph.clone(),
            weights: Weights::new(),
            train_steps: 0,
            loss: self.loss.clone(),
            outputs: self.outputs.clone(),
            runs: self.runs.clone(),
        }))
    }
}

/// A deterministic stand-in for a tensor framework.
pub struct ScriptedEngine {
    graph: ModelGraph,
    weights: Weights,
    train_steps: u64,
    loss: LossSchedule,
    outputs: BTreeMap<String, OutputFn>,
    runs: Arc<Mutex<Vec<RunRecord>>>,
}

impl ScriptedEngine {
    fn per_row_output(
        &self,
        name: &str,
        minibatch: &Minibatch,
    ) -> TWResult<Value> {
        let spec = self
            .graph
            .op(name)
            .ok_or_else(|| TypewrightError::MissingOutput(name.to_string()))?;

        let Some(rows_from) = &spec.rows_from else {
            return Ok(Value::scalar_f32(0.0));
        };
        let keys: Vec<f32> = match minibatch.get(rows_from) {
            Some(Value::I32(a)) if a.ndim() == 1 => a.iter().map(|&k| k as f32).collect(),
            Some(v) => (0..v.shape().first().copied().unwrap_or(0))
                .map(|i| i as f32)
                .collect(),
            None => return Err(TypewrightError::UnknownPlaceholder(rows_from.clone())),
        };

        let trailing: Vec<usize> = spec.shape.iter().skip(1).map(|d| d.unwrap_or(1)).collect();
        let width: usize = trailing.iter().product();
        let data: Vec<f32> = keys
            .iter()
            .flat_map(|&key| (0..width).map(move |j| key - j as f32))
            .collect();

        let mut shape = vec![keys.len()];
        shape.extend(trailing);
        ArrayD::from_shape_vec(IxDyn(&shape), data)
            .map(Value::F32)
            .map_err(|e| TypewrightError::ShapeMismatch {
                placeholder: name.to_string(),
                reason: e.to_string(),
            })
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn run(
        &mut self,
        fetches: &[&str],
        minibatch: &Minibatch,
    ) -> TWResult<Fetches> {
        self.graph.check_fetches(fetches)?;
        self.graph.check_minibatch(minibatch)?;
        if let Ok(mut runs) = self.runs.lock() {
            runs.push(RunRecord {
                fetches: fetches.iter().map(|f| f.to_string()).collect(),
                minibatch: minibatch.clone(),
            });
        }

        let mut results = Fetches::new();
        let mut step = false;
        for &name in fetches {
            if name == TRAIN_STEP {
                step = true;
                continue;
            }
            let value = if name == LOSS {
                Value::scalar_f32((self.loss)(self.train_steps) as f32)
            } else if let Some(output) = self.outputs.get(name) {
                output(minibatch)?
            } else {
                self.per_row_output(name, minibatch)?
            };
            results.insert(name.to_string(), value);
        }
        if step {
            self.train_steps += 1;
        }
        Ok(results)
    }

    fn weights(&self) -> TWResult<Weights> {
        let mut weights = self.weights.clone();
        weights.insert(
            TRAIN_STEPS_WEIGHT.to_string(),
            ArrayD::from_elem(IxDyn(&[]), self.train_steps as f32),
        );
        Ok(weights)
    }

    fn load_weights(
        &mut self,
        mut weights: Weights,
    ) -> TWResult<()> {
        for spec in self.graph.parameters() {
            let found = weights.get(&spec.name).map(|w| w.shape().to_vec());
            if found.as_deref() != Some(spec.shape.as_slice()) {
                return Err(TypewrightError::ShapeMismatch {
                    placeholder: spec.name.clone(),
                    reason: format!("expected parameter shape {:?}, found {found:?}", spec.shape),
                });
            }
        }
        self.train_steps = weights
            .remove(TRAIN_STEPS_WEIGHT)
            .and_then(|w| w.iter().next().copied())
            .map_or(0, |steps| steps as u64);
        self.weights = weights;
        Ok(())
    }
}

/// A chain-shaped raw sample.
///
/// Node `i` is labelled ``tok{i % 3}`` and linked to node `i + 1` by a
/// `NEXT_TOKEN` edge; `supernodes` lists ``(node_id, annotation)`` pairs.
pub fn synthetic_raw_sample(
    filename: &str,
    num_nodes: usize,
    supernodes: &[(u32, Option<&str>)],
) -> RawSample {
    let mut next = BTreeMap::new();
    for i in 1..num_nodes as u32 {
        next.insert(i - 1, vec![i]);
    }
    RawSample {
        filename: filename.to_string(),
        nodes: (0..num_nodes).map(|i| format!("tok{}", i % 3)).collect(),
        edges: BTreeMap::from([("NEXT_TOKEN".to_string(), next)]),
        supernodes: supernodes
            .iter()
            .map(|&(node_id, annotation)| {
                (
                    node_id,
                    Supernode {
                        name: format!("var{node_id}"),
                        annotation: annotation.map(str::to_string),
                        kind: "variable".to_string(),
                        location: (node_id as usize + 1, 4),
                    },
                )
            })
            .collect(),
    }
}

/// Write `samples` as one raw data file.
pub fn write_raw_file(
    path: &Path,
    samples: &[RawSample],
) -> TWResult<()> {
    write_records(path, samples)
}

/// Write `num_files` raw files of `samples_per_file` annotated samples into `dir`.
///
/// Sample `s` of file `f` has ``4 + (f + s) % 3`` nodes and annotates node 1
/// with one of ``int``, ``str``, ``List[int]``.
pub fn write_raw_dataset(
    dir: &Path,
    num_files: usize,
    samples_per_file: usize,
) -> TWResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|source| TypewrightError::DataFile {
        path: dir.to_path_buf(),
        source,
    })?;

    const ANNOTATIONS: [&str; 3] = ["int", "str", "List[int]"];
    (0..num_files)
        .map(|f| {
            let samples: Vec<RawSample> = (0..samples_per_file)
                .map(|s| {
                    synthetic_raw_sample(
                        &format!("file{f}/sample{s}.py"),
                        4 + (f + s) % 3,
                        &[(1, Some(ANNOTATIONS[(f + s) % 3])), (2, None)],
                    )
                })
                .collect();
            let path = dir.join(format!("raw_{f:03}.jsonl.gz"));
            write_raw_file(&path, &samples)?;
            Ok(path)
        })
        .collect()
}
