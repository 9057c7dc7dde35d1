//! # Epochs and the Training Loop
//!
//! ```text
//!   FRESH ──init params, save──┐
//!                              ├─▶ epoch: train pass, valid pass
//!   RESUMED ──valid pass───────┘        │
//!                                       ├─ valid loss < best: save, reset counter
//!                                       └─ otherwise:         counter += 1
//!   stop when counter == patience, or after max_epochs
//! ```

use std::{
    collections::BTreeMap,
    path::PathBuf,
    time::{Duration, Instant},
};

use rand::Rng;

use crate::{
    errors::{TWResult, TypewrightError},
    model::{
        architecture::Architecture,
        batch::finalise_batch,
        chunk_stream::ChunkStream,
        graph::{LOSS, TRAIN_STEP},
        lifecycle::Model,
        minibatches::RawBatches,
    },
    tensor::{Fetches, Value},
};

/// Progress is reported every this many minibatches.
pub const PROGRESS_INTERVAL: usize = 100;

/// The data of one pass.
#[derive(Debug, Clone, Copy)]
pub enum EpochData<'a, S> {
    /// Stream chunk files.
    Chunks(&'a [PathBuf]),
    /// A single in-memory sample, as a one-sample minibatch.
    Sample(&'a S),
}

/// The outcome of one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochResult {
    /// Sample-weighted mean loss.
    pub loss: f64,

    /// Samples processed.
    pub num_samples: usize,

    /// Wall time of the pass.
    pub elapsed: Duration,

    /// Additional outputs, concatenated over minibatches along the leading axis.
    pub fetches: Fetches,
}

/// Why training stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `patience` consecutive epochs without improvement.
    PatienceExhausted,
    /// `max_epochs` epochs were run.
    MaxEpochsReached,
}

/// Losses of one training epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochLosses {
    /// Epoch number, from 0.
    pub epoch: usize,
    /// Mean training loss.
    pub train_loss: f64,
    /// Mean validation loss.
    pub valid_loss: f64,
    /// Did this epoch improve on the best validation loss?
    pub improved: bool,
}

/// The outcome of [`Model::train`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// Where the best model was saved.
    pub model_path: PathBuf,

    /// The best validation loss; infinite if no epoch improved on a fresh start.
    pub best_validation_loss: f64,

    /// The epoch that produced the saved model, if any epoch did.
    pub best_epoch: Option<usize>,

    /// Epochs run.
    pub epochs_run: usize,

    /// Why training stopped.
    pub stop_reason: StopReason,

    /// Per-epoch losses.
    pub history: Vec<EpochLosses>,
}

impl<A: Architecture> Model<A> {
    /// Run one pass over `data`.
    ///
    /// ## Arguments
    /// * `data` - chunk files, or a single sample.
    /// * `epoch_name` - label for logs and errors.
    /// * `is_train` - shuffle, apply dropout and update parameters.
    /// * `quiet` - suppress progress and throughput lines.
    /// * `additional_fetches` - further outputs to collect.
    ///
    /// A minibatch loss that is not finite aborts the pass.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip(self, data, additional_fetches))
    )]
    pub fn run_epoch_in_batches(
        &mut self,
        data: EpochData<'_, A::Sample>,
        epoch_name: &str,
        is_train: bool,
        quiet: bool,
        additional_fetches: &[&str],
    ) -> TWResult<EpochResult> {
        if is_train && !self.is_train() {
            return Err(TypewrightError::NotInTrainingMode);
        }
        let metadata = self.metadata.as_ref().ok_or(TypewrightError::MetadataNotLoaded)?;
        let graph = self.graph.as_ref().ok_or(TypewrightError::EngineNotBuilt)?;
        let engine = self.engine.as_mut().ok_or(TypewrightError::EngineNotBuilt)?;
        let dropout_keep_rate = self.hyperparameters.get_f64("dropout_keep_rate")? as f32;

        let mut fetch_names = vec![LOSS];
        fetch_names.extend_from_slice(additional_fetches);
        if is_train {
            fetch_names.push(TRAIN_STEP);
        }
        graph.check_fetches(&fetch_names)?;

        let samples: Box<dyn Iterator<Item = TWResult<A::Sample>>> = match data {
            EpochData::Chunks(paths) => {
                let seed = if is_train { self.rng.random() } else { 0 };
                Box::new(ChunkStream::new(paths, is_train, seed, &self.pipeline)?)
            }
            EpochData::Sample(sample) => Box::new(std::iter::once(Ok(sample.clone()))),
        };

        let start = Instant::now();
        let mut epoch_loss = 0.0;
        let mut samples_used_so_far = 0;
        let mut collected: BTreeMap<&str, Vec<Value>> = BTreeMap::new();

        for (minibatch_counter, raw_batch) in RawBatches::new(&self.architecture, samples).enumerate() {
            let raw_batch = raw_batch?;
            if !quiet && minibatch_counter % PROGRESS_INTERVAL == 0 {
                log::debug!(
                    "{epoch_name}: Batch {minibatch_counter:5} (has {} samples). Processed {} samples. Loss so far: {:.4}.",
                    raw_batch.samples_in_batch,
                    samples_used_so_far,
                    epoch_loss / samples_used_so_far.max(1) as f64,
                );
            }

            let samples_in_batch = raw_batch.samples_in_batch;
            samples_used_so_far = raw_batch.samples_used_so_far;
            let minibatch = finalise_batch(
                &self.architecture,
                metadata,
                graph,
                raw_batch.data,
                is_train,
                dropout_keep_rate,
            )?;

            let mut results = engine.run(&fetch_names, &minibatch)?;
            let loss = results
                .remove(LOSS)
                .and_then(|v| v.to_scalar())
                .ok_or_else(|| TypewrightError::MissingOutput(LOSS.to_string()))?;
            if !loss.is_finite() {
                return Err(TypewrightError::NonFiniteLoss {
                    epoch: epoch_name.to_string(),
                    minibatch: minibatch_counter,
                    loss,
                });
            }
            epoch_loss += loss * samples_in_batch as f64;

            for &name in additional_fetches {
                let value = results
                    .remove(name)
                    .ok_or_else(|| TypewrightError::MissingOutput(name.to_string()))?;
                collected.entry(name).or_default().push(value);
            }
        }

        let elapsed = start.elapsed();
        if !quiet {
            let per_second = samples_used_so_far as f64 / elapsed.as_secs_f64().max(1e-9);
            self.train_log(&format!(
                "  Epoch {epoch_name} took {:.2}s [processed {} samples/second]",
                elapsed.as_secs_f64(),
                per_second as u64,
            ))?;
        }

        let fetches = collected
            .into_iter()
            .map(|(name, values)| Ok((name.to_string(), Value::concat(name, &values)?)))
            .collect::<TWResult<Fetches>>()?;

        Ok(EpochResult {
            loss: if samples_used_so_far == 0 {
                epoch_loss
            } else {
                epoch_loss / samples_used_so_far as f64
            },
            num_samples: samples_used_so_far,
            elapsed,
            fetches,
        })
    }

    /// Train with early stopping; the best model is saved at [`Self::model_save_path`].
    ///
    /// ## Arguments
    /// * `train_data` - training chunk files.
    /// * `valid_data` - validation chunk files.
    /// * `quiet` - suppress progress and throughput lines.
    /// * `resume` - keep the loaded weights and measure their validation
    ///   loss first, instead of initialising and saving fresh parameters.
    pub fn train(
        &mut self,
        train_data: &[PathBuf],
        valid_data: &[PathBuf],
        quiet: bool,
        resume: bool,
    ) -> TWResult<TrainingReport> {
        if !self.is_train() {
            return Err(TypewrightError::NotInTrainingMode);
        }
        let max_epochs = self.hyperparameters.get_usize("max_epochs")?;
        let patience = self.hyperparameters.get_usize("patience")?;
        let model_path = self.model_save_path();

        let mut best_val_loss = if resume {
            let resumed = self.run_epoch_in_batches(
                EpochData::Chunks(valid_data),
                "RESUME (valid)",
                false,
                quiet,
                &[],
            )?;
            self.train_log(&format!("Validation Loss on Resume: {:.6}", resumed.loss))?;
            resumed.loss
        } else {
            self.initialise_parameters()?;
            self.save(&model_path)?;
            f64::INFINITY
        };

        let mut history = Vec::new();
        let mut best_epoch = None;
        let mut no_improvement_counter = 0;
        let mut epoch = 0;
        while epoch < max_epochs && no_improvement_counter < patience {
            self.train_log(&format!("==== Epoch {epoch} ===="))?;
            let train = self.run_epoch_in_batches(
                EpochData::Chunks(train_data),
                &format!("{epoch} (train)"),
                true,
                quiet,
                &[],
            )?;
            self.train_log(&format!(" Training Loss: {:.6}", train.loss))?;
            let valid = self.run_epoch_in_batches(
                EpochData::Chunks(valid_data),
                &format!("{epoch} (valid)"),
                false,
                quiet,
                &[],
            )?;
            self.train_log(&format!(" Validation Loss: {:.6}", valid.loss))?;

            let improved = valid.loss < best_val_loss;
            if improved {
                best_val_loss = valid.loss;
                best_epoch = Some(epoch);
                no_improvement_counter = 0;
                self.save(&model_path)?;
                self.train_log(&format!(
                    "  Best result so far -- saving model as '{}'.",
                    model_path.display()
                ))?;
            } else {
                no_improvement_counter += 1;
            }

            history.push(EpochLosses {
                epoch,
                train_loss: train.loss,
                valid_loss: valid.loss,
                improved,
            });
            epoch += 1;
        }

        let stop_reason = if no_improvement_counter >= patience {
            StopReason::PatienceExhausted
        } else {
            StopReason::MaxEpochsReached
        };
        log::info!("Training stopped after {epoch} epochs: {stop_reason:?}");

        Ok(TrainingReport {
            model_path,
            best_validation_loss: best_val_loss,
            best_epoch,
            epochs_run: epoch,
            stop_reason,
            history,
        })
    }
}
