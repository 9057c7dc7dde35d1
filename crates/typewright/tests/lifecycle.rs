#![allow(missing_docs)]

mod common;

use common::{Dirs, inline_pipeline, model_options, small_hyperparameters};
use tempdir::TempDir;
use typewright::{
    TWResult,
    TypewrightError,
    architectures::{Graph2Class, Graph2HybridMetric, TypedGraphMetadata},
    concurrency::SequentialJobRunner,
    hyperparameters::Hyperparameters,
    io::METADATA_FILE_NAME,
    model::{MetadataSummary, Model, StopReason},
    testing::{ScriptedEngineFactory, TRAIN_STEPS_WEIGHT, write_raw_dataset},
};

/// Validation loss improves for the first `best + 1` epochs, then jumps.
///
/// With one training minibatch per epoch, the validation pass of epoch `e`
/// sees `e + 1` training steps.
fn improving_until(best: u64) -> ScriptedEngineFactory {
    ScriptedEngineFactory::new(move |steps| {
        if steps <= best + 1 {
            10.0 - steps as f64
        } else {
            100.0
        }
    })
}

fn prepared_model(
    root: &TempDir,
    hyperparameters: &Hyperparameters,
) -> TWResult<(Model<Graph2Class>, Vec<std::path::PathBuf>, Vec<std::path::PathBuf>)> {
    let dirs = Dirs::new(root.path());
    write_raw_dataset(&dirs.raw_train, 3, 4)?;
    write_raw_dataset(&dirs.raw_valid, 2, 3)?;

    let runner = SequentialJobRunner;
    let mut model: Model<Graph2Class> = Model::new(hyperparameters, model_options(root.path()))?
        .with_pipeline_options(inline_pipeline());
    model.load_metadata(&dirs.raw_train, None, &runner)?;
    let train = model.tensorise_data_in_dir(&dirs.raw_train, &dirs.train, false, None, &runner)?;
    let valid = model.tensorise_data_in_dir(&dirs.raw_valid, &dirs.valid, false, None, &runner)?;
    Ok((model, train.chunk_paths, valid.chunk_paths))
}

#[test]
fn test_early_stopping_keeps_best_checkpoint() -> TWResult<()> {
    let root = TempDir::new("typewright-lifecycle-test")?;
    let (mut model, train, valid) = prepared_model(&root, &small_hyperparameters())?;

    let factory = improving_until(2);
    model.make_model(true, &factory)?;
    let report = model.train(&train, &valid, true, false)?;

    assert_eq!(report.stop_reason, StopReason::PatienceExhausted);
    assert_eq!(report.best_epoch, Some(2));
    assert_eq!(report.epochs_run, 2 + 1 + 3);
    assert_eq!(report.best_validation_loss, 7.0);
    assert_eq!(
        report.history.iter().map(|e| e.improved).collect::<Vec<_>>(),
        vec![true, true, true, false, false, false]
    );
    assert_eq!(
        report.model_path,
        root.path().join("models").join("graph2class_model_best.json.gz")
    );
    assert_eq!(
        factory.runs().iter().filter(|r| r.is_train_step()).count(),
        report.epochs_run
    );

    // The checkpoint holds the weights after the third training step.
    let restored: Model<Graph2Class> = Model::restore(
        &report.model_path,
        false,
        &factory,
        &Hyperparameters::new(),
        model_options(root.path()),
    )?;
    assert_eq!(restored.weights()?[TRAIN_STEPS_WEIGHT].iter().next(), Some(&3.0));
    assert_eq!(restored.run_name(), "graph2class");
    assert_eq!(restored.metadata()?, model.metadata()?);
    Ok(())
}

#[test]
fn test_max_epochs_bounds_training() -> TWResult<()> {
    let root = TempDir::new("typewright-lifecycle-test")?;
    let hyperparameters = small_hyperparameters().with("max_epochs", 4);
    let (mut model, train, valid) = prepared_model(&root, &hyperparameters)?;

    let factory = ScriptedEngineFactory::new(|steps| 1.0 / (1.0 + steps as f64));
    model.make_model(true, &factory)?;
    let report = model.train(&train, &valid, true, false)?;

    assert_eq!(report.stop_reason, StopReason::MaxEpochsReached);
    assert_eq!(report.epochs_run, 4);
    assert_eq!(report.best_epoch, Some(3));
    Ok(())
}

#[test]
fn test_resume_measures_loaded_weights_first() -> TWResult<()> {
    let root = TempDir::new("typewright-lifecycle-test")?;
    let (mut model, train, valid) = prepared_model(&root, &small_hyperparameters())?;

    let factory = improving_until(2);
    model.make_model(true, &factory)?;
    let report = model.train(&train, &valid, true, false)?;

    let mut resumed: Model<Graph2Class> = Model::restore(
        &report.model_path,
        true,
        &factory,
        &Hyperparameters::new(),
        model_options(root.path()),
    )?
    .with_pipeline_options(inline_pipeline());
    let report = resumed.train(&train, &valid, true, true)?;

    assert_eq!(report.best_validation_loss, 7.0);
    assert_eq!(report.best_epoch, None);
    assert_eq!(report.epochs_run, 3);
    Ok(())
}

#[test]
fn test_non_finite_loss_aborts_training() -> TWResult<()> {
    let root = TempDir::new("typewright-lifecycle-test")?;
    let (mut model, train, valid) = prepared_model(&root, &small_hyperparameters())?;

    model.make_model(true, &ScriptedEngineFactory::new(|_| f64::NAN))?;
    let err = model.train(&train, &valid, true, false).unwrap_err();
    assert!(matches!(err, TypewrightError::NonFiniteLoss { minibatch: 0, .. }));
    Ok(())
}

#[test]
fn test_training_requires_training_graph() -> TWResult<()> {
    let root = TempDir::new("typewright-lifecycle-test")?;
    let (mut model, train, valid) = prepared_model(&root, &small_hyperparameters())?;

    model.make_model(false, &ScriptedEngineFactory::default())?;
    assert!(matches!(
        model.train(&train, &valid, true, false),
        Err(TypewrightError::NotInTrainingMode)
    ));
    Ok(())
}

#[test]
fn test_restore_rejects_other_architecture() -> TWResult<()> {
    let root = TempDir::new("typewright-lifecycle-test")?;
    let (mut model, _, _) = prepared_model(&root, &small_hyperparameters())?;

    let factory = ScriptedEngineFactory::default();
    model.make_model(false, &factory)?;
    model.initialise_parameters()?;
    let path = root.path().join("saved.json.gz");
    model.save(&path)?;

    let err = Model::<Graph2HybridMetric>::restore(
        &path,
        false,
        &factory,
        &Hyperparameters::new(),
        model_options(root.path()),
    )
    .err()
    .unwrap();
    assert!(matches!(
        err,
        TypewrightError::ModelTypeMismatch { ref expected, ref found }
            if expected == "graph2hybridmetric" && found == "graph2class"
    ));
    Ok(())
}

#[test]
fn test_restore_applies_overrides() -> TWResult<()> {
    let root = TempDir::new("typewright-lifecycle-test")?;
    let (mut model, _, _) = prepared_model(&root, &small_hyperparameters())?;

    let factory = ScriptedEngineFactory::default();
    model.make_model(false, &factory)?;
    model.initialise_parameters()?;
    let path = root.path().join("saved.json.gz");
    model.save(&path)?;

    let restored: Model<Graph2Class> = Model::restore(
        &path,
        false,
        &factory,
        &Hyperparameters::new().with("learning_rate", 0.5),
        model_options(root.path()).with_run_name("second"),
    )?;
    assert_eq!(restored.hyperparameters().get_f64("learning_rate")?, 0.5);
    assert_eq!(restored.run_name(), "second");
    assert!(restored.weights()?.keys().eq(model.weights()?.keys()));
    Ok(())
}

#[test]
fn test_tensorised_metadata_is_reusable() -> TWResult<()> {
    let root = TempDir::new("typewright-lifecycle-test")?;
    let (model, _, _) = prepared_model(&root, &small_hyperparameters())?;
    let dirs = Dirs::new(root.path());

    let summary =
        MetadataSummary::<TypedGraphMetadata>::load(&dirs.train.join(METADATA_FILE_NAME))?;
    assert_eq!(summary.num_all_samples, 12);
    assert_eq!(summary.num_used_samples, 12);
    assert_eq!(&summary.metadata, model.metadata()?);
    assert_eq!(summary.hyperparameters.get_usize("cg_ggnn_hidden_size")?, 4);

    let mut fresh: Model<Graph2Class> = Model::new(
        &small_hyperparameters().with("learning_rate", 0.1),
        model_options(root.path()),
    )?;
    fresh.load_existing_metadata(&dirs.train.join(METADATA_FILE_NAME))?;
    assert_eq!(fresh.metadata()?, model.metadata()?);
    Ok(())
}
