#![allow(missing_docs)]

mod common;

use std::collections::BTreeMap;

use common::{inline_pipeline, model_options, small_hyperparameters};
use tempdir::TempDir;
use typewright::{
    TWResult,
    architectures::{Graph2Class, code_graph::adjacency_placeholder, typed_graph::TARGET_NODE_IDS},
    concurrency::{RayonJobRunner, SequentialJobRunner},
    data::RawSample,
    model::{EpochData, Model, graph::TARGET_REPRESENTATIONS},
    testing::{ScriptedEngineFactory, synthetic_raw_sample, write_raw_dataset, write_raw_file},
};

fn tree_sample() -> RawSample {
    let mut sample = synthetic_raw_sample("tree.py", 3, &[(0, Some("str"))]);
    sample
        .edges
        .insert("CHILD".to_string(), BTreeMap::from([(0, vec![1, 2])]));
    sample
}

#[test]
fn test_rejection_depends_on_mode() -> TWResult<()> {
    let root = TempDir::new("typewright-pipeline-test")?;
    let raw = root.path().join("raw");
    write_raw_file(
        &raw.join("mixed.jsonl.gz"),
        &[
            synthetic_raw_sample("kept.py", 4, &[(1, Some("int"))]),
            synthetic_raw_sample("ignorable.py", 4, &[(1, Some("Any")), (2, None)]),
            synthetic_raw_sample("untargeted.py", 4, &[]),
            synthetic_raw_sample("huge.py", 20, &[(1, Some("int"))]),
        ],
    )?;

    let runner = SequentialJobRunner;
    let mut model: Model<Graph2Class> = Model::new(
        &small_hyperparameters().with("max_num_cg_nodes_in_batch", 10),
        model_options(root.path()),
    )?;
    model.load_metadata(&raw, None, &runner)?;

    let train = model.tensorise_data_in_dir(&raw, &root.path().join("train"), false, None, &runner)?;
    assert_eq!(train.num_all_samples, 4);
    assert_eq!(train.num_used_samples, 1);

    let test = model.tensorise_data_in_dir(&raw, &root.path().join("test"), true, None, &runner)?;
    assert_eq!(test.num_all_samples, 4);
    assert_eq!(test.num_used_samples, 2);
    Ok(())
}

#[test]
fn test_every_sample_is_seen_once_per_pass() -> TWResult<()> {
    let root = TempDir::new("typewright-pipeline-test")?;
    let raw = root.path().join("raw");
    write_raw_dataset(&raw, 5, 3)?;

    let runner = SequentialJobRunner;
    let mut model: Model<Graph2Class> = Model::new(
        &small_hyperparameters().with("max_num_cg_nodes_in_batch", 12),
        model_options(root.path()),
    )?
    .with_pipeline_options(
        inline_pipeline()
            .with_chunk_byte_budget(1)
            .with_train_open_chunks(2),
    );
    model.load_metadata(&raw, None, &runner)?;
    let summary = model.tensorise_data_in_dir(&raw, &root.path().join("chunks"), false, None, &runner)?;
    assert_eq!(summary.chunk_paths.len(), 5);
    assert_eq!(summary.num_used_samples, 15);

    let factory = ScriptedEngineFactory::default();
    model.make_model(true, &factory)?;
    model.initialise_parameters()?;

    let train = model.run_epoch_in_batches(
        EpochData::Chunks(&summary.chunk_paths),
        "train",
        true,
        true,
        &[],
    )?;
    assert_eq!(train.num_samples, 15);
    let runs = factory.runs();
    assert!(runs.len() > 1);
    assert!(runs.iter().all(|r| r.is_train_step()));
    assert!(runs.iter().all(|r| r.dropout_keep_rate() == Some(0.9f32 as f64)));
    assert_eq!(runs.iter().filter_map(|r| r.batch_size()).sum::<i64>(), 15);

    factory.clear_runs();
    let valid = model.run_epoch_in_batches(
        EpochData::Chunks(&summary.chunk_paths),
        "valid",
        false,
        true,
        &[TARGET_REPRESENTATIONS],
    )?;
    assert_eq!(valid.num_samples, 15);
    assert_eq!(valid.fetches[TARGET_REPRESENTATIONS].shape().to_vec(), vec![15, 4]);
    let runs = factory.runs();
    assert!(runs.iter().all(|r| !r.is_train_step()));
    assert!(runs.iter().all(|r| r.dropout_keep_rate() == Some(1.0)));
    Ok(())
}

#[test]
fn test_minibatch_offsets_and_empty_edge_types() -> TWResult<()> {
    let root = TempDir::new("typewright-pipeline-test")?;
    let raw = root.path().join("raw");
    let chains = root.path().join("chains");
    write_raw_file(&raw.join("tree.jsonl.gz"), &[tree_sample()])?;
    let chain_samples = [
        synthetic_raw_sample("a.py", 4, &[(1, Some("int")), (2, None)]),
        synthetic_raw_sample("b.py", 5, &[(1, Some("str")), (2, None)]),
    ];
    write_raw_file(&raw.join("chain.jsonl.gz"), &chain_samples)?;
    write_raw_file(&chains.join("chain.jsonl.gz"), &chain_samples)?;

    let runner = SequentialJobRunner;
    let mut model: Model<Graph2Class> = Model::new(&small_hyperparameters(), model_options(root.path()))?
        .with_pipeline_options(inline_pipeline());
    model.load_metadata(&raw, None, &runner)?;
    assert_eq!(model.metadata()?.graph.edge_types, vec!["CHILD", "NEXT_TOKEN"]);

    let summary = model.tensorise_data_in_dir(&chains, &root.path().join("chunks"), true, None, &runner)?;
    let factory = ScriptedEngineFactory::default();
    model.make_model(false, &factory)?;
    model.run_epoch_in_batches(
        EpochData::Chunks(&summary.chunk_paths),
        "test",
        false,
        true,
        &[],
    )?;

    let runs = factory.runs();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.batch_size(), Some(2));
    assert_eq!(run.i32_input(TARGET_NODE_IDS), Some(vec![1, 2, 5, 6]));
    assert_eq!(
        run.minibatch[&adjacency_placeholder(0)].shape().to_vec(),
        vec![0, 2]
    );
    assert_eq!(
        run.i32_input(&adjacency_placeholder(1)),
        Some(vec![0, 1, 1, 2, 2, 3, 4, 5, 5, 6, 6, 7, 7, 8])
    );
    Ok(())
}

#[test]
fn test_metadata_does_not_depend_on_runner() -> TWResult<()> {
    let root = TempDir::new("typewright-pipeline-test")?;
    let raw = root.path().join("raw");
    write_raw_dataset(&raw, 6, 4)?;
    write_raw_file(&raw.join("raw_tree.jsonl.gz"), &[tree_sample()])?;

    let mut sequential: Model<Graph2Class> =
        Model::new(&small_hyperparameters(), model_options(root.path()))?;
    sequential.load_metadata(&raw, None, &SequentialJobRunner)?;

    let mut parallel: Model<Graph2Class> =
        Model::new(&small_hyperparameters(), model_options(root.path()))?;
    parallel.load_metadata(&raw, None, &RayonJobRunner::default())?;

    assert_eq!(sequential.metadata()?, parallel.metadata()?);

    let mut truncated: Model<Graph2Class> =
        Model::new(&small_hyperparameters(), model_options(root.path()))?;
    truncated.load_metadata(&raw, Some(1), &SequentialJobRunner)?;
    assert_eq!(truncated.metadata()?.graph.edge_types, vec!["NEXT_TOKEN"]);
    Ok(())
}
