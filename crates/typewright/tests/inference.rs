#![allow(missing_docs)]

mod common;

use std::path::PathBuf;

use common::{model_options, small_hyperparameters};
use tempdir::TempDir;
use typewright::{
    TWResult,
    architectures::{Graph2Class, Graph2HybridMetric, Path2Annotation, TypeSpaceIndex},
    concurrency::SequentialJobRunner,
    model::{Architecture, Model},
    testing::{ScriptedEngineFactory, synthetic_raw_sample, write_raw_dataset, write_raw_file},
};

fn ready_model<A: Architecture>(
    root: &TempDir,
    factory: &ScriptedEngineFactory,
) -> TWResult<(Model<A>, Vec<PathBuf>)> {
    let raw = root.path().join("raw");
    let files = write_raw_dataset(&raw, 2, 2)?;

    let mut model: Model<A> = Model::new(&small_hyperparameters(), model_options(root.path()))?;
    model.load_metadata(&raw, None, &SequentialJobRunner)?;
    model.make_model(false, factory)?;
    model.initialise_parameters()?;
    Ok((model, files))
}

#[test]
fn test_annotate_every_supernode() -> TWResult<()> {
    let root = TempDir::new("typewright-inference-test")?;
    let factory = ScriptedEngineFactory::default();
    let (mut model, files) = ready_model::<Graph2Class>(&root, &factory)?;

    let mut stream = model.annotate(&files);
    let annotations = stream.by_ref().collect::<TWResult<Vec<_>>>()?;
    assert_eq!(stream.samples_annotated(), 4);

    assert_eq!(annotations.len(), 8);
    assert_eq!(
        annotations.iter().map(|a| a.node_id).collect::<Vec<_>>(),
        vec![1, 2, 1, 2, 1, 2, 1, 2]
    );
    let first = &annotations[0];
    assert_eq!(first.provenance, "file0/sample0.py");
    assert_eq!(first.name, "var1");
    assert_eq!(first.original_annotation.as_deref(), Some("int"));
    assert_eq!(first.annotation_type, "variable");
    assert_eq!(annotations[1].original_annotation, None);

    // %UNK%, int, str and List.
    assert!(
        annotations
            .iter()
            .all(|a| a.predicted_annotation_logprob_dist.len() == 4)
    );

    let runs = factory.runs();
    assert_eq!(runs.len(), 4);
    assert!(runs.iter().all(|r| r.batch_size() == Some(1)));
    assert!(runs.iter().all(|r| r.dropout_keep_rate() == Some(1.0)));
    Ok(())
}

#[test]
fn test_annotate_skips_rejected_samples() -> TWResult<()> {
    let root = TempDir::new("typewright-inference-test")?;
    let factory = ScriptedEngineFactory::default();
    let (mut model, _) = ready_model::<Graph2Class>(&root, &factory)?;

    let path = root.path().join("unseen.jsonl.gz");
    write_raw_file(
        &path,
        &[
            synthetic_raw_sample("empty.py", 4, &[]),
            synthetic_raw_sample("one.py", 4, &[(3, Some("float"))]),
        ],
    )?;

    let mut stream = model.annotate(&[path]);
    let annotations = stream.by_ref().collect::<TWResult<Vec<_>>>()?;
    assert_eq!(stream.samples_annotated(), 1);
    assert_eq!(annotations.len(), 1);
    assert_eq!(annotations[0].provenance, "one.py");
    assert_eq!(annotations[0].node_id, 3);
    Ok(())
}

#[test]
fn test_export_annotated_representations() -> TWResult<()> {
    let root = TempDir::new("typewright-inference-test")?;
    let factory = ScriptedEngineFactory::default();
    let (mut model, files) = ready_model::<Graph2Class>(&root, &factory)?;

    let representations = model
        .export_representations(&files)
        .collect::<TWResult<Vec<_>>>()?;
    assert_eq!(representations.len(), 4);
    assert_eq!(
        representations
            .iter()
            .map(|r| r.type_annotation.as_str())
            .collect::<Vec<_>>(),
        vec!["int", "str", "str", "List[int]"]
    );
    assert_eq!(representations[0].provenance, "file0/sample0.py:1");
    assert_eq!(representations[0].kind, "variable");
    // Supernodes 1 and 2 give rows keyed 1 and 2; row 1 is kept.
    assert_eq!(representations[0].representation, vec![1.0, 0.0, -1.0, -2.0]);

    let path = root.path().join("unicode.jsonl.gz");
    write_raw_file(
        &path,
        &[synthetic_raw_sample("d\u{e4}t\u{e4}.py", 4, &[(1, Some("int"))])],
    )?;
    let representations = model
        .export_representations(&[path])
        .collect::<TWResult<Vec<_>>>()?;
    assert_eq!(representations[0].provenance, "dt.py:1");
    Ok(())
}

#[test]
fn test_hybrid_annotates_through_index() -> TWResult<()> {
    let root = TempDir::new("typewright-inference-test")?;
    let factory = ScriptedEngineFactory::default();
    let (mut model, files) = ready_model::<Graph2HybridMetric>(&root, &factory)?;

    let index = model.create_index(&files)?;
    assert_eq!(index.len(), 4);
    assert_eq!(index.dim(), 4);
    assert_eq!(index.entries()[3].type_annotation, "List[int]");

    let index_path = root.path().join("index.json.gz");
    index.save(&index_path)?;
    model
        .architecture_mut()
        .attach_index(TypeSpaceIndex::load(&index_path)?);

    let annotations = model.annotate(&files).collect::<TWResult<Vec<_>>>()?;
    assert_eq!(annotations.len(), 8);
    for annotation in &annotations {
        let dist = &annotation.predicted_annotation_logprob_dist;
        assert_eq!(dist.keys().collect::<Vec<_>>(), vec!["List[int]", "int", "str"]);
        let total: f64 = dist.values().map(|p| p.exp()).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((dist["str"] - 0.5f64.ln()).abs() < 1e-9);
    }

    model.architecture_mut().detach_index();
    let annotations = model.annotate(&files).collect::<TWResult<Vec<_>>>()?;
    assert!(
        annotations
            .iter()
            .all(|a| a.predicted_annotation_logprob_dist.contains_key("%UNK%"))
    );
    Ok(())
}

#[test]
fn test_path_model_annotates_every_supernode() -> TWResult<()> {
    let root = TempDir::new("typewright-inference-test")?;
    let factory = ScriptedEngineFactory::default();
    let (mut model, files) = ready_model::<Path2Annotation>(&root, &factory)?;

    let annotations = model.annotate(&files).collect::<TWResult<Vec<_>>>()?;
    assert_eq!(annotations.len(), 8);
    assert_eq!(annotations[0].provenance, "file0/sample0.py");
    assert_eq!(annotations[0].node_id, 1);
    assert!(
        annotations
            .iter()
            .all(|a| a.predicted_annotation_logprob_dist.len() == 4)
    );

    let runs = factory.runs();
    assert_eq!(runs.len(), 4);
    // Sample 0 of file 0 is a four node chain; supernodes 1 and 2 reach
    // the other three nodes each.
    assert_eq!(runs[0].i32_input("path_to_target_map"), Some(vec![0, 0, 0, 1, 1, 1]));
    assert_eq!(runs[0].i32_input("typed_annotation_node_ids"), Some(vec![1, 2]));
    Ok(())
}

#[test]
fn test_summaries_go_to_the_test_log() -> TWResult<()> {
    let root = TempDir::new("typewright-inference-test")?;
    let raw = root.path().join("raw");
    let files = write_raw_dataset(&raw, 2, 2)?;

    let factory = ScriptedEngineFactory::default();
    let mut model: Model<Graph2Class> = Model::new(
        &small_hyperparameters().with("run_id", "7"),
        model_options(root.path()),
    )?;
    model.load_metadata(&raw, None, &SequentialJobRunner)?;
    model.make_model(false, &factory)?;
    model.initialise_parameters()?;

    assert_eq!(model.annotate(&files).count(), 8);
    assert_eq!(model.export_representations(&files).count(), 4);

    let text = std::fs::read_to_string(root.path().join("logs").join("graph2class_7.test_log"))?;
    assert_eq!(
        text,
        "Annotated 4 of 4 samples\nExported 4 representations from 4 samples\n"
    );
    Ok(())
}
