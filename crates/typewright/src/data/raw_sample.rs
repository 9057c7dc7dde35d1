//! # Raw Samples
//!
//! One raw sample is one code unit extracted from a source file:
//!
//! ```json
//! {
//!   "filename": "pkg/module.py",
//!   "nodes": ["Module", "x", "Assign", "..."],
//!   "edges": {"CHILD": {"0": [2]}, "NEXT_TOKEN": {"1": [3]}},
//!   "supernodes": {
//!     "1": {"name": "x", "annotation": "int", "type": "variable", "location": [3, 4]}
//!   }
//! }
//! ```
//!
//! Node ids are local to the sample: ``0..nodes.len()``.

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    errors::{TWResult, TypewrightError},
    io::read_records,
};

/// Annotations that carry no usable type information.
pub const IGNORED_TYPE_ANNOTATIONS: &[&str] = &[
    "",
    "Any",
    "typing.Any",
    "NoReturn",
    "typing.NoReturn",
    "nothing",
    "None",
    "T",
    "_T",
    "_T0",
    "_T1",
    "_T2",
    "_T3",
    "_T4",
    "_T5",
    "_T6",
    "_T7",
];

/// Should this annotation be left out of training targets?
///
/// Absent annotations, `$`-prefixed placeholders and the entries of
/// [`IGNORED_TYPE_ANNOTATIONS`] are ignorable.
pub fn ignore_type_annotation(annotation: Option<&str>) -> bool {
    match annotation {
        None => true,
        Some(name) => {
            let name = name.trim();
            name.starts_with('$') || IGNORED_TYPE_ANNOTATIONS.contains(&name)
        }
    }
}

/// Drop generic parameters from an annotation: ``List[int]`` becomes ``List``.
pub fn strip_type_parameters(annotation: &str) -> &str {
    match annotation.find('[') {
        Some(idx) => annotation[..idx].trim_end(),
        None => annotation,
    }
}

/// A node eligible for type annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supernode {
    /// The variable name.
    pub name: String,

    /// The annotation written in the source, if any.
    #[serde(default)]
    pub annotation: Option<String>,

    /// The kind of entity (variable, parameter, return, ...).
    #[serde(rename = "type")]
    pub kind: String,

    /// ``(line, column)`` of the entity.
    #[serde(default)]
    pub location: (usize, usize),
}

/// One raw sample, as read from a raw data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// The source file locator.
    pub filename: String,

    /// The label of every node.
    #[serde(default)]
    pub nodes: Vec<String>,

    /// ``{ edge_type -> { source -> [target] } }``.
    #[serde(default)]
    pub edges: BTreeMap<String, BTreeMap<u32, Vec<u32>>>,

    /// ``{ node_id -> supernode }``, in node id order.
    #[serde(default)]
    pub supernodes: BTreeMap<u32, Supernode>,
}

impl RawSample {
    /// The number of nodes in the sample graph.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Check that every node reference is inside ``0..num_nodes``.
    pub fn validate(&self) -> TWResult<()> {
        let n = self.num_nodes() as u32;
        let bad = |reason: String| TypewrightError::MalformedSample {
            provenance: self.filename.clone(),
            reason,
        };

        for (edge_type, adjacency) in &self.edges {
            for (&src, targets) in adjacency {
                if src >= n {
                    return Err(bad(format!("{edge_type} edge source {src} >= {n} nodes")));
                }
                if let Some(&dst) = targets.iter().find(|&&dst| dst >= n) {
                    return Err(bad(format!("{edge_type} edge target {dst} >= {n} nodes")));
                }
            }
        }

        if let Some(&id) = self.supernodes.keys().find(|&&id| id >= n) {
            return Err(bad(format!("supernode {id} >= {n} nodes")));
        }
        Ok(())
    }
}

/// Read and validate every raw sample of one raw file.
///
/// This is where raw samples enter the lifecycle; architecture hooks only
/// ever see samples that passed [`RawSample::validate`].
pub fn read_raw_samples(path: &Path) -> TWResult<Vec<RawSample>> {
    let samples = read_records::<RawSample>(path)?;
    for sample in &samples {
        sample.validate()?;
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;
    use crate::io::write_records;

    const SAMPLE: &str = r#"{
        "filename": "pkg/mod.py",
        "nodes": ["Module", "x", "Assign", "y"],
        "edges": {"CHILD": {"0": [2], "2": [1, 3]}},
        "supernodes": {
            "3": {"name": "y", "annotation": null, "type": "variable", "location": [4, 0]},
            "1": {"name": "x", "annotation": "List[int]", "type": "variable", "location": [3, 4]}
        }
    }"#;

    #[test]
    fn test_parse_raw_sample() {
        let sample: RawSample = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(sample.filename, "pkg/mod.py");
        assert_eq!(sample.num_nodes(), 4);
        assert_eq!(sample.edges["CHILD"][&2], vec![1, 3]);

        let ids: Vec<u32> = sample.supernodes.keys().copied().collect();
        assert_eq!(ids, vec![1, 3]);

        let x = &sample.supernodes[&1];
        assert_eq!(x.annotation.as_deref(), Some("List[int]"));
        assert_eq!(x.kind, "variable");
        assert_eq!(x.location, (3, 4));

        sample.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_dangling_ids() {
        let mut sample: RawSample = serde_json::from_str(SAMPLE).unwrap();
        sample.edges.get_mut("CHILD").unwrap().insert(0, vec![9]);
        assert!(matches!(
            sample.validate(),
            Err(TypewrightError::MalformedSample { .. })
        ));

        let mut sample: RawSample = serde_json::from_str(SAMPLE).unwrap();
        let node = sample.supernodes[&1].clone();
        sample.supernodes.insert(4, node);
        assert!(sample.validate().is_err());
    }

    #[test]
    fn test_read_raw_samples_validates() -> TWResult<()> {
        let tmpdir = TempDir::new("typewright-raw-sample-test")?;
        let good: RawSample = serde_json::from_str(SAMPLE).unwrap();
        let mut bad = good.clone();
        bad.filename = "bad.py".to_string();
        bad.edges.get_mut("CHILD").unwrap().insert(0, vec![9]);

        let path = tmpdir.path().join("good.jsonl.gz");
        write_records(&path, std::slice::from_ref(&good))?;
        assert_eq!(read_raw_samples(&path)?, vec![good.clone()]);

        let path = tmpdir.path().join("bad.jsonl.gz");
        write_records(&path, &[good, bad])?;
        assert!(matches!(
            read_raw_samples(&path),
            Err(TypewrightError::MalformedSample { ref provenance, .. }) if provenance == "bad.py"
        ));
        Ok(())
    }

    #[test]
    fn test_ignore_type_annotation() {
        assert!(ignore_type_annotation(None));
        assert!(ignore_type_annotation(Some("")));
        assert!(ignore_type_annotation(Some("typing.Any")));
        assert!(ignore_type_annotation(Some("_T3")));
        assert!(ignore_type_annotation(Some("$unknown$")));

        assert!(!ignore_type_annotation(Some("int")));
        assert!(!ignore_type_annotation(Some("List[str]")));
        assert!(!ignore_type_annotation(Some("Tuple")));
    }

    #[test]
    fn test_strip_type_parameters() {
        assert_eq!(strip_type_parameters("List[int]"), "List");
        assert_eq!(strip_type_parameters("Dict[str, List[int]]"), "Dict");
        assert_eq!(strip_type_parameters("int"), "int");
    }
}
