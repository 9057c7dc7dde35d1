//! # Annotation and Representation Export
//!
//! Both passes read raw files directly, encode each sample as evaluation
//! data, and run it through the engine as a one-sample minibatch. Rejected
//! samples are skipped. Both are lazy, single-pass and not restartable.

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    data::{RawSample, Supernode, ignore_type_annotation, read_raw_samples},
    errors::{TWResult, TypewrightError},
    model::{architecture::Architecture, lifecycle::Model, training::EpochData},
};

/// A predicted annotation for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// The source file locator.
    pub provenance: String,

    /// The node within its sample.
    pub node_id: u32,

    /// The variable name.
    pub name: String,

    /// ``(line, column)``.
    pub location: (usize, usize),

    /// The annotation written in the source, if any.
    pub original_annotation: Option<String>,

    /// The kind of entity.
    pub annotation_type: String,

    /// Log-probabilities of the candidate annotations.
    pub predicted_annotation_logprob_dist: BTreeMap<String, f64>,
}

impl Annotation {
    /// An annotation of `supernode` with the candidate distribution `dist`.
    pub fn for_supernode(
        provenance: &str,
        node_id: u32,
        supernode: &Supernode,
        dist: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            provenance: provenance.to_string(),
            node_id,
            name: supernode.name.clone(),
            location: supernode.location,
            original_annotation: supernode.annotation.clone(),
            annotation_type: supernode.kind.clone(),
            predicted_annotation_logprob_dist: dist,
        }
    }

    /// The most probable candidate.
    pub fn top_prediction(&self) -> Option<(&str, f64)> {
        self.predicted_annotation_logprob_dist
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(name, &p)| (name.as_str(), p))
    }
}

/// A fixed-size representation of one annotated node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRepresentation {
    /// The variable name.
    pub name: String,

    /// The annotation written in the source.
    pub type_annotation: String,

    /// The kind of entity.
    pub kind: String,

    /// ``<filename>:<node_id>``, ASCII only.
    pub provenance: String,

    /// The representation vector.
    pub representation: Vec<f32>,
}

/// Raw samples of a list of files, read one file at a time.
struct RawSamples {
    paths: std::vec::IntoIter<PathBuf>,
    current: std::vec::IntoIter<RawSample>,
}

impl RawSamples {
    fn new(paths: &[PathBuf]) -> Self {
        Self {
            paths: paths.to_vec().into_iter(),
            current: Vec::new().into_iter(),
        }
    }
}

impl Iterator for RawSamples {
    type Item = TWResult<RawSample>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(raw_sample) = self.current.next() {
                return Some(Ok(raw_sample));
            }
            let path = self.paths.next()?;
            match read_raw_samples(&path) {
                Ok(records) => self.current = records.into_iter(),
                Err(err) => {
                    self.paths = Vec::new().into_iter();
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Lazy annotation of raw files; see [`Model::annotate`].
pub struct AnnotationStream<'m, A: Architecture> {
    model: &'m mut Model<A>,
    raw_samples: RawSamples,
    pending: std::vec::IntoIter<Annotation>,
    samples_read: usize,
    samples_annotated: usize,
    finished: bool,
}

impl<A: Architecture> AnnotationStream<'_, A> {
    /// Samples annotated so far.
    pub fn samples_annotated(&self) -> usize {
        self.samples_annotated
    }

    fn annotate_next(&mut self) -> Option<TWResult<Vec<Annotation>>> {
        let raw_sample = match self.raw_samples.next() {
            Some(Ok(raw_sample)) => raw_sample,
            Some(Err(err)) => return Some(Err(err)),
            None if self.finished => return None,
            None => {
                self.finished = true;
                let msg = format!(
                    "Annotated {} of {} samples",
                    self.samples_annotated, self.samples_read
                );
                return self.model.test_log(&msg).err().map(Err);
            }
        };
        self.samples_read += 1;
        Some(self.model.annotate_raw_sample(&raw_sample).map(|annotations| {
            if annotations.is_some() {
                self.samples_annotated += 1;
            }
            annotations.unwrap_or_default()
        }))
    }
}

impl<A: Architecture> Iterator for AnnotationStream<'_, A> {
    type Item = TWResult<Annotation>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(annotation) = self.pending.next() {
                return Some(Ok(annotation));
            }
            match self.annotate_next()? {
                Ok(annotations) => self.pending = annotations.into_iter(),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Lazy representation export of raw files; see [`Model::export_representations`].
pub struct RepresentationStream<'m, A: Architecture> {
    model: &'m mut Model<A>,
    raw_samples: RawSamples,
    pending: std::vec::IntoIter<AnnotationRepresentation>,
    samples_read: usize,
    representations_exported: usize,
    finished: bool,
}

impl<A: Architecture> Iterator for RepresentationStream<'_, A> {
    type Item = TWResult<AnnotationRepresentation>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(representation) = self.pending.next() {
                self.representations_exported += 1;
                return Some(Ok(representation));
            }
            let raw_sample = match self.raw_samples.next() {
                Some(Ok(raw_sample)) => raw_sample,
                Some(Err(err)) => return Some(Err(err)),
                None if self.finished => return None,
                None => {
                    self.finished = true;
                    let msg = format!(
                        "Exported {} representations from {} samples",
                        self.representations_exported, self.samples_read
                    );
                    return self.model.test_log(&msg).err().map(Err);
                }
            };
            self.samples_read += 1;
            match self.model.represent_raw_sample(&raw_sample) {
                Ok(representations) => self.pending = representations.into_iter(),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl<A: Architecture> Model<A> {
    /// Annotate every retained sample of the raw files `paths`.
    ///
    /// Once the files are exhausted, a summary line goes to the test log.
    pub fn annotate(
        &mut self,
        paths: &[PathBuf],
    ) -> AnnotationStream<'_, A> {
        AnnotationStream {
            model: self,
            raw_samples: RawSamples::new(paths),
            pending: Vec::new().into_iter(),
            samples_read: 0,
            samples_annotated: 0,
            finished: false,
        }
    }

    /// Export one representation per annotated node of every retained sample of `paths`.
    ///
    /// Nodes whose annotation is ignorable are skipped. Once the files are
    /// exhausted, a summary line goes to the test log.
    pub fn export_representations(
        &mut self,
        paths: &[PathBuf],
    ) -> RepresentationStream<'_, A> {
        RepresentationStream {
            model: self,
            raw_samples: RawSamples::new(paths),
            pending: Vec::new().into_iter(),
            samples_read: 0,
            representations_exported: 0,
            finished: false,
        }
    }

    /// Annotate one raw sample; `Ok(None)` if the sample is rejected.
    pub fn annotate_raw_sample(
        &mut self,
        raw_sample: &RawSample,
    ) -> TWResult<Option<Vec<Annotation>>> {
        let metadata = self.metadata()?;
        let Some(sample) = self
            .architecture
            .load_data_from_sample(metadata, raw_sample, false)?
        else {
            return Ok(None);
        };

        let outputs = self.architecture.annotation_outputs();
        let result = self.run_epoch_in_batches(
            EpochData::Sample(&sample),
            "(annotating)",
            false,
            true,
            &outputs,
        )?;

        let metadata = self.metadata()?;
        let provenance = raw_sample.filename.as_str();
        self.architecture
            .annotate_single(metadata, raw_sample, &sample, &result.fetches, provenance)
            .map(Some)
    }

    /// Representations of the annotated nodes of one raw sample.
    ///
    /// Rows of the representation output follow the sample's supernodes in
    /// node id order; ignorable rows are dropped.
    pub fn represent_raw_sample(
        &mut self,
        raw_sample: &RawSample,
    ) -> TWResult<Vec<AnnotationRepresentation>> {
        let metadata = self.metadata()?;
        let Some(sample) = self
            .architecture
            .load_data_from_sample(metadata, raw_sample, false)?
        else {
            return Ok(Vec::new());
        };

        let output = self.architecture.encode_one_test_sample();
        let result = self.run_epoch_in_batches(
            EpochData::Sample(&sample),
            "(exporting)",
            false,
            true,
            &[output],
        )?;
        let rows = result
            .fetches
            .get(output)
            .and_then(|v| v.as_f32())
            .ok_or_else(|| TypewrightError::MissingOutput(output.to_string()))?;
        if rows.ndim() != 2 || rows.shape()[0] != raw_sample.supernodes.len() {
            return Err(TypewrightError::ShapeMismatch {
                placeholder: output.to_string(),
                reason: format!(
                    "expected one row per supernode ({}), found shape {:?}",
                    raw_sample.supernodes.len(),
                    rows.shape()
                ),
            });
        }

        let mut representations = Vec::new();
        for (row, (node_id, supernode)) in raw_sample.supernodes.iter().enumerate() {
            let Some(annotation) = supernode.annotation.as_deref() else {
                continue;
            };
            if ignore_type_annotation(Some(annotation)) {
                continue;
            }
            let provenance: String = format!("{}:{node_id}", raw_sample.filename)
                .chars()
                .filter(char::is_ascii)
                .collect();
            representations.push(AnnotationRepresentation {
                name: supernode.name.clone(),
                type_annotation: annotation.to_string(),
                kind: supernode.kind.clone(),
                provenance,
                representation: rows.index_axis(ndarray::Axis(0), row).iter().copied().collect(),
            });
        }
        Ok(representations)
    }
}
