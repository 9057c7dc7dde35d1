//! # Tensorisation
//!
//! Encode a directory of raw files into chunk files of samples.
//!
//! Raw files are grouped, in path order, into partitions of roughly
//! [`PipelineOptions::chunk_byte_budget`](crate::options::PipelineOptions)
//! bytes; partition `i` becomes ``chunk_{i:04}.json.gz``. A
//! ``metadata.json.gz`` summary is written next to the chunks. Reruns with
//! the same inputs overwrite the same files.

use std::path::{Path, PathBuf};

use crate::{
    concurrency::JobRunner,
    data::read_raw_samples,
    errors::TWResult,
    io::{
        METADATA_FILE_NAME,
        chunk_file_name,
        get_data_files_from_directory,
        partition_files_by_size,
        write_records,
    },
    model::{architecture::Architecture, checkpoint::MetadataSummary, lifecycle::Model},
};

/// The outcome of tensorising a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensoriseSummary {
    /// The chunk files written, in index order.
    pub chunk_paths: Vec<PathBuf>,

    /// Samples read.
    pub num_all_samples: usize,

    /// Samples kept.
    pub num_used_samples: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct ChunkCounts {
    num_all_samples: usize,
    num_used_samples: usize,
}

/// Encode the samples of `files` and write them as one chunk file.
fn tensorise_partition<A: Architecture>(
    architecture: &A,
    metadata: &A::Metadata,
    files: &[PathBuf],
    target: &Path,
    for_test: bool,
) -> TWResult<ChunkCounts> {
    let mut counts = ChunkCounts::default();
    let mut samples = Vec::new();
    for file in files {
        for raw_sample in read_raw_samples(file)? {
            counts.num_all_samples += 1;
            if let Some(sample) = architecture.load_data_from_sample(metadata, &raw_sample, !for_test)? {
                counts.num_used_samples += 1;
                samples.push(sample);
            }
        }
    }
    write_records(target, &samples)?;
    Ok(counts)
}

impl<A: Architecture> Model<A> {
    /// Tensorise the raw files of `input_dir` into chunks in `output_dir`.
    ///
    /// ## Arguments
    /// * `input_dir` - the raw files.
    /// * `output_dir` - receives the chunks and ``metadata.json.gz``.
    /// * `for_test` - encode as evaluation data (no training-only filtering).
    /// * `max_num_files` - read only the first `n` raw files.
    /// * `runner` - runs one job per partition.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, runner)))]
    pub fn tensorise_data_in_dir<R: JobRunner>(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        for_test: bool,
        max_num_files: Option<usize>,
        runner: &R,
    ) -> TWResult<TensoriseSummary> {
        let metadata = self.metadata()?;

        let files = get_data_files_from_directory(input_dir, max_num_files)?;
        let partitions = partition_files_by_size(&files, self.pipeline.chunk_byte_budget)?;
        let jobs: Vec<(Vec<PathBuf>, PathBuf)> = partitions
            .into_iter()
            .enumerate()
            .map(|(idx, partition)| (partition, output_dir.join(chunk_file_name(idx))))
            .collect();
        let chunk_paths: Vec<PathBuf> = jobs.iter().map(|(_, target)| target.clone()).collect();

        let architecture = &self.architecture;
        let mut totals = ChunkCounts::default();
        runner.run_jobs_with(
            jobs,
            |_, (partition, target)| {
                tensorise_partition(architecture, metadata, &partition, &target, for_test)
            },
            |counts| {
                totals.num_all_samples += counts.num_all_samples;
                totals.num_used_samples += counts.num_used_samples;
            },
        )?;

        MetadataSummary {
            hyperparameters: self.hyperparameters.clone(),
            metadata: metadata.clone(),
            num_used_samples: totals.num_used_samples,
            num_all_samples: totals.num_all_samples,
        }
        .save(&output_dir.join(METADATA_FILE_NAME))?;

        self.train_log(&format!(
            "Tensorised {} ({} before filtering) samples from '{}' into '{}'.",
            totals.num_used_samples,
            totals.num_all_samples,
            input_dir.display(),
            output_dir.display(),
        ))?;

        Ok(TensoriseSummary {
            chunk_paths,
            num_all_samples: totals.num_all_samples,
            num_used_samples: totals.num_used_samples,
        })
    }
}
