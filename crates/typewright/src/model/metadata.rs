//! # Metadata Pass
//!
//! One accumulator per raw file, filled in parallel by a [`JobRunner`], then
//! merged once on the calling thread.

use std::path::{Path, PathBuf};

use crate::{
    concurrency::JobRunner,
    data::read_raw_samples,
    errors::TWResult,
    io::get_data_files_from_directory,
    model::{
        architecture::Architecture,
        checkpoint::MetadataSummary,
        lifecycle::{Model, display_opt},
    },
};

/// Fold every sample of one raw file into a fresh accumulator.
///
/// A file that cannot be read, or that holds a malformed sample, is an error.
pub fn raw_metadata_for_file<A: Architecture>(
    architecture: &A,
    path: &Path,
) -> TWResult<A::RawMetadata> {
    let mut raw_metadata = architecture.init_metadata();
    for raw_sample in read_raw_samples(path)? {
        architecture.load_metadata_from_sample(&raw_sample, &mut raw_metadata);
    }
    Ok(raw_metadata)
}

/// Compute finalised metadata over `files`.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub fn compute_metadata<A, R>(
    architecture: &A,
    files: Vec<PathBuf>,
    runner: &R,
) -> TWResult<A::Metadata>
where
    A: Architecture,
    R: JobRunner,
{
    let num_files = files.len();
    let mut raw_metadata_list = Vec::with_capacity(num_files);
    runner.run_jobs_with(
        files,
        |_, path| raw_metadata_for_file(architecture, &path),
        |raw_metadata| raw_metadata_list.push(raw_metadata),
    )?;

    log::debug!("Merging metadata from {num_files} files");
    architecture.finalise_metadata(raw_metadata_list)
}

impl<A: Architecture> Model<A> {
    /// Compute metadata over the raw files of `data_dir`.
    pub fn load_metadata<R: JobRunner>(
        &mut self,
        data_dir: &Path,
        max_num_files: Option<usize>,
        runner: &R,
    ) -> TWResult<()> {
        let files = get_data_files_from_directory(data_dir, max_num_files)?;
        let metadata = compute_metadata(&self.architecture, files, runner)?;
        self.metadata = Some(metadata);
        Ok(())
    }

    /// Adopt the metadata of a summary written by tensorisation.
    ///
    /// Every hyperparameter that differs from the one used for tensorisation
    /// (``run_id`` excepted) is logged; the stored metadata is used as is.
    pub fn load_existing_metadata(
        &mut self,
        metadata_path: &Path,
    ) -> TWResult<()> {
        let saved = MetadataSummary::<A::Metadata>::load(metadata_path)?;
        for mismatch in self.hyperparameters.diff(&saved.hyperparameters) {
            self.train_log(&format!(
                "I: Hyperparameter {} now has value '{}' but was '{}' when tensorising data.",
                mismatch.name,
                display_opt(mismatch.new.as_ref()),
                display_opt(mismatch.old.as_ref()),
            ))?;
        }
        self.metadata = Some(saved.metadata);
        Ok(())
    }
}
