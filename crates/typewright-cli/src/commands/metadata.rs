use std::path::{Path, PathBuf};

use typewright::{
    architectures::{Graph2Class, Graph2HybridMetric, Path2Annotation},
    concurrency::DefaultJobRunner,
    data::read_raw_samples,
    hyperparameters::Hyperparameters,
    io::get_data_files_from_directory,
    model::{Architecture, MetadataSummary, Model},
    options::ModelOptions,
};

use crate::{
    logging::LogArgs,
    model_selector::{ModelKind, ModelSelectorArgs},
};

/// Args for the metadata command.
#[derive(clap::Args, Debug)]
pub struct MetadataArgs {
    /// Directory of raw data files.
    input_dir: PathBuf,

    #[command(flatten)]
    model_selector: ModelSelectorArgs,

    /// Read only the first N raw files.
    #[arg(long)]
    max_files: Option<usize>,

    /// Where to write the metadata summary.
    #[arg(long)]
    output: PathBuf,

    #[clap(flatten)]
    pub logging: LogArgs,
}

impl MetadataArgs {
    /// Run the metadata command.
    pub fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.logging.setup_logging(3)?;

        let hyperparameters = self.model_selector.hyperparameters()?;
        match self.model_selector.model {
            ModelKind::Graph2Class => self.run_with::<Graph2Class>(&hyperparameters),
            ModelKind::Graph2HybridMetric => self.run_with::<Graph2HybridMetric>(&hyperparameters),
            ModelKind::Path2Annotation => self.run_with::<Path2Annotation>(&hyperparameters),
        }
    }

    fn run_with<A: Architecture>(
        &self,
        hyperparameters: &Hyperparameters,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut model: Model<A> = Model::new(hyperparameters, ModelOptions::default())?;

        log::info!(
            "Computing {} metadata over '{}'",
            self.model_selector.model.model_type(),
            self.input_dir.display()
        );
        model.load_metadata(&self.input_dir, self.max_files, &DefaultJobRunner::default())?;

        let (num_used_samples, num_all_samples) =
            count_training_samples(&model, &self.input_dir, self.max_files)?;
        MetadataSummary {
            hyperparameters: model.hyperparameters().clone(),
            metadata: model.metadata()?.clone(),
            num_used_samples,
            num_all_samples,
        }
        .save(&self.output)?;

        log::info!(
            "Wrote metadata to '{}': {num_used_samples} of {num_all_samples} samples usable for training",
            self.output.display()
        );
        Ok(())
    }
}

/// Count the samples that training tensorisation would keep, and all samples.
fn count_training_samples<A: Architecture>(
    model: &Model<A>,
    input_dir: &Path,
    max_files: Option<usize>,
) -> Result<(usize, usize), Box<dyn std::error::Error>> {
    let metadata = model.metadata()?;
    let mut used = 0;
    let mut all = 0;
    for path in get_data_files_from_directory(input_dir, max_files)? {
        for raw_sample in read_raw_samples(&path)? {
            all += 1;
            if model
                .architecture()
                .load_data_from_sample(metadata, &raw_sample, true)?
                .is_some()
            {
                used += 1;
            }
        }
    }
    Ok((used, all))
}
