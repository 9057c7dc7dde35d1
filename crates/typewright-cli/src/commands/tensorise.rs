use std::path::PathBuf;

use typewright::{
    architectures::{Graph2Class, Graph2HybridMetric, Path2Annotation},
    concurrency::DefaultJobRunner,
    hyperparameters::Hyperparameters,
    model::{Architecture, Model},
    options::{ModelOptions, PipelineOptions},
};

use crate::{
    logging::LogArgs,
    model_selector::{ModelKind, ModelSelectorArgs},
};

/// Args for the tensorise command.
#[derive(clap::Args, Debug)]
pub struct TensoriseArgs {
    /// Directory of raw data files.
    input_dir: PathBuf,

    /// Directory receiving the chunk files.
    output_dir: PathBuf,

    #[command(flatten)]
    model_selector: ModelSelectorArgs,

    /// Reuse a metadata summary instead of computing metadata over the input.
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Encode as evaluation data.
    #[arg(long)]
    for_test: bool,

    /// Read only the first N raw files.
    #[arg(long)]
    max_files: Option<usize>,

    /// Approximate raw bytes per chunk.
    #[arg(long)]
    chunk_bytes: Option<u64>,

    #[clap(flatten)]
    pub logging: LogArgs,
}

impl TensoriseArgs {
    /// Run the tensorise command.
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
        let mut pipeline = PipelineOptions::default();
        if let Some(chunk_bytes) = self.chunk_bytes {
            pipeline = pipeline.with_chunk_byte_budget(chunk_bytes);
        }
        let mut model: Model<A> =
            Model::new(hyperparameters, ModelOptions::default())?.with_pipeline_options(pipeline);

        let runner = DefaultJobRunner::default();
        match &self.metadata {
            Some(path) => model.load_existing_metadata(path)?,
            None => model.load_metadata(&self.input_dir, self.max_files, &runner)?,
        }

        let summary = model.tensorise_data_in_dir(
            &self.input_dir,
            &self.output_dir,
            self.for_test,
            self.max_files,
            &runner,
        )?;

        let mut total_bytes = 0;
        for path in &summary.chunk_paths {
            total_bytes += std::fs::metadata(path)?.len();
        }
        println!(
            "{} chunks ({}) holding {} of {} samples in '{}'",
            summary.chunk_paths.len(),
            humansize::format_size(total_bytes, humansize::BINARY),
            summary.num_used_samples,
            summary.num_all_samples,
            self.output_dir.display(),
        );
        Ok(())
    }
}
