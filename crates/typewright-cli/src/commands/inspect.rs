use std::path::PathBuf;

use serde_json::Value;
use typewright::{
    hyperparameters::Hyperparameters,
    model::{Checkpoint, MetadataSummary},
};

/// Args for the inspect command.
#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    /// A metadata summary or a saved model.
    path: PathBuf,
}

impl InspectArgs {
    /// Run the inspect command.
    pub fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let size = std::fs::metadata(&self.path)?.len();
        println!(
            "{} ({})",
            self.path.display(),
            humansize::format_size(size, humansize::BINARY)
        );

        // A summary has no model type, so try the stricter layout first.
        if let Ok(checkpoint) = Checkpoint::<Value>::load(&self.path) {
            print_checkpoint(&checkpoint);
            return Ok(());
        }
        let summary = MetadataSummary::<Value>::load(&self.path)?;
        print_summary(&summary);
        Ok(())
    }
}

fn print_checkpoint(checkpoint: &Checkpoint<Value>) {
    println!("model: {} (run '{}')", checkpoint.model_type, checkpoint.run_name);
    let num_values: usize = checkpoint.weights.values().map(|w| w.len()).sum();
    println!(
        "weights: {} tensors, {num_values} values",
        checkpoint.weights.len()
    );
    for (name, weight) in &checkpoint.weights {
        println!("  {name}: {:?}", weight.shape());
    }
    print_hyperparameters(&checkpoint.hyperparameters);
    print_metadata(&checkpoint.metadata);
}

fn print_summary(summary: &MetadataSummary<Value>) {
    println!(
        "samples: {} used of {}",
        summary.num_used_samples, summary.num_all_samples
    );
    print_hyperparameters(&summary.hyperparameters);
    print_metadata(&summary.metadata);
}

fn print_hyperparameters(hyperparameters: &Hyperparameters) {
    println!("hyperparameters:");
    for (name, value) in hyperparameters.iter() {
        println!("  {name} = {value}");
    }
}

fn print_metadata(metadata: &Value) {
    println!("metadata:");
    describe("", metadata);
}

/// One line per leaf; arrays are summarised by their length.
fn describe(
    prefix: &str,
    value: &Value,
) {
    match value {
        Value::Object(fields) => {
            for (name, field) in fields {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}.{name}")
                };
                describe(&path, field);
            }
        }
        Value::Array(items) => println!("  {prefix}: {} entries", items.len()),
        other => println!("  {prefix}: {other}"),
    }
}
