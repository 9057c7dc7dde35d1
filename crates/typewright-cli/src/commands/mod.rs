use crate::commands::{inspect::InspectArgs, metadata::MetadataArgs, tensorise::TensoriseArgs};

pub mod inspect;
pub mod metadata;
pub mod tensorise;

/// Subcommands for twright
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Compute metadata over a directory of raw files.
    Metadata(MetadataArgs),

    /// Tensorise a directory of raw files into chunk files.
    Tensorise(TensoriseArgs),

    /// Describe a metadata summary or a saved model.
    Inspect(InspectArgs),
}

impl Commands {
    /// Run the subcommand.
    pub fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            Commands::Metadata(cmd) => cmd.run(),
            Commands::Tensorise(cmd) => cmd.run(),
            Commands::Inspect(cmd) => cmd.run(),
        }
    }
}
