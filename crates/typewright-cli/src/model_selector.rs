use typewright::{
    architectures::{Graph2Class, Graph2HybridMetric, Path2Annotation},
    hyperparameters::Hyperparameters,
    model::Architecture,
};

/// The architectures the CLI can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModelKind {
    /// Code graph encoder with a type classification head.
    #[value(name = "graph2class")]
    Graph2Class,

    /// Code graph encoder with classification and metric heads.
    #[value(name = "graph2hybridmetric")]
    Graph2HybridMetric,

    /// Path encoder with a type classification head.
    #[value(name = "path2annotation")]
    Path2Annotation,
}

impl ModelKind {
    /// The architecture tag.
    pub fn model_type(self) -> &'static str {
        match self {
            ModelKind::Graph2Class => Graph2Class::MODEL_TYPE,
            ModelKind::Graph2HybridMetric => Graph2HybridMetric::MODEL_TYPE,
            ModelKind::Path2Annotation => Path2Annotation::MODEL_TYPE,
        }
    }
}

/// Model selector arg group.
#[derive(clap::Args, Debug)]
pub struct ModelSelectorArgs {
    /// Model architecture.
    #[arg(long, value_enum)]
    pub model: ModelKind,

    /// Hyperparameter override, as ``name=value``; may be repeated.
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub overrides: Vec<String>,
}

impl ModelSelectorArgs {
    /// The overrides, parsed.
    pub fn hyperparameters(&self) -> Result<Hyperparameters, Box<dyn std::error::Error>> {
        let mut hyperparameters = Hyperparameters::new();
        for assignment in &self.overrides {
            hyperparameters.parse_assignment(assignment)?;
        }
        Ok(hyperparameters)
    }
}
