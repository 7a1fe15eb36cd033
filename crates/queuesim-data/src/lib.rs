pub mod experiment;
pub mod loader;

pub use experiment::{Experiment, ExperimentConfig, TreeConfig, load_experiment, load_experiment_dir};
pub use loader::{DataLoadError, Format, load_model};
