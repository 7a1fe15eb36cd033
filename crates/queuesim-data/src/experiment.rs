//! Experiment files: how long to run, how many replications, and how to
//! split them across the composite tree.

use queuesim_core::definition::ModelDefinition;
use queuesim_core::replication::ReplicationSpec;
use queuesim_distribute::TreeParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::loader::{DataLoadError, deserialize_file, load_model, require_data_file};

fn one() -> u32 {
    1
}

/// Shape of the composite tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    pub replications: u64,
    #[serde(default = "one")]
    pub branching: u32,
    #[serde(default = "one")]
    pub depth: u32,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            replications: 1,
            branching: 1,
            depth: 1,
        }
    }
}

/// File form of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Model file, relative to the experiment file.
    #[serde(default)]
    pub model: Option<PathBuf>,
    pub replication: ReplicationSpec,
    #[serde(default)]
    pub tree: TreeConfig,
    /// Execution targets, bound to leaves in turn.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Run leaves on a thread pool instead of inline.
    #[serde(default)]
    pub parallel: bool,
    /// Pool size when `parallel` is set; 0 means one thread per core.
    #[serde(default)]
    pub threads: usize,
}

impl ExperimentConfig {
    pub fn new(replication: ReplicationSpec, tree: TreeConfig) -> Self {
        Self {
            model: None,
            replication,
            tree,
            targets: Vec::new(),
            parallel: false,
            threads: 0,
        }
    }

    pub fn tree_params(&self) -> TreeParams {
        TreeParams::new(self.tree.replications, self.tree.branching, self.tree.depth)
    }

    /// Model path resolved against the directory of `experiment_file`.
    pub fn model_path(&self, experiment_file: &Path) -> Option<PathBuf> {
        let model = self.model.as_ref()?;
        if model.is_absolute() {
            return Some(model.clone());
        }
        let base = experiment_file.parent().unwrap_or_else(|| Path::new(""));
        Some(base.join(model))
    }

    fn check(&self, file: &Path) -> Result<(), DataLoadError> {
        let invalid = |detail: String| DataLoadError::Invalid {
            file: file.to_path_buf(),
            detail,
        };
        self.replication
            .validate()
            .map_err(|e| invalid(e.to_string()))?;
        self.tree_params()
            .validate()
            .map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }
}

/// An experiment together with the model it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    pub config: ExperimentConfig,
    pub definition: ModelDefinition,
}

/// Load and check an experiment file. If it names a model, the model is
/// loaded too.
pub fn load_experiment(path: &Path) -> Result<(ExperimentConfig, Option<ModelDefinition>), DataLoadError> {
    let config: ExperimentConfig = deserialize_file(path)?;
    config.check(path)?;
    let definition = match config.model_path(path) {
        Some(model) => Some(load_model(&model)?),
        None => None,
    };
    tracing::debug!(
        file = %path.display(),
        replications = config.tree.replications,
        branching = config.tree.branching,
        depth = config.tree.depth,
        "experiment loaded"
    );
    Ok((config, definition))
}

/// Load `experiment.*` and `model.*` from a directory.
pub fn load_experiment_dir(dir: &Path) -> Result<Experiment, DataLoadError> {
    let experiment_file = require_data_file(dir, "experiment")?;
    let (config, definition) = load_experiment(&experiment_file)?;
    let definition = match definition {
        Some(definition) => definition,
        None => load_model(&require_data_file(dir, "model")?)?,
    };
    Ok(Experiment { config, definition })
}
