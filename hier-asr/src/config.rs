//! Model and language-model configuration files.
//!
//! Configs are the YAML files written at training time (`config.yml`,
//! `config_rnnlm.yml`, `config_rnnlm_sub.yml`). Vocabulary sizes are not
//! trusted from the file: they are bound from the dataset that is actually
//! evaluated, through [`ModelConfig::with_vocabularies`].

use crate::dataset::DatasetBundle;
use crate::error::ConfigError;
use crate::types::{Task, TaskPair};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name of the ASR config inside a model directory.
pub const CONFIG_FILE: &str = "config.yml";

const DEFAULT_NUM_LAYERS: usize = 1;
const DEFAULT_NUM_UNITS: usize = 320;

fn default_num_layers() -> usize {
    DEFAULT_NUM_LAYERS
}

fn default_num_units() -> usize {
    DEFAULT_NUM_UNITS
}

/// Fields that must be present when a config is loaded for evaluation.
pub trait EvalFields {
    /// Name of the first inference-only field that is missing, if any.
    fn missing_eval_field(&self) -> Option<&'static str>;
}

/// Load a YAML config file.
///
/// With `is_eval`, additionally checks that the inference-only fields are
/// present.
pub fn load_config<T>(path: impl AsRef<Path>, is_eval: bool) -> Result<T, ConfigError>
where
    T: DeserializeOwned + EvalFields,
{
    let path = path.as_ref();

    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config: T = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if is_eval && let Some(field) = config.missing_eval_field() {
        return Err(ConfigError::MissingField {
            path: path.to_path_buf(),
            field,
        });
    }

    Ok(config)
}

/// Hierarchical ASR model configuration (`config.yml`).
#[derive(Clone, Debug, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,

    /// Label type of the main (word) task
    pub label_type: String,
    /// Label type of the sub (character) task
    pub label_type_sub: String,

    /// Number of log-mel bins
    #[serde(default)]
    pub input_freq: Option<usize>,
    #[serde(default)]
    pub use_delta: bool,
    #[serde(default)]
    pub use_double_delta: bool,
    #[serde(default)]
    pub data_size: String,

    /// Set when the model was trained with cold fusion
    #[serde(default)]
    pub rnnlm_fusion_type: Option<String>,
    #[serde(default)]
    pub rnnlm_path: Option<PathBuf>,
    #[serde(default)]
    pub rnnlm_path_sub: Option<PathBuf>,

    #[serde(default = "default_num_layers")]
    pub decoder_num_layers: usize,
    #[serde(default = "default_num_units")]
    pub decoder_num_units: usize,

    /// Hyperparameters not interpreted at evaluation time
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl EvalFields for ModelConfig {
    fn missing_eval_field(&self) -> Option<&'static str> {
        if self.model_type.is_none() {
            Some("model_type")
        } else if self.backend.is_none() {
            Some("backend")
        } else if self.input_freq.is_none() {
            Some("input_freq")
        } else {
            None
        }
    }
}

impl ModelConfig {
    pub fn label_type(&self, task: Task) -> &str {
        match task {
            Task::Main => &self.label_type,
            Task::Sub => &self.label_type_sub,
        }
    }

    /// In-model language model path declared for cold fusion.
    ///
    /// `None` unless both a fusion type and the task's LM path are set.
    pub fn cold_fusion_path(&self, task: Task) -> Option<&Path> {
        self.rnnlm_fusion_type.as_ref()?;

        match task {
            Task::Main => self.rnnlm_path.as_deref(),
            Task::Sub => self.rnnlm_path_sub.as_deref(),
        }
    }

    /// Name of the cold-fusion LM config file beside the ASR config.
    pub fn cold_fusion_config_file(task: Task) -> &'static str {
        match task {
            Task::Main => "config_rnnlm.yml",
            Task::Sub => "config_rnnlm_sub.yml",
        }
    }

    /// Bind vocabulary sizes from the dataset that will be evaluated.
    pub fn with_vocabularies(self, bundle: &DatasetBundle) -> ResolvedModelConfig {
        ResolvedModelConfig {
            num_classes: TaskPair::new(bundle.num_classes(), bundle.num_classes_sub()),
            model: self,
            cold_fusion: TaskPair::default(),
        }
    }
}

/// Recurrent language model configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct RnnlmConfig {
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,

    pub label_type: String,

    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    #[serde(default = "default_num_units")]
    pub num_units: usize,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl EvalFields for RnnlmConfig {
    fn missing_eval_field(&self) -> Option<&'static str> {
        if self.model_type.is_none() {
            Some("model_type")
        } else if self.backend.is_none() {
            Some("backend")
        } else {
            None
        }
    }
}

impl RnnlmConfig {
    /// Bind the vocabulary size of the task the LM is attached to.
    pub fn with_num_classes(self, num_classes: usize) -> ResolvedRnnlmConfig {
        ResolvedRnnlmConfig {
            config: self,
            num_classes,
        }
    }
}

/// Language model configuration with its vocabulary size bound.
#[derive(Clone, Debug)]
pub struct ResolvedRnnlmConfig {
    pub config: RnnlmConfig,
    pub num_classes: usize,
}

/// Cold-fusion language model resolved for one task.
#[derive(Clone, Debug)]
pub struct ColdFusion {
    pub path: PathBuf,
    pub weight: f32,
    pub rnnlm: ResolvedRnnlmConfig,
}

/// Fully resolved model configuration handed to the model factory.
#[derive(Clone, Debug)]
pub struct ResolvedModelConfig {
    pub model: ModelConfig,
    pub num_classes: TaskPair<usize>,
    pub cold_fusion: TaskPair<Option<ColdFusion>>,
}

impl ResolvedModelConfig {
    /// Attach the cold-fusion LM configs resolved for each task.
    pub fn with_cold_fusion(self, cold_fusion: TaskPair<Option<ColdFusion>>) -> Self {
        Self {
            cold_fusion,
            ..self
        }
    }

    pub fn model_type(&self) -> &str {
        self.model.model_type.as_deref().unwrap_or_default()
    }

    pub fn backend(&self) -> &str {
        self.model.backend.as_deref().unwrap_or_default()
    }
}
