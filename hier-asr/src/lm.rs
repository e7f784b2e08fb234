//! Auxiliary language models: cold and shallow fusion.
//!
//! Resolution runs in two phases. [`plan_fusion`] reads config files and
//! validates label types and weight/path pairing without loading any
//! weights, so every configuration error surfaces before the ASR model is
//! instantiated. [`LmPlan::attach`] then loads shallow-fusion models once
//! the ASR checkpoint is restored.

use crate::checkpoint::EpochSelector;
use crate::config::{
    CONFIG_FILE, ColdFusion, ModelConfig, ResolvedModelConfig, ResolvedRnnlmConfig, RnnlmConfig,
    load_config,
};
use crate::error::{ConfigError, Result};
use crate::traits::{LanguageModel, ModelFactory, RecurrentState};
use crate::types::Task;
use ndarray::Array1;
use std::path::{Path, PathBuf};

/// Decode-time fusion settings for one task, as given on the command line.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FusionRequest {
    pub weight: f32,
    pub path: Option<PathBuf>,
}

impl FusionRequest {
    /// Reject a language model path paired with a non-positive weight.
    ///
    /// A positive weight without a path can still be valid for cold fusion,
    /// which is only known once the model config is read.
    pub fn check(&self, task: Task) -> Result<(), ConfigError> {
        if self.path.is_some() && self.weight <= 0.0 {
            return Err(ConfigError::AsymmetricFusion {
                task,
                weight: self.weight,
                path: self.path.clone(),
            });
        }
        Ok(())
    }
}

/// Fusion mode of an attached language model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FusionMode {
    /// Packaged with the ASR model and applied inside its decoder
    Cold,
    /// Separately trained, combined with decoder scores at search time
    Shallow,
}

/// Validated language model resolution for one task.
#[derive(Clone, Debug)]
pub enum LmPlan {
    Cold(ColdFusion),
    Shallow {
        path: PathBuf,
        weight: f32,
        config: ResolvedRnnlmConfig,
    },
}

/// Resolve the auxiliary language model of `task`.
///
/// Cold fusion declared by the model config takes precedence; a command line
/// path is then ignored. Otherwise a command line path and a positive weight
/// select shallow fusion. Any other pairing of weight and path is an error.
pub fn plan_fusion(
    task: Task,
    config: &ResolvedModelConfig,
    model_dir: &Path,
    request: &FusionRequest,
) -> Result<Option<LmPlan>, ConfigError> {
    let expected = config.model.label_type(task);
    let num_classes = *config.num_classes.get(task);

    if let Some(cold_path) = config.model.cold_fusion_path(task) {
        let rnnlm: RnnlmConfig =
            load_config(model_dir.join(ModelConfig::cold_fusion_config_file(task)), false)?;
        check_label_type(task, expected, &rnnlm.label_type)?;

        if request.weight <= 0.0 {
            return Err(ConfigError::ColdFusionWeight {
                task,
                weight: request.weight,
            });
        }

        if let Some(ignored) = &request.path {
            tracing::warn!(%task, path = ?ignored.display(), "cold fusion configured, ignoring language model path");
        }

        return Ok(Some(LmPlan::Cold(ColdFusion {
            path: cold_path.to_path_buf(),
            weight: request.weight,
            rnnlm: rnnlm.with_num_classes(num_classes),
        })));
    }

    match &request.path {
        Some(path) if request.weight > 0.0 => {
            let rnnlm: RnnlmConfig = load_config(path.join(CONFIG_FILE), true)?;
            check_label_type(task, expected, &rnnlm.label_type)?;

            Ok(Some(LmPlan::Shallow {
                path: path.clone(),
                weight: request.weight,
                config: rnnlm.with_num_classes(num_classes),
            }))
        }
        None if request.weight == 0.0 => Ok(None),
        path => Err(ConfigError::AsymmetricFusion {
            task,
            weight: request.weight,
            path: path.clone(),
        }),
    }
}

fn check_label_type(task: Task, expected: &str, found: &str) -> Result<(), ConfigError> {
    if expected != found {
        return Err(ConfigError::LabelTypeMismatch {
            task,
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

impl LmPlan {
    pub fn mode(&self) -> FusionMode {
        match self {
            Self::Cold(_) => FusionMode::Cold,
            Self::Shallow { .. } => FusionMode::Shallow,
        }
    }

    /// Cold-fusion config to hand to the model factory.
    pub fn cold(&self) -> Option<&ColdFusion> {
        match self {
            Self::Cold(cold) => Some(cold),
            Self::Shallow { .. } => None,
        }
    }

    /// Bind the plan to `task`, loading and restoring shallow-fusion weights.
    pub fn attach(self, task: Task, factory: &dyn ModelFactory) -> Result<LanguageModelHandle> {
        let handle = match self {
            Self::Cold(ColdFusion { path, weight, .. }) => LanguageModelHandle {
                task,
                path,
                weight,
                fusion: Fusion::Cold,
            },
            Self::Shallow {
                path,
                weight,
                config,
            } => {
                let mut model = factory.load_lm(&config)?;
                let epoch = model.load_checkpoint(&path, EpochSelector::Latest)?;
                tracing::debug!(%task, epoch, "restored language model");

                LanguageModelHandle {
                    task,
                    path,
                    weight,
                    fusion: Fusion::Shallow(FlattenedLm::new(model)?),
                }
            }
        };

        tracing::info!(%task, path = ?handle.path.display(), weight = handle.weight, mode = ?handle.mode(), "language model attached");

        Ok(handle)
    }
}

/// Language model whose parameter layout has been normalized.
///
/// Construction flattens exactly once; the wrapped model cannot be reached
/// to flatten again.
pub struct FlattenedLm {
    model: Box<dyn LanguageModel>,
}

impl FlattenedLm {
    pub fn new(mut model: Box<dyn LanguageModel>) -> Result<Self> {
        model.flatten_parameters()?;
        Ok(Self { model })
    }

    pub fn initial_state(&mut self) -> Result<RecurrentState> {
        self.model.initial_state()
    }

    pub fn step(&mut self, state: &RecurrentState, token: usize) -> Result<(Array1<f32>, RecurrentState)> {
        self.model.step(state, token)
    }
}

impl std::fmt::Debug for FlattenedLm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlattenedLm").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Fusion {
    Cold,
    Shallow(FlattenedLm),
}

/// Auxiliary language model bound to a task.
#[derive(Debug)]
pub struct LanguageModelHandle {
    pub task: Task,
    pub path: PathBuf,
    pub weight: f32,
    pub fusion: Fusion,
}

impl LanguageModelHandle {
    pub fn mode(&self) -> FusionMode {
        match self.fusion {
            Fusion::Cold => FusionMode::Cold,
            Fusion::Shallow(_) => FusionMode::Shallow,
        }
    }

    /// Model to query at search time; `None` under cold fusion.
    pub fn shallow_mut(&mut self) -> Option<&mut FlattenedLm> {
        match &mut self.fusion {
            Fusion::Cold => None,
            Fusion::Shallow(lm) => Some(lm),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedFactory, model_config, write_file};
    use crate::types::TaskPair;

    const LM_WORD: &str = "model_type: rnnlm\nbackend: onnx\nlabel_type: word1\n";
    const LM_CHAR: &str = "model_type: rnnlm\nbackend: onnx\nlabel_type: character\n";
    const LM_WRONG: &str = "model_type: rnnlm\nbackend: onnx\nlabel_type: word5\n";

    fn resolved(cold: bool) -> ResolvedModelConfig {
        let mut config = model_config("word1", "character");
        if cold {
            config.rnnlm_fusion_type = Some("cold_fusion".to_string());
            config.rnnlm_path = Some(PathBuf::from("/exp/lm/word"));
            config.rnnlm_path_sub = Some(PathBuf::from("/exp/lm/char"));
        }
        ResolvedModelConfig {
            model: config,
            num_classes: TaskPair::new(5, 7),
            cold_fusion: TaskPair::default(),
        }
    }

    fn request(weight: f32, path: Option<&Path>) -> FusionRequest {
        FusionRequest {
            weight,
            path: path.map(Path::to_path_buf),
        }
    }

    #[test]
    fn no_model_without_weight_or_path() {
        let dir = tempfile::tempdir().unwrap();
        for task in Task::ALL {
            let plan = plan_fusion(task, &resolved(false), dir.path(), &request(0.0, None)).unwrap();
            assert!(plan.is_none());
        }
    }

    #[test]
    fn resolves_cold_fusion_from_model_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "config_rnnlm.yml", LM_WORD);
        write_file(dir.path(), "config_rnnlm_sub.yml", LM_CHAR);

        let main = plan_fusion(Task::Main, &resolved(true), dir.path(), &request(0.3, None))
            .unwrap()
            .unwrap();
        let sub = plan_fusion(Task::Sub, &resolved(true), dir.path(), &request(0.1, None))
            .unwrap()
            .unwrap();

        assert_eq!(main.mode(), FusionMode::Cold);
        let cold = main.cold().unwrap();
        assert_eq!(cold.path, PathBuf::from("/exp/lm/word"));
        assert_eq!(cold.rnnlm.num_classes, 5);
        assert_eq!(sub.cold().unwrap().rnnlm.num_classes, 7);
    }

    #[test]
    fn cold_fusion_requires_positive_weight() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "config_rnnlm.yml", LM_WORD);

        for weight in [0.0, -0.5] {
            let err = plan_fusion(Task::Main, &resolved(true), dir.path(), &request(weight, None))
                .unwrap_err();
            assert!(matches!(err, ConfigError::ColdFusionWeight { task: Task::Main, .. }));
        }
    }

    #[test]
    fn cold_fusion_overrides_cli_path() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "config_rnnlm.yml", LM_WORD);

        let plan = plan_fusion(
            Task::Main,
            &resolved(true),
            dir.path(),
            &request(0.3, Some(Path::new("/other/lm"))),
        )
        .unwrap()
        .unwrap();

        assert_eq!(plan.mode(), FusionMode::Cold);
    }

    #[test]
    fn resolves_shallow_fusion_from_cli() {
        let model_dir = tempfile::tempdir().unwrap();
        let lm_dir = tempfile::tempdir().unwrap();
        write_file(lm_dir.path(), CONFIG_FILE, LM_CHAR);

        let plan = plan_fusion(
            Task::Sub,
            &resolved(false),
            model_dir.path(),
            &request(0.2, Some(lm_dir.path())),
        )
        .unwrap()
        .unwrap();

        assert_eq!(plan.mode(), FusionMode::Shallow);
        let LmPlan::Shallow { weight, config, .. } = plan else {
            panic!("expected shallow fusion");
        };
        assert_eq!(weight, 0.2);
        assert_eq!(config.num_classes, 7);
    }

    #[test]
    fn label_type_mismatch_fails_for_every_mode_and_task() {
        for task in Task::ALL {
            // cold
            let dir = tempfile::tempdir().unwrap();
            write_file(dir.path(), ModelConfig::cold_fusion_config_file(task), LM_WRONG);
            let err = plan_fusion(task, &resolved(true), dir.path(), &request(0.5, None)).unwrap_err();
            assert!(
                matches!(err, ConfigError::LabelTypeMismatch { task: t, ref found, .. } if t == task && found == "word5")
            );

            // shallow
            let lm_dir = tempfile::tempdir().unwrap();
            write_file(lm_dir.path(), CONFIG_FILE, LM_WRONG);
            let err = plan_fusion(task, &resolved(false), dir.path(), &request(0.5, Some(lm_dir.path())))
                .unwrap_err();
            assert!(
                matches!(err, ConfigError::LabelTypeMismatch { task: t, .. } if t == task)
            );
        }
    }

    #[test]
    fn asymmetric_weight_and_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let err = plan_fusion(Task::Main, &resolved(false), dir.path(), &request(0.5, None)).unwrap_err();
        assert!(matches!(err, ConfigError::AsymmetricFusion { path: None, .. }));

        let err = plan_fusion(
            Task::Sub,
            &resolved(false),
            dir.path(),
            &request(0.0, Some(Path::new("/exp/lm"))),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::AsymmetricFusion { path: Some(_), .. }));

        assert!(request(0.0, Some(Path::new("/exp/lm"))).check(Task::Sub).is_err());
        assert!(request(0.5, None).check(Task::Main).is_ok());
    }

    #[test]
    fn shallow_attach_flattens_once() {
        let lm_dir = tempfile::tempdir().unwrap();
        write_file(lm_dir.path(), CONFIG_FILE, LM_WORD);

        let plan = plan_fusion(
            Task::Main,
            &resolved(false),
            lm_dir.path(),
            &request(0.3, Some(lm_dir.path())),
        )
        .unwrap()
        .unwrap();

        let factory = ScriptedFactory::default();
        let mut handle = plan.attach(Task::Main, &factory).unwrap();

        assert_eq!(handle.mode(), FusionMode::Shallow);
        assert!(handle.shallow_mut().is_some());
        assert_eq!(factory.lm_flattens(), 1);
        assert_eq!(factory.lm_restores(), vec![(lm_dir.path().to_path_buf(), EpochSelector::Latest)]);
    }
}
