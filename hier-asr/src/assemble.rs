//! One-time model assembly: instantiate, restore, attach, place.

use crate::checkpoint::EpochSelector;
use crate::config::{ModelConfig, ResolvedModelConfig};
use crate::dataset::DatasetBundle;
use crate::error::Result;
use crate::lm::{FusionRequest, LanguageModelHandle, LmPlan, plan_fusion};
use crate::traits::{AsrModel, InferenceSettings, ModelFactory};
use crate::types::{Task, TaskPair};
use std::path::{Path, PathBuf};

/// Where to restore from and which language models to fuse.
#[derive(Clone, Debug)]
pub struct AssemblyRequest {
    pub model_dir: PathBuf,
    pub epoch: EpochSelector,
    pub fusion: TaskPair<FusionRequest>,
}

/// Hierarchical ASR model ready for decoding.
pub struct AssembledModel {
    pub model: Box<dyn AsrModel>,
    /// At most one auxiliary language model per task
    pub lm: TaskPair<Option<LanguageModelHandle>>,
    pub config: ResolvedModelConfig,
}

impl AssembledModel {
    pub fn lm(&self, task: Task) -> Option<&LanguageModelHandle> {
        self.lm.get(task).as_ref()
    }
}

impl std::fmt::Debug for AssembledModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssembledModel")
            .field("lm", &self.lm)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Build the decoding model from its config and the first evaluation split.
///
/// Returns the model and the epoch counter of the restored checkpoint. All
/// configuration checks happen before the factory is called.
pub fn assemble(
    config: ModelConfig,
    bundle: &DatasetBundle,
    request: &AssemblyRequest,
    factory: &dyn ModelFactory,
) -> Result<(AssembledModel, usize)> {
    let resolved = config.with_vocabularies(bundle);

    let plans = plan_all(&resolved, &request.model_dir, &request.fusion)?;

    // cold-fusion LMs are built into the model by the factory
    let resolved = resolved.with_cold_fusion(TaskPair::new(
        plans.main.as_ref().and_then(LmPlan::cold).cloned(),
        plans.sub.as_ref().and_then(LmPlan::cold).cloned(),
    ));

    tracing::info!(
        model_type = resolved.model_type(),
        backend = resolved.backend(),
        num_classes = resolved.num_classes.main,
        num_classes_sub = resolved.num_classes.sub,
        "loading model"
    );

    let mut model = factory.load_asr(&resolved)?;
    let epoch = model.load_checkpoint(&request.model_dir, request.epoch)?;

    let main = plans.main.map(|plan| plan.attach(Task::Main, factory)).transpose()?;
    let sub = plans.sub.map(|plan| plan.attach(Task::Sub, factory)).transpose()?;

    model.configure_inference(InferenceSettings::EVALUATION)?;

    let assembled = AssembledModel {
        model,
        lm: TaskPair::new(main, sub),
        config: resolved,
    };

    Ok((assembled, epoch))
}

fn plan_all(
    config: &ResolvedModelConfig,
    model_dir: &Path,
    fusion: &TaskPair<FusionRequest>,
) -> Result<TaskPair<Option<LmPlan>>> {
    let main = plan_fusion(Task::Main, config, model_dir, &fusion.main)?;
    let sub = plan_fusion(Task::Sub, config, model_dir, &fusion.sub)?;
    Ok(TaskPair::new(main, sub))
}
