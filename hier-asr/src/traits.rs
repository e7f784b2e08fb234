//! Model interfaces driven by the decoder.

use crate::checkpoint::EpochSelector;
use crate::config::{ResolvedModelConfig, ResolvedRnnlmConfig};
use crate::error::Result;
use crate::types::Task;
use ndarray::{Array1, Array2, ArrayD, ArrayView2};
use std::path::Path;

/// Opaque recurrent decoder state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecurrentState(pub Vec<ArrayD<f32>>);

/// Encoder outputs for both tasks, each of shape (frames, dim).
///
/// The sub stream is taken from a lower encoder layer and may have more
/// frames than the main stream.
#[derive(Clone, Debug)]
pub struct Encoded {
    pub main: Array2<f32>,
    pub sub: Array2<f32>,
}

impl Encoded {
    pub fn get(&self, task: Task) -> ArrayView2<'_, f32> {
        match task {
            Task::Main => self.main.view(),
            Task::Sub => self.sub.view(),
        }
    }
}

/// Result of one decoder step.
#[derive(Clone, Debug)]
pub struct StepOutput {
    /// Log-probabilities over `num_classes + 1` classes, eos last
    pub log_probs: Array1<f32>,
    /// Attention weights over encoder frames
    pub attention: Array1<f32>,
    /// Next-symbol log-probabilities of a cold-fusion language model
    /// embedded in the decoder, scaled by the fusion weight during search
    pub lm_log_probs: Option<Array1<f32>>,
    pub state: RecurrentState,
}

/// Device placement and kernel selection for inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InferenceSettings {
    /// Bit-reproducible kernels
    pub deterministic: bool,
    /// Kernel auto-tuning
    pub benchmark: bool,
}

impl InferenceSettings {
    /// Bulk evaluation: auto-tuned, not bit-reproducible.
    pub const EVALUATION: Self = Self {
        deterministic: false,
        benchmark: true,
    };
}

/// Hierarchical attention encoder-decoder.
///
/// Note: methods take `&mut self` because ONNX Runtime's `Session::run` requires it.
pub trait AsrModel {
    /// Restore parameters, returning the epoch actually loaded.
    fn load_checkpoint(&mut self, save_path: &Path, epoch: EpochSelector) -> Result<usize>;

    /// Place the model for inference. Called once after restoration.
    fn configure_inference(&mut self, settings: InferenceSettings) -> Result<()>;

    /// Encode features of shape (frames, feature_dim).
    fn encode(&mut self, features: ArrayView2<'_, f32>) -> Result<Encoded>;

    /// Decoder state before the first step of `task`.
    fn initial_state(&mut self, task: Task, encoded: ArrayView2<'_, f32>) -> Result<RecurrentState>;

    /// Advance the `task` decoder by feeding `token`.
    fn step(
        &mut self,
        task: Task,
        encoded: ArrayView2<'_, f32>,
        state: &RecurrentState,
        token: usize,
    ) -> Result<StepOutput>;
}

/// Recurrent language model over one task's vocabulary.
pub trait LanguageModel {
    fn load_checkpoint(&mut self, save_path: &Path, epoch: EpochSelector) -> Result<usize>;

    /// One-time parameter layout normalization before repeated inference.
    fn flatten_parameters(&mut self) -> Result<()>;

    fn initial_state(&mut self) -> Result<RecurrentState>;

    /// Log-probabilities of the next symbol after `token`, eos last.
    fn step(&mut self, state: &RecurrentState, token: usize) -> Result<(Array1<f32>, RecurrentState)>;
}

/// Instantiates models for one backend.
pub trait ModelFactory {
    fn load_asr(&self, config: &ResolvedModelConfig) -> Result<Box<dyn AsrModel>>;

    fn load_lm(&self, config: &ResolvedRnnlmConfig) -> Result<Box<dyn LanguageModel>>;
}
