//! Model trait implementations for the ONNX models.

use crate::backend::onnx::core::{OnnxAsr, OnnxLm};
use crate::checkpoint::EpochSelector;
use crate::error::Result;
use crate::traits::{AsrModel, Encoded, InferenceSettings, LanguageModel, RecurrentState, StepOutput};
use crate::types::Task;
use ndarray::{Array1, ArrayView2};
use std::path::Path;

impl AsrModel for OnnxAsr {
    fn load_checkpoint(&mut self, save_path: &Path, epoch: EpochSelector) -> Result<usize> {
        self.restore(save_path, epoch)
    }

    fn configure_inference(&mut self, settings: InferenceSettings) -> Result<()> {
        self.place(settings)
    }

    fn encode(&mut self, features: ArrayView2<'_, f32>) -> Result<Encoded> {
        self.run_encoder(features)
    }

    fn initial_state(&mut self, _task: Task, encoded: ArrayView2<'_, f32>) -> Result<RecurrentState> {
        Ok(self.zero_state(encoded.nrows()))
    }

    fn step(
        &mut self,
        task: Task,
        encoded: ArrayView2<'_, f32>,
        state: &RecurrentState,
        token: usize,
    ) -> Result<StepOutput> {
        self.run_decoder(task, encoded, state, token)
    }
}

impl LanguageModel for OnnxLm {
    fn load_checkpoint(&mut self, save_path: &Path, epoch: EpochSelector) -> Result<usize> {
        self.restore(save_path, epoch)
    }

    fn flatten_parameters(&mut self) -> Result<()> {
        self.flatten()
    }

    fn initial_state(&mut self) -> Result<RecurrentState> {
        Ok(self.zero_state())
    }

    fn step(&mut self, state: &RecurrentState, token: usize) -> Result<(Array1<f32>, RecurrentState)> {
        self.run_step(state, token)
    }
}
