//! ONNX inference for the encoder, the decoder steps and the language model.
//!
//! Graph signatures:
//!
//! - encoder: `features` (1, frames, dim) → `outputs` (1, frames, units) and
//!   `outputs_sub` (1, frames_sub, units)
//! - decoder step: `encoder_outputs`, `targets` (1, 1), `input_attention`
//!   (1, frames), `input_states_1`, `input_states_2` → `log_probs` (1, classes),
//!   `attention` (1, frames), `output_states_1`, `output_states_2`, plus
//!   `rnnlm_log_probs` (1, classes) when a cold-fusion language model is
//!   embedded
//! - language model step: `targets`, `input_states_1`, `input_states_2` →
//!   `log_probs`, `output_states_1`, `output_states_2`

use crate::backend::onnx::core::{LstmShape, OnnxAsr, OnnxLm};
use crate::error::{ModelError, Result};
use crate::traits::{Encoded, RecurrentState, StepOutput};
use crate::types::Task;
use ndarray::prelude::*;
use ndarray::{ErrorKind, ShapeError};
use ort::inputs;
use ort::value::{DynValue, Tensor};

fn extract(value: Option<DynValue>, name: &str) -> Result<ArrayD<f32>> {
    let value = value.ok_or_else(|| ModelError::MissingOutput {
        name: name.to_string(),
    })?;

    Ok(value.try_extract_array::<f32>()?.to_owned())
}

fn zero_states(lstm: LstmShape) -> Vec<ArrayD<f32>> {
    let shape = (lstm.num_layers, 1, lstm.num_units);
    vec![
        Array3::<f32>::zeros(shape).into_dyn(),
        Array3::<f32>::zeros(shape).into_dyn(),
    ]
}

fn target(token: usize) -> Result<Tensor<i64>> {
    Ok(Tensor::from_array(Array2::from_elem((1, 1), token as i64))?)
}

fn state_tensors<const N: usize>(state: &RecurrentState) -> Result<[Tensor<f32>; N]> {
    let tensors = state
        .0
        .iter()
        .map(|s| Ok(Tensor::from_array(s.clone())?))
        .collect::<Result<Vec<_>>>()?;

    tensors
        .try_into()
        .map_err(|_| ModelError::Shape(ShapeError::from_kind(ErrorKind::IncompatibleShape)).into())
}

impl OnnxAsr {
    pub(super) fn run_encoder(&mut self, features: ArrayView2<'_, f32>) -> Result<Encoded> {
        let sessions = self.sessions()?;

        let features = Tensor::from_array(features.to_owned().insert_axis(Axis(0)))?;

        let mut outputs = sessions.encoder.run(inputs!("features" => features))?;

        let main = extract(outputs.remove("outputs"), "outputs")?
            .into_dimensionality::<Ix3>()?
            .index_axis_move(Axis(0), 0);
        let sub = extract(outputs.remove("outputs_sub"), "outputs_sub")?
            .into_dimensionality::<Ix3>()?
            .index_axis_move(Axis(0), 0);

        tracing::trace!(frames = main.nrows(), frames_sub = sub.nrows(), "encoded");

        Ok(Encoded { main, sub })
    }

    /// Zero LSTM states followed by zero attention over `frames`.
    pub(super) fn zero_state(&self, frames: usize) -> RecurrentState {
        let mut states = zero_states(self.lstm);
        states.push(Array2::<f32>::zeros((1, frames)).into_dyn());
        RecurrentState(states)
    }

    pub(super) fn run_decoder(
        &mut self,
        task: Task,
        encoded: ArrayView2<'_, f32>,
        state: &RecurrentState,
        token: usize,
    ) -> Result<StepOutput> {
        let [states_1, states_2, attention] = state_tensors(state)?;

        let encoder_outputs = Tensor::from_array(encoded.to_owned().insert_axis(Axis(0)))?;
        let targets = target(token)?;
        let cold_fusion = *self.cold_fusion.get(task);

        let session = self.sessions()?.decoders.get_mut(task);
        let mut outputs = session.run(inputs!(
            "encoder_outputs" => encoder_outputs,
            "targets" => targets,
            "input_attention" => attention,
            "input_states_1" => states_1,
            "input_states_2" => states_2
        ))?;

        let log_probs = extract(outputs.remove("log_probs"), "log_probs")?
            .into_dimensionality::<Ix2>()?
            .index_axis_move(Axis(0), 0);
        let attention = extract(outputs.remove("attention"), "attention")?
            .into_dimensionality::<Ix2>()?;
        let states_1 = extract(outputs.remove("output_states_1"), "output_states_1")?;
        let states_2 = extract(outputs.remove("output_states_2"), "output_states_2")?;

        let lm_log_probs = if cold_fusion {
            let lm_log_probs = extract(outputs.remove("rnnlm_log_probs"), "rnnlm_log_probs")?
                .into_dimensionality::<Ix2>()?
                .index_axis_move(Axis(0), 0);
            Some(lm_log_probs)
        } else {
            None
        };

        Ok(StepOutput {
            log_probs,
            attention: attention.row(0).to_owned(),
            lm_log_probs,
            state: RecurrentState(vec![states_1, states_2, attention.into_dyn()]),
        })
    }
}

impl OnnxLm {
    pub(super) fn zero_state(&self) -> RecurrentState {
        RecurrentState(zero_states(self.lstm))
    }

    pub(super) fn run_step(
        &mut self,
        state: &RecurrentState,
        token: usize,
    ) -> Result<(Array1<f32>, RecurrentState)> {
        let [states_1, states_2] = state_tensors(state)?;

        let targets = target(token)?;

        let mut outputs = self.session()?.run(inputs!(
            "targets" => targets,
            "input_states_1" => states_1,
            "input_states_2" => states_2
        ))?;

        let log_probs = extract(outputs.remove("log_probs"), "log_probs")?
            .into_dimensionality::<Ix2>()?
            .index_axis_move(Axis(0), 0);
        let states_1 = extract(outputs.remove("output_states_1"), "output_states_1")?;
        let states_2 = extract(outputs.remove("output_states_2"), "output_states_2")?;

        Ok((log_probs, RecurrentState(vec![states_1, states_2])))
    }
}
