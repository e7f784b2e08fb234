//! ONNX Runtime backend.
//!
//! Checkpoints are directories `model.epoch-<N>` holding one graph per
//! network: `encoder.onnx`, `decoder.onnx` and `decoder_sub.onnx` for the
//! ASR model, `rnnlm.onnx` for a language model. Cold-fusion language models
//! are part of the exported decoder graphs, which then also output the
//! language model's log-probabilities for the search to weight.

pub mod asr_impl;
pub mod core;
pub mod inference;

pub use self::core::{DECODER_FILE, DECODER_SUB_FILE, ENCODER_FILE, LstmShape, OnnxAsr, OnnxLm, RNNLM_FILE};

use crate::config::{ResolvedModelConfig, ResolvedRnnlmConfig};
use crate::error::{AssemblyError, Result};
use crate::traits::{AsrModel, LanguageModel, ModelFactory};
use crate::types::{Task, TaskPair};
use ort::session::builder::SessionBuilder;

/// Value of the `backend` config field served by this factory.
pub const BACKEND: &str = "onnx";

/// Builds ONNX models from a shared session builder.
///
/// The builder carries the execution providers; sessions are committed once
/// the model is placed for inference.
#[derive(Clone)]
pub struct OnnxFactory {
    builder: SessionBuilder,
}

impl OnnxFactory {
    pub fn new(builder: SessionBuilder) -> Self {
        Self { builder }
    }
}

fn check_backend(backend: Option<&str>) -> Result<()> {
    match backend {
        Some(BACKEND) => Ok(()),
        other => Err(AssemblyError::UnsupportedBackend(other.unwrap_or_default().to_string()).into()),
    }
}

impl ModelFactory for OnnxFactory {
    fn load_asr(&self, config: &ResolvedModelConfig) -> Result<Box<dyn AsrModel>> {
        check_backend(config.model.backend.as_deref())?;

        for task in Task::ALL {
            if let Some(cold) = config.cold_fusion.get(task) {
                tracing::debug!(%task, path = ?cold.path.display(), "decoder graph carries cold-fusion language model");
            }
        }

        let lstm = LstmShape {
            num_layers: config.model.decoder_num_layers,
            num_units: config.model.decoder_num_units,
        };

        let cold_fusion = TaskPair::new(
            config.cold_fusion.main.is_some(),
            config.cold_fusion.sub.is_some(),
        );

        Ok(Box::new(
            OnnxAsr::new(self.builder.clone(), lstm).with_cold_fusion(cold_fusion),
        ))
    }

    fn load_lm(&self, config: &ResolvedRnnlmConfig) -> Result<Box<dyn LanguageModel>> {
        check_backend(config.config.backend.as_deref())?;

        let lstm = LstmShape {
            num_layers: config.config.num_layers,
            num_units: config.config.num_units,
        };

        Ok(Box::new(OnnxLm::new(self.builder.clone(), lstm)))
    }
}
