//! Per-batch decoding parameters.

use crate::corpus::{CorpusProfile, LengthBounds};
use crate::error::ConfigError;
use crate::types::{Task, TaskPair};

/// Decoding parameters shared by every batch of an evaluation run.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodeRequest {
    pub beam_width: TaskPair<usize>,
    pub bounds: TaskPair<LengthBounds>,
    /// Added per emitted symbol
    pub length_penalty: f32,
    /// Scales the growth of attention coverage
    pub coverage_penalty: f32,
    /// Shallow-fusion language model weights
    pub lm_weight: TaskPair<f32>,
    /// Replace unknown words by re-decoding their aligned character span
    pub resolving_unk: bool,
    /// Build the sub output from attention-aligned spans of the main output
    pub a2c_oracle: bool,
    /// Rank main hypotheses with the sub decoder's score of their spelling
    pub joint_decoding: bool,
    pub score_sub_weight: f32,
}

impl DecodeRequest {
    /// Greedy decoding with the length bounds of `profile`.
    pub fn greedy(profile: &CorpusProfile) -> Self {
        Self {
            beam_width: TaskPair::new(1, 1),
            bounds: profile.bounds,
            length_penalty: 0.0,
            coverage_penalty: 0.0,
            lm_weight: TaskPair::default(),
            resolving_unk: false,
            a2c_oracle: false,
            joint_decoding: false,
            score_sub_weight: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for task in Task::ALL {
            let width = *self.beam_width.get(task);
            if width == 0 {
                return Err(ConfigError::InvalidBeamWidth { task, width });
            }
        }
        Ok(())
    }

    /// Whether the sub decoder contributes to main-task ranking.
    ///
    /// A zero `score_sub_weight` turns joint decoding off.
    pub fn joint_active(&self) -> bool {
        self.joint_decoding && self.score_sub_weight != 0.0
    }
}
