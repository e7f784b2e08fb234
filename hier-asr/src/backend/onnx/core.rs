//! ONNX model definitions, checkpoint files and session placement.

use crate::checkpoint::{Checkpoint, EpochSelector};
use crate::error::{AssemblyError, Error, Result};
use crate::traits::InferenceSettings;
use crate::types::TaskPair;
use ort::session::Session;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use std::path::{Path, PathBuf};

pub const ENCODER_FILE: &str = "encoder.onnx";
pub const DECODER_FILE: &str = "decoder.onnx";
pub const DECODER_SUB_FILE: &str = "decoder_sub.onnx";
pub const RNNLM_FILE: &str = "rnnlm.onnx";

/// Shape of the LSTM hidden and cell states of a decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LstmShape {
    pub num_layers: usize,
    pub num_units: usize,
}

/// Graph files of a restored checkpoint, or the sessions built from them.
pub(super) enum Stage<F, S> {
    Empty,
    Restored(F),
    Placed(S),
}

pub(super) struct AsrFiles {
    pub encoder: PathBuf,
    pub decoders: TaskPair<PathBuf>,
}

pub(super) struct AsrSessions {
    pub encoder: Session,
    pub decoders: TaskPair<Session>,
}

/// Hierarchical attention model exported as an encoder graph and one
/// single-step decoder graph per task.
pub struct OnnxAsr {
    pub(super) builder: SessionBuilder,
    pub(super) lstm: LstmShape,
    /// Decoders exporting the log-probabilities of an embedded language model
    pub(super) cold_fusion: TaskPair<bool>,
    pub(super) stage: Stage<AsrFiles, AsrSessions>,
}

impl OnnxAsr {
    pub fn new(builder: SessionBuilder, lstm: LstmShape) -> Self {
        Self {
            builder,
            lstm,
            cold_fusion: TaskPair::default(),
            stage: Stage::Empty,
        }
    }

    pub fn with_cold_fusion(self, cold_fusion: TaskPair<bool>) -> Self {
        Self {
            cold_fusion,
            ..self
        }
    }

    pub(super) fn restore(&mut self, save_path: &Path, epoch: EpochSelector) -> Result<usize> {
        let checkpoint = Checkpoint::resolve(save_path, epoch)?;

        self.stage = Stage::Restored(AsrFiles {
            encoder: checkpoint.require(ENCODER_FILE)?,
            decoders: TaskPair::new(
                checkpoint.require(DECODER_FILE)?,
                checkpoint.require(DECODER_SUB_FILE)?,
            ),
        });

        Ok(checkpoint.epoch)
    }

    pub(super) fn place(&mut self, settings: InferenceSettings) -> Result<()> {
        let Stage::Restored(files) = &self.stage else {
            return Err(AssemblyError::NotRestored.into());
        };

        let builder = configure(self.builder.clone(), settings)?;

        let sessions = AsrSessions {
            encoder: commit(&builder, &files.encoder)?,
            decoders: TaskPair::new(
                commit(&builder, &files.decoders.main)?,
                commit(&builder, &files.decoders.sub)?,
            ),
        };

        self.stage = Stage::Placed(sessions);
        Ok(())
    }

    pub(super) fn sessions(&mut self) -> Result<&mut AsrSessions> {
        match &mut self.stage {
            Stage::Placed(sessions) => Ok(sessions),
            _ => Err(AssemblyError::NotRestored.into()),
        }
    }
}

/// Recurrent language model exported as a single-step graph.
pub struct OnnxLm {
    pub(super) builder: SessionBuilder,
    pub(super) lstm: LstmShape,
    pub(super) stage: Stage<PathBuf, Session>,
}

impl OnnxLm {
    pub fn new(builder: SessionBuilder, lstm: LstmShape) -> Self {
        Self {
            builder,
            lstm,
            stage: Stage::Empty,
        }
    }

    pub(super) fn restore(&mut self, save_path: &Path, epoch: EpochSelector) -> Result<usize> {
        let checkpoint = Checkpoint::resolve(save_path, epoch)?;
        self.stage = Stage::Restored(checkpoint.require(RNNLM_FILE)?);
        Ok(checkpoint.epoch)
    }

    /// Commit the optimized session. Later calls are no-ops.
    pub(super) fn flatten(&mut self) -> Result<()> {
        let path = match &self.stage {
            Stage::Empty => return Err(AssemblyError::NotRestored.into()),
            Stage::Restored(path) => path,
            Stage::Placed(_) => return Ok(()),
        };

        let builder = configure(self.builder.clone(), InferenceSettings::EVALUATION)?;
        self.stage = Stage::Placed(commit(&builder, path)?);
        Ok(())
    }

    pub(super) fn session(&mut self) -> Result<&mut Session> {
        match &mut self.stage {
            Stage::Placed(session) => Ok(session),
            _ => Err(AssemblyError::NotRestored.into()),
        }
    }
}

fn configure(builder: SessionBuilder, settings: InferenceSettings) -> Result<SessionBuilder> {
    let level = if settings.benchmark {
        GraphOptimizationLevel::Level3
    } else {
        GraphOptimizationLevel::Level1
    };

    let builder = builder.with_optimization_level(level)?;

    // single-threaded kernels reduce in a fixed order
    if settings.deterministic {
        Ok(builder.with_intra_threads(1)?)
    } else {
        Ok(builder)
    }
}

fn commit(builder: &SessionBuilder, path: &Path) -> Result<Session> {
    tracing::debug!(path = ?path.display(), "committing session");

    builder.clone().commit_from_file(path).map_err(|e| {
        Error::from(AssemblyError::Backend(format!(
            "failed to load {}: {e}",
            path.display()
        )))
    })
}
