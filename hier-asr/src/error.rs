//! Error types for hier-asr organized by processing stage.

use crate::types::Task;
use ndarray::ShapeError;
use ndarray_stats::errors::MinMaxError;
use std::path::PathBuf;
use thiserror::Error;

/// Evaluation error variants organized by processing stage.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration stage error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Model assembly stage error
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// Dataset loading stage error
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    /// Model inference stage error
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Configuration errors. All of them are raised before any decoding starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Corpus identifier without a decode-length profile
    #[error("unknown corpus: {0:?} (expected one of csj, swbd, librispeech, wsj)")]
    UnknownCorpus(String),

    /// Language model trained on a different label type than the task decoder
    #[error("label type mismatch for {task} task: decoder uses {expected:?}, language model uses {found:?}")]
    LabelTypeMismatch {
        task: Task,
        expected: String,
        found: String,
    },

    /// Fusion weight without a language model, or a language model without weight
    #[error("asymmetric fusion configuration for {task} task: weight {weight}, path {path:?}")]
    AsymmetricFusion {
        task: Task,
        weight: f32,
        path: Option<PathBuf>,
    },

    /// Cold fusion is configured but the decode-time weight is not positive
    #[error("cold fusion for {task} task requires a positive weight, got {weight}")]
    ColdFusionWeight { task: Task, weight: f32 },

    /// Required field missing from a config file
    #[error("missing field `{field}` in {path:?}")]
    MissingField { path: PathBuf, field: &'static str },

    /// Epoch selector below -1
    #[error("invalid epoch: {0} (use -1 for the latest checkpoint)")]
    InvalidEpoch(i64),

    /// Beam width of zero
    #[error("invalid beam width for {task} task: {width}")]
    InvalidBeamWidth { task: Task, width: usize },

    /// Config file could not be read
    #[error("failed to read config {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid YAML for the expected schema
    #[error("failed to parse config {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Model assembly errors (checkpoint restoration, backend loading).
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// No checkpoint at or before the requested epoch
    #[error("no checkpoint found in {dir:?} (requested epoch: {epoch})")]
    CheckpointNotFound { dir: PathBuf, epoch: String },

    /// Checkpoint directory lacks a file required by the declared architecture
    #[error("checkpoint {dir:?} is missing {file}")]
    CheckpointIncomplete { dir: PathBuf, file: &'static str },

    /// Backend not supported by this build
    #[error("unsupported backend: {0:?}")]
    UnsupportedBackend(String),

    /// Inference requested before parameters were restored
    #[error("model parameters have not been restored")]
    NotRestored,

    /// Backend failed while committing a model
    #[error("backend error: {0}")]
    Backend(String),
}

/// Dataset loading and validation errors.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Manifest line is not valid JSON
    #[error("invalid manifest entry at {path:?}:{line}")]
    Manifest {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Split without utterances
    #[error("evaluation split {0:?} is empty")]
    EmptySplit(PathBuf),

    /// Vocabulary file without symbols
    #[error("vocabulary {0:?} is empty")]
    EmptyVocabulary(PathBuf),

    /// Sample rate validation failed
    #[error("invalid sample rate: expected {expected}Hz, got {got}Hz")]
    InvalidSampleRate { expected: u32, got: u32 },

    /// Channel count validation failed
    #[error("invalid channel count: expected mono or stereo, got {0} channels")]
    InvalidChannels(u16),

    /// Audio too short to produce a single analysis frame
    #[error("audio too short: {samples} samples (need at least {min})")]
    AudioTooShort { samples: usize, min: usize },

    /// IO error during dataset loading
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// WAV file format error
    #[error(transparent)]
    Hound(#[from] hound::Error),
}

/// Model inference errors (ONNX, ndarray operations).
#[derive(Debug, Error)]
pub enum ModelError {
    /// Missing expected output tensor
    #[error("missing model output: {name}")]
    MissingOutput { name: String },

    /// Output distribution size disagrees with the task vocabulary
    #[error("{task} decoder produced {got} classes, expected {expected}")]
    VocabularyMismatch {
        task: Task,
        expected: usize,
        got: usize,
    },

    /// ONNX Runtime error
    #[error(transparent)]
    Ort(#[from] ort::Error),

    /// ndarray shape error
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// ndarray-stats min/max error
    #[error(transparent)]
    MinMax(#[from] MinMaxError),
}

/// Result type alias for hier-asr operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

// Nested From implementations for automatic error conversion chains

// hound::Error → DatasetError → Error
impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        Error::Dataset(DatasetError::Hound(e))
    }
}

// std::io::Error → DatasetError → Error
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Dataset(DatasetError::Io(e))
    }
}

// ort::Error → ModelError → Error
impl From<ort::Error> for Error {
    fn from(e: ort::Error) -> Self {
        Error::Model(ModelError::Ort(e))
    }
}

// ShapeError → ModelError → Error
impl From<ShapeError> for Error {
    fn from(e: ShapeError) -> Self {
        Error::Model(ModelError::Shape(e))
    }
}

// MinMaxError → ModelError → Error
impl From<MinMaxError> for Error {
    fn from(e: MinMaxError) -> Self {
        Error::Model(ModelError::MinMax(e))
    }
}
