//! Evaluation splits: manifests, vocabularies and feature batches.
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_save_path>/
//!   vocab/[<data_size>/]<label_type>.txt
//!   <data_type>/manifest.jsonl
//!   eval2000/glm                (swbd only)
//! ```

use crate::audio::{FeatureConfig, read_audio_mono};
use crate::config::{CONFIG_FILE, ModelConfig};
use crate::error::{ConfigError, DatasetError, Error, Result};
use crate::glm::Glm;
use crate::types::{Task, TaskPair};
use crate::vocab::{SPACE_SYMBOL, Vocabulary};
use ndarray::Array2;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.jsonl";

/// One line of a split manifest.
#[derive(Clone, Debug, Deserialize)]
pub struct ManifestEntry {
    pub utt_id: String,
    /// WAV path relative to the split directory
    pub audio: PathBuf,
    /// Space-separated words
    pub transcript: String,
    /// Character transcript with `_` between words; derived from
    /// `transcript` when absent
    #[serde(default)]
    pub transcript_sub: Option<String>,
}

/// Where and how to build dataset bundles.
#[derive(Clone, Debug)]
pub struct DataSource {
    pub data_save_path: PathBuf,
    pub corpus: String,
    pub label_types: TaskPair<String>,
    pub data_size: String,
    pub features: FeatureConfig,
}

impl DataSource {
    /// Data source matching the labels and features a model was trained on.
    pub fn for_model(
        data_save_path: impl Into<PathBuf>,
        corpus: &str,
        config: &ModelConfig,
    ) -> Result<Self, ConfigError> {
        let input_freq = config.input_freq.ok_or_else(|| ConfigError::MissingField {
            path: PathBuf::from(CONFIG_FILE),
            field: "input_freq",
        })?;

        Ok(Self {
            data_save_path: data_save_path.into(),
            corpus: corpus.to_string(),
            label_types: TaskPair::new(config.label_type.clone(), config.label_type_sub.clone()),
            data_size: config.data_size.clone(),
            features: FeatureConfig {
                input_freq,
                use_delta: config.use_delta,
                use_double_delta: config.use_double_delta,
            },
        })
    }

    pub fn vocab_path(&self, task: Task) -> PathBuf {
        let mut path = self.data_save_path.join("vocab");
        if !self.data_size.is_empty() {
            path.push(&self.data_size);
        }
        path.join(format!("{}.txt", self.label_types.get(task)))
    }

    pub fn split_dir(&self, data_type: &str) -> PathBuf {
        self.data_save_path.join(data_type)
    }

    /// GLM rules used to normalise Switchboard scoring, if present.
    pub fn glm_path(&self) -> Option<PathBuf> {
        if self.corpus != "swbd" {
            return None;
        }
        let path = self.data_save_path.join("eval2000").join("glm");
        path.is_file().then_some(path)
    }

    /// Load the split manifest and both vocabularies.
    pub fn open(&self, data_type: &str) -> Result<DatasetBundle> {
        let dir = self.split_dir(data_type);
        let entries = read_manifest(&dir.join(MANIFEST_FILE))?;

        if entries.is_empty() {
            return Err(DatasetError::EmptySplit(dir).into());
        }

        let vocab = TaskPair::new(
            Vocabulary::from_file(self.vocab_path(Task::Main))?,
            Vocabulary::from_file(self.vocab_path(Task::Sub))?,
        );

        let glm = self.glm_path().map(Glm::from_file).transpose()?;

        tracing::debug!(
            split = data_type,
            utterances = entries.len(),
            num_classes = vocab.main.len(),
            num_classes_sub = vocab.sub.len(),
            feature_dim = self.features.dim(),
            glm = glm.is_some(),
            "opened split"
        );

        let bundle = DatasetBundle::new(data_type, dir, entries, vocab, self.features);

        Ok(match glm {
            Some(glm) => bundle.with_glm(glm),
            None => bundle,
        })
    }
}

fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let text = std::fs::read_to_string(path)?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<ManifestEntry>(line).map_err(|source| {
                Error::from(DatasetError::Manifest {
                    path: path.to_path_buf(),
                    line: i + 1,
                    source,
                })
            })
        })
        .collect()
}

/// A decoded-ready utterance.
#[derive(Clone, Debug)]
pub struct Utterance {
    pub utt_id: String,
    /// Shape (frames, feature_dim)
    pub features: Array2<f32>,
    pub reference: Vec<String>,
    pub reference_sub: String,
}

/// Consecutive utterances decoded together.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    pub utterances: Vec<Utterance>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }
}

/// One evaluation split with its realized vocabularies.
#[derive(Clone, Debug)]
pub struct DatasetBundle {
    pub name: String,
    dir: PathBuf,
    entries: Vec<ManifestEntry>,
    vocab: TaskPair<Vocabulary>,
    features: FeatureConfig,
    glm: Option<Glm>,
}

impl DatasetBundle {
    /// Build a bundle from in-memory parts.
    pub fn new(
        name: impl Into<String>,
        dir: impl Into<PathBuf>,
        entries: Vec<ManifestEntry>,
        vocab: TaskPair<Vocabulary>,
        features: FeatureConfig,
    ) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            entries,
            vocab,
            features,
            glm: None,
        }
    }

    pub fn with_glm(self, glm: Glm) -> Self {
        Self {
            glm: Some(glm),
            ..self
        }
    }

    pub fn num_classes(&self) -> usize {
        self.vocab.main.len()
    }

    pub fn num_classes_sub(&self) -> usize {
        self.vocab.sub.len()
    }

    pub fn vocab(&self) -> &TaskPair<Vocabulary> {
        &self.vocab
    }

    pub fn glm(&self) -> Option<&Glm> {
        self.glm.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over batches of at most `batch_size` utterances.
    ///
    /// Audio is read and featurized lazily, one batch at a time.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = Result<Batch>> + '_ {
        self.entries.chunks(batch_size.max(1)).map(|chunk| {
            let utterances = chunk
                .iter()
                .map(|entry| self.load(entry))
                .collect::<Result<_>>()?;
            Ok(Batch { utterances })
        })
    }

    fn load(&self, entry: &ManifestEntry) -> Result<Utterance> {
        let audio = read_audio_mono(self.dir.join(&entry.audio))?;
        let features = self.features.extract(&audio)?;

        let reference: Vec<String> = entry
            .transcript
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let reference_sub = entry
            .transcript_sub
            .clone()
            .unwrap_or_else(|| reference.join(SPACE_SYMBOL));

        Ok(Utterance {
            utt_id: entry.utt_id.clone(),
            features,
            reference,
            reference_sub,
        })
    }
}
