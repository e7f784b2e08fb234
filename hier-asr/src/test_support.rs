//! Deterministic in-memory models for unit tests.

use crate::assemble::AssembledModel;
use crate::audio::FeatureConfig;
use crate::checkpoint::EpochSelector;
use crate::config::{ModelConfig, ResolvedModelConfig, ResolvedRnnlmConfig};
use crate::dataset::DatasetBundle;
use crate::error::Result;
use crate::lm::{FlattenedLm, Fusion, LanguageModelHandle};
use crate::traits::{
    AsrModel, Encoded, InferenceSettings, LanguageModel, ModelFactory, RecurrentState, StepOutput,
};
use crate::types::{Task, TaskPair};
use crate::vocab::{SPACE_SYMBOL, Vocabulary};
use ndarray::{Array1, Array2, ArrayD, ArrayView2, arr0};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub fn write_file(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

pub fn model_config(label_type: &str, label_type_sub: &str) -> ModelConfig {
    serde_yaml::from_str(&format!(
        "model_type: hierarchical_attention\nbackend: onnx\nlabel_type: {label_type}\nlabel_type_sub: {label_type_sub}\ninput_freq: 40\n"
    ))
    .unwrap()
}

/// Words `OOV the cat hat`, characters `_ t h e c a`.
pub fn toy_vocab() -> TaskPair<Vocabulary> {
    TaskPair::new(
        Vocabulary::new(["OOV", "the", "cat", "hat"]),
        Vocabulary::new([SPACE_SYMBOL, "t", "h", "e", "c", "a"]),
    )
}

pub fn toy_bundle() -> DatasetBundle {
    DatasetBundle::new(
        "toy",
        "/nonexistent",
        Vec::new(),
        toy_vocab(),
        FeatureConfig {
            input_freq: 40,
            use_delta: false,
            use_double_delta: false,
        },
    )
}

/// Features read back by [`ScriptedAsr`].
///
/// One frame per character of the spelled words joined by `_`. Column 1
/// holds the character id. Column 0 holds the emitted word id at the middle
/// frame of each word and -1 elsewhere; column 2 optionally holds a rival
/// word the main decoder prefers.
pub fn toy_features(
    vocab: &TaskPair<Vocabulary>,
    words: &[(&str, &str, Option<&str>)],
) -> Array2<f32> {
    let spelled: Vec<&str> = words.iter().map(|(spelled, _, _)| *spelled).collect();
    let chars: Vec<String> = spelled
        .join(SPACE_SYMBOL)
        .chars()
        .map(String::from)
        .collect();

    let mut features = Array2::from_elem((chars.len(), 3), -1.0);
    for (t, c) in chars.iter().enumerate() {
        features[[t, 1]] = vocab.sub.id(c).unwrap() as f32;
    }

    let mut start = 0;
    for (spelled, emitted, rival) in words {
        let len = spelled.chars().count();
        let center = start + len / 2;
        features[[center, 0]] = vocab.main.id(emitted).unwrap() as f32;
        if let Some(rival) = rival {
            features[[center, 2]] = vocab.main.id(rival).unwrap() as f32;
        }
        start += len + 1;
    }

    features
}

fn log_distribution(classes: usize, target: usize, rival: Option<usize>) -> Array1<f32> {
    let eos = classes - 1;
    let mut probs = Array1::<f32>::zeros(classes);

    if target == eos {
        probs.fill(0.1 / (classes - 1) as f32);
        probs[eos] = 0.9;
    } else {
        let mut picked = vec![target];
        match rival {
            Some(rival) => {
                probs[rival] = 0.5;
                probs[target] = 0.4;
                picked.push(rival);
            }
            None => probs[target] = 0.9,
        }
        let rest: Vec<usize> = (0..eos).filter(|c| !picked.contains(c)).collect();
        for &c in &rest {
            probs[c] = 0.1 / rest.len() as f32;
        }
    }

    probs.mapv(f32::ln)
}

fn one_hot(frames: usize, at: usize) -> Array1<f32> {
    let mut a = Array1::zeros(frames);
    if frames > 0 {
        a[at.min(frames - 1)] = 1.0;
    }
    a
}

fn position(state: &RecurrentState) -> usize {
    state.0[0].first().copied().unwrap_or(0.0) as usize
}

fn at_position(p: usize) -> RecurrentState {
    RecurrentState(vec![arr0(p as f32).into_dyn()])
}

#[derive(Debug, Default)]
pub struct FactoryLog {
    pub asr_loads: usize,
    pub lm_flattens: usize,
    pub lm_restores: Vec<(PathBuf, EpochSelector)>,
    pub inference_settings: Vec<InferenceSettings>,
}

/// Model that reads its answers from [`toy_features`].
///
/// The sub decoder emits the character of the frame at its position and
/// end-of-sequence past the last frame. The main decoder emits the word
/// marked at its n-th word frame. Neither emits end-of-sequence early.
pub struct ScriptedAsr {
    classes: TaskPair<usize>,
    epoch: usize,
    log: Rc<RefCell<FactoryLog>>,
}

impl ScriptedAsr {
    pub fn new(vocab: &TaskPair<Vocabulary>) -> Self {
        Self {
            classes: TaskPair::new(vocab.main.len() + 1, vocab.sub.len() + 1),
            epoch: 1,
            log: Rc::default(),
        }
    }
}

impl AsrModel for ScriptedAsr {
    fn load_checkpoint(&mut self, _save_path: &Path, _epoch: EpochSelector) -> Result<usize> {
        Ok(self.epoch)
    }

    fn configure_inference(&mut self, settings: InferenceSettings) -> Result<()> {
        self.log.borrow_mut().inference_settings.push(settings);
        Ok(())
    }

    fn encode(&mut self, features: ArrayView2<'_, f32>) -> Result<Encoded> {
        Ok(Encoded {
            main: features.to_owned(),
            sub: features.to_owned(),
        })
    }

    fn initial_state(&mut self, _task: Task, _encoded: ArrayView2<'_, f32>) -> Result<RecurrentState> {
        Ok(at_position(0))
    }

    fn step(
        &mut self,
        task: Task,
        encoded: ArrayView2<'_, f32>,
        state: &RecurrentState,
        _token: usize,
    ) -> Result<StepOutput> {
        let p = position(state);
        let frames = encoded.nrows();
        let classes = *self.classes.get(task);
        let eos = classes - 1;

        let (log_probs, attention) = match task {
            Task::Sub if p < frames => (
                log_distribution(classes, encoded[[p, 1]] as usize, None),
                one_hot(frames, p),
            ),
            Task::Main => {
                let centers: Vec<usize> = (0..frames).filter(|&t| encoded[[t, 0]] >= 0.0).collect();
                match centers.get(p) {
                    Some(&t) => {
                        let rival = (encoded[[t, 2]] >= 0.0).then(|| encoded[[t, 2]] as usize);
                        (
                            log_distribution(classes, encoded[[t, 0]] as usize, rival),
                            one_hot(frames, t),
                        )
                    }
                    None => (log_distribution(classes, eos, None), one_hot(frames, frames)),
                }
            }
            Task::Sub => (log_distribution(classes, eos, None), one_hot(frames, frames)),
        };

        Ok(StepOutput {
            log_probs,
            attention,
            lm_log_probs: None,
            state: at_position(p + 1),
        })
    }
}

/// Model whose distribution depends only on the emitted history.
#[derive(Clone, Debug)]
pub struct TableAsr {
    /// Probabilities by history length, the last row repeating
    rows: Vec<Array1<f32>>,
    /// Probabilities for exact histories
    branches: Vec<(Vec<usize>, Array1<f32>)>,
    /// Embedded language model distribution, the same at every step
    lm: Option<Array1<f32>>,
}

impl TableAsr {
    pub fn new(rows: Vec<Array1<f32>>) -> Self {
        Self {
            rows,
            branches: Vec::new(),
            lm: None,
        }
    }

    /// Decoder carrying a cold-fusion language model with fixed `probs`.
    pub fn with_cold_lm(self, probs: Array1<f32>) -> Self {
        Self {
            lm: Some(probs),
            ..self
        }
    }

    /// Classes `0 1 eos`: token 0 looks best first, token 1 then ends with certainty.
    pub fn branching() -> Self {
        Self {
            rows: vec![ndarray::array![0.1, 0.1, 0.8]],
            branches: vec![
                (vec![], ndarray::array![0.5, 0.4, 0.1]),
                (vec![0], ndarray::array![0.5, 0.1, 0.4]),
                (vec![1], ndarray::array![0.02, 0.02, 0.96]),
            ],
            lm: None,
        }
    }

    fn lookup(&self, history: &[usize]) -> Array1<f32> {
        self.branches
            .iter()
            .find(|(h, _)| h == history)
            .map(|(_, probs)| probs.clone())
            .unwrap_or_else(|| self.rows[history.len().min(self.rows.len() - 1)].clone())
    }
}

impl AsrModel for TableAsr {
    fn load_checkpoint(&mut self, _save_path: &Path, _epoch: EpochSelector) -> Result<usize> {
        Ok(1)
    }

    fn configure_inference(&mut self, _settings: InferenceSettings) -> Result<()> {
        Ok(())
    }

    fn encode(&mut self, features: ArrayView2<'_, f32>) -> Result<Encoded> {
        Ok(Encoded {
            main: features.to_owned(),
            sub: features.to_owned(),
        })
    }

    /// History plus a started flag.
    fn initial_state(&mut self, _task: Task, _encoded: ArrayView2<'_, f32>) -> Result<RecurrentState> {
        Ok(RecurrentState(vec![
            ArrayD::zeros(ndarray::IxDyn(&[0])),
            arr0(0.0).into_dyn(),
        ]))
    }

    fn step(
        &mut self,
        _task: Task,
        encoded: ArrayView2<'_, f32>,
        state: &RecurrentState,
        token: usize,
    ) -> Result<StepOutput> {
        let mut history: Vec<usize> = state.0[0].iter().map(|&t| t as usize).collect();
        if state.0[1].first().copied().unwrap_or(0.0) > 0.0 {
            history.push(token);
        }

        let frames = encoded.nrows();
        let attention = Array1::from_elem(frames, 1.0 / frames.max(1) as f32);
        let log_probs = self.lookup(&history).mapv(f32::ln);

        let history = Array1::from_iter(history.iter().map(|&t| t as f32)).into_dyn();

        Ok(StepOutput {
            log_probs,
            attention,
            lm_log_probs: self.lm.as_ref().map(|probs| probs.mapv(f32::ln)),
            state: RecurrentState(vec![history, arr0(1.0).into_dyn()]),
        })
    }
}

/// Language model with a fixed favourite token.
pub struct ScriptedLm {
    classes: usize,
    preferred: usize,
    prob: f32,
    log: Rc<RefCell<FactoryLog>>,
}

impl LanguageModel for ScriptedLm {
    fn load_checkpoint(&mut self, save_path: &Path, epoch: EpochSelector) -> Result<usize> {
        self.log
            .borrow_mut()
            .lm_restores
            .push((save_path.to_path_buf(), epoch));
        Ok(3)
    }

    fn flatten_parameters(&mut self) -> Result<()> {
        self.log.borrow_mut().lm_flattens += 1;
        Ok(())
    }

    fn initial_state(&mut self) -> Result<RecurrentState> {
        Ok(RecurrentState::default())
    }

    fn step(&mut self, state: &RecurrentState, _token: usize) -> Result<(Array1<f32>, RecurrentState)> {
        let mut probs = Array1::from_elem(self.classes, (1.0 - self.prob) / (self.classes - 1) as f32);
        probs[self.preferred] = self.prob;
        Ok((probs.mapv(f32::ln), state.clone()))
    }
}

/// Factory recording what assembly asked of it.
#[derive(Default)]
pub struct ScriptedFactory {
    epoch: Option<usize>,
    log: Rc<RefCell<FactoryLog>>,
}

impl ScriptedFactory {
    pub fn with_epoch(self, epoch: usize) -> Self {
        Self {
            epoch: Some(epoch),
            ..self
        }
    }

    pub fn asr_loads(&self) -> usize {
        self.log.borrow().asr_loads
    }

    pub fn lm_flattens(&self) -> usize {
        self.log.borrow().lm_flattens
    }

    pub fn lm_restores(&self) -> Vec<(PathBuf, EpochSelector)> {
        self.log.borrow().lm_restores.clone()
    }

    pub fn inference_settings(&self) -> Vec<InferenceSettings> {
        self.log.borrow().inference_settings.clone()
    }
}

impl ModelFactory for ScriptedFactory {
    fn load_asr(&self, config: &ResolvedModelConfig) -> Result<Box<dyn AsrModel>> {
        self.log.borrow_mut().asr_loads += 1;
        Ok(Box::new(ScriptedAsr {
            classes: config.num_classes.map(|_, n| n + 1),
            epoch: self.epoch.unwrap_or(1),
            log: Rc::clone(&self.log),
        }))
    }

    fn load_lm(&self, config: &ResolvedRnnlmConfig) -> Result<Box<dyn LanguageModel>> {
        Ok(Box::new(ScriptedLm {
            classes: config.num_classes + 1,
            preferred: 0,
            prob: 0.5,
            log: Rc::clone(&self.log),
        }))
    }
}

/// Scripted model assembled without language models.
pub fn assembled(vocab: &TaskPair<Vocabulary>) -> AssembledModel {
    AssembledModel {
        model: Box::new(ScriptedAsr::new(vocab)),
        lm: TaskPair::default(),
        config: ResolvedModelConfig {
            model: model_config("word1", "character"),
            num_classes: TaskPair::new(vocab.main.len(), vocab.sub.len()),
            cold_fusion: TaskPair::default(),
        },
    }
}

impl AssembledModel {
    /// Attach a shallow-fusion LM favouring `preferred` with probability `prob`.
    pub fn with_shallow_lm(mut self, task: Task, preferred: usize, prob: f32) -> Self {
        let classes = *self.config.num_classes.get(task) + 1;
        let lm = ScriptedLm {
            classes,
            preferred,
            prob,
            log: Rc::default(),
        };
        *self.lm.get_mut(task) = Some(LanguageModelHandle {
            task,
            path: PathBuf::from("/scripted/lm"),
            weight: 1.0,
            fusion: Fusion::Shallow(FlattenedLm::new(Box::new(lm)).unwrap()),
        });
        self
    }
}
