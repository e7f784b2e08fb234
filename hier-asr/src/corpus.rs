//! Decode-length profiles per corpus.

use crate::error::ConfigError;
use crate::types::{Task, TaskPair};

/// Absolute and input-relative decode-length bounds for one task.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LengthBounds {
    pub max_len: usize,
    pub min_len: usize,
    pub max_len_ratio: f32,
    pub min_len_ratio: f32,
}

impl LengthBounds {
    /// Effective maximum length for an input of `input_len` encoder frames.
    ///
    /// The minimum of the absolute cap and `max_len_ratio * input_len`.
    pub fn max_for(&self, input_len: usize) -> usize {
        let by_ratio = (self.max_len_ratio * input_len as f32).floor() as usize;
        self.max_len.min(by_ratio)
    }

    /// Effective minimum length for an input of `input_len` encoder frames.
    ///
    /// The larger of the absolute floor and `min_len_ratio * input_len`,
    /// never above [`LengthBounds::max_for`].
    pub fn min_for(&self, input_len: usize) -> usize {
        let by_ratio = (self.min_len_ratio * input_len as f32).floor() as usize;
        self.min_len.max(by_ratio).min(self.max_for(input_len))
    }
}

/// Decode-length bounds for both tasks of one corpus.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorpusProfile {
    pub name: &'static str,
    pub bounds: TaskPair<LengthBounds>,
}

impl CorpusProfile {
    pub const CSJ: Self = Self {
        name: "csj",
        bounds: TaskPair {
            main: LengthBounds {
                max_len: 100,
                min_len: 1,
                max_len_ratio: 1.0,
                min_len_ratio: 0.0,
            },
            sub: LengthBounds {
                max_len: 200,
                min_len: 1,
                max_len_ratio: 1.0,
                min_len_ratio: 0.2,
            },
        },
    };

    pub const SWBD: Self = Self {
        name: "swbd",
        bounds: TaskPair {
            main: LengthBounds {
                max_len: 100,
                min_len: 1,
                max_len_ratio: 1.0,
                min_len_ratio: 0.0,
            },
            sub: LengthBounds {
                max_len: 300,
                min_len: 1,
                max_len_ratio: 1.0,
                min_len_ratio: 0.2,
            },
        },
    };

    pub const LIBRISPEECH: Self = Self {
        name: "librispeech",
        bounds: TaskPair {
            main: LengthBounds {
                max_len: 200,
                min_len: 1,
                max_len_ratio: 1.0,
                min_len_ratio: 0.0,
            },
            sub: LengthBounds {
                max_len: 600,
                min_len: 1,
                max_len_ratio: 1.0,
                min_len_ratio: 0.2,
            },
        },
    };

    /// dev93: 2-32 words, 10-199 chars; test_eval92: 3-30 words, 16-195 chars.
    pub const WSJ: Self = Self {
        name: "wsj",
        bounds: TaskPair {
            main: LengthBounds {
                max_len: 32,
                min_len: 2,
                max_len_ratio: 1.0,
                min_len_ratio: 0.0,
            },
            sub: LengthBounds {
                max_len: 199,
                min_len: 10,
                max_len_ratio: 1.0,
                min_len_ratio: 0.2,
            },
        },
    };

    pub const SUPPORTED: [Self; 4] = [Self::CSJ, Self::SWBD, Self::LIBRISPEECH, Self::WSJ];

    /// Look up the profile for a corpus identifier.
    pub fn resolve(corpus_id: &str) -> Result<Self, ConfigError> {
        Self::SUPPORTED
            .into_iter()
            .find(|profile| profile.name == corpus_id)
            .ok_or_else(|| ConfigError::UnknownCorpus(corpus_id.to_string()))
    }

    pub fn bounds(&self, task: Task) -> &LengthBounds {
        self.bounds.get(task)
    }
}
