//! Sub-decoder scoring of main-task prefixes.

use crate::error::Result;
use crate::traits::{AsrModel, RecurrentState};
use crate::types::Task;
use crate::vocab::Vocabulary;
use ndarray::ArrayView2;

/// Longest character run read for a word the vocabulary cannot spell.
const MAX_READ_CHARS: usize = 32;

/// Character-level decoder state after force-feeding a word prefix.
#[derive(Clone, Debug)]
pub(crate) struct SubPrefix {
    state: RecurrentState,
    last: usize,
    words: usize,
    /// Sum of the sub decoder's log-probabilities of the spelled characters
    pub score: f32,
}

/// Scores main-task hypotheses by how well the sub decoder explains their
/// spelling.
pub(crate) struct JointScorer<'a> {
    pub weight: f32,
    encoded: ArrayView2<'a, f32>,
    words: &'a Vocabulary,
    chars: &'a Vocabulary,
}

impl<'a> JointScorer<'a> {
    pub fn new(
        weight: f32,
        encoded: ArrayView2<'a, f32>,
        words: &'a Vocabulary,
        chars: &'a Vocabulary,
    ) -> Self {
        Self {
            weight,
            encoded,
            words,
            chars,
        }
    }

    pub fn init(&self, model: &mut dyn AsrModel) -> Result<SubPrefix> {
        Ok(SubPrefix {
            state: model.initial_state(Task::Sub, self.encoded)?,
            last: self.chars.eos(),
            words: 0,
            score: 0.0,
        })
    }

    /// Extend `prefix` by the spelling of `word`.
    ///
    /// Unknown and unspellable words are charged for the characters the sub
    /// decoder itself reads up to its next word boundary.
    pub fn extend(&self, model: &mut dyn AsrModel, prefix: &SubPrefix, word: usize) -> Result<SubPrefix> {
        let mut next = prefix.clone();

        if prefix.words > 0
            && let Some(space) = self.chars.space()
        {
            next = self.feed(model, next, space)?;
        }

        match self.spelling(word) {
            Some(spelling) => {
                for token in spelling {
                    next = self.feed(model, next, token)?;
                }
            }
            None => next = self.read_word(model, next)?,
        }
        next.words += 1;

        Ok(next)
    }

    /// Close `prefix` with the sub decoder's end-of-sequence probability.
    pub fn finish(&self, model: &mut dyn AsrModel, prefix: &SubPrefix) -> Result<SubPrefix> {
        self.feed(model, prefix.clone(), self.chars.eos())
    }

    fn feed(&self, model: &mut dyn AsrModel, mut prefix: SubPrefix, token: usize) -> Result<SubPrefix> {
        let out = model.step(Task::Sub, self.encoded, &prefix.state, prefix.last)?;
        prefix.score += out.log_probs.get(token).copied().unwrap_or(f32::NEG_INFINITY);
        prefix.state = out.state;
        prefix.last = token;
        Ok(prefix)
    }

    /// Greedily feed the sub decoder's own characters for one word.
    ///
    /// At least one character is read; reading stops where the decoder
    /// prefers a word boundary or end-of-sequence.
    fn read_word(&self, model: &mut dyn AsrModel, mut prefix: SubPrefix) -> Result<SubPrefix> {
        let eos = self.chars.eos();
        let space = self.chars.space();

        for read in 0..MAX_READ_CHARS {
            let out = model.step(Task::Sub, self.encoded, &prefix.state, prefix.last)?;
            let log_probs = &out.log_probs;

            let best = log_probs
                .iter()
                .copied()
                .enumerate()
                .filter(|&(token, _)| token != eos && Some(token) != space)
                .reduce(|best, c| if c.1 > best.1 { c } else { best });
            let Some((token, log_prob)) = best else {
                break;
            };

            let boundary = space
                .into_iter()
                .chain([eos])
                .filter_map(|t| log_probs.get(t).copied())
                .fold(f32::NEG_INFINITY, f32::max);
            if read > 0 && boundary >= log_prob {
                break;
            }

            prefix.score += log_prob;
            prefix.state = out.state;
            prefix.last = token;
        }

        Ok(prefix)
    }

    fn spelling(&self, word: usize) -> Option<Vec<usize>> {
        if Some(word) == self.words.unk() {
            return None;
        }
        self.chars.spell(self.words.symbol(word)?)
    }
}
