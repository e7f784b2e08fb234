//! Word and character decoding of one utterance.

use crate::assemble::AssembledModel;
use crate::dataset::Batch;
use crate::decode::align;
use crate::decode::beam::{Hypothesis, SearchParams, beam_search};
use crate::decode::joint::JointScorer;
use crate::decode::request::DecodeRequest;
use crate::error::Result;
use crate::lm::FlattenedLm;
use crate::traits::Encoded;
use crate::types::{Task, TaskPair};
use crate::vocab::{SPACE_SYMBOL, Vocabulary};
use ndarray::{ArrayView2, s};
use std::ops::Range;

/// Decoded outputs of both tasks for one utterance.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodeOutput {
    pub main: Hypothesis,
    pub sub: Hypothesis,
    /// Main output after unknown-word resolution
    pub words: Vec<String>,
    /// Sub output with `_` between words
    pub chars: String,
    /// Unknown words replaced or dropped by resolution
    pub resolved_unk: usize,
}

/// Runs the main and sub searches with the coupling modifiers of a request.
pub struct HierarchicalDecoder<'a> {
    model: &'a mut AssembledModel,
    vocab: &'a TaskPair<Vocabulary>,
    request: &'a DecodeRequest,
}

impl<'a> HierarchicalDecoder<'a> {
    pub fn new(
        model: &'a mut AssembledModel,
        vocab: &'a TaskPair<Vocabulary>,
        request: &'a DecodeRequest,
    ) -> Result<Self> {
        request.validate()?;
        Ok(Self {
            model,
            vocab,
            request,
        })
    }

    pub fn decode_batch(&mut self, batch: &Batch) -> Result<Vec<DecodeOutput>> {
        batch
            .utterances
            .iter()
            .map(|utt| self.decode(utt.features.view()))
            .collect()
    }

    /// Decode one utterance of shape (frames, feature_dim).
    pub fn decode(&mut self, features: ArrayView2<'_, f32>) -> Result<DecodeOutput> {
        let encoded = self.model.model.encode(features)?;

        let main = self.search_main(&encoded)?;

        let spans: Vec<Range<usize>> = if self.request.resolving_unk || self.request.a2c_oracle {
            let main_spans = align::spans(&main.attention, encoded.main.nrows())?;
            main_spans
                .iter()
                .map(|span| align::rescale(span, encoded.main.nrows(), encoded.sub.nrows()))
                .collect()
        } else {
            Vec::new()
        };

        let (words, resolved_unk) = if self.request.resolving_unk {
            self.resolve_unk(&encoded, &main.tokens, &spans)?
        } else {
            (self.symbols(Task::Main, &main.tokens), 0)
        };

        let sub = if self.request.a2c_oracle {
            self.oracle_sub(&encoded, &spans)?
        } else {
            let params = self.params(Task::Sub, encoded.sub.nrows());
            self.search(Task::Sub, encoded.sub.view(), &params, None)?
        };

        let chars = self.symbols(Task::Sub, &sub.tokens).concat();

        Ok(DecodeOutput {
            main,
            sub,
            words,
            chars,
            resolved_unk,
        })
    }

    fn search_main(&mut self, encoded: &Encoded) -> Result<Hypothesis> {
        let params = self.params(Task::Main, encoded.main.nrows());

        if !self.request.joint_active() {
            return self.search(Task::Main, encoded.main.view(), &params, None);
        }

        let vocab = self.vocab;
        let joint = JointScorer::new(
            self.request.score_sub_weight,
            encoded.sub.view(),
            &vocab.main,
            &vocab.sub,
        );
        self.search(Task::Main, encoded.main.view(), &params, Some(&joint))
    }

    fn search(
        &mut self,
        task: Task,
        encoded: ArrayView2<'_, f32>,
        params: &SearchParams,
        joint: Option<&JointScorer<'_>>,
    ) -> Result<Hypothesis> {
        let AssembledModel { model, lm, .. } = &mut *self.model;
        let lm: Option<&mut FlattenedLm> = lm.get_mut(task).as_mut().and_then(|h| h.shallow_mut());

        beam_search(&mut **model, task, encoded, lm, params, joint)
    }

    fn params(&self, task: Task, input_len: usize) -> SearchParams {
        SearchParams::new(self.request, task, input_len, self.vocab.get(task).eos())
    }

    /// Character search restricted to `span` of the sub encoder stream.
    ///
    /// A single word carries no corpus-level minimum length, so only the
    /// ratio-derived maximum applies.
    fn decode_span(&mut self, encoded: &Encoded, span: &Range<usize>) -> Result<Hypothesis> {
        let view = encoded.sub.slice(s![span.clone(), ..]);
        let params = SearchParams {
            min_len: 1.min(span.len()),
            ..self.params(Task::Sub, span.len())
        };
        self.search(Task::Sub, view, &params, None)
    }

    fn spell_span(&mut self, encoded: &Encoded, span: &Range<usize>) -> Result<(Hypothesis, String)> {
        let hyp = self.decode_span(encoded, span)?;
        let word: String = self
            .symbols(Task::Sub, &hyp.tokens)
            .into_iter()
            .filter(|c| c != SPACE_SYMBOL)
            .collect();
        Ok((hyp, word))
    }

    fn resolve_unk(
        &mut self,
        encoded: &Encoded,
        tokens: &[usize],
        spans: &[Range<usize>],
    ) -> Result<(Vec<String>, usize)> {
        let unk = self.vocab.main.unk();
        let mut words = Vec::with_capacity(tokens.len());
        let mut resolved = 0;

        for (i, &token) in tokens.iter().enumerate() {
            let span = spans.get(i).filter(|span| !span.is_empty());

            match span {
                Some(span) if Some(token) == unk => {
                    let (_, word) = self.spell_span(encoded, span)?;
                    tracing::trace!(position = i, ?span, %word, "resolved unknown word");
                    if !word.is_empty() {
                        words.push(word);
                    }
                    resolved += 1;
                }
                _ => words.extend(self.vocab.main.symbol(token).map(str::to_string)),
            }
        }

        Ok((words, resolved))
    }

    /// Sub output assembled from the spans of the main output.
    fn oracle_sub(&mut self, encoded: &Encoded, spans: &[Range<usize>]) -> Result<Hypothesis> {
        let space = self.vocab.sub.space();
        let mut oracle = Hypothesis::default();

        for span in spans.iter().filter(|span| !span.is_empty()) {
            let (hyp, _) = self.spell_span(encoded, span)?;
            let spelled: Vec<usize> = hyp.tokens.into_iter().filter(|&t| Some(t) != space).collect();
            if spelled.is_empty() {
                continue;
            }

            if !oracle.tokens.is_empty()
                && let Some(space) = space
            {
                oracle.tokens.push(space);
            }
            oracle.tokens.extend(spelled);
            oracle.score += hyp.score;
            oracle.truncated |= hyp.truncated;
        }

        Ok(oracle)
    }

    fn symbols(&self, task: Task, tokens: &[usize]) -> Vec<String> {
        self.vocab
            .get(task)
            .decode(tokens)
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusProfile;
    use crate::test_support::{assembled, toy_features, toy_vocab};

    fn request() -> DecodeRequest {
        DecodeRequest::greedy(&CorpusProfile::CSJ)
    }

    #[test]
    fn decodes_both_tasks() {
        let vocab = toy_vocab();
        let mut model = assembled(&vocab);
        let request = request();
        let features = toy_features(&vocab, &[("the", "the", None), ("cat", "cat", None)]);

        let out = HierarchicalDecoder::new(&mut model, &vocab, &request)
            .unwrap()
            .decode(features.view())
            .unwrap();

        assert_eq!(out.words, vec!["the", "cat"]);
        assert_eq!(out.chars, "the_cat");
        assert!(!out.main.truncated && !out.sub.truncated);
        assert_eq!(out.resolved_unk, 0);
    }

    #[test]
    fn resolves_unknown_words_from_characters() {
        let vocab = toy_vocab();
        let mut model = assembled(&vocab);
        let features = toy_features(&vocab, &[("the", "the", None), ("cat", "OOV", None)]);

        let plain = HierarchicalDecoder::new(&mut model, &vocab, &request())
            .unwrap()
            .decode(features.view())
            .unwrap();
        assert_eq!(plain.words, vec!["the", "OOV"]);

        let resolving = DecodeRequest {
            resolving_unk: true,
            ..request()
        };
        let out = HierarchicalDecoder::new(&mut model, &vocab, &resolving)
            .unwrap()
            .decode(features.view())
            .unwrap();

        assert_eq!(out.words, vec!["the", "cat"]);
        assert_eq!(out.resolved_unk, 1);
        assert_eq!(out.main.tokens, plain.main.tokens);
    }

    #[test]
    fn oracle_follows_main_alignment() {
        let vocab = toy_vocab();
        let mut model = assembled(&vocab);
        // the main decoder hears "the hat" where the characters say "the cat"
        let features = toy_features(&vocab, &[("the", "the", None), ("cat", "hat", None)]);

        let oracle = DecodeRequest {
            a2c_oracle: true,
            ..request()
        };
        let out = HierarchicalDecoder::new(&mut model, &vocab, &oracle)
            .unwrap()
            .decode(features.view())
            .unwrap();

        assert_eq!(out.words, vec!["the", "hat"]);
        assert_eq!(out.chars, "the_cat");
    }

    #[test]
    fn joint_decoding_reranks_main_hypotheses() {
        let vocab = toy_vocab();
        let mut model = assembled(&vocab);
        // "hat" is the main decoder's favourite, the characters spell "cat"
        let features = toy_features(&vocab, &[("the", "the", None), ("cat", "cat", Some("hat"))]);

        let independent = HierarchicalDecoder::new(&mut model, &vocab, &request())
            .unwrap()
            .decode(features.view())
            .unwrap();
        assert_eq!(independent.words, vec!["the", "hat"]);

        let joint = DecodeRequest {
            joint_decoding: true,
            score_sub_weight: 0.5,
            ..request()
        };
        let out = HierarchicalDecoder::new(&mut model, &vocab, &joint)
            .unwrap()
            .decode(features.view())
            .unwrap();
        assert_eq!(out.words, vec!["the", "cat"]);
        assert_eq!(out.sub, independent.sub);
    }

    #[test]
    fn joint_decoding_charges_unknown_words() {
        let vocab = toy_vocab();
        let mut model = assembled(&vocab);
        // the main decoder prefers "cat" over "OOV", the characters spell "cat"
        let features = toy_features(&vocab, &[("the", "the", None), ("cat", "OOV", Some("cat"))]);

        let independent = HierarchicalDecoder::new(&mut model, &vocab, &request())
            .unwrap()
            .decode(features.view())
            .unwrap();
        assert_eq!(independent.words, vec!["the", "cat"]);

        let joint = DecodeRequest {
            joint_decoding: true,
            score_sub_weight: 1.0,
            ..request()
        };
        let out = HierarchicalDecoder::new(&mut model, &vocab, &joint)
            .unwrap()
            .decode(features.view())
            .unwrap();

        assert_eq!(out.words, vec!["the", "cat"]);
        assert!(!out.main.truncated);
        assert_eq!(out.chars, "the_cat");
    }

    #[test]
    fn zero_sub_weight_matches_independent_passes() {
        let vocab = toy_vocab();
        let mut model = assembled(&vocab);
        let features = toy_features(&vocab, &[("the", "the", None), ("cat", "cat", Some("hat"))]);

        let independent = HierarchicalDecoder::new(&mut model, &vocab, &request())
            .unwrap()
            .decode(features.view())
            .unwrap();

        let disabled = DecodeRequest {
            joint_decoding: true,
            score_sub_weight: 0.0,
            ..request()
        };
        let out = HierarchicalDecoder::new(&mut model, &vocab, &disabled)
            .unwrap()
            .decode(features.view())
            .unwrap();

        assert_eq!(out, independent);
    }

    #[test]
    fn shallow_fusion_shifts_main_ranking() {
        let vocab = toy_vocab();
        let hat = vocab.main.id("hat").unwrap();
        let mut model = assembled(&vocab).with_shallow_lm(Task::Main, hat, 0.9);
        let features = toy_features(&vocab, &[("the", "the", None), ("cat", "cat", None)]);

        let fused = DecodeRequest {
            lm_weight: TaskPair::new(2.0, 0.0),
            ..request()
        };
        let out = HierarchicalDecoder::new(&mut model, &vocab, &fused)
            .unwrap()
            .decode(features.view())
            .unwrap();

        assert!(out.words.iter().all(|w| w == "hat"), "{:?}", out.words);
        assert_eq!(out.chars, "the_cat");
    }
}
