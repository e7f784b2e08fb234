//! Split evaluation: decode every utterance and score both tasks.

use crate::assemble::AssembledModel;
use crate::dataset::{Batch, DatasetBundle, Utterance};
use crate::decode::{DecodeOutput, DecodeRequest, HierarchicalDecoder};
use crate::error::Result;
use crate::glm::Glm;
use crate::metrics::{ErrorCounts, char_errors, word_errors};
use crate::vocab::SPACE_SYMBOL;
use serde::Serialize;
use std::ops::{AddAssign, Div};

/// Number of evaluation splits the reported mean is divided by, regardless
/// of how many splits were evaluated.
pub const LEGACY_SPLIT_DIVISOR: f64 = 3.0;

/// Word-level diagnostic row of one utterance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WordRow {
    pub utt_id: String,
    pub reference: String,
    pub hypothesis: String,
    #[serde(flatten)]
    pub errors: ErrorCounts,
    pub truncated: bool,
}

/// Character-level diagnostic row of one utterance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CharRow {
    pub utt_id: String,
    pub reference: String,
    pub hypothesis: String,
    #[serde(flatten)]
    pub errors: ErrorCounts,
    pub truncated: bool,
}

/// Error rates of one split, in percent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Scores {
    /// Main task word error rate
    pub wer: f64,
    /// Sub task word error rate
    pub wer_sub: f64,
    /// Sub task character error rate
    pub cer_sub: f64,
}

impl AddAssign for Scores {
    fn add_assign(&mut self, rhs: Self) {
        self.wer += rhs.wer;
        self.wer_sub += rhs.wer_sub;
        self.cer_sub += rhs.cer_sub;
    }
}

impl Div<f64> for Scores {
    type Output = Self;

    fn div(self, rhs: f64) -> Self {
        Self {
            wer: self.wer / rhs,
            wer_sub: self.wer_sub / rhs,
            cer_sub: self.cer_sub / rhs,
        }
    }
}

/// Scores and diagnostics of one evaluation split.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EvaluationReport {
    pub split: String,
    pub scores: Scores,
    /// Unknown words replaced or dropped from the main output
    pub resolved_unk: usize,
    pub words: Vec<WordRow>,
    pub words_sub: Vec<WordRow>,
    pub chars_sub: Vec<CharRow>,
}

impl EvaluationReport {
    fn new(split: &str) -> Self {
        Self {
            split: split.to_string(),
            ..Self::default()
        }
    }

    fn push(&mut self, utt: &Utterance, out: &DecodeOutput, glm: Option<&Glm>) {
        let normalize = |words: &[String]| match glm {
            Some(glm) => glm.apply(words),
            None => words.to_vec(),
        };

        let reference = normalize(&utt.reference);
        let hypothesis = normalize(&out.words);
        self.words.push(WordRow {
            utt_id: utt.utt_id.clone(),
            errors: word_errors(&reference, &hypothesis),
            reference: reference.join(" "),
            hypothesis: hypothesis.join(" "),
            truncated: out.main.truncated,
        });

        let reference_sub = normalize(&split_words(&utt.reference_sub));
        let hypothesis_sub = normalize(&split_words(&out.chars));
        self.words_sub.push(WordRow {
            utt_id: utt.utt_id.clone(),
            errors: word_errors(&reference_sub, &hypothesis_sub),
            reference: reference_sub.join(" "),
            hypothesis: hypothesis_sub.join(" "),
            truncated: out.sub.truncated,
        });

        self.chars_sub.push(CharRow {
            utt_id: utt.utt_id.clone(),
            errors: char_errors(&utt.reference_sub, &out.chars, '_'),
            reference: utt.reference_sub.clone(),
            hypothesis: out.chars.clone(),
            truncated: out.sub.truncated,
        });

        self.resolved_unk += out.resolved_unk;
    }

    /// Corpus-level rates: summed errors over summed reference lengths.
    fn finish(mut self) -> Self {
        let wer: ErrorCounts = self.words.iter().map(|row| row.errors).sum();
        let wer_sub: ErrorCounts = self.words_sub.iter().map(|row| row.errors).sum();
        let cer_sub: ErrorCounts = self.chars_sub.iter().map(|row| row.errors).sum();

        self.scores = Scores {
            wer: wer.rate(),
            wer_sub: wer_sub.rate(),
            cer_sub: cer_sub.rate(),
        };
        self
    }

    pub fn num_utterances(&self) -> usize {
        self.words.len()
    }

    pub fn num_truncated(&self) -> usize {
        self.words.iter().filter(|row| row.truncated).count()
            + self.chars_sub.iter().filter(|row| row.truncated).count()
    }
}

fn split_words(chars: &str) -> Vec<String> {
    chars
        .split(SPACE_SYMBOL)
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Decode and score one split.
pub fn evaluate(
    model: &mut AssembledModel,
    bundle: &DatasetBundle,
    request: &DecodeRequest,
    batch_size: usize,
) -> Result<EvaluationReport> {
    let mut decoder = HierarchicalDecoder::new(model, bundle.vocab(), request)?;
    evaluate_batches(
        &mut decoder,
        &bundle.name,
        bundle.len(),
        bundle.batches(batch_size),
        bundle.glm(),
    )
}

/// Decode and score a stream of batches as split `split`.
///
/// `total` is only used for progress reporting.
pub fn evaluate_batches<I>(
    decoder: &mut HierarchicalDecoder<'_>,
    split: &str,
    total: usize,
    batches: I,
    glm: Option<&Glm>,
) -> Result<EvaluationReport>
where
    I: IntoIterator<Item = Result<Batch>>,
{
    let mut report = EvaluationReport::new(split);

    for (i, batch) in batches.into_iter().enumerate() {
        let batch = batch?;
        let outputs = decoder.decode_batch(&batch)?;

        for (utt, out) in batch.utterances.iter().zip(&outputs) {
            tracing::trace!(utt_id = %utt.utt_id, hyp = %out.words.join(" "), hyp_sub = %out.chars, "decoded");
            report.push(utt, out, glm);
        }

        tracing::info!(
            split,
            batch = i + 1,
            decoded = report.num_utterances(),
            total,
            "decoding"
        );
    }

    let report = report.finish();

    tracing::debug!(
        split,
        truncated = report.num_truncated(),
        resolved_unk = report.resolved_unk,
        "split decoded"
    );

    Ok(report)
}

/// Running sums of split scores.
#[derive(Clone, Copy, Debug, Default)]
pub struct SplitAccumulator {
    sum: Scores,
    splits: usize,
}

impl SplitAccumulator {
    pub fn add(&mut self, scores: Scores) {
        self.sum += scores;
        self.splits += 1;
    }

    pub fn splits(&self) -> usize {
        self.splits
    }

    /// Unweighted mean over the splits added so far.
    pub fn mean(&self) -> Option<Scores> {
        (self.splits > 0).then(|| self.sum / self.splits as f64)
    }

    /// Sum divided by [`LEGACY_SPLIT_DIVISOR`], whatever the split count.
    ///
    /// This is the figure logged as the mean across splits.
    pub fn reported_mean(&self) -> Scores {
        self.sum / LEGACY_SPLIT_DIVISOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusProfile;
    use crate::test_support::{assembled, toy_features, toy_vocab};

    fn scores(wer: f64) -> Scores {
        Scores {
            wer,
            wer_sub: wer,
            cer_sub: wer,
        }
    }

    fn utterance(utt_id: &str, words: &[(&str, &str, Option<&str>)]) -> Utterance {
        let vocab = toy_vocab();
        let reference: Vec<String> = words.iter().map(|(w, _, _)| w.to_string()).collect();
        Utterance {
            utt_id: utt_id.to_string(),
            features: toy_features(&vocab, words),
            reference_sub: reference.join(SPACE_SYMBOL),
            reference,
        }
    }

    #[test]
    fn mean_of_one_split_is_identity() {
        let mut acc = SplitAccumulator::default();
        acc.add(scores(12.5));
        assert_eq!(acc.mean(), Some(scores(12.5)));
    }

    #[test]
    fn reported_mean_divides_by_three() {
        let mut acc = SplitAccumulator::default();
        acc.add(scores(10.0));
        acc.add(scores(20.0));

        assert_eq!(acc.splits(), 2);
        assert_eq!(acc.mean(), Some(scores(15.0)));
        assert_eq!(acc.reported_mean(), scores(10.0));
    }

    #[test]
    fn empty_accumulator_has_no_mean() {
        let acc = SplitAccumulator::default();
        assert_eq!(acc.mean(), None);
        assert_eq!(acc.reported_mean(), Scores::default());
    }

    #[test]
    fn scores_corpus_wide_error_counts() {
        let vocab = toy_vocab();
        let mut model = assembled(&vocab);
        let request = DecodeRequest::greedy(&CorpusProfile::CSJ);
        let mut decoder = HierarchicalDecoder::new(&mut model, &vocab, &request).unwrap();

        // second utterance: main hears "hat" for "cat"
        let batches = vec![
            Ok(Batch {
                utterances: vec![utterance("a", &[("the", "the", None), ("cat", "cat", None)])],
            }),
            Ok(Batch {
                utterances: vec![utterance("b", &[("the", "the", None), ("cat", "hat", None)])],
            }),
        ];

        let report = evaluate_batches(&mut decoder, "dev", 2, batches, None).unwrap();

        assert_eq!(report.split, "dev");
        assert_eq!(report.num_utterances(), 2);
        assert_eq!(report.words[1].hypothesis, "the hat");
        assert_eq!(report.words[1].errors.substitutions, 1);
        assert_eq!(report.scores.wer, 25.0);
        assert_eq!(report.scores.wer_sub, 0.0);
        assert_eq!(report.scores.cer_sub, 0.0);
        assert_eq!(report.num_truncated(), 0);
    }

    #[test]
    fn glm_normalizes_both_sides() {
        let vocab = toy_vocab();
        let mut model = assembled(&vocab);
        let request = DecodeRequest::greedy(&CorpusProfile::SWBD);
        let mut decoder = HierarchicalDecoder::new(&mut model, &vocab, &request).unwrap();
        let glm = Glm::parse("[hat] => [cat]\n");

        let batches = vec![Ok(Batch {
            utterances: vec![utterance("b", &[("the", "the", None), ("cat", "hat", None)])],
        })];

        let report = evaluate_batches(&mut decoder, "eval2000", 1, batches, Some(&glm)).unwrap();

        assert_eq!(report.words[0].hypothesis, "the cat");
        assert_eq!(report.scores.wer, 0.0);
    }

    #[test]
    fn batch_errors_propagate() {
        let vocab = toy_vocab();
        let mut model = assembled(&vocab);
        let request = DecodeRequest::greedy(&CorpusProfile::CSJ);
        let mut decoder = HierarchicalDecoder::new(&mut model, &vocab, &request).unwrap();

        let batches: Vec<Result<Batch>> = vec![Err(crate::error::DatasetError::InvalidChannels(0).into())];

        assert!(evaluate_batches(&mut decoder, "dev", 1, batches, None).is_err());
    }
}
