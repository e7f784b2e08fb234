//! Attention beam search for one task.

use crate::decode::joint::{JointScorer, SubPrefix};
use crate::decode::request::DecodeRequest;
use crate::error::{ModelError, Result};
use crate::lm::FlattenedLm;
use crate::traits::{AsrModel, RecurrentState, StepOutput};
use crate::types::Task;
use ndarray::{Array1, ArrayView2, ErrorKind, ShapeError};
use serde::Serialize;

/// Minimum number of candidates per beam rescored by the sub decoder.
const JOINT_PRE_BEAM: usize = 8;

/// Best output sequence of one task for one utterance.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Hypothesis {
    /// Class indices, end-of-sequence excluded
    pub tokens: Vec<usize>,
    pub score: f32,
    /// Attention weights of the step that emitted each token
    #[serde(skip)]
    pub attention: Vec<Array1<f32>>,
    /// Reached the maximum length without emitting end-of-sequence
    pub truncated: bool,
}

/// Search settings for one task and input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchParams {
    pub beam_width: usize,
    pub min_len: usize,
    pub max_len: usize,
    pub eos: usize,
    pub length_penalty: f32,
    pub coverage_penalty: f32,
    pub lm_weight: f32,
}

impl SearchParams {
    /// Settings for `task` over an encoder stream of `input_len` frames.
    pub fn new(request: &DecodeRequest, task: Task, input_len: usize, eos: usize) -> Self {
        let bounds = request.bounds.get(task);
        Self {
            beam_width: *request.beam_width.get(task),
            min_len: bounds.min_for(input_len),
            max_len: bounds.max_for(input_len),
            eos,
            length_penalty: request.length_penalty,
            coverage_penalty: request.coverage_penalty,
            lm_weight: *request.lm_weight.get(task),
        }
    }
}

#[derive(Clone, Debug)]
struct Beam {
    tokens: Vec<usize>,
    /// Acoustic, language model and penalty terms
    score: f32,
    /// `score` plus the weighted sub-decoder score under joint decoding
    rank: f32,
    state: RecurrentState,
    lm_state: Option<RecurrentState>,
    coverage: Array1<f32>,
    coverage_score: f32,
    attention: Vec<Array1<f32>>,
    sub: Option<SubPrefix>,
}

struct Expansion {
    out: StepOutput,
    lm_state: Option<RecurrentState>,
    coverage: Array1<f32>,
    coverage_score: f32,
}

struct Candidate {
    parent: usize,
    token: usize,
    score: f32,
    rank: f32,
    sub: Option<SubPrefix>,
}

/// Run beam search for `task` over `encoded`.
///
/// Each step scores a symbol by its log-probability plus the length and
/// coverage penalties and, when a language model is attached either as
/// `lm` or inside the decoder, `lm_weight` times its log-probability.
///
/// Finished hypotheses have between `min_len` and `max_len` tokens. When no
/// beam emits end-of-sequence, the best unfinished beam at the length cap is
/// returned with `truncated` set and exactly `max_len` tokens.
pub fn beam_search(
    model: &mut dyn AsrModel,
    task: Task,
    encoded: ArrayView2<'_, f32>,
    mut lm: Option<&mut FlattenedLm>,
    params: &SearchParams,
    joint: Option<&JointScorer<'_>>,
) -> Result<Hypothesis> {
    let frames = encoded.nrows();
    let eos = params.eos;

    let initial = Beam {
        tokens: Vec::new(),
        score: 0.0,
        rank: 0.0,
        state: model.initial_state(task, encoded)?,
        lm_state: lm.as_mut().map(|lm| lm.initial_state()).transpose()?,
        coverage: Array1::zeros(frames),
        coverage_score: 0.0,
        attention: Vec::new(),
        sub: joint.map(|j| j.init(model)).transpose()?,
    };

    let pre_beam = match joint {
        Some(_) => params.beam_width.max(JOINT_PRE_BEAM),
        None => params.beam_width,
    };

    let mut active = vec![initial];
    let mut finished: Vec<Hypothesis> = Vec::new();

    for step in 0..=params.max_len {
        let mut candidates = Vec::new();
        let mut expansions = Vec::with_capacity(active.len());

        for (parent, beam) in active.iter().enumerate() {
            let last = beam.tokens.last().copied().unwrap_or(eos);

            let out = model.step(task, encoded, &beam.state, last)?;
            check_classes(task, &out.log_probs, eos)?;
            if out.attention.len() != frames {
                return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
            }

            let mut scores = out.log_probs.clone();

            let lm_state = match (lm.as_mut(), &beam.lm_state) {
                (Some(lm), Some(state)) => {
                    let (lm_log_probs, next) = lm.step(state, last)?;
                    check_classes(task, &lm_log_probs, eos)?;
                    if params.lm_weight != 0.0 {
                        scores.scaled_add(params.lm_weight, &lm_log_probs);
                    }
                    Some(next)
                }
                _ => None,
            };

            if let Some(cold) = &out.lm_log_probs {
                check_classes(task, cold, eos)?;
                if params.lm_weight != 0.0 {
                    scores.scaled_add(params.lm_weight, cold);
                }
            }

            let coverage = &beam.coverage + &out.attention;
            let coverage_score: f32 = coverage.iter().map(|c| c.min(1.0)).sum();
            let bonus = params.length_penalty
                + params.coverage_penalty * (coverage_score - beam.coverage_score);

            let eos_score = scores[eos];
            scores += bonus;
            scores[eos] = eos_score;

            if step < params.min_len {
                scores[eos] = f32::NEG_INFINITY;
            }
            if step == params.max_len {
                scores.fill(f32::NEG_INFINITY);
                scores[eos] = eos_score;
            }

            let mut ranked = top_k(&scores, pre_beam);
            if ranked.is_empty() && step < params.max_len {
                // every class is impossible: keep growing towards the cap
                ranked.extend(best_symbol(&scores, eos));
            }

            for (token, delta) in ranked {
                let score = beam.score + delta;
                candidates.push(Candidate {
                    parent,
                    token,
                    score,
                    rank: score,
                    sub: None,
                });
            }

            expansions.push(Expansion {
                out,
                lm_state,
                coverage,
                coverage_score,
            });
        }

        if let Some(joint) = joint {
            for candidate in &mut candidates {
                let Some(prefix) = active[candidate.parent].sub.as_ref() else {
                    continue;
                };
                let sub = if candidate.token == eos {
                    joint.finish(model, prefix)?
                } else {
                    joint.extend(model, prefix, candidate.token)?
                };
                candidate.rank = candidate.score + joint.weight * sub.score;
                candidate.sub = Some(sub);
            }
        }

        if candidates.is_empty() {
            break;
        }

        // stable: equal ranks keep parent order, then token order
        candidates.sort_by(|a, b| b.rank.total_cmp(&a.rank));
        candidates.truncate(params.beam_width);

        let mut next = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let parent = &active[candidate.parent];

            if candidate.token == eos {
                finished.push(Hypothesis {
                    tokens: parent.tokens.clone(),
                    score: candidate.rank,
                    attention: parent.attention.clone(),
                    truncated: false,
                });
                continue;
            }

            let expansion = &expansions[candidate.parent];

            let mut tokens = parent.tokens.clone();
            tokens.push(candidate.token);
            let mut attention = parent.attention.clone();
            attention.push(expansion.out.attention.clone());

            next.push(Beam {
                tokens,
                score: candidate.score,
                rank: candidate.rank,
                state: expansion.out.state.clone(),
                lm_state: expansion.lm_state.clone(),
                coverage: expansion.coverage.clone(),
                coverage_score: expansion.coverage_score,
                attention,
                sub: candidate.sub,
            });
        }

        tracing::trace!(%task, step, active = next.len(), finished = finished.len());

        if next.is_empty() {
            break;
        }
        active = next;
    }

    // earliest finalization wins ties
    let best_finished = finished
        .into_iter()
        .reduce(|best, h| if h.score > best.score { h } else { best });

    if let Some(best) = best_finished {
        return Ok(best);
    }

    let best_active = active
        .into_iter()
        .reduce(|best, b| if b.rank > best.rank { b } else { best });

    Ok(best_active
        .map(|beam| Hypothesis {
            tokens: beam.tokens,
            score: beam.rank,
            attention: beam.attention,
            truncated: true,
        })
        .unwrap_or_default())
}

fn check_classes(task: Task, log_probs: &Array1<f32>, eos: usize) -> Result<()> {
    if log_probs.len() != eos + 1 {
        return Err(ModelError::VocabularyMismatch {
            task,
            expected: eos + 1,
            got: log_probs.len(),
        }
        .into());
    }
    Ok(())
}

/// Highest-scoring class other than end-of-sequence, impossible ones included.
fn best_symbol(scores: &Array1<f32>, eos: usize) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|&(token, _)| token != eos)
        .reduce(|best, c| if c.1 > best.1 { c } else { best })
}

/// Indices of the `k` highest finite scores, best first; ties keep index order.
fn top_k(scores: &Array1<f32>, k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, s)| *s > f32::NEG_INFINITY)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);
    ranked
}
