//! Attention-derived word spans.

use crate::error::Result;
use ndarray::Array1;
use ndarray_stats::QuantileExt;
use std::ops::Range;

/// Frame span of each emitted symbol, from its attention peak.
///
/// Boundaries sit halfway between consecutive peaks; the first span starts at
/// frame 0 and the last ends at `frames`. Spans never overlap and may be
/// empty when attention moves backwards.
pub fn spans(attention: &[Array1<f32>], frames: usize) -> Result<Vec<Range<usize>>> {
    let peaks = attention
        .iter()
        .map(|weights| -> Result<usize> { Ok(weights.argmax()?) })
        .collect::<Result<Vec<usize>>>()?;

    let mut bounds = Vec::with_capacity(peaks.len() + 1);
    bounds.push(0);
    for pair in peaks.windows(2) {
        let mid = (pair[0] + pair[1]).div_ceil(2);
        let prev = bounds.last().copied().unwrap_or(0);
        bounds.push(mid.clamp(prev, frames));
    }
    let prev = bounds.last().copied().unwrap_or(0);
    bounds.push(frames.max(prev));

    Ok(bounds.windows(2).map(|b| b[0]..b[1]).take(peaks.len()).collect())
}

/// Map a span between encoder streams of different frame rates.
pub fn rescale(span: &Range<usize>, from_frames: usize, to_frames: usize) -> Range<usize> {
    if from_frames == 0 {
        return 0..0;
    }

    let start = (span.start * to_frames / from_frames).min(to_frames);
    if span.is_empty() {
        return start..start;
    }

    let end = (span.end * to_frames).div_ceil(from_frames).min(to_frames);
    start..end.max(start)
}
