//! Edit-distance error counts for WER and CER.

use serde::Serialize;
use std::ops::AddAssign;

/// Substitution, insertion and deletion counts of one alignment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ErrorCounts {
    pub substitutions: usize,
    pub insertions: usize,
    pub deletions: usize,
    /// Number of reference tokens
    pub ref_len: usize,
}

impl ErrorCounts {
    /// Align `hypothesis` against `reference` with Levenshtein distance.
    ///
    /// Among equally short alignments, substitutions are preferred over a
    /// deletion and insertion pair.
    pub fn align<T: PartialEq>(reference: &[T], hypothesis: &[T]) -> Self {
        let n = reference.len();
        let m = hypothesis.len();

        let mut dp = vec![vec![0usize; m + 1]; n + 1];

        for (i, row) in dp.iter_mut().enumerate() {
            row[0] = i;
        }
        for j in 0..=m {
            dp[0][j] = j;
        }

        for i in 1..=n {
            for j in 1..=m {
                let cost = usize::from(reference[i - 1] != hypothesis[j - 1]);
                dp[i][j] = (dp[i - 1][j] + 1) // deletion
                    .min(dp[i][j - 1] + 1) // insertion
                    .min(dp[i - 1][j - 1] + cost); // substitution
            }
        }

        let mut counts = Self {
            ref_len: n,
            ..Self::default()
        };

        let (mut i, mut j) = (n, m);
        while i > 0 || j > 0 {
            if i > 0 && j > 0 {
                let cost = usize::from(reference[i - 1] != hypothesis[j - 1]);
                if dp[i][j] == dp[i - 1][j - 1] + cost {
                    counts.substitutions += cost;
                    i -= 1;
                    j -= 1;
                    continue;
                }
            }

            if i > 0 && dp[i][j] == dp[i - 1][j] + 1 {
                counts.deletions += 1;
                i -= 1;
            } else {
                counts.insertions += 1;
                j -= 1;
            }
        }

        counts
    }

    pub fn errors(&self) -> usize {
        self.substitutions + self.insertions + self.deletions
    }

    /// Error rate in percent.
    ///
    /// An empty reference scores 0 for an empty hypothesis and 100 otherwise.
    pub fn rate(&self) -> f64 {
        if self.ref_len == 0 {
            return if self.errors() == 0 { 0.0 } else { 100.0 };
        }
        self.errors() as f64 / self.ref_len as f64 * 100.0
    }
}

impl AddAssign for ErrorCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.substitutions += rhs.substitutions;
        self.insertions += rhs.insertions;
        self.deletions += rhs.deletions;
        self.ref_len += rhs.ref_len;
    }
}

impl std::iter::Sum for ErrorCounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, c| {
            acc += c;
            acc
        })
    }
}

/// Word-level errors of a hypothesis word sequence.
pub fn word_errors<S: AsRef<str>>(reference: &[S], hypothesis: &[S]) -> ErrorCounts {
    let reference: Vec<&str> = reference.iter().map(AsRef::as_ref).collect();
    let hypothesis: Vec<&str> = hypothesis.iter().map(AsRef::as_ref).collect();
    ErrorCounts::align(&reference, &hypothesis)
}

/// Character-level errors, ignoring word separators.
pub fn char_errors(reference: &str, hypothesis: &str, separator: char) -> ErrorCounts {
    let reference: Vec<char> = reference
        .chars()
        .filter(|&c| c != separator && !c.is_whitespace())
        .collect();
    let hypothesis: Vec<char> = hypothesis
        .chars()
        .filter(|&c| c != separator && !c.is_whitespace())
        .collect();
    ErrorCounts::align(&reference, &hypothesis)
}
