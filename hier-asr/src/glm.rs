//! Global mapping (GLM) rules for Switchboard scoring.
//!
//! Rules have the form `[lhs] => [rhs]`, optionally followed by a `/ ...`
//! context clause which is ignored. Lines starting with `;;` are comments.
//! Both sides are whitespace-separated word sequences; an empty right-hand
//! side deletes the matched words.

use crate::error::Result;
use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
struct Rule {
    lhs: Vec<String>,
    rhs: Vec<String>,
}

/// Word-sequence rewrite rules applied to references and hypotheses alike.
#[derive(Clone, Debug, Default)]
pub struct Glm {
    rules: Vec<Rule>,
}

impl Glm {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut rules: Vec<Rule> = text.lines().filter_map(parse_rule).collect();

        // longest match first
        rules.sort_by(|a, b| b.lhs.len().cmp(&a.lhs.len()));

        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrite a word sequence, scanning left to right.
    pub fn apply<S: AsRef<str>>(&self, words: &[S]) -> Vec<String> {
        let words: Vec<&str> = words.iter().map(AsRef::as_ref).collect();
        let mut out = Vec::with_capacity(words.len());
        let mut i = 0;

        'scan: while i < words.len() {
            for rule in &self.rules {
                let end = i + rule.lhs.len();
                if end <= words.len() && rule.lhs.iter().zip(&words[i..end]).all(|(a, b)| a == b)
                {
                    out.extend(rule.rhs.iter().cloned());
                    i = end;
                    continue 'scan;
                }
            }

            out.push(words[i].to_string());
            i += 1;
        }

        out
    }
}

fn parse_rule(line: &str) -> Option<Rule> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(";;") {
        return None;
    }

    let (lhs, rest) = line.split_once("=>")?;
    let rhs = rest.split_once('/').map_or(rest, |(rhs, _)| rhs);

    let lhs = bracketed_words(lhs)?;
    let rhs = bracketed_words(rhs)?;

    if lhs.is_empty() {
        return None;
    }

    Some(Rule { lhs, rhs })
}

fn bracketed_words(side: &str) -> Option<Vec<String>> {
    let inner = side.trim().strip_prefix('[')?.strip_suffix(']')?;
    Some(inner.split_whitespace().map(str::to_lowercase).collect())
}
