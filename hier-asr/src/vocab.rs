//! Output vocabularies for the word and character tasks.

use crate::error::{DatasetError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Unknown-word symbol of word vocabularies.
pub const UNK_SYMBOL: &str = "OOV";

/// Word separator of character vocabularies.
pub const SPACE_SYMBOL: &str = "_";

/// Symbol table loaded from a one-symbol-per-line file.
///
/// Class indices are line numbers. The end-of-sequence class is one past the
/// last symbol, so decoders produce `len() + 1` classes.
#[derive(Clone, Debug)]
pub struct Vocabulary {
    symbols: Vec<String>,
    index: HashMap<String, usize>,
}

impl Vocabulary {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
        let index = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();

        Self { symbols, index }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;

        let vocab = Self::new(
            text.lines()
                .map(str::trim_end)
                .filter(|line| !line.is_empty()),
        );

        if vocab.is_empty() {
            return Err(DatasetError::EmptyVocabulary(path.to_path_buf()).into());
        }

        Ok(vocab)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// End-of-sequence class index (also used as start-of-sequence).
    pub fn eos(&self) -> usize {
        self.symbols.len()
    }

    pub fn unk(&self) -> Option<usize> {
        self.id(UNK_SYMBOL)
    }

    pub fn space(&self) -> Option<usize> {
        self.id(SPACE_SYMBOL)
    }

    pub fn id(&self, symbol: &str) -> Option<usize> {
        self.index.get(symbol).copied()
    }

    pub fn symbol(&self, id: usize) -> Option<&str> {
        self.symbols.get(id).map(String::as_str)
    }

    /// Map class indices to symbols, skipping end-of-sequence and unknown indices.
    pub fn decode(&self, ids: &[usize]) -> Vec<&str> {
        ids.iter().filter_map(|&id| self.symbol(id)).collect()
    }

    /// Spell a word as character class indices, if every character is known.
    pub fn spell(&self, word: &str) -> Option<Vec<usize>> {
        word.chars()
            .map(|c| self.id(c.encode_utf8(&mut [0; 4])))
            .collect()
    }
}
