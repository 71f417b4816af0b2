//! Character-level tokenizer
//!
//! `token = code_point mod vocab_size`, `char = from_u32(token)`. For
//! vocabularies smaller than the code points in use the mapping is lossy and
//! decoding does not invert encoding.

/// Maps characters to token ids and back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteTokenizer {
    vocab_size: u32,
}

impl ByteTokenizer {
    pub fn new(vocab_size: u32) -> Self {
        Self {
            vocab_size: vocab_size.max(1),
        }
    }

    pub fn vocab_size(&self) -> u32 {
        self.vocab_size
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        text.chars().map(|c| c as u32 % self.vocab_size).collect()
    }

    /// Ids that are not valid scalar values decode to U+FFFD
    pub fn decode(&self, tokens: &[u32]) -> String {
        tokens
            .iter()
            .map(|&t| char::from_u32(t).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }
}
