//! Vocabulary bookkeeping: token ids, the FST label map, and the BPE
//! word-boundary rule.

use ahash::AHashMap;
use unicode_normalization::UnicodeNormalization;

/// Sentinel id when the vocabulary carries no space token.
pub const NO_SPACE_ID: i32 = -2;

/// Sentinel id when the vocabulary carries no apostrophe token.
pub const NO_APOSTROPHE_ID: i32 = -3;

/// Label id of the trie root (no token emitted yet).
pub const ROOT_CHARACTER: i32 = -1;

/// Largest supported vocabulary. Label ids are shifted by one and encoded
/// as two big-endian bytes in FST keys, so the shifted id must fit in a u16.
pub const MAX_VOCAB_SIZE: usize = (u16::MAX as usize) - 1;

/// Tokenisation boundary semantics of the language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerKind {
    Character,
    Bpe,
    Word,
}

impl std::str::FromStr for TokenizerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "character" => Ok(Self::Character),
            "bpe" => Ok(Self::Bpe),
            "word" => Ok(Self::Word),
            other => anyhow::bail!("unknown lm type {other:?} (expected character, bpe or word)"),
        }
    }
}

/// Token inventory shared by the scorers and the FST builders.
///
/// `char_map` maps each token to its label id plus one. The FST start state
/// is state 0, so label 0 stays reserved to avoid colliding with it;
/// otherwise wrong decoding results would be given.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    char_map: AHashMap<String, u32>,
    space_id: i32,
    apostrophe_id: i32,
}

impl Vocabulary {
    pub fn new(tokens: &[String]) -> Self {
        let mut char_map = AHashMap::with_capacity(tokens.len());
        let (space_id, apostrophe_id) = scan_special_ids(tokens);
        for (i, tok) in tokens.iter().enumerate() {
            char_map.insert(tok.clone(), i as u32 + 1);
        }
        Self {
            tokens: tokens.to_vec(),
            char_map,
            space_id,
            apostrophe_id,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token(&self, id: usize) -> &str {
        &self.tokens[id]
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn space_id(&self) -> i32 {
        self.space_id
    }

    pub fn apostrophe_id(&self) -> i32 {
        self.apostrophe_id
    }

    /// Shifted label id for a token, falling back to an NFC-folded lookup.
    pub fn mapped_label(&self, token: &str) -> Option<u32> {
        if let Some(&v) = self.char_map.get(token) {
            return Some(v);
        }
        let folded: String = token.nfc().collect();
        self.char_map.get(folded.as_str()).copied()
    }
}

/// Locate the space and apostrophe ids in a raw token list. The decoder
/// needs only these two and skips building the full map.
pub fn scan_special_ids(tokens: &[String]) -> (i32, i32) {
    let mut space_id = NO_SPACE_ID;
    let mut apostrophe_id = NO_APOSTROPHE_ID;
    for (i, tok) in tokens.iter().enumerate() {
        if tok == " " {
            space_id = i as i32;
        } else if tok == "'" {
            apostrophe_id = i as i32;
        }
    }
    (space_id, apostrophe_id)
}

/// Fixed-width byte encoding of a shifted label id for FST keys.
pub fn encode_label(mapped: u32) -> [u8; 2] {
    debug_assert!(mapped <= u16::MAX as u32);
    [(mapped >> 8) as u8, mapped as u8]
}

/// Byte key for a whole shifted-label sequence.
pub fn encode_labels(mapped: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(mapped.len() * 2);
    for &m in mapped {
        out.extend_from_slice(&encode_label(m));
    }
    out
}

/// Whether a BPE token merges into its predecessor rather than starting a
/// new word: continuation tokens carry the separator prefix, and both sides
/// of an apostrophe stay attached to it.
pub fn is_mergeable_bpe_token(
    cur_token: &str,
    cur_char: i32,
    parent_char: i32,
    apostrophe_id: i32,
    token_separator: char,
) -> bool {
    let starts_with_separator = cur_token.chars().next() == Some(token_separator);
    starts_with_separator || parent_char == apostrophe_id || cur_char == apostrophe_id
}

/// Split a string at UTF-8 character boundaries.
pub fn split_utf8_str(s: &str) -> Vec<String> {
    s.chars().map(|c| c.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn special_ids_found_and_absent() {
        let v = Vocabulary::new(&toks(&["a", " ", "'", "_"]));
        assert_eq!(v.space_id(), 1);
        assert_eq!(v.apostrophe_id(), 2);

        let v = Vocabulary::new(&toks(&["a", "b"]));
        assert_eq!(v.space_id(), NO_SPACE_ID);
        assert_eq!(v.apostrophe_id(), NO_APOSTROPHE_ID);
    }

    #[test]
    fn char_map_is_shifted_by_one() {
        let v = Vocabulary::new(&toks(&["a", "b"]));
        assert_eq!(v.mapped_label("a"), Some(1));
        assert_eq!(v.mapped_label("b"), Some(2));
        assert_eq!(v.mapped_label("c"), None);
    }

    #[test]
    fn bpe_merge_rule() {
        // continuation marker merges
        assert!(is_mergeable_bpe_token("#ing", 5, 4, -3, '#'));
        // fresh token starts a word
        assert!(!is_mergeable_bpe_token("ing", 5, 4, -3, '#'));
        // both apostrophe endpoints stay attached
        assert!(is_mergeable_bpe_token("s", 5, 7, 7, '#'));
        assert!(is_mergeable_bpe_token("'", 7, 4, 7, '#'));
    }

    #[test]
    fn utf8_split() {
        assert_eq!(split_utf8_str("ab"), vec!["a", "b"]);
        assert_eq!(split_utf8_str("日本"), vec!["日", "本"]);
        assert!(split_utf8_str("").is_empty());
    }

    #[test]
    fn label_encoding_is_big_endian() {
        assert_eq!(encode_label(1), [0, 1]);
        assert_eq!(encode_label(0x1234), [0x12, 0x34]);
        assert_eq!(encode_labels(&[1, 2]), vec![0, 1, 0, 2]);
    }
}
