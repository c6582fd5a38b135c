//! Deterministic acceptor over shifted label ids, backed by an `fst`
//! automaton.
//!
//! Words are stored as fixed-width byte keys (two big-endian bytes per
//! shifted label), so walking one label means walking two byte transitions.
//! Building from a sorted key set yields a minimal deterministic acyclic
//! acceptor directly; there is no separate epsilon-removal, determinization
//! or minimization pass to run.
//!
//! The on-disk format is the raw `fst` byte image; `write_file` and
//! `read_file` are inverses.

use std::path::Path;

use anyhow::{Context, Result};
use fst::raw::{CompiledAddr, Fst};
use tracing::info;

use crate::vocab::{encode_label, encode_labels, split_utf8_str, Vocabulary, MAX_VOCAB_SIZE};

/// FST state id: the compiled address of a node.
pub type LexiconStateId = CompiledAddr;

/// Deterministic acceptor restricting label sequences to known words.
pub struct Lexicon {
    fst: Fst<Vec<u8>>,
}

impl std::fmt::Debug for Lexicon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lexicon").field("words", &self.len()).finish()
    }
}

impl Lexicon {
    /// Build from plain words: each word is split at UTF-8 boundaries and
    /// every character must map through the vocabulary. Words with
    /// unmappable characters are skipped. With `add_space` each word is
    /// terminated by the space label, so consuming a whole word (and its
    /// trailing space) lands on an accepting state.
    pub fn from_words<I, S>(words: I, vocab: &Vocabulary, add_space: bool) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        anyhow::ensure!(
            vocab.len() <= MAX_VOCAB_SIZE,
            "vocabulary of {} tokens exceeds the label encoding limit {}",
            vocab.len(),
            MAX_VOCAB_SIZE
        );

        let space = vocab.mapped_label(" ");
        let mut keys: Vec<Vec<u8>> = Vec::new();
        for word in words {
            if let Some(mut key) = word_key(word.as_ref(), vocab) {
                if add_space {
                    if let Some(space) = space {
                        key.extend_from_slice(&encode_label(space));
                    }
                }
                keys.push(key);
            }
        }
        let lexicon = Self::from_keys(keys)?;
        info!(words = lexicon.len(), "built lexicon acceptor");
        Ok(lexicon)
    }

    /// Build from already-mapped label sequences (shifted ids).
    pub fn from_label_sequences<I>(sequences: I) -> Result<Self>
    where
        I: IntoIterator<Item = Vec<u32>>,
    {
        let keys = sequences
            .into_iter()
            .map(|seq| encode_labels(&seq))
            .collect();
        Self::from_keys(keys)
    }

    fn from_keys(mut keys: Vec<Vec<u8>>) -> Result<Self> {
        keys.sort();
        keys.dedup();
        let mut builder = fst::SetBuilder::memory();
        for key in &keys {
            builder.insert(key)?;
        }
        let bytes = builder.into_inner()?;
        Ok(Self {
            fst: Fst::new(bytes)?,
        })
    }

    /// Load a serialized acceptor.
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("open lexicon fst {}", path.display()))?;
        let fst = Fst::new(bytes).context("parse lexicon fst")?;
        Ok(Self { fst })
    }

    /// Serialize the acceptor; inverse of `read_file`.
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.fst.as_bytes())
            .with_context(|| format!("write lexicon fst {}", path.display()))?;
        Ok(())
    }

    /// Number of accepted words.
    pub fn len(&self) -> usize {
        self.fst.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fst.len() == 0
    }

    /// Start state.
    pub fn start(&self) -> LexiconStateId {
        self.fst.root().addr()
    }

    /// Whether a state accepts (a complete word ends here).
    pub fn is_final(&self, state: LexiconStateId) -> bool {
        self.fst.node(state).is_final()
    }

    /// Step one shifted label from `state`, or `None` when no word
    /// continues with it.
    pub fn next(&self, state: LexiconStateId, mapped_label: u32) -> Option<LexiconStateId> {
        let mut node = self.fst.node(state);
        for byte in encode_label(mapped_label) {
            let idx = node.find_input(byte)?;
            node = self.fst.node(node.transition(idx).addr);
        }
        Some(node.addr())
    }

    /// Whether a shifted-label sequence is a prefix of some accepted word.
    pub fn accepts_prefix(&self, mapped: &[u32]) -> bool {
        self.walk(mapped).is_some()
    }

    /// Whether a shifted-label sequence is itself an accepted word.
    pub fn accepts_word(&self, mapped: &[u32]) -> bool {
        match self.walk(mapped) {
            Some(state) => self.is_final(state),
            None => false,
        }
    }

    fn walk(&self, mapped: &[u32]) -> Option<LexiconStateId> {
        let mut state = self.start();
        for &m in mapped {
            state = self.next(state, m)?;
        }
        Some(state)
    }

    /// Outgoing label transitions of a state, in byte order.
    pub(crate) fn label_transitions(&self, state: LexiconStateId) -> Vec<(u32, LexiconStateId)> {
        let node = self.fst.node(state);
        let mut out = Vec::new();
        for i in 0..node.len() {
            let hi = node.transition(i);
            let mid = self.fst.node(hi.addr);
            for j in 0..mid.len() {
                let lo = mid.transition(j);
                out.push((((hi.inp as u32) << 8) | lo.inp as u32, lo.addr));
            }
        }
        out
    }
}

fn word_key(word: &str, vocab: &Vocabulary) -> Option<Vec<u8>> {
    let chars = split_utf8_str(word);
    let mut key = Vec::with_capacity((chars.len() + 1) * 2);
    for ch in &chars {
        let mapped = vocab.mapped_label(ch)?;
        key.extend_from_slice(&encode_label(mapped));
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(tokens: &[&str]) -> Vocabulary {
        Vocabulary::new(&tokens.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    fn mapped(vocab: &Vocabulary, word: &str) -> Vec<u32> {
        word.chars()
            .map(|c| vocab.mapped_label(&c.to_string()).unwrap())
            .collect()
    }

    #[test]
    fn accepts_built_words_and_prefixes() {
        let v = vocab(&["c", "a", "t", "r", " "]);
        let lex = Lexicon::from_words(["cat", "car"], &v, false).unwrap();
        assert_eq!(lex.len(), 2);

        assert!(lex.accepts_word(&mapped(&v, "cat")));
        assert!(lex.accepts_word(&mapped(&v, "car")));
        assert!(lex.accepts_prefix(&mapped(&v, "ca")));
        assert!(!lex.accepts_word(&mapped(&v, "ca")));
        assert!(!lex.accepts_prefix(&mapped(&v, "ct")));
    }

    #[test]
    fn unmappable_words_are_skipped() {
        let v = vocab(&["c", "a", "t"]);
        let lex = Lexicon::from_words(["cat", "dog"], &v, false).unwrap();
        assert_eq!(lex.len(), 1);
        assert!(lex.accepts_word(&mapped(&v, "cat")));
    }

    #[test]
    fn add_space_moves_the_accepting_state() {
        let v = vocab(&["c", "a", "t", " "]);
        let space = v.mapped_label(" ").unwrap();
        let lex = Lexicon::from_words(["cat"], &v, true).unwrap();

        let mut word = mapped(&v, "cat");
        assert!(!lex.accepts_word(&word));
        word.push(space);
        assert!(lex.accepts_word(&word));
    }

    #[test]
    fn stepwise_walk_matches_bulk_walk() {
        let v = vocab(&["c", "a", "t"]);
        let lex = Lexicon::from_words(["cat"], &v, false).unwrap();
        let mut state = lex.start();
        for m in mapped(&v, "cat") {
            state = lex.next(state, m).unwrap();
        }
        assert!(lex.is_final(state));
        assert!(lex.next(state, 1).is_none());
    }

    #[test]
    fn label_transitions_enumerate_children() {
        let v = vocab(&["c", "a", "t", "r"]);
        let lex = Lexicon::from_words(["cat", "car"], &v, false).unwrap();
        let s0 = lex.start();
        let from_root = lex.label_transitions(s0);
        assert_eq!(from_root.len(), 1);
        assert_eq!(from_root[0].0, v.mapped_label("c").unwrap());

        let s_ca = lex
            .next(lex.next(s0, v.mapped_label("c").unwrap()).unwrap(), v.mapped_label("a").unwrap())
            .unwrap();
        let mut labels: Vec<u32> = lex.label_transitions(s_ca).iter().map(|t| t.0).collect();
        labels.sort_unstable();
        assert_eq!(
            labels,
            vec![v.mapped_label("r").unwrap(), v.mapped_label("t").unwrap()]
        );
    }

    #[test]
    fn file_roundtrip() {
        let v = vocab(&["c", "a", "t"]);
        let lex = Lexicon::from_words(["cat", "at"], &v, false).unwrap();
        let tmp = std::env::temp_dir().join(format!("libctc_lexicon_{}.fst", std::process::id()));
        lex.write_file(&tmp).unwrap();
        let loaded = Lexicon::read_file(&tmp).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.accepts_word(&mapped(&v, "cat")));
        let _ = std::fs::remove_file(tmp);
    }

    #[test]
    fn empty_lexicon_rejects_everything() {
        let lex = Lexicon::from_label_sequences(Vec::<Vec<u32>>::new()).unwrap();
        assert!(lex.is_empty());
        assert!(!lex.is_final(lex.start()));
        assert!(lex.next(lex.start(), 1).is_none());
    }
}
