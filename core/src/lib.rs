//! libctc-core
//!
//! Core CTC prefix beam search decoding shared by the batch/streaming
//! drivers: the path trie and single-utterance decoder, the N-gram
//! language model, the lexicon acceptor and the hotword booster.
//!
//! This crate provides production-ready implementations using FST-backed
//! acceptors for lexicons and bincode for language model serialization.
//!
//! Public API:
//! - `DecoderOptions` - decoding configuration with TOML helpers
//! - `DecoderState` - one utterance: feed frames, rank hypotheses
//! - `Scorer` - N-gram language model plus lexicon constraint
//! - `HotwordScorer` - curated-phrase boosting
//! - `Lexicon` - deterministic acceptor over label sequences

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::DecodeError;

pub mod logmath;
pub use logmath::{log_sum_exp, LOG10_E, LOG_ZERO};

pub mod vocab;
pub use vocab::{TokenizerKind, Vocabulary, MAX_VOCAB_SIZE, ROOT_CHARACTER};

pub mod lexicon;
pub use lexicon::{Lexicon, LexiconStateId};

pub mod ngram;
pub use ngram::{LanguageModel, LmState, NGramModel, ProbBackoff, WordId, UNK_WORD_ID};

pub mod scorer;
pub use scorer::{Scorer, END_TOKEN, OOV_SCORE, START_TOKEN};

pub mod hotword;
pub use hotword::HotwordScorer;

pub mod path_trie;
pub use path_trie::{NodeId, TrieArena, TrieNode};

pub mod decoder;
pub use decoder::{DecoderState, Hypothesis};

/// Decoding configuration.
///
/// The vocabulary is the label inventory of the acoustic model, blank
/// included; everything else tunes the search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderOptions {
    /// Output labels of the acoustic model, index order.
    pub vocab: Vec<String>,
    /// Frontier bound of the prefix search.
    pub beam_width: usize,
    /// At most this many labels are expanded per frame.
    pub cutoff_top_n: usize,
    /// Cumulative-mass pruning threshold; 1.0 disables it.
    pub cutoff_prob: f32,
    /// Worker threads used by the batch driver.
    pub num_processes: usize,
    /// Index of the CTC blank in `vocab`.
    pub blank_id: usize,
    /// True when frames already hold log-probabilities.
    pub log_probs_input: bool,
    /// True when `vocab` holds BPE tokens.
    pub is_bpe_based: bool,
    /// Score added when a BPE extension forms an unknown word.
    pub unk_score: f32,
    /// Prefix marking BPE continuation tokens.
    pub token_separator: char,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            vocab: Vec::new(),
            beam_width: 100,
            cutoff_top_n: 40,
            cutoff_prob: 1.0,
            num_processes: 4,
            blank_id: 0,
            log_probs_input: false,
            is_bpe_based: false,
            unk_score: -5.0,
            token_separator: '#',
        }
    }
}

impl DecoderOptions {
    /// Options with defaults and the given vocabulary.
    pub fn with_vocab(vocab: Vec<String>) -> Self {
        Self {
            vocab,
            ..Self::default()
        }
    }

    /// Reject configurations the decoder cannot run with.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.vocab.is_empty() {
            return Err(DecodeError::InvalidOptions("vocabulary must not be empty"));
        }
        if self.vocab.len() > MAX_VOCAB_SIZE {
            return Err(DecodeError::InvalidOptions(
                "vocabulary exceeds the label encoding limit",
            ));
        }
        if self.beam_width == 0 {
            return Err(DecodeError::InvalidOptions("beam_width must be positive"));
        }
        if self.cutoff_top_n == 0 {
            return Err(DecodeError::InvalidOptions("cutoff_top_n must be positive"));
        }
        if !(self.cutoff_prob > 0.0 && self.cutoff_prob <= 1.0) {
            return Err(DecodeError::InvalidOptions(
                "cutoff_prob must lie in (0, 1]",
            ));
        }
        if self.num_processes == 0 {
            return Err(DecodeError::InvalidOptions(
                "num_processes must be positive",
            ));
        }
        if self.blank_id >= self.vocab.len() {
            return Err(DecodeError::InvalidOptions(
                "blank_id must index into the vocabulary",
            ));
        }
        Ok(())
    }

    /// Load options from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let options: DecoderOptions = toml::from_str(&content)?;
        Ok(options)
    }

    /// Save options to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load options from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize options to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
