//! Backoff N-gram language model.
//!
//! Responsibilities:
//! - Store per-order conditional log-probabilities and backoff weights.
//! - Provide stateful conditional scoring over word ids (the state carries
//!   the recent context, so scoring a prefix extension is one lookup).
//! - Provide bincode serialization for model IO.
//!
//! Scores are kept in the model's native base, log10; the scorer converts
//! to natural logs at the boundary.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Word index into a language model vocabulary. 0 is the unknown token.
pub type WordId = u32;

/// The unknown-word index.
pub const UNK_WORD_ID: WordId = 0;

/// Floor conditional log10-probability for words missing even a unigram.
const DEFAULT_UNK_LOG_PROB: f32 = -8.0;

/// Scoring state: the most recent context words, newest last, never longer
/// than `order - 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LmState {
    context: Vec<WordId>,
}

impl LmState {
    pub fn context(&self) -> &[WordId] {
        &self.context
    }
}

/// Read-only stateful N-gram scoring over word tokens.
pub trait LanguageModel: Send + Sync {
    /// Maximum N-gram order.
    fn order(&self) -> usize;

    /// Left-boundary state without an implicit `<s>`.
    fn null_context_state(&self) -> LmState;

    /// Conditional log-probability of `word` given `state`, in the model's
    /// native base, writing the successor state into `out`.
    fn score(&self, state: &LmState, word: WordId, out: &mut LmState) -> f32;

    /// Index of a token, 0 when unknown.
    fn vocab_index(&self, token: &str) -> WordId;

    /// Every known token, index order.
    fn vocabulary(&self) -> &[String];
}

/// One N-gram entry: conditional log10-probability plus the backoff weight
/// charged when a longer context falls back through this one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbBackoff {
    pub log_prob: f32,
    pub backoff: f32,
}

/// Hash-table backoff N-gram model.
///
/// Index 0 is reserved for `<unk>`; `<s>` and `</s>` are always interned so
/// boundary tokens never score as unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NGramModel {
    order: usize,
    vocab: Vec<String>,
    token_ids: AHashMap<String, WordId>,
    /// `grams[n - 1]` holds the n-gram table keyed by `[w1, …, wn]`.
    grams: Vec<AHashMap<Vec<WordId>, ProbBackoff>>,
    unk_log_prob: f32,
}

impl NGramModel {
    pub fn new(order: usize) -> Self {
        assert!(order >= 1, "n-gram order must be at least 1");
        let mut model = Self {
            order,
            vocab: Vec::new(),
            token_ids: AHashMap::new(),
            grams: vec![AHashMap::new(); order],
            unk_log_prob: DEFAULT_UNK_LOG_PROB,
        };
        model.intern("<unk>");
        model.intern("<s>");
        model.intern("</s>");
        model
    }

    /// Register a token, returning its id.
    pub fn intern(&mut self, token: &str) -> WordId {
        if let Some(&id) = self.token_ids.get(token) {
            return id;
        }
        let id = self.vocab.len() as WordId;
        self.vocab.push(token.to_string());
        self.token_ids.insert(token.to_string(), id);
        id
    }

    /// Insert one N-gram with its conditional log10-probability and backoff
    /// weight. Tokens are interned on the fly.
    pub fn insert_ngram(&mut self, tokens: &[&str], log_prob: f32, backoff: f32) {
        assert!(
            (1..=self.order).contains(&tokens.len()),
            "n-gram length {} outside 1..={}",
            tokens.len(),
            self.order
        );
        let ids: Vec<WordId> = tokens.iter().map(|t| self.intern(t)).collect();
        self.grams[ids.len() - 1].insert(ids, ProbBackoff { log_prob, backoff });
    }

    pub fn set_unk_log_prob(&mut self, log_prob: f32) {
        self.unk_log_prob = log_prob;
    }

    fn lookup(&self, key: &[WordId]) -> Option<ProbBackoff> {
        self.grams.get(key.len() - 1)?.get(key).copied()
    }

    /// Save the model with bincode.
    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)?;
        Ok(())
    }

    /// Load a model saved by `save_bincode`.
    pub fn load_bincode<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let model: Self = bincode::deserialize_from(reader)?;
        Ok(model)
    }
}

impl LanguageModel for NGramModel {
    fn order(&self) -> usize {
        self.order
    }

    fn null_context_state(&self) -> LmState {
        LmState::default()
    }

    fn score(&self, state: &LmState, word: WordId, out: &mut LmState) -> f32 {
        let mut full: Vec<WordId> = Vec::with_capacity(state.context.len() + 1);
        full.extend_from_slice(&state.context);
        full.push(word);

        let keep = self.order - 1;
        let tail = full.len().saturating_sub(keep);
        out.context.clear();
        out.context.extend_from_slice(&full[tail..]);

        // longest-match backoff: drop the oldest context word at a time,
        // charging the backoff weight of each context left behind
        let mut start = full.len().saturating_sub(self.order);
        let mut backoff_acc = 0.0f32;
        loop {
            let key = &full[start..];
            if let Some(entry) = self.lookup(key) {
                return entry.log_prob + backoff_acc;
            }
            if key.len() == 1 {
                return self.unk_log_prob + backoff_acc;
            }
            let context = &full[start..full.len() - 1];
            if let Some(entry) = self.lookup(context) {
                backoff_acc += entry.backoff;
            }
            start += 1;
        }
    }

    fn vocab_index(&self, token: &str) -> WordId {
        self.token_ids.get(token).copied().unwrap_or(UNK_WORD_ID)
    }

    fn vocabulary(&self) -> &[String] {
        &self.vocab
    }
}
