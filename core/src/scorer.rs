//! External scorer: N-gram language model plus lexicon constraint.
//!
//! Maps a decoded prefix to an N-gram tuple and returns the conditional
//! log-probability of its last word, converted to natural logs and weighted
//! by `alpha`; `beta` is the word-insertion bonus added per scored
//! extension. The scorer carries no per-decode state, so one instance is
//! shared read-only by every worker.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use lru::LruCache;
use tracing::info;

use crate::lexicon::Lexicon;
use crate::logmath::LOG10_E;
use crate::ngram::{LanguageModel, LmState, NGramModel, UNK_WORD_ID};
use crate::path_trie::{NodeId, TrieArena};
use crate::vocab::{split_utf8_str, TokenizerKind, Vocabulary, ROOT_CHARACTER};

/// Score for any N-gram containing an out-of-vocabulary token.
pub const OOV_SCORE: f32 = -1000.0;

pub const START_TOKEN: &str = "<s>";
pub const END_TOKEN: &str = "</s>";

/// Conditional scores are pure in the N-gram, so a small shared cache
/// absorbs the repeated prefix lookups a beam produces.
const SCORE_CACHE_CAPACITY: usize = 4096;

pub struct Scorer {
    /// Language model weight.
    pub alpha: f32,
    /// Word insertion bonus.
    pub beta: f32,
    kind: TokenizerKind,
    lm: Box<dyn LanguageModel>,
    lexicon: Option<Lexicon>,
    vocab: Vocabulary,
    max_order: usize,
    cache: Mutex<LruCache<Vec<String>, f32>>,
}

impl Scorer {
    /// Wire up an already-loaded language model. A word-kind scorer with no
    /// explicit lexicon builds one from the LM vocabulary, space-terminated.
    pub fn new(
        alpha: f32,
        beta: f32,
        lm: Box<dyn LanguageModel>,
        vocab_list: &[String],
        kind: TokenizerKind,
        lexicon: Option<Lexicon>,
    ) -> Result<Self> {
        let vocab = Vocabulary::new(vocab_list);
        let max_order = lm.order();
        let lexicon = match lexicon {
            Some(lexicon) => Some(lexicon),
            None if kind == TokenizerKind::Word => {
                let words = lm
                    .vocabulary()
                    .iter()
                    .filter(|w| w.as_str() != "<unk>" && w.as_str() != START_TOKEN && w.as_str() != END_TOKEN);
                Some(Lexicon::from_words(words, &vocab, true)?)
            }
            None => None,
        };
        info!(
            order = max_order,
            lexicon = lexicon.as_ref().map(Lexicon::len),
            "scorer ready"
        );
        Ok(Self {
            alpha,
            beta,
            kind,
            lm,
            lexicon,
            vocab,
            max_order,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(SCORE_CACHE_CAPACITY).unwrap(),
            )),
        })
    }

    /// Load the LM (bincode) and optional lexicon (fst bytes) from disk.
    pub fn from_files<P: AsRef<Path>>(
        alpha: f32,
        beta: f32,
        lm_path: P,
        vocab_list: &[String],
        lm_type: &str,
        lexicon_fst_path: Option<P>,
    ) -> Result<Self> {
        let kind: TokenizerKind = lm_type.parse()?;
        let lm_path = lm_path.as_ref();
        let lm = NGramModel::load_bincode(lm_path)
            .with_context(|| format!("load language model {}", lm_path.display()))?;
        let lexicon = lexicon_fst_path.map(Lexicon::read_file).transpose()?;
        Self::new(alpha, beta, Box::new(lm), vocab_list, kind, lexicon)
    }

    pub fn kind(&self) -> TokenizerKind {
        self.kind
    }

    pub fn is_character_based(&self) -> bool {
        self.kind == TokenizerKind::Character
    }

    pub fn is_bpe_based(&self) -> bool {
        self.kind == TokenizerKind::Bpe
    }

    pub fn is_word_based(&self) -> bool {
        self.kind == TokenizerKind::Word
    }

    pub fn has_lexicon(&self) -> bool {
        self.lexicon.is_some()
    }

    pub fn lexicon(&self) -> Option<&Lexicon> {
        self.lexicon.as_ref()
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn reset_params(&mut self, alpha: f32, beta: f32) {
        self.alpha = alpha;
        self.beta = beta;
    }

    /// N-gram tuple for the prefix ending at `node`, oldest word first.
    ///
    /// Character and BPE kinds take one label per order slot; the word kind
    /// walks back through space-delimited words, skipping each space. When
    /// the walk reaches the root early, the leading slots are padded with
    /// the start token.
    pub fn make_ngram(&self, arena: &TrieArena, node: NodeId) -> Vec<String> {
        let mut ngram: Vec<String> = Vec::with_capacity(self.max_order);
        let mut current = node;
        for order in 0..self.max_order {
            let per_token = self.is_character_based() || self.is_bpe_based();
            let (labels, _, stop) = if per_token {
                arena.path_to_vec_until(current, ROOT_CHARACTER, 1)
            } else {
                arena.path_to_vec_until(current, self.vocab.space_id(), usize::MAX)
            };

            ngram.push(self.labels_to_string(&labels));

            if arena.character(stop) == ROOT_CHARACTER {
                for _ in 0..self.max_order - order - 1 {
                    ngram.push(START_TOKEN.to_string());
                }
                break;
            }
            current = if per_token {
                stop
            } else {
                // skip over the space separating the previous word
                arena.parent(stop).unwrap_or(stop)
            };
        }
        ngram.reverse();
        ngram
    }

    /// Conditional log-probability (natural log) of the tuple's last word
    /// given the rest. Any unknown token short-circuits to `OOV_SCORE`.
    pub fn cond_log_prob(&self, words: &[String]) -> f32 {
        if words.is_empty() {
            return 0.0;
        }
        {
            let mut cache = self.cache.lock().expect("score cache lock");
            if let Some(&hit) = cache.get(words) {
                return hit;
            }
        }
        let value = self.cond_log_prob_uncached(words);
        self.cache
            .lock()
            .expect("score cache lock")
            .put(words.to_vec(), value);
        value
    }

    fn cond_log_prob_uncached(&self, words: &[String]) -> f32 {
        let mut state = self.lm.null_context_state();
        let mut next = LmState::default();
        let mut cond_prob = 0.0f32;
        for word in words {
            let index = self.lm.vocab_index(word);
            if index == UNK_WORD_ID {
                return OOV_SCORE;
            }
            cond_prob = self.lm.score(&state, index, &mut next);
            std::mem::swap(&mut state, &mut next);
        }
        cond_prob / LOG10_E
    }

    /// Log-probability of a whole sentence, bracketed by start and end
    /// tokens, as the sum of overlapping N-gram conditionals.
    pub fn sentence_log_prob(&self, words: &[String]) -> f32 {
        let mut sentence: Vec<String> = Vec::with_capacity(words.len() + self.max_order);
        if words.is_empty() {
            for _ in 0..self.max_order {
                sentence.push(START_TOKEN.to_string());
            }
        } else {
            for _ in 0..self.max_order - 1 {
                sentence.push(START_TOKEN.to_string());
            }
            sentence.extend(words.iter().cloned());
        }
        sentence.push(END_TOKEN.to_string());
        self.log_prob(&sentence)
    }

    fn log_prob(&self, words: &[String]) -> f32 {
        let window = self.max_order.min(words.len());
        let mut score = 0.0f32;
        for i in 0..=words.len() - window {
            score += self.cond_log_prob(&words[i..i + window]);
        }
        score
    }

    fn labels_to_string(&self, labels: &[i32]) -> String {
        let mut word = String::new();
        for &label in labels {
            word.push_str(self.vocab.token(label as usize));
        }
        word
    }

    /// Token-id sequence → words: UTF-8 characters for the character kind,
    /// space-separated otherwise.
    pub fn split_labels(&self, labels: &[i32]) -> Vec<String> {
        if labels.is_empty() {
            return Vec::new();
        }
        let joined = self.labels_to_string(labels);
        if self.is_character_based() {
            split_utf8_str(&joined)
        } else {
            joined
                .split(' ')
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect()
        }
    }
}
