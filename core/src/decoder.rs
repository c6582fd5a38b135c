//! Single-utterance CTC prefix beam search.
//!
//! `DecoderState` owns the hypothesis trie and the active frontier of one
//! utterance. `next` consumes probability frames in order, expanding each
//! frontier prefix by blank, repeat and fresh-label transitions; `decode`
//! is pure and ranks the surviving prefixes at any point, so a stream can
//! be inspected mid-utterance and continued afterwards.

use std::cmp::Ordering;
use std::sync::Arc;

use ahash::AHashMap;
use tracing::{debug, trace};

use crate::error::DecodeError;
use crate::hotword::HotwordScorer;
use crate::logmath::{log_sum_exp, LOG_ZERO};
use crate::path_trie::{NodeId, TrieArena};
use crate::scorer::Scorer;
use crate::vocab::{self, ROOT_CHARACTER};
use crate::DecoderOptions;

/// One ranked decoding hypothesis: the collapsed label sequence, the frame
/// at which each label was admitted, and the acoustic-only score (language
/// model and insertion contributions removed).
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub score: f32,
    pub tokens: Vec<i32>,
    pub timesteps: Vec<i32>,
}

pub struct DecoderState {
    abs_time_step: i32,
    space_id: i32,
    apostrophe_id: i32,
    options: Arc<DecoderOptions>,
    scorer: Option<Arc<Scorer>>,
    hotword_scorer: Option<Arc<HotwordScorer>>,
    arena: TrieArena,
    prefixes: Vec<NodeId>,
}

impl DecoderState {
    pub fn new(
        options: Arc<DecoderOptions>,
        scorer: Option<Arc<Scorer>>,
        hotword_scorer: Option<Arc<HotwordScorer>>,
    ) -> Result<Self, DecodeError> {
        options.validate()?;
        let (space_id, apostrophe_id) = vocab::scan_special_ids(&options.vocab);

        let mut arena = TrieArena::new();
        let root = arena.root();
        {
            let node = arena.node_mut(root);
            node.score = 0.0;
            node.log_prob_b_prev = 0.0;
            node.score_hw = 0.0;
            node.log_prob_b_prev_hw = 0.0;
        }
        if let Some(lexicon) = scorer.as_deref().and_then(Scorer::lexicon) {
            arena.node_mut(root).lexicon_state = lexicon.start();
        }
        if let Some(hw) = hotword_scorer.as_deref() {
            arena.node_mut(root).hotword_state = hw.fst_start();
        }

        Ok(Self {
            abs_time_step: 0,
            space_id,
            apostrophe_id,
            options,
            scorer,
            hotword_scorer,
            arena,
            prefixes: vec![root],
        })
    }

    /// Frames consumed so far.
    pub fn time_steps(&self) -> i32 {
        self.abs_time_step
    }

    /// Current frontier size.
    pub fn frontier_size(&self) -> usize {
        self.prefixes.len()
    }

    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }

    /// Consume probability frames in order. May be called repeatedly to
    /// stream an utterance.
    pub fn next(&mut self, probs_seq: &[Vec<f32>]) -> Result<(), DecodeError> {
        let vocab_size = self.options.vocab.len();
        for (time_step, frame) in probs_seq.iter().enumerate() {
            if frame.len() != vocab_size {
                return Err(DecodeError::FrameShapeMismatch {
                    time_step,
                    expected: vocab_size,
                    got: frame.len(),
                });
            }
        }
        for frame in probs_seq {
            self.step(frame);
            self.abs_time_step += 1;
        }
        Ok(())
    }

    fn step(&mut self, frame: &[f32]) {
        let beam_width = self.options.beam_width;
        let blank_id = self.options.blank_id;
        let log_input = self.options.log_probs_input;

        // pruning cutoff: the worst surviving score a full beam could keep
        let mut min_cutoff = LOG_ZERO;
        let mut full_beam = false;
        if let Some(scorer) = self.scorer.as_deref() {
            let num_prefixes = self.prefixes.len().min(beam_width);
            let arena = &self.arena;
            self.prefixes[..num_prefixes].sort_by(|&a, &b| prefix_compare(arena, a, b));
            let blank_prob = frame[blank_id];
            let blank_log = if log_input { blank_prob } else { blank_prob.ln() };
            min_cutoff = self.arena.node(self.prefixes[num_prefixes - 1]).score_hw + blank_log
                - scorer.beta.max(0.0);
            full_beam = num_prefixes == beam_width;
        }

        let log_prob_idx = pruned_log_probs(
            frame,
            self.options.cutoff_prob,
            self.options.cutoff_top_n,
            log_input,
        );

        for (c, log_prob_c) in log_prob_idx.iter().copied() {
            for i in 0..self.prefixes.len().min(beam_width) {
                let prefix = self.prefixes[i];

                if full_beam && log_prob_c + self.arena.node(prefix).score_hw < min_cutoff {
                    break;
                }

                // blank keeps the prefix as-is
                if c == blank_id {
                    let node = self.arena.node_mut(prefix);
                    node.log_prob_b_cur =
                        log_sum_exp(node.log_prob_b_cur, log_prob_c + node.score);
                    node.log_prob_b_cur_hw =
                        log_sum_exp(node.log_prob_b_cur_hw, log_prob_c + node.score_hw);
                    continue;
                }

                let character = c as i32;

                // repeated label folds into the same prefix
                if character == self.arena.node(prefix).character {
                    let node = self.arena.node_mut(prefix);
                    node.log_prob_nb_cur =
                        log_sum_exp(node.log_prob_nb_cur, log_prob_c + node.log_prob_nb_prev);
                    node.log_prob_nb_cur_hw = log_sum_exp(
                        node.log_prob_nb_cur_hw,
                        log_prob_c + node.log_prob_nb_prev_hw,
                    );
                }

                let lexicon = if self.options.is_bpe_based {
                    None
                } else {
                    self.scorer.as_deref().and_then(Scorer::lexicon)
                };
                let Some(new_path) = self.arena.get_or_create_child(
                    prefix,
                    character,
                    self.abs_time_step,
                    log_prob_c,
                    lexicon,
                ) else {
                    continue;
                };

                let mut lm_score = 0.0f32;
                let mut reset_score = false;

                if (self.scorer.is_some() || self.hotword_scorer.is_some())
                    && self.is_start_of_word(new_path)
                {
                    self.arena.node_mut(new_path).is_word_start_char = true;
                }

                let hotpath = match self.hotword_scorer.clone() {
                    Some(hw) => {
                        self.arena.copy_parent_hotword_params(new_path);
                        let state = hw.hotpath_next_state(&mut self.arena, new_path);
                        Some((hw, state))
                    }
                    None => None,
                };
                match hotpath {
                    Some((hw, Some(matched_state))) => {
                        self.arena.node_mut(new_path).is_hotpath = true;
                        // a hotword restarting mid-hotpath must not keep the
                        // parent's boosted track
                        if self.arena.node(prefix).is_hotpath
                            && self.arena.node(new_path).hotword_state == hw.fst_start()
                        {
                            reset_score = true;
                        }
                        hw.estimate_hotword_score(&mut self.arena, new_path, matched_state);
                    }
                    other => {
                        if let Some((hw, None)) = other {
                            self.arena.reset_hotword_params(new_path, hw.fst_start());
                            if self.arena.node(prefix).is_hotpath {
                                reset_score = true;
                            }
                        }
                        // an extension leaving the lexicon in BPE mode forms
                        // an unknown word
                        if self.options.is_bpe_based {
                            if let Some(scorer) = self.scorer.as_deref() {
                                if scorer.has_lexicon() && self.is_oov_token(new_path, scorer) {
                                    lm_score += self.options.unk_score;
                                }
                            }
                        }
                    }
                }

                if let Some(scorer) = self.scorer.clone() {
                    if character == self.space_id
                        || scorer.is_character_based()
                        || scorer.is_bpe_based()
                    {
                        // word LMs score the completed word (the prefix before
                        // the space); token LMs score the extension itself
                        let prefix_to_score =
                            if scorer.is_character_based() || scorer.is_bpe_based() {
                                new_path
                            } else {
                                prefix
                            };
                        let ngram = scorer.make_ngram(&self.arena, prefix_to_score);
                        lm_score += scorer.cond_log_prob(&ngram) * scorer.alpha;
                        lm_score += scorer.beta;
                    }
                }

                self.update_score(new_path, log_prob_c, lm_score, reset_score);
            }
        }

        // commit: roll current accumulators into previous across the trie
        self.prefixes.clear();
        self.arena.iterate_to_vec(&mut self.prefixes);

        // keep the top beam_width prefixes
        if self.prefixes.len() >= beam_width {
            if self.prefixes.len() > beam_width {
                let arena = &self.arena;
                self.prefixes
                    .select_nth_unstable_by(beam_width, |&a, &b| prefix_compare(arena, a, b));
            }
            for i in beam_width..self.prefixes.len() {
                self.arena.remove(self.prefixes[i]);
            }
            self.prefixes.truncate(beam_width);
        }
        trace!(
            t = self.abs_time_step,
            frontier = self.prefixes.len(),
            nodes = self.arena.live_nodes(),
            "beam step"
        );
    }

    /// Fold the frame's contribution into the non-blank accumulators of
    /// `path`, ordinary and hotword tracks. On a completed hotword the
    /// boosted value is promoted into the ordinary track, absorbing the
    /// boost exactly once; `reset_score` discards the parent's boosted
    /// track when a partial hotword broke off.
    fn update_score(&mut self, path: NodeId, log_prob_c: f32, lm_score: f32, reset_score: bool) {
        let log_p_lm = log_prob_c + lm_score;

        let Some(parent) = self.arena.parent(path) else {
            return;
        };
        let (parent_char, parent_b_prev, parent_b_prev_hw, parent_score, parent_score_hw) = {
            let p = self.arena.node(parent);
            (
                p.character,
                p.log_prob_b_prev,
                p.log_prob_b_prev_hw,
                p.score,
                p.score_hw,
            )
        };
        let (character, hotword_score, is_complete_hotword) = {
            let n = self.arena.node(path);
            (
                n.character,
                n.hotword_score,
                n.hotword_match_len > 0 && n.hotword_match_len == n.shortest_unigram_length,
            )
        };

        let mut log_p = LOG_ZERO;
        let mut log_p_hw = LOG_ZERO;

        if character == parent_char {
            // a repeat extends only through an intervening blank
            if parent_b_prev > LOG_ZERO {
                log_p = log_p_lm + parent_b_prev;
                if reset_score {
                    log_p_hw = log_p + hotword_score;
                } else {
                    log_p_hw = log_p_lm + parent_b_prev_hw + hotword_score;
                    if is_complete_hotword {
                        log_p = log_p_hw;
                    }
                }
            }
        } else {
            log_p = log_p_lm + parent_score;
            if reset_score {
                log_p_hw = log_p + hotword_score;
            } else {
                log_p_hw = log_p_lm + parent_score_hw + hotword_score;
                if is_complete_hotword {
                    log_p = log_p_hw;
                }
            }
        }

        let node = self.arena.node_mut(path);
        node.log_prob_nb_cur = log_sum_exp(node.log_prob_nb_cur, log_p);
        node.log_prob_nb_cur_hw = log_sum_exp(node.log_prob_nb_cur_hw, log_p_hw);
    }

    fn is_start_of_word(&self, path: NodeId) -> bool {
        let node = self.arena.node(path);
        let parent_char = match self.arena.parent(path) {
            Some(parent) => self.arena.character(parent),
            None => ROOT_CHARACTER,
        };
        if self.options.is_bpe_based {
            let token = &self.options.vocab[node.character as usize];
            !vocab::is_mergeable_bpe_token(
                token,
                node.character,
                parent_char,
                self.apostrophe_id,
                self.options.token_separator,
            )
        } else {
            parent_char == self.space_id || parent_char == ROOT_CHARACTER
        }
    }

    /// BPE prefixes have no per-node lexicon cursor; re-run the labels of
    /// the word under construction and call it out-of-vocabulary when they
    /// prefix no lexicon entry.
    fn is_oov_token(&self, path: NodeId, scorer: &Scorer) -> bool {
        let Some(lexicon) = scorer.lexicon() else {
            return false;
        };
        let mut word: Vec<u32> = Vec::new();
        let mut cursor = Some(path);
        while let Some(id) = cursor {
            let node = self.arena.node(id);
            if node.character == ROOT_CHARACTER || node.character == self.space_id {
                break;
            }
            word.push(node.character as u32 + 1);
            if node.is_word_start_char {
                break;
            }
            cursor = node.parent;
        }
        word.reverse();
        !lexicon.accepts_prefix(&word)
    }

    /// Rank the surviving prefixes. Pure: the trie is left untouched, so
    /// decoding twice (or continuing the stream afterwards) is safe.
    pub fn decode(&self) -> Vec<Hypothesis> {
        let beam_width = self.options.beam_width;
        let mut prefixes_copy = self.prefixes.clone();
        let mut scores: AHashMap<NodeId, f32> = prefixes_copy
            .iter()
            .map(|&p| (p, self.arena.node(p).score_hw))
            .collect();

        // close the last word of prefixes that don't end on a space
        if let Some(scorer) = self.scorer.as_deref() {
            if scorer.is_word_based() {
                for &prefix in prefixes_copy.iter().take(beam_width) {
                    let node = self.arena.node(prefix);
                    if node.character != ROOT_CHARACTER && node.character != self.space_id {
                        let ngram = scorer.make_ngram(&self.arena, prefix);
                        let bonus = scorer.cond_log_prob(&ngram) * scorer.alpha + scorer.beta;
                        if let Some(score) = scores.get_mut(&prefix) {
                            *score += bonus;
                        }
                    }
                }
            }
        }

        let num_prefixes = prefixes_copy.len().min(beam_width);
        let arena = &self.arena;
        prefixes_copy[..num_prefixes].sort_by(|&a, &b| {
            match scores[&b].partial_cmp(&scores[&a]) {
                Some(Ordering::Equal) | None => {
                    arena.node(a).character.cmp(&arena.node(b).character)
                }
                Some(ordering) => ordering,
            }
        });
        prefixes_copy.truncate(num_prefixes);

        let mut results = Vec::with_capacity(prefixes_copy.len());
        for &prefix in &prefixes_copy {
            let (tokens, timesteps) = self.arena.path_to_vec(prefix);
            let mut approx_ctc = scores[&prefix];
            if let Some(scorer) = self.scorer.as_deref() {
                if scorer.is_word_based() {
                    // undo insertion bonuses and LM weight so scores compare
                    // on acoustics alone
                    let words = scorer.split_labels(&tokens);
                    approx_ctc -= tokens.len() as f32 * scorer.beta;
                    approx_ctc -= scorer.sentence_log_prob(&words) * scorer.alpha;
                }
            }
            results.push(Hypothesis {
                score: approx_ctc,
                tokens,
                timesteps,
            });
        }
        debug!(
            hypotheses = results.len(),
            t = self.abs_time_step,
            "decoded utterance"
        );
        results
    }
}

/// Descending boosted score, ties broken by ascending label id.
fn prefix_compare(arena: &TrieArena, a: NodeId, b: NodeId) -> Ordering {
    let (na, nb) = (arena.node(a), arena.node(b));
    match nb.score_hw.partial_cmp(&na.score_hw) {
        Some(Ordering::Equal) | None => na.character.cmp(&nb.character),
        Some(ordering) => ordering,
    }
}

/// Vocabulary pruning for one frame: the top labels whose cumulative
/// probability first meets `cutoff_prob`, capped at `cutoff_top_n`.
/// Returns `(label, natural-log probability)` pairs.
fn pruned_log_probs(
    frame: &[f32],
    cutoff_prob: f32,
    cutoff_top_n: usize,
    log_input: bool,
) -> Vec<(usize, f32)> {
    let mut prob_idx: Vec<(usize, f32)> = frame.iter().copied().enumerate().collect();
    let mut cutoff_len = frame.len();
    if cutoff_prob < 1.0 || cutoff_top_n < cutoff_len {
        prob_idx.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        if cutoff_prob < 1.0 {
            let mut cum_log = LOG_ZERO;
            cutoff_len = 0;
            for &(_, p) in prob_idx.iter() {
                cum_log = log_sum_exp(cum_log, if log_input { p } else { p.ln() });
                cutoff_len += 1;
                if cum_log.exp() >= cutoff_prob || cutoff_len >= cutoff_top_n {
                    break;
                }
            }
        } else {
            cutoff_len = cutoff_top_n.min(prob_idx.len());
        }
        prob_idx.truncate(cutoff_len);
    }
    prob_idx
        .into_iter()
        .map(|(i, p)| {
            let log_p = if log_input {
                p
            } else {
                (p + f32::MIN_POSITIVE).ln()
            };
            (i, log_p)
        })
        .collect()
}
