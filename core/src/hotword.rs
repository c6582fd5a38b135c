//! Hotword boosting.
//!
//! Curated token sequences live in their own acceptor; a prefix walking
//! toward one of them earns a fractional award that grows with the match
//! and reaches the hotword's full weight exactly at completion. The award
//! rides on the `_hw` score twins so the beam can prefer hotword paths
//! without disturbing the ordinary score until a hotword completes.

use std::collections::VecDeque;

use ahash::AHashMap;
use anyhow::Result;
use tracing::info;

use crate::lexicon::{Lexicon, LexiconStateId};
use crate::path_trie::{NodeId, TrieArena};
use crate::vocab::{encode_label, encode_labels, Vocabulary};

pub struct HotwordScorer {
    vocab: Vocabulary,
    fst: Lexicon,
    /// Per-hotword weight, keyed by the canonical byte key of its labels.
    weights: AHashMap<Vec<u8>, f32>,
    hotword_count: usize,
    token_separator: char,
    is_bpe_based: bool,
}

impl HotwordScorer {
    /// Build the hotword acceptor. Each hotword is a sequence of vocabulary
    /// tokens; sequences with unmappable tokens are dropped. `weights`
    /// parallels `hotwords`.
    pub fn new(
        vocab_list: &[String],
        hotwords: &[Vec<String>],
        hotword_weights: &[f32],
        token_separator: char,
        is_bpe_based: bool,
    ) -> Result<Self> {
        anyhow::ensure!(
            hotwords.len() == hotword_weights.len(),
            "{} hotwords but {} weights",
            hotwords.len(),
            hotword_weights.len()
        );
        let vocab = Vocabulary::new(vocab_list);
        let mut weights = AHashMap::new();
        let mut sequences = Vec::new();
        for (tokens, &weight) in hotwords.iter().zip(hotword_weights) {
            let Some(mapped) = map_tokens(tokens, &vocab) else {
                continue;
            };
            weights.insert(encode_labels(&mapped), weight);
            sequences.push(mapped);
        }
        let hotword_count = sequences.len();
        let fst = Lexicon::from_label_sequences(sequences)?;
        info!(hotwords = hotword_count, "built hotword acceptor");
        Ok(Self {
            vocab,
            fst,
            weights,
            hotword_count,
            token_separator,
            is_bpe_based,
        })
    }

    pub fn is_bpe_based(&self) -> bool {
        self.is_bpe_based
    }

    pub fn token_separator(&self) -> char {
        self.token_separator
    }

    /// Number of hotwords admitted into the acceptor.
    pub fn len(&self) -> usize {
        self.hotword_count
    }

    pub fn is_empty(&self) -> bool {
        self.hotword_count == 0
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Start state of the hotword acceptor.
    pub fn fst_start(&self) -> LexiconStateId {
        self.fst.start()
    }

    /// Weight of the hotword with the given canonical byte key, 0 when the
    /// key is unknown.
    pub fn weight_for(&self, key: &[u8]) -> f32 {
        self.weights.get(key).copied().unwrap_or(0.0)
    }

    /// Whether `node` continues a hotword match: first by extending the
    /// parent's cursor, and failing that (for a word-start node) by
    /// rewinding its cursor and matching from the start state. Returns the
    /// acceptor state the match landed on.
    pub fn hotpath_next_state(
        &self,
        arena: &mut TrieArena,
        node: NodeId,
    ) -> Option<LexiconStateId> {
        let label = arena.character(node) as u32 + 1;
        let parent = arena.parent(node)?;

        if arena.node(parent).is_hotpath {
            let parent_state = arena.node(parent).hotword_state;
            if let Some(next) = self.fst.next(parent_state, label) {
                return Some(next);
            }
        }
        if arena.node(node).is_word_start_char {
            arena.reset_hotword_params(node, self.fst_start());
            return self.fst.next(self.fst_start(), label);
        }
        None
    }

    /// Advance the node's match cursors onto `matched_state` and award the
    /// boost: `weight × match_len / shortest_unigram_length`, where the
    /// shortest completion from the current state determines the candidate
    /// hotword and its length.
    pub fn estimate_hotword_score(
        &self,
        arena: &mut TrieArena,
        node: NodeId,
        matched_state: LexiconStateId,
    ) {
        let label = arena.character(node) as u32 + 1;
        {
            let n = arena.node_mut(node);
            n.hotword_match_len += 1;
            n.hotword_state = matched_state;
            n.partial_hotword.extend_from_slice(&encode_label(label));
        }

        let (candidate_key, shortest_len) = {
            let n = arena.node(node);
            self.shortest_candidate(n.hotword_state, &n.partial_hotword, n.hotword_match_len)
        };
        let weight = self.weight_for(&candidate_key);

        let n = arena.node_mut(node);
        n.shortest_unigram_length = shortest_len;
        n.hotword_weight = weight;
        n.hotword_score = weight * n.hotword_match_len as f32 / shortest_len as f32;
    }

    /// Breadth-first search from `state` to the nearest accepting state.
    /// Returns the full candidate key (partial match plus completion) and
    /// the candidate's length in labels.
    fn shortest_candidate(
        &self,
        state: LexiconStateId,
        partial: &[u8],
        match_len: u32,
    ) -> (Vec<u8>, u32) {
        if self.fst.is_final(state) {
            return (partial.to_vec(), match_len);
        }
        let mut queue: VecDeque<(LexiconStateId, Vec<u8>, u32)> = VecDeque::new();
        queue.push_back((state, Vec::new(), 0));
        while let Some((state, suffix, extra)) = queue.pop_front() {
            for (label, next) in self.fst.label_transitions(state) {
                let mut completed = suffix.clone();
                completed.extend_from_slice(&encode_label(label));
                if self.fst.is_final(next) {
                    let mut key = partial.to_vec();
                    key.extend_from_slice(&completed);
                    return (key, match_len + extra + 1);
                }
                queue.push_back((next, completed, extra + 1));
            }
        }
        // dead cursor: no completion reachable, no weight to award
        (partial.to_vec(), match_len)
    }
}

fn map_tokens(tokens: &[String], vocab: &Vocabulary) -> Option<Vec<u32>> {
    tokens.iter().map(|t| vocab.mapped_label(t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn cat_scorer(weight: f32) -> HotwordScorer {
        HotwordScorer::new(
            &toks(&["c", "a", "t", "r", " ", "_"]),
            &[toks(&["c", "a", "t"])],
            &[weight],
            '#',
            false,
        )
        .unwrap()
    }

    #[test]
    fn unmappable_hotwords_are_dropped() {
        let scorer = HotwordScorer::new(
            &toks(&["c", "a", "t"]),
            &[toks(&["c", "a", "t"]), toks(&["d", "o", "g"])],
            &[3.0, 4.0],
            '#',
            false,
        )
        .unwrap();
        assert_eq!(scorer.len(), 1);
    }

    #[test]
    fn boost_grows_to_the_full_weight() {
        let scorer = cat_scorer(6.0);
        let mut arena = TrieArena::new();
        let root = arena.root();
        arena.node_mut(root).is_hotpath = true;
        arena.node_mut(root).hotword_state = scorer.fst_start();

        let expected = [2.0f32, 4.0, 6.0]; // 6 × len / 3
        let mut parent = root;
        for (i, &label) in [0i32, 1, 2].iter().enumerate() {
            let node = arena
                .get_or_create_child(parent, label, i as i32, -1.0, None)
                .unwrap();
            arena.copy_parent_hotword_params(node);
            let state = scorer
                .hotpath_next_state(&mut arena, node)
                .expect("label continues the hotword");
            arena.node_mut(node).is_hotpath = true;
            scorer.estimate_hotword_score(&mut arena, node, state);

            let n = arena.node(node);
            assert_eq!(n.hotword_match_len, i as u32 + 1);
            assert_eq!(n.shortest_unigram_length, 3);
            assert!((n.hotword_score - expected[i]).abs() < 1e-6);
            parent = node;
        }
        // completion event: match length equals the shortest candidate
        let n = arena.node(parent);
        assert_eq!(n.hotword_match_len, n.shortest_unigram_length);
        assert!((n.hotword_score - 6.0).abs() < 1e-6);
    }

    #[test]
    fn divergence_breaks_the_hotpath() {
        let scorer = cat_scorer(5.0);
        let mut arena = TrieArena::new();
        let root = arena.root();
        arena.node_mut(root).is_hotpath = true;
        arena.node_mut(root).hotword_state = scorer.fst_start();

        let c = arena.get_or_create_child(root, 0, 0, -1.0, None).unwrap();
        arena.copy_parent_hotword_params(c);
        let state = scorer.hotpath_next_state(&mut arena, c).unwrap();
        arena.node_mut(c).is_hotpath = true;
        scorer.estimate_hotword_score(&mut arena, c, state);

        // "cr" leaves the hotword and 'r' cannot start one
        let r = arena.get_or_create_child(c, 3, 1, -1.0, None).unwrap();
        arena.copy_parent_hotword_params(r);
        assert!(scorer.hotpath_next_state(&mut arena, r).is_none());
    }

    #[test]
    fn word_start_rewinds_and_retries() {
        let scorer = cat_scorer(5.0);
        let mut arena = TrieArena::new();
        let root = arena.root();
        arena.node_mut(root).hotword_state = scorer.fst_start();

        // parent is not on a hotpath, but the child is a word start
        let c = arena.get_or_create_child(root, 0, 0, -1.0, None).unwrap();
        arena.copy_parent_hotword_params(c);
        arena.node_mut(c).is_word_start_char = true;
        let state = scorer
            .hotpath_next_state(&mut arena, c)
            .expect("word start restarts the match");
        assert_eq!(arena.node(c).hotword_state, scorer.fst_start());
        scorer.estimate_hotword_score(&mut arena, c, state);
        assert_eq!(arena.node(c).hotword_match_len, 1);
    }

    #[test]
    fn shortest_completion_prefers_the_nearer_hotword() {
        // two hotwords sharing the prefix "ca": "cat" (len 3), "cart" (4)
        let scorer = HotwordScorer::new(
            &toks(&["c", "a", "t", "r"]),
            &[toks(&["c", "a", "t"]), toks(&["c", "a", "r", "t"])],
            &[3.0, 8.0],
            '#',
            false,
        )
        .unwrap();
        let mut arena = TrieArena::new();
        let root = arena.root();
        arena.node_mut(root).is_hotpath = true;
        arena.node_mut(root).hotword_state = scorer.fst_start();

        let c = arena.get_or_create_child(root, 0, 0, -1.0, None).unwrap();
        arena.copy_parent_hotword_params(c);
        let state = scorer.hotpath_next_state(&mut arena, c).unwrap();
        arena.node_mut(c).is_hotpath = true;
        scorer.estimate_hotword_score(&mut arena, c, state);

        let n = arena.node(c);
        assert_eq!(n.shortest_unigram_length, 3);
        assert!((n.hotword_weight - 3.0).abs() < 1e-6);
        assert!((n.hotword_score - 1.0).abs() < 1e-6);
    }
}
