//! Prefix trie over decoded label sequences.
//!
//! Every node identifies the prefix spelled by the labels on its root path
//! and carries the CTC probability state of that prefix: blank-ending and
//! non-blank-ending log-probabilities for the previous and the current time
//! step, with `_hw` twins tracking the hotword-augmented score separately.
//!
//! Nodes live in an arena indexed by `NodeId`; `parent` and `children` hold
//! indices, and slots freed by pruning are reused through a free list.
//! A node leaves the active frontier by tombstoning (`exists = false`) and
//! is unlinked only once it has no children left.

use crate::lexicon::{Lexicon, LexiconStateId};
use crate::logmath::{log_sum_exp, LOG_ZERO};
use crate::vocab::ROOT_CHARACTER;

/// Arena index of a trie node.
pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct TrieNode {
    /// Label at this node, `ROOT_CHARACTER` at the root.
    pub character: i32,
    /// Frame index at which this label was first admitted.
    pub timestep: i32,
    pub parent: Option<NodeId>,
    /// Insertion-ordered label → child association.
    children: Vec<(i32, NodeId)>,
    /// Frontier tombstone; false once pruned from the beam.
    pub exists: bool,

    pub log_prob_b_prev: f32,
    pub log_prob_nb_prev: f32,
    pub log_prob_b_cur: f32,
    pub log_prob_nb_cur: f32,
    pub log_prob_b_prev_hw: f32,
    pub log_prob_nb_prev_hw: f32,
    pub log_prob_b_cur_hw: f32,
    pub log_prob_nb_cur_hw: f32,
    /// Input log-probability of this label at `timestep`.
    pub log_prob_c: f32,
    /// Total previous-step score, `logsumexp(b_prev, nb_prev)`.
    pub score: f32,
    pub score_hw: f32,

    pub lexicon_state: LexiconStateId,
    pub is_word_start_char: bool,

    pub is_hotpath: bool,
    pub hotword_state: LexiconStateId,
    pub hotword_match_len: u32,
    pub shortest_unigram_length: u32,
    pub hotword_weight: f32,
    pub hotword_score: f32,
    /// Canonical byte key of the labels matched so far.
    pub partial_hotword: Vec<u8>,
}

impl TrieNode {
    fn blank(character: i32, timestep: i32, parent: Option<NodeId>) -> Self {
        Self {
            character,
            timestep,
            parent,
            children: Vec::new(),
            exists: true,
            log_prob_b_prev: LOG_ZERO,
            log_prob_nb_prev: LOG_ZERO,
            log_prob_b_cur: LOG_ZERO,
            log_prob_nb_cur: LOG_ZERO,
            log_prob_b_prev_hw: LOG_ZERO,
            log_prob_nb_prev_hw: LOG_ZERO,
            log_prob_b_cur_hw: LOG_ZERO,
            log_prob_nb_cur_hw: LOG_ZERO,
            log_prob_c: LOG_ZERO,
            score: LOG_ZERO,
            score_hw: LOG_ZERO,
            lexicon_state: 0,
            is_word_start_char: false,
            is_hotpath: false,
            hotword_state: 0,
            hotword_match_len: 0,
            shortest_unigram_length: 0,
            hotword_weight: 0.0,
            hotword_score: 0.0,
            partial_hotword: Vec::new(),
        }
    }
}

/// Arena owning the whole hypothesis tree of one utterance.
#[derive(Debug)]
pub struct TrieArena {
    nodes: Vec<TrieNode>,
    free: Vec<NodeId>,
    root: NodeId,
}

impl Default for TrieArena {
    fn default() -> Self {
        Self::new()
    }
}

impl TrieArena {
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::blank(ROOT_CHARACTER, 0, None)],
            free: Vec::new(),
            root: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &TrieNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TrieNode {
        &mut self.nodes[id]
    }

    pub fn character(&self, id: NodeId) -> i32 {
        self.nodes[id].character
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    /// Number of live (allocated) nodes, root included.
    pub fn live_nodes(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Extend `parent` with `character`, returning the child node.
    ///
    /// An existing child is refreshed: its cached `log_prob_c` takes the
    /// maximum over visits (and `timestep` moves only on improvement), and
    /// a tombstoned child rejoins the frontier with cleared probabilities.
    ///
    /// With a lexicon, the extension must follow an arc for the shifted
    /// label from the parent's cursor. When no arc exists but the parent
    /// sits on an accepting state, the parent's cursor rewinds to the start
    /// so later extensions restart word lookup; the extension itself still
    /// fails. An arc into an accepting state also rewinds the child's
    /// cursor, closing the word.
    pub fn get_or_create_child(
        &mut self,
        parent: NodeId,
        character: i32,
        timestep: i32,
        log_prob_c: f32,
        lexicon: Option<&Lexicon>,
    ) -> Option<NodeId> {
        if let Some(child) = self.find_child(parent, character) {
            let node = &mut self.nodes[child];
            if node.log_prob_c < log_prob_c {
                node.log_prob_c = log_prob_c;
                node.timestep = timestep;
            }
            if !node.exists {
                node.exists = true;
                node.log_prob_b_prev = LOG_ZERO;
                node.log_prob_nb_prev = LOG_ZERO;
                node.log_prob_b_cur = LOG_ZERO;
                node.log_prob_nb_cur = LOG_ZERO;
                node.log_prob_b_prev_hw = LOG_ZERO;
                node.log_prob_nb_prev_hw = LOG_ZERO;
                node.log_prob_b_cur_hw = LOG_ZERO;
                node.log_prob_nb_cur_hw = LOG_ZERO;
            }
            return Some(child);
        }

        match lexicon {
            Some(lexicon) => {
                let state = self.nodes[parent].lexicon_state;
                match lexicon.next(state, character as u32 + 1) {
                    None => {
                        if lexicon.is_final(state) {
                            self.nodes[parent].lexicon_state = lexicon.start();
                        }
                        None
                    }
                    Some(next_state) => {
                        let next_state = if lexicon.is_final(next_state) {
                            lexicon.start()
                        } else {
                            next_state
                        };
                        let child = self.alloc_child(parent, character, timestep, log_prob_c);
                        self.nodes[child].lexicon_state = next_state;
                        Some(child)
                    }
                }
            }
            None => Some(self.alloc_child(parent, character, timestep, log_prob_c)),
        }
    }

    fn find_child(&self, parent: NodeId, character: i32) -> Option<NodeId> {
        self.nodes[parent]
            .children
            .iter()
            .find(|&&(c, _)| c == character)
            .map(|&(_, id)| id)
    }

    fn alloc_child(
        &mut self,
        parent: NodeId,
        character: i32,
        timestep: i32,
        log_prob_c: f32,
    ) -> NodeId {
        let mut node = TrieNode::blank(character, timestep, Some(parent));
        node.log_prob_c = log_prob_c;
        // hotword cursors resume from the owning prefix
        node.hotword_state = self.nodes[parent].hotword_state;
        node.hotword_match_len = self.nodes[parent].hotword_match_len;
        node.partial_hotword = self.nodes[parent].partial_hotword.clone();

        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.nodes[parent].children.push((character, id));
        id
    }

    /// Labels and timesteps from the root to `id`.
    pub fn path_to_vec(&self, id: NodeId) -> (Vec<i32>, Vec<i32>) {
        let (labels, timesteps, _) = self.path_to_vec_until(id, ROOT_CHARACTER, usize::MAX);
        (labels, timesteps)
    }

    /// Walk parent pointers from `id` until a node labelled `stop`, the
    /// root, or `max_steps` collected labels; returns the emitted labels
    /// and timesteps in forward order plus the node the walk stopped at.
    pub fn path_to_vec_until(
        &self,
        id: NodeId,
        stop: i32,
        max_steps: usize,
    ) -> (Vec<i32>, Vec<i32>, NodeId) {
        let mut labels = Vec::new();
        let mut timesteps = Vec::new();
        let mut cur = id;
        loop {
            let node = &self.nodes[cur];
            if node.character == stop || node.character == ROOT_CHARACTER || labels.len() == max_steps
            {
                break;
            }
            labels.push(node.character);
            timesteps.push(node.timestep);
            match node.parent {
                Some(parent) => cur = parent,
                None => break,
            }
        }
        labels.reverse();
        timesteps.reverse();
        (labels, timesteps, cur)
    }

    /// Per-timestep commit: shift the current accumulators into the
    /// previous slot for every live node (ordinary and `_hw`), recompute
    /// the scores and rebuild the frontier in depth-first order.
    pub fn iterate_to_vec(&mut self, out: &mut Vec<NodeId>) {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &mut self.nodes[id];
            if node.exists {
                node.log_prob_b_prev = node.log_prob_b_cur;
                node.log_prob_nb_prev = node.log_prob_nb_cur;
                node.log_prob_b_prev_hw = node.log_prob_b_cur_hw;
                node.log_prob_nb_prev_hw = node.log_prob_nb_cur_hw;

                node.log_prob_b_cur = LOG_ZERO;
                node.log_prob_nb_cur = LOG_ZERO;
                node.log_prob_b_cur_hw = LOG_ZERO;
                node.log_prob_nb_cur_hw = LOG_ZERO;

                node.score = log_sum_exp(node.log_prob_b_prev, node.log_prob_nb_prev);
                node.score_hw = log_sum_exp(node.log_prob_b_prev_hw, node.log_prob_nb_prev_hw);

                out.push(id);
            }
            for &(_, child) in self.nodes[id].children.iter().rev() {
                stack.push(child);
            }
        }
    }

    /// Drop `id` from the frontier. Leaves are unlinked and freed; the
    /// unlink cascades into tombstoned ancestors left childless.
    pub fn remove(&mut self, id: NodeId) {
        self.nodes[id].exists = false;
        if !self.nodes[id].children.is_empty() {
            return;
        }
        let mut cur = id;
        loop {
            let Some(parent) = self.nodes[cur].parent else {
                break;
            };
            let character = self.nodes[cur].character;
            self.nodes[parent].children.retain(|&(c, _)| c != character);
            self.free_node(cur);
            if !self.nodes[parent].children.is_empty() || self.nodes[parent].exists {
                break;
            }
            cur = parent;
        }
    }

    fn free_node(&mut self, id: NodeId) {
        self.nodes[id] = TrieNode::blank(ROOT_CHARACTER, 0, None);
        self.nodes[id].exists = false;
        self.free.push(id);
    }

    /// Resume the parent's hotword cursors on `id` before re-checking it.
    pub fn copy_parent_hotword_params(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id].parent else {
            return;
        };
        let (state, match_len, partial) = {
            let p = &self.nodes[parent];
            (p.hotword_state, p.hotword_match_len, p.partial_hotword.clone())
        };
        let node = &mut self.nodes[id];
        node.hotword_state = state;
        node.hotword_match_len = match_len;
        node.partial_hotword = partial;
    }

    /// Clear the hotword cursors of `id`, rewinding to `start`.
    pub fn reset_hotword_params(&mut self, id: NodeId, start: LexiconStateId) {
        let node = &mut self.nodes[id];
        node.is_hotpath = false;
        node.hotword_state = start;
        node.hotword_match_len = 0;
        node.shortest_unigram_length = 0;
        node.hotword_weight = 0.0;
        node.hotword_score = 0.0;
        node.partial_hotword.clear();
    }
}
