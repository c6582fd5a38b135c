//! libctc crate root
//!
//! Batch and streaming drivers over the core prefix beam search, plus
//! one-shot conveniences for single utterances. Model objects (`Scorer`,
//! `HotwordScorer`, `DecoderOptions`) are built once, wrapped in `Arc` and
//! shared read-only by every worker; each utterance owns its
//! `DecoderState` exclusively.

use std::sync::Arc;

pub mod batch;
pub use batch::{decode_batch, decode_batch_streaming};

// Re-export the core types callers need.
pub use libctc_core::{
    DecodeError, DecoderOptions, DecoderState, HotwordScorer, Hypothesis, LanguageModel, Lexicon,
    LmState, NGramModel, Scorer, TokenizerKind, Vocabulary,
};

/// Decode one utterance with a fresh state.
pub fn ctc_beam_search_decoder(
    probs_seq: &[Vec<f32>],
    options: Arc<DecoderOptions>,
    scorer: Option<Arc<Scorer>>,
    hotword_scorer: Option<Arc<HotwordScorer>>,
) -> Result<Vec<Hypothesis>, DecodeError> {
    let mut state = DecoderState::new(options, scorer, hotword_scorer)?;
    state.next(probs_seq)?;
    Ok(state.decode())
}

/// Feed frames into an existing streaming state, ranking hypotheses only
/// at the end of the stream.
pub fn ctc_beam_search_decoder_with_state(
    probs_seq: &[Vec<f32>],
    state: &mut DecoderState,
    is_final: bool,
) -> Result<Vec<Hypothesis>, DecodeError> {
    state.next(probs_seq)?;
    if is_final {
        Ok(state.decode())
    } else {
        Ok(Vec::new())
    }
}
