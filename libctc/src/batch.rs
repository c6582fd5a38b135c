//! Batch and streaming decoding over a bounded worker pool.
//!
//! Utterances are independent: each task owns its `DecoderState` while the
//! options and scorers are shared read-only. Results come back indexed by
//! input position regardless of completion order, and a fatal error in one
//! utterance leaves the rest of the batch intact.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::warn;

use libctc_core::{DecodeError, DecoderOptions, DecoderState, HotwordScorer, Hypothesis, Scorer};

/// Decode a batch of utterances, one fresh `DecoderState` each.
///
/// `seq_lens`, when given, limits each utterance to its valid frame count;
/// lengths beyond the available frames are clamped with a warning.
pub fn decode_batch(
    probs_split: &[Vec<Vec<f32>>],
    seq_lens: Option<&[usize]>,
    options: Arc<DecoderOptions>,
    scorer: Option<Arc<Scorer>>,
    hotword_scorer: Option<Arc<HotwordScorer>>,
) -> anyhow::Result<Vec<Result<Vec<Hypothesis>, DecodeError>>> {
    options.validate()?;
    if let Some(lens) = seq_lens {
        anyhow::ensure!(
            lens.len() == probs_split.len(),
            "{} utterances but {} sequence lengths",
            probs_split.len(),
            lens.len()
        );
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.num_processes)
        .build()?;
    let results = pool.install(|| {
        probs_split
            .par_iter()
            .enumerate()
            .map(|(i, probs)| {
                let frames = clamp_frames(probs, seq_lens.map(|lens| lens[i]));
                let mut state = DecoderState::new(
                    options.clone(),
                    scorer.clone(),
                    hotword_scorer.clone(),
                )?;
                state.next(frames)?;
                Ok(state.decode())
            })
            .collect()
    });
    Ok(results)
}

/// Streaming batch: feed frames into caller-owned states, ranking only the
/// utterances flagged final. Entries not yet final yield empty hypothesis
/// lists. The caller must not reuse a state concurrently across batches.
pub fn decode_batch_streaming(
    probs_split: &[Vec<Vec<f32>>],
    seq_lens: Option<&[usize]>,
    states: &mut [DecoderState],
    is_final: &[bool],
    num_processes: usize,
) -> anyhow::Result<Vec<Result<Vec<Hypothesis>, DecodeError>>> {
    anyhow::ensure!(num_processes > 0, "num_processes must be positive");
    anyhow::ensure!(
        probs_split.len() == states.len() && states.len() == is_final.len(),
        "batch size mismatch: {} utterances, {} states, {} final flags",
        probs_split.len(),
        states.len(),
        is_final.len()
    );
    if let Some(lens) = seq_lens {
        anyhow::ensure!(
            lens.len() == probs_split.len(),
            "{} utterances but {} sequence lengths",
            probs_split.len(),
            lens.len()
        );
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_processes)
        .build()?;
    let results = pool.install(|| {
        probs_split
            .par_iter()
            .zip(states.par_iter_mut())
            .zip(is_final.par_iter())
            .enumerate()
            .map(|(i, ((probs, state), &is_final))| {
                let frames = clamp_frames(probs, seq_lens.map(|lens| lens[i]));
                state.next(frames)?;
                Ok(if is_final { state.decode() } else { Vec::new() })
            })
            .collect()
    });
    Ok(results)
}

fn clamp_frames<'a>(probs: &'a [Vec<f32>], valid_len: Option<usize>) -> &'a [Vec<f32>] {
    match valid_len {
        Some(len) if len > probs.len() => {
            warn!(
                requested = len,
                available = probs.len(),
                "valid length exceeds frame count, clamping"
            );
            probs
        }
        Some(len) => &probs[..len],
        None => probs,
    }
}
