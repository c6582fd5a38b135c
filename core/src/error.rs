//! Fatal error kinds surfaced by the decoder.

use thiserror::Error;

/// Errors that abort a decode or reject a configuration.
///
/// Out-of-vocabulary tokens and valid-length clamping are not errors; the
/// former lands in scores, the latter is logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A probability frame does not line up with the vocabulary.
    #[error("frame {time_step} carries {got} probabilities but the vocabulary has {expected} tokens")]
    FrameShapeMismatch {
        time_step: usize,
        expected: usize,
        got: usize,
    },

    /// The decoder options fail validation.
    #[error("invalid decoder options: {0}")]
    InvalidOptions(&'static str),
}
