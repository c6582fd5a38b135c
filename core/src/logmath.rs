//! Log-domain arithmetic shared by the decoder and scorers.
//!
//! All probabilities inside the search are natural-log values with
//! `f32::NEG_INFINITY` as the impossible-event sentinel.

/// Impossible event in log space.
pub const LOG_ZERO: f32 = f32::NEG_INFINITY;

/// log10(e). Language model scores arrive in the model's native base
/// (log10); dividing by this constant converts them to natural logs.
pub const LOG10_E: f32 = 0.434_294_48;

/// Numerically stable `log(exp(a) + exp(b))`.
pub fn log_sum_exp(a: f32, b: f32) -> f32 {
    if a == LOG_ZERO {
        return b;
    }
    if b == LOG_ZERO {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}
