//! Demo decoder: read a JSON fixture holding a vocabulary and probability
//! frames, run the beam search and print the ranked hypotheses.
//!
//! Fixture layout:
//! ```json
//! {
//!   "vocab": ["a", "b", " ", "_"],
//!   "frames": [[0.1, 0.2, 0.1, 0.6], ...],
//!   "blank_id": 3
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

use libctc::{ctc_beam_search_decoder, DecoderOptions};

#[derive(Parser)]
#[command(name = "libctc", about = "CTC prefix beam search over a JSON fixture")]
struct Args {
    /// JSON fixture with `vocab` and `frames`.
    input: PathBuf,

    /// Frontier bound of the prefix search.
    #[arg(long, default_value_t = 100)]
    beam_width: usize,

    /// Treat the frames as log-probabilities.
    #[arg(long)]
    log_probs: bool,

    /// How many hypotheses to print.
    #[arg(long, default_value_t = 5)]
    top: usize,
}

#[derive(Deserialize)]
struct Fixture {
    vocab: Vec<String>,
    frames: Vec<Vec<f32>>,
    #[serde(default)]
    blank_id: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let content = std::fs::read_to_string(&args.input)
        .with_context(|| format!("read fixture {}", args.input.display()))?;
    let fixture: Fixture = serde_json::from_str(&content).context("parse fixture")?;

    let mut options = DecoderOptions::with_vocab(fixture.vocab.clone());
    options.beam_width = args.beam_width;
    options.blank_id = fixture.blank_id;
    options.log_probs_input = args.log_probs;

    let results = ctc_beam_search_decoder(&fixture.frames, Arc::new(options), None, None)?;

    for (rank, hyp) in results.iter().take(args.top).enumerate() {
        let text: String = hyp
            .tokens
            .iter()
            .map(|&t| fixture.vocab[t as usize].as_str())
            .collect();
        println!("{:>2}. {:>10.4}  {:?}  {:?}", rank + 1, hyp.score, text, hyp.timesteps);
    }
    Ok(())
}
