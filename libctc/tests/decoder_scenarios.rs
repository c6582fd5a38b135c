// End-to-end decoding scenarios exercising the public API: plain beam
// search, vocabulary pruning, lexicon-constrained word decoding, hotword
// boosting, and the streaming/batch drivers.

use std::sync::Arc;

use libctc::{
    ctc_beam_search_decoder, ctc_beam_search_decoder_with_state, DecoderOptions, DecoderState,
    HotwordScorer, Hypothesis, NGramModel, Scorer, TokenizerKind,
};

fn toks(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn options(vocab: &[&str], blank_id: usize, beam_width: usize) -> Arc<DecoderOptions> {
    let mut opts = DecoderOptions::with_vocab(toks(vocab));
    opts.blank_id = blank_id;
    opts.beam_width = beam_width;
    Arc::new(opts)
}

fn assert_well_formed(results: &[Hypothesis], blank_id: i32, num_frames: i32, beam_width: usize) {
    assert!(!results.is_empty());
    assert!(results.len() <= beam_width);
    assert!(results[0].score.is_finite());
    for hyp in results {
        assert!(hyp.tokens.len() <= num_frames as usize);
        assert_eq!(hyp.tokens.len(), hyp.timesteps.len());
        assert!(!hyp.tokens.contains(&blank_id));
        for pair in hyp.timesteps.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        for &t in &hyp.timesteps {
            assert!(t >= 0 && t < num_frames);
        }
    }
}

// Two-class trivial CTC: P(a) = P(a-) + P(aa) + P(-a) = 0.58 > P(--) = 0.42.
#[test]
fn scenario_two_class_trivial() {
    let frames = vec![vec![0.3, 0.7], vec![0.4, 0.6]];
    let results = ctc_beam_search_decoder(&frames, options(&["a", "_"], 1, 10), None, None).unwrap();

    assert_well_formed(&results, 1, 2, 10);
    assert_eq!(results[0].tokens, vec![0]);
    assert!((results[0].score - 0.58f32.ln()).abs() < 1e-3);
}

// Pure blank input collapses to the empty sequence.
#[test]
fn scenario_pure_blank() {
    let frames = vec![vec![0.1, 0.9]; 3];
    let results = ctc_beam_search_decoder(&frames, options(&["a", "_"], 1, 10), None, None).unwrap();

    assert!(results[0].tokens.is_empty());
    assert!((results[0].score - 3.0 * 0.9f32.ln()).abs() < 1e-4);
}

// Repeats separated by a blank survive collapsing: alignment "a a _ a a"
// yields two a's.
#[test]
fn scenario_repeat_collapse() {
    let a = vec![0.9, 0.05, 0.05];
    let blank = vec![0.05, 0.05, 0.9];
    let frames = vec![a.clone(), a.clone(), blank, a.clone(), a];
    let results =
        ctc_beam_search_decoder(&frames, options(&["a", "b", "_"], 2, 10), None, None).unwrap();

    assert_well_formed(&results, 2, 5, 10);
    assert_eq!(results[0].tokens, vec![0, 0]);
}

// With cutoff_top_n = 1 only the argmax label expands, so beam search
// degenerates to greedy decoding.
#[test]
fn scenario_cutoff_matches_greedy() {
    let frames = vec![
        vec![0.6, 0.3, 0.1],
        vec![0.6, 0.3, 0.1],
        vec![0.1, 0.2, 0.7],
        vec![0.2, 0.7, 0.1],
    ];
    let blank_id = 2usize;

    // greedy argmax path with blanks and repeats collapsed
    let mut greedy: Vec<i32> = Vec::new();
    let mut prev = blank_id;
    for frame in &frames {
        let argmax = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        if argmax != blank_id && argmax != prev {
            greedy.push(argmax as i32);
        }
        prev = argmax;
    }

    let mut opts = DecoderOptions::with_vocab(toks(&["a", "b", "_"]));
    opts.blank_id = blank_id;
    opts.beam_width = 10;
    opts.cutoff_top_n = 1;
    let results = ctc_beam_search_decoder(&frames, Arc::new(opts), None, None).unwrap();

    assert_eq!(results[0].tokens, greedy);
}

// Hotword boost: acoustics prefer "car", the booster flips it to "cat".
#[test]
fn scenario_hotword_boost() {
    let vocab = ["c", "a", "t", "r", " ", "_"];
    let frames = vec![
        vec![0.9, 0.02, 0.02, 0.02, 0.02, 0.02],
        vec![0.02, 0.9, 0.02, 0.02, 0.02, 0.02],
        vec![0.02, 0.02, 0.4, 0.5, 0.02, 0.06],
    ];

    let plain =
        ctc_beam_search_decoder(&frames, options(&vocab, 5, 10), None, None).unwrap();
    assert_eq!(plain[0].tokens, vec![0, 1, 3], "acoustics alone pick car");

    let hotwords = HotwordScorer::new(
        &toks(&vocab),
        &[toks(&["c", "a", "t"])],
        &[5.0],
        '#',
        false,
    )
    .unwrap();
    let boosted = ctc_beam_search_decoder(
        &frames,
        options(&vocab, 5, 10),
        None,
        Some(Arc::new(hotwords)),
    )
    .unwrap();
    assert_eq!(boosted[0].tokens, vec![0, 1, 2], "the boost promotes cat");
}

// Feeding a stream in one call or in any partition yields the same ranking.
#[test]
fn scenario_streaming_equivalence() {
    let vocab = ["a", "b", "_"];
    let frames: Vec<Vec<f32>> = (0..10)
        .map(|t| {
            let a = 0.2 + 0.06 * (t % 5) as f32;
            let b = 0.5 - 0.05 * (t % 4) as f32;
            vec![a, b, 1.0 - a - b]
        })
        .collect();

    let one_shot =
        ctc_beam_search_decoder(&frames, options(&vocab, 2, 8), None, None).unwrap();

    let mut state = DecoderState::new(options(&vocab, 2, 8), None, None).unwrap();
    assert!(ctc_beam_search_decoder_with_state(&frames[0..3], &mut state, false)
        .unwrap()
        .is_empty());
    assert!(ctc_beam_search_decoder_with_state(&frames[3..7], &mut state, false)
        .unwrap()
        .is_empty());
    let streamed =
        ctc_beam_search_decoder_with_state(&frames[7..10], &mut state, true).unwrap();

    assert_eq!(one_shot.len(), streamed.len());
    for (a, b) in one_shot.iter().zip(&streamed) {
        assert_eq!(a.tokens, b.tokens);
        assert_eq!(a.timesteps, b.timesteps);
        assert!((a.score - b.score).abs() < 1e-6);
    }
}

// Identical inputs decode identically.
#[test]
fn decoding_is_deterministic() {
    let vocab = ["a", "b", "c", "_"];
    let frames: Vec<Vec<f32>> = (0..8)
        .map(|t| {
            let x = 0.1 + 0.05 * (t % 3) as f32;
            vec![x, 0.35 - x / 2.0, 0.15 + x / 3.0, 0.5 - 5.0 * x / 6.0]
        })
        .collect();

    let first = ctc_beam_search_decoder(&frames, options(&vocab, 3, 6), None, None).unwrap();
    let second = ctc_beam_search_decoder(&frames, options(&vocab, 3, 6), None, None).unwrap();
    assert_eq!(first, second);
}

fn word_scorer(vocab: &[&str], alpha: f32, beta: f32) -> Scorer {
    let mut lm = NGramModel::new(2);
    lm.insert_ngram(&["cat"], -0.7, -0.3);
    lm.insert_ngram(&["car"], -1.2, -0.3);
    lm.insert_ngram(&["cat", "car"], -0.4, 0.0);
    Scorer::new(
        alpha,
        beta,
        Box::new(lm),
        &toks(vocab),
        TokenizerKind::Word,
        None,
    )
    .unwrap()
}

// With a word LM and its derived lexicon, every decoded word stays inside
// the lexicon.
#[test]
fn lexicon_constrains_word_decoding() {
    let vocab = ["c", "a", "t", "r", " ", "_"];
    let scorer = Arc::new(word_scorer(&vocab, 0.5, 0.5));

    // acoustics wander over all letters; the lexicon admits only cat/car
    let frames: Vec<Vec<f32>> = vec![
        vec![0.7, 0.05, 0.05, 0.05, 0.05, 0.1],
        vec![0.05, 0.7, 0.05, 0.05, 0.05, 0.1],
        vec![0.05, 0.05, 0.4, 0.4, 0.05, 0.05],
        vec![0.05, 0.05, 0.05, 0.05, 0.7, 0.1],
    ];
    let results = ctc_beam_search_decoder(
        &frames,
        options(&vocab, 5, 12),
        Some(scorer.clone()),
        None,
    )
    .unwrap();

    assert_well_formed(&results, 5, 4, 12);
    let lexicon = scorer.lexicon().expect("word scorer carries a lexicon");
    let vocabulary = scorer.vocabulary();
    for hyp in &results {
        let words = scorer.split_labels(&hyp.tokens);
        for word in words {
            let mapped: Vec<u32> = word
                .chars()
                .map(|ch| vocabulary.mapped_label(&ch.to_string()).unwrap())
                .collect();
            assert!(
                lexicon.accepts_prefix(&mapped),
                "decoded word {word:?} escaped the lexicon"
            );
        }
    }
}

// The LM reranks equally plausible acoustics toward the likelier word.
#[test]
fn language_model_reranks() {
    let vocab = ["c", "a", "t", "r", " ", "_"];
    let frames: Vec<Vec<f32>> = vec![
        vec![0.8, 0.04, 0.04, 0.04, 0.04, 0.04],
        vec![0.04, 0.8, 0.04, 0.04, 0.04, 0.04],
        // dead heat between t and r
        vec![0.04, 0.04, 0.42, 0.42, 0.04, 0.04],
        vec![0.04, 0.04, 0.04, 0.04, 0.8, 0.04],
    ];

    let scorer = Arc::new(word_scorer(&vocab, 2.0, 0.0));
    let results =
        ctc_beam_search_decoder(&frames, options(&vocab, 5, 12), Some(scorer), None).unwrap();
    // unigram log10 P(cat) = -0.7 beats P(car) = -1.2
    assert_eq!(results[0].tokens, vec![0, 1, 2, 4]);
}

#[test]
fn streaming_interim_decode_does_not_disturb_the_stream() {
    let vocab = ["a", "b", "_"];
    let frames: Vec<Vec<f32>> = (0..6)
        .map(|t| {
            let a = 0.3 + 0.05 * (t % 3) as f32;
            vec![a, 0.55 - a / 2.0, 0.45 - a / 2.0]
        })
        .collect();

    let one_shot = ctc_beam_search_decoder(&frames, options(&vocab, 2, 8), None, None).unwrap();

    let mut state = DecoderState::new(options(&vocab, 2, 8), None, None).unwrap();
    state.next(&frames[..4]).unwrap();
    let _interim = state.decode(); // peek mid-stream
    state.next(&frames[4..]).unwrap();
    let streamed = state.decode();

    assert_eq!(one_shot.len(), streamed.len());
    for (a, b) in one_shot.iter().zip(&streamed) {
        assert_eq!(a.tokens, b.tokens);
        assert!((a.score - b.score).abs() < 1e-6);
    }
}

#[test]
fn log_probs_input_matches_probability_input() {
    let vocab = ["a", "b", "_"];
    let frames = vec![
        vec![0.5f32, 0.3, 0.2],
        vec![0.2, 0.6, 0.2],
        vec![0.1, 0.2, 0.7],
    ];
    let log_frames: Vec<Vec<f32>> = frames
        .iter()
        .map(|f| f.iter().map(|p| p.ln()).collect())
        .collect();

    let plain = ctc_beam_search_decoder(&frames, options(&vocab, 2, 8), None, None).unwrap();

    let mut opts = DecoderOptions::with_vocab(toks(&vocab));
    opts.blank_id = 2;
    opts.beam_width = 8;
    opts.log_probs_input = true;
    let logged = ctc_beam_search_decoder(&log_frames, Arc::new(opts), None, None).unwrap();

    assert_eq!(plain[0].tokens, logged[0].tokens);
    assert!((plain[0].score - logged[0].score).abs() < 1e-3);
}
