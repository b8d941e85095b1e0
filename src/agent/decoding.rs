//! Autoregressive decoding strategies for the local model.
//!
//! The strategies only see per-step logits through [`StepDecoder`], so they
//! can be exercised without loading any weights.

use std::collections::HashSet;

use crate::models::DecodingConfig;

/// One autoregressive step: given the decoder tokens produced so far, return
/// the next-token logits over the vocabulary.
///
/// Clones must be independent. Beam search clones a decoder when a beam
/// branches and keeps stepping each copy separately.
pub trait StepDecoder: Clone {
    type Error;

    fn step(&mut self, tokens: &[u32]) -> Result<Vec<f32>, Self::Error>;
}

/// Multiplicative penalty on tokens that already appear in `previous`:
/// positive logits are divided by `penalty`, negative ones multiplied.
pub fn apply_repetition_penalty(logits: &mut [f32], previous: &[u32], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    let seen: HashSet<u32> = previous.iter().copied().collect();
    for token in seen {
        if let Some(logit) = logits.get_mut(token as usize) {
            *logit = if *logit < 0.0 { *logit * penalty } else { *logit / penalty };
        }
    }
}

/// Tokens that would complete an n-gram of size `n` already present in
/// `tokens`.
pub fn banned_ngram_tokens(tokens: &[u32], n: usize) -> Vec<u32> {
    if n == 0 || tokens.len() + 1 < n {
        return Vec::new();
    }
    if n == 1 {
        return tokens.to_vec();
    }
    let prefix = &tokens[tokens.len() + 1 - n..];
    tokens
        .windows(n)
        .filter(|window| &window[..n - 1] == prefix)
        .map(|window| window[n - 1])
        .collect()
}

fn apply_penalties(logits: &mut [f32], tokens: &[u32], config: &DecodingConfig) {
    apply_repetition_penalty(logits, tokens, config.repetition_penalty);
    for token in banned_ngram_tokens(tokens, config.no_repeat_ngram_size) {
        if let Some(logit) = logits.get_mut(token as usize) {
            *logit = f32::NEG_INFINITY;
        }
    }
}

pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![f32::NEG_INFINITY; logits.len()];
    }
    let log_sum = logits.iter().map(|l| (l - max).exp()).sum::<f32>().ln() + max;
    logits.iter().map(|l| l - log_sum).collect()
}

pub fn argmax(logits: &[f32]) -> Option<u32> {
    logits
        .iter()
        .enumerate()
        .filter(|(_, l)| !l.is_nan())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i as u32)
}

/// Greedy or sampled decoding: `pick` chooses the next token from the
/// penalized logits. Returns the generated tokens without `start_token`.
pub fn pick_search<D, P>(
    mut decoder: D,
    start_token: u32,
    eos_token: u32,
    config: &DecodingConfig,
    mut pick: P,
) -> Result<Vec<u32>, D::Error>
where
    D: StepDecoder,
    P: FnMut(&[f32]) -> Result<u32, D::Error>,
{
    let mut tokens = vec![start_token];
    for _ in 0..config.max_new_tokens {
        let mut logits = decoder.step(&tokens)?;
        apply_penalties(&mut logits, &tokens, config);
        let next = pick(&logits)?;
        if next == eos_token {
            break;
        }
        tokens.push(next);
    }
    Ok(tokens.split_off(1))
}

struct Beam<D> {
    tokens: Vec<u32>,
    score: f32,
    decoder: D,
}

/// Length-normalized beam search that stops once `num_beams` hypotheses
/// have finished. Returns the best hypothesis without `start_token`.
pub fn beam_search<D: StepDecoder>(
    decoder: D,
    start_token: u32,
    eos_token: u32,
    config: &DecodingConfig,
) -> Result<Vec<u32>, D::Error> {
    let width = config.num_beams.max(1);
    let mut beams = vec![Beam { tokens: vec![start_token], score: 0.0, decoder }];
    let mut finished: Vec<(Vec<u32>, f32)> = Vec::new();

    for _ in 0..config.max_new_tokens {
        let mut candidates: Vec<(usize, u32, f32)> = Vec::new();
        for (index, beam) in beams.iter_mut().enumerate() {
            let mut logits = beam.decoder.step(&beam.tokens)?;
            apply_penalties(&mut logits, &beam.tokens, config);
            let log_probs = log_softmax(&logits);

            let mut order: Vec<u32> = (0..log_probs.len() as u32)
                .filter(|&t| log_probs[t as usize].is_finite())
                .collect();
            order.sort_unstable_by(|a, b| log_probs[*b as usize].total_cmp(&log_probs[*a as usize]));
            for token in order.into_iter().take(2 * width) {
                candidates.push((index, token, beam.score + log_probs[token as usize]));
            }
        }
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut next: Vec<Beam<D>> = Vec::with_capacity(width);
        for (index, token, score) in candidates {
            let parent = &beams[index];
            if token == eos_token {
                finished.push((parent.tokens.clone(), normalized(score, parent.tokens.len())));
                if finished.len() >= width {
                    break;
                }
                continue;
            }
            let mut tokens = parent.tokens.clone();
            tokens.push(token);
            next.push(Beam { tokens, score, decoder: parent.decoder.clone() });
            if next.len() >= width {
                break;
            }
        }

        beams = next;
        if finished.len() >= width || beams.is_empty() {
            break;
        }
    }

    finished.extend(beams.into_iter().map(|beam| {
        let score = normalized(beam.score, beam.tokens.len());
        (beam.tokens, score)
    }));

    let mut best = finished
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(tokens, _)| tokens)
        .unwrap_or_default();
    if !best.is_empty() {
        best.remove(0);
    }
    Ok(best)
}

fn normalized(score: f32, len: usize) -> f32 {
    score / len.max(1) as f32
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    const VOCAB: usize = 6;
    const EOS: u32 = 1;

    /// Emits logits from a fixed function of the tokens decoded so far.
    #[derive(Clone)]
    struct TableDecoder {
        table: fn(&[u32]) -> Vec<f32>,
    }

    impl StepDecoder for TableDecoder {
        type Error = Infallible;

        fn step(&mut self, tokens: &[u32]) -> Result<Vec<f32>, Infallible> {
            Ok((self.table)(tokens))
        }
    }

    fn one_hot(token: u32, strength: f32) -> Vec<f32> {
        let mut logits = vec![0.0; VOCAB];
        logits[token as usize] = strength;
        logits
    }

    fn greedy(config: &DecodingConfig, decoder: TableDecoder) -> Vec<u32> {
        pick_search(decoder, 0, EOS, config, |logits| Ok(argmax(logits).unwrap_or(EOS))).unwrap()
    }

    fn plain() -> DecodingConfig {
        DecodingConfig {
            max_new_tokens: 10,
            num_beams: 1,
            no_repeat_ngram_size: 0,
            repetition_penalty: 1.0,
            ..DecodingConfig::default()
        }
    }

    #[test]
    fn repetition_penalty_shrinks_seen_logits_toward_less_likely() {
        let mut logits = vec![2.0, -2.0, 3.0];
        apply_repetition_penalty(&mut logits, &[0, 1, 0], 2.0);
        assert_eq!(logits, vec![1.0, -4.0, 3.0]);
    }

    #[test]
    fn banned_ngrams_follow_the_current_prefix() {
        // "5 3 4 ... 5 3" → completing "5 3 4" again is banned.
        assert_eq!(banned_ngram_tokens(&[5, 3, 4, 2, 5, 3], 3), vec![4]);
        assert!(banned_ngram_tokens(&[5, 3], 3).is_empty());
        assert!(banned_ngram_tokens(&[5, 3, 4], 0).is_empty());
    }

    #[test]
    fn greedy_stops_at_eos() {
        let decoder = TableDecoder {
            table: |tokens| match tokens.len() {
                1 => one_hot(2, 5.0),
                2 => one_hot(3, 5.0),
                _ => one_hot(EOS, 5.0),
            },
        };
        assert_eq!(greedy(&plain(), decoder), vec![2, 3]);
    }

    #[test]
    fn greedy_respects_max_new_tokens() {
        let decoder = TableDecoder { table: |_| one_hot(4, 5.0) };
        let config = DecodingConfig { max_new_tokens: 3, ..plain() };
        assert_eq!(greedy(&config, decoder), vec![4, 4, 4]);
    }

    #[test]
    fn no_repeat_ngram_breaks_a_loop() {
        // The model always prefers 2. Once "2 2" has been emitted the bigram
        // is blocked, so it has to fall back to 3 before returning to 2.
        let decoder = TableDecoder {
            table: |tokens| {
                let mut logits = vec![0.0; VOCAB];
                logits[2] = 5.0;
                logits[3] = 4.0;
                if tokens.len() > 4 {
                    logits[EOS as usize] = 10.0;
                }
                logits
            },
        };
        let config = DecodingConfig { no_repeat_ngram_size: 2, ..plain() };
        assert_eq!(greedy(&config, decoder), vec![2, 2, 3, 2]);
    }

    #[test]
    fn beam_search_finds_the_better_sequence_greedy_misses() {
        // Greedy takes 2 (slightly better first step) and then gets a flat
        // distribution. Path 3 is confident on both steps.
        let decoder = TableDecoder {
            table: |tokens| match tokens {
                [0] => vec![0.0, -10.0, 1.0, 0.9, -10.0, -10.0],
                [0, 2] => vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [0, 3] => one_hot(4, 20.0),
                _ => one_hot(EOS, 20.0),
            },
        };

        let greedy_out = greedy(&plain(), decoder.clone());
        assert_eq!(greedy_out[0], 2);

        let config = DecodingConfig { num_beams: 3, ..plain() };
        let beam_out = beam_search(decoder, 0, EOS, &config).unwrap();
        assert_eq!(beam_out, vec![3, 4]);
    }

    #[test]
    fn log_softmax_normalizes() {
        let total: f32 = log_softmax(&[1.0, 2.0, 3.0]).iter().map(|l| l.exp()).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(log_softmax(&[f32::NEG_INFINITY; 2]).iter().all(|l| l.is_infinite()));
    }
}
