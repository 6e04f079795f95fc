use std::cmp::Ordering;

use candle_core::{Result, Tensor, D};
use candle_nn::ops;

use crate::decoder::{Context, DecoderStep};

/// One partial translation in the beam.
///
/// The score is the unnormalized sum of log-probabilities, comparable across
/// lengths exactly because no length normalization is applied. Each
/// hypothesis owns its hidden state; branching clones the state freshly
/// returned by the decoder step, which never mutates a state in place.
#[derive(Clone)]
pub struct Hypothesis {
    pub score: f32,
    pub tokens: Vec<u32>,
    pub hidden: Tensor,
}

impl Hypothesis {
    fn is_terminal(&self, eos_id: u32, max_len: usize) -> bool {
        self.tokens.len() >= max_len || self.tokens.last() == Some(&eos_id)
    }
}

pub struct BeamSearch {
    beam_width: usize,
    max_len: usize,
    sos_id: u32,
    eos_id: u32,
}

impl BeamSearch {
    pub fn new(beam_width: usize, max_len: usize, sos_id: u32, eos_id: u32) -> Self {
        Self {
            // one hypothesis always survives, so the beam can never empty out
            beam_width: beam_width.max(1),
            max_len,
            sos_id,
            eos_id,
        }
    }

    /// Best token sequence for an encoded source, `<sos>`/`<eos>` framing
    /// included; translating ids back to symbols is the caller's job.
    ///
    /// Reaching `max_len` without `<eos>` returns the best partial
    /// hypothesis: defined truncation, not an error.
    pub fn decode(
        &self,
        decoder: &dyn DecoderStep,
        context: &Context,
        init_hidden: &Tensor,
    ) -> Result<Vec<u32>> {
        let mut beams = self.search(decoder, context, init_hidden)?;
        Ok(beams.remove(0).tokens)
    }

    /// Runs the search to completion and returns the final frontier, best
    /// hypothesis first.
    pub fn search(
        &self,
        decoder: &dyn DecoderStep,
        context: &Context,
        init_hidden: &Tensor,
    ) -> Result<Vec<Hypothesis>> {
        let device = init_hidden.device();
        let mut beams = vec![Hypothesis {
            score: 0.0,
            tokens: vec![self.sos_id],
            hidden: init_hidden.clone(),
        }];

        while !beams
            .iter()
            .all(|b| b.is_terminal(self.eos_id, self.max_len))
        {
            let mut frontier = Vec::with_capacity(beams.len() * self.beam_width);
            for beam in beams {
                if beam.is_terminal(self.eos_id, self.max_len) {
                    // carried forward unchanged, never re-expanded
                    frontier.push(beam);
                    continue;
                }
                let prev = Tensor::new(&[beam.tokens[beam.tokens.len() - 1]], device)?;
                let (logits, hidden) = decoder.step(&prev, &beam.hidden, context)?;
                let log_probs = ops::log_softmax(&logits, D::Minus1)?
                    .squeeze(0)?
                    .to_vec1::<f32>()?;
                for (token, log_prob) in top_k(&log_probs, self.beam_width) {
                    let mut tokens = beam.tokens.clone();
                    tokens.push(token);
                    frontier.push(Hypothesis {
                        score: beam.score + log_prob,
                        tokens,
                        hidden: hidden.clone(),
                    });
                }
            }
            // Tie-break rule: the sort is stable, so hypotheses with equal
            // scores keep their discovery order and the earlier-discovered
            // one survives pruning.
            frontier.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
            frontier.truncate(self.beam_width);
            beams = frontier;
        }
        Ok(beams)
    }
}

/// Indices and values of the `k` largest log-probabilities, in descending
/// order, ties resolved toward the lower token id.
fn top_k(log_probs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indices: Vec<usize> = (0..log_probs.len()).collect();
    indices.sort_by(|&a, &b| {
        log_probs[b]
            .partial_cmp(&log_probs[a])
            .unwrap_or(Ordering::Equal)
    });
    indices.truncate(k);
    indices
        .into_iter()
        .map(|i| (i as u32, log_probs[i]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    // toy vocabulary: <sos>=0 <eos>=1 <pad>=2 <unk>=3 a=4 b=5
    const SOS: u32 = 0;
    const EOS: u32 = 1;
    const VOCAB: usize = 6;

    fn dummy_state() -> (Context, Tensor) {
        let hidden = Tensor::zeros((1, 4), DType::F32, &Device::Cpu).unwrap();
        let context = Context::Vector(hidden.clone());
        (context, hidden)
    }

    fn peaked_logits(favored: usize) -> Tensor {
        let mut row = vec![0f32; VOCAB];
        row[favored] = 8.0;
        Tensor::new(row, &Device::Cpu)
            .unwrap()
            .unsqueeze(0)
            .unwrap()
    }

    /// Emits "a" after <sos>, "b" after "a", <eos> after anything else.
    struct ScriptedDecoder;

    impl DecoderStep for ScriptedDecoder {
        fn step(
            &self,
            prev_token: &Tensor,
            prev_hidden: &Tensor,
            _context: &Context,
        ) -> Result<(Tensor, Tensor)> {
            let next = match prev_token.to_vec1::<u32>()?[0] {
                SOS => 4,
                4 => 5,
                _ => EOS as usize,
            };
            Ok((peaked_logits(next), prev_hidden.clone()))
        }
    }

    /// Predicts <eos> immediately, whatever the input.
    struct EosDecoder;

    impl DecoderStep for EosDecoder {
        fn step(
            &self,
            _prev_token: &Tensor,
            prev_hidden: &Tensor,
            _context: &Context,
        ) -> Result<(Tensor, Tensor)> {
            Ok((peaked_logits(EOS as usize), prev_hidden.clone()))
        }
    }

    /// No preference at all: every token equally likely.
    struct UniformDecoder;

    impl DecoderStep for UniformDecoder {
        fn step(
            &self,
            _prev_token: &Tensor,
            prev_hidden: &Tensor,
            _context: &Context,
        ) -> Result<(Tensor, Tensor)> {
            let logits = Tensor::zeros((1, VOCAB), DType::F32, &Device::Cpu)?;
            Ok((logits, prev_hidden.clone()))
        }
    }

    #[test]
    fn test_round_trip_scenario() {
        let (context, hidden) = dummy_state();
        let search = BeamSearch::new(1, 10, SOS, EOS);
        let tokens = search.decode(&ScriptedDecoder, &context, &hidden).unwrap();
        assert_eq!(tokens, vec![0, 4, 5, 1]);
    }

    #[test]
    fn test_immediate_eos_terminates_after_one_round() {
        let (context, hidden) = dummy_state();
        let search = BeamSearch::new(1, 5, SOS, EOS);
        let tokens = search.decode(&EosDecoder, &context, &hidden).unwrap();
        assert_eq!(tokens, vec![SOS, EOS]);
    }

    #[test]
    fn test_max_len_truncation_is_not_an_error() {
        let (context, hidden) = dummy_state();
        // ScriptedDecoder needs 4 tokens to finish; cut it off at 3
        let search = BeamSearch::new(1, 3, SOS, EOS);
        let tokens = search.decode(&ScriptedDecoder, &context, &hidden).unwrap();
        assert_eq!(tokens, vec![0, 4, 5]);
    }

    #[test]
    fn test_beam_width_and_score_invariants() {
        let (context, hidden) = dummy_state();
        for beam_width in 1..=4 {
            let search = BeamSearch::new(beam_width, 4, SOS, EOS);
            let beams = search.search(&UniformDecoder, &context, &hidden).unwrap();
            assert!(!beams.is_empty());
            assert!(beams.len() <= beam_width);
            for pair in beams.windows(2) {
                assert!(pair[0].score >= pair[1].score, "frontier must be sorted");
            }
            for beam in &beams {
                // sums of log-probabilities never go positive
                assert!(beam.score <= 0.0);
                assert!(beam.tokens.len() <= 4);
            }
        }
    }

    #[test]
    fn test_terminal_hypotheses_keep_their_unnormalized_score() {
        let (context, hidden) = dummy_state();
        let search = BeamSearch::new(2, 6, SOS, EOS);
        let beams = search.search(&UniformDecoder, &context, &hidden).unwrap();
        // under a uniform distribution the one-step <eos> hypothesis scores
        // -ln(VOCAB) and beats every longer continuation
        let expected = -(VOCAB as f32).ln();
        assert_eq!(beams[0].tokens, vec![SOS, EOS]);
        assert!((beams[0].score - expected).abs() < 1e-5);
    }

    #[test]
    fn test_scores_accumulate_per_step() {
        let (context, hidden) = dummy_state();
        let search = BeamSearch::new(1, 10, SOS, EOS);
        let beams = search.search(&ScriptedDecoder, &context, &hidden).unwrap();
        // each step picks the peaked token; its log-probability is the same
        // at every step by construction
        let peaked = peaked_logits(4);
        let log_probs = ops::log_softmax(&peaked, D::Minus1)
            .unwrap()
            .squeeze(0)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        let per_step = log_probs[4];
        assert_eq!(beams[0].tokens, vec![0, 4, 5, 1]);
        assert!((beams[0].score - 3.0 * per_step).abs() < 1e-5);
    }

    #[test]
    fn test_top_k_is_ordered_and_stable() {
        let scored = top_k(&[0.1, 0.9, 0.9, 0.2], 3);
        assert_eq!(scored[0].0, 1);
        assert_eq!(scored[1].0, 2);
        assert_eq!(scored[2].0, 3);
    }
}
