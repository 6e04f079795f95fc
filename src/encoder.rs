use candle_core::{bail, Result, Tensor};
use candle_nn::{embedding, linear, Embedding, Linear, Module, VarBuilder};

use crate::gru::GruCell;

/// Source-side encoder: embedding plus a GRU over the token sequence,
/// optionally run in both directions with the per-position features
/// concatenated.
///
/// `forward` returns the annotations consumed by the attention scorer and the
/// initial decoder hidden state, `tanh(fc(final states))`.
pub struct Encoder {
    embedding: Embedding,
    forward_rnn: GruCell,
    backward_rnn: Option<GruCell>,
    fc: Linear,
    hidden_dim: usize,
}

impl Encoder {
    pub fn new(
        vocab_size: usize,
        emb_dim: usize,
        hidden_dim: usize,
        bidirectional: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let embedding = embedding(vocab_size, emb_dim, vb.pp("embedding"))?;
        let forward_rnn = GruCell::new(emb_dim, hidden_dim, vb.pp("gru_fwd"))?;
        let backward_rnn = if bidirectional {
            Some(GruCell::new(emb_dim, hidden_dim, vb.pp("gru_bwd"))?)
        } else {
            None
        };
        let fc_in = if bidirectional {
            2 * hidden_dim
        } else {
            hidden_dim
        };
        let fc = linear(fc_in, hidden_dim, vb.pp("fc"))?;
        Ok(Self {
            embedding,
            forward_rnn,
            backward_rnn,
            fc,
            hidden_dim,
        })
    }

    /// Feature width of one annotation position.
    pub fn annotation_dim(&self) -> usize {
        if self.backward_rnn.is_some() {
            2 * self.hidden_dim
        } else {
            self.hidden_dim
        }
    }

    /// `(batch, src_len)` token ids to
    /// `(annotations (batch, src_len, annotation_dim), hidden (batch, hidden_dim))`.
    pub fn forward(&self, src: &Tensor) -> Result<(Tensor, Tensor)> {
        let (batch, src_len) = src.dims2()?;
        if src_len == 0 {
            bail!("cannot encode an empty source sequence")
        }
        let embedded = self.embedding.forward(src)?;
        let init = Tensor::zeros((batch, self.hidden_dim), embedded.dtype(), embedded.device())?;
        let fwd_states = self.forward_rnn.seq(&embedded, &init)?;

        let (outputs, last) = match &self.backward_rnn {
            Some(backward_rnn) => {
                let bwd_states = backward_rnn.seq_rev(&embedded, &init)?;
                let outputs = fwd_states
                    .iter()
                    .zip(bwd_states.iter())
                    .map(|(f, b)| Tensor::cat(&[f, b], 1))
                    .collect::<Result<Vec<_>>>()?;
                // forward state after the last position, backward state after
                // the first
                let last = Tensor::cat(&[&fwd_states[src_len - 1], &bwd_states[0]], 1)?;
                (outputs, last)
            }
            None => {
                let last = fwd_states[src_len - 1].clone();
                (fwd_states, last)
            }
        };

        let annotations = Tensor::stack(&outputs, 1)?;
        let hidden = self.fc.forward(&last)?.tanh()?;
        Ok((annotations, hidden))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn encoder(bidirectional: bool) -> Encoder {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Encoder::new(20, 8, 16, bidirectional, vb).unwrap()
    }

    #[test]
    fn test_unidirectional_shapes() {
        let encoder = encoder(false);
        let src = Tensor::zeros((2, 5), DType::U32, &Device::Cpu).unwrap();
        let (annotations, hidden) = encoder.forward(&src).unwrap();
        assert_eq!(encoder.annotation_dim(), 16);
        assert_eq!(annotations.dims(), &[2, 5, 16]);
        assert_eq!(hidden.dims(), &[2, 16]);
    }

    #[test]
    fn test_bidirectional_shapes() {
        let encoder = encoder(true);
        let src = Tensor::zeros((2, 5), DType::U32, &Device::Cpu).unwrap();
        let (annotations, hidden) = encoder.forward(&src).unwrap();
        assert_eq!(encoder.annotation_dim(), 32);
        assert_eq!(annotations.dims(), &[2, 5, 32]);
        assert_eq!(hidden.dims(), &[2, 16]);
    }

    #[test]
    fn test_empty_source_is_an_error() {
        let encoder = encoder(false);
        let src = Tensor::zeros((1, 0), DType::U32, &Device::Cpu).unwrap();
        assert!(encoder.forward(&src).is_err());
    }
}
