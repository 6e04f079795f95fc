use candle_core::{Result, Tensor, D};
use candle_nn::{linear, linear_no_bias, ops, Linear, Module, VarBuilder};

/// Additive attention scorer: a one-hidden-layer alignment model over
/// (decoder hidden state, annotation) pairs, reduced to a scalar energy per
/// source position and normalized with a softmax.
pub struct Attention {
    attn: Linear,
    v: Linear,
}

impl Attention {
    pub fn new(
        annotation_dim: usize,
        hidden_dim: usize,
        attn_dim: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let attn = linear(annotation_dim + hidden_dim, attn_dim, vb.pp("attn"))?;
        let v = linear_no_bias(attn_dim, 1, vb.pp("v"))?;
        Ok(Self { attn, v })
    }

    /// Alignment distribution `(batch, src_len)` over source positions for a
    /// decoder hidden state `(batch, hidden_dim)` and annotations
    /// `(batch, src_len, annotation_dim)`.
    pub fn forward(&self, hidden: &Tensor, annotations: &Tensor) -> Result<Tensor> {
        let (batch, src_len, _) = annotations.dims3()?;
        let hidden_dim = hidden.dim(1)?;
        let repeated = hidden
            .unsqueeze(1)?
            .expand((batch, src_len, hidden_dim))?
            .contiguous()?;
        let energy = self
            .attn
            .forward(&Tensor::cat(&[&repeated, annotations], 2)?)?
            .tanh()?;
        let scores = self.v.forward(&energy)?.squeeze(2)?;
        ops::softmax(&scores, D::Minus1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn test_alignment_is_a_distribution() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let attention = Attention::new(12, 8, 10, vb).unwrap();

        let hidden = Tensor::rand(-1f32, 1f32, (3, 8), &Device::Cpu).unwrap();
        let annotations = Tensor::rand(-1f32, 1f32, (3, 6, 12), &Device::Cpu).unwrap();
        let weights = attention.forward(&hidden, &annotations).unwrap();
        assert_eq!(weights.dims(), &[3, 6]);

        for row in weights.to_vec2::<f32>().unwrap() {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "weights must sum to 1, got {sum}");
            assert!(row.iter().all(|w| *w >= 0.0));
        }
    }
}
