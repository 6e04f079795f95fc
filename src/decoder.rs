use candle_core::{bail, Result, Tensor, D};
use candle_nn::{embedding, linear, Embedding, Linear, Module, VarBuilder};

use crate::attention::Attention;
use crate::gru::GruCell;

/// Source-side conditioning for one decode.
pub enum Context {
    /// Single summary vector `(batch, dim)`, shared read-only by every step.
    Vector(Tensor),
    /// Per-position encoder outputs `(batch, src_len, dim)`, re-weighted by
    /// the attention scorer at every step.
    Annotations(Tensor),
}

/// One-token decoder transition:
/// `(prev_token, prev_hidden, context) -> (logits, new_hidden)`.
///
/// Implementations are pure functions of their inputs: the previous hidden
/// state is never mutated, a fresh state is returned, and identical inputs
/// produce identical outputs. The training driver and the beam search depend
/// only on this capability, never on a concrete variant.
pub trait DecoderStep {
    /// `prev_token (batch,)`, `prev_hidden (batch, hidden_dim)` to
    /// `(logits (batch, vocab), new_hidden (batch, hidden_dim))`.
    fn step(
        &self,
        prev_token: &Tensor,
        prev_hidden: &Tensor,
        context: &Context,
    ) -> Result<(Tensor, Tensor)>;
}

/// Decoder conditioned on a fixed context vector: the same summary of the
/// source is concatenated to the input embedding at every step.
pub struct PlainDecoder {
    embedding: Embedding,
    rnn: GruCell,
    fc_out: Linear,
}

impl PlainDecoder {
    pub fn new(
        vocab_size: usize,
        emb_dim: usize,
        hidden_dim: usize,
        context_dim: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let embedding = embedding(vocab_size, emb_dim, vb.pp("embedding"))?;
        let rnn = GruCell::new(emb_dim + context_dim, hidden_dim, vb.pp("gru"))?;
        let fc_out = linear(
            emb_dim + hidden_dim + context_dim,
            vocab_size,
            vb.pp("fc_out"),
        )?;
        Ok(Self {
            embedding,
            rnn,
            fc_out,
        })
    }
}

impl DecoderStep for PlainDecoder {
    fn step(
        &self,
        prev_token: &Tensor,
        prev_hidden: &Tensor,
        context: &Context,
    ) -> Result<(Tensor, Tensor)> {
        let Context::Vector(context) = context else {
            bail!("plain decoder expects a fixed context vector, got annotations")
        };
        let embedded = self.embedding.forward(prev_token)?;
        let rnn_input = Tensor::cat(&[&embedded, context], 1)?;
        let hidden = self.rnn.step(&rnn_input, prev_hidden)?;
        let features = Tensor::cat(&[&embedded, &hidden, context], 1)?;
        let logits = self.fc_out.forward(&features)?;
        Ok((logits, hidden))
    }
}

/// Element-wise max over pairs of projected units.
struct Maxout {
    proj: Linear,
    dim: usize,
}

impl Maxout {
    fn new(input_dim: usize, dim: usize, vb: VarBuilder) -> Result<Self> {
        let proj = linear(input_dim, 2 * dim, vb.pp("proj"))?;
        Ok(Self { proj, dim })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, _) = xs.dims2()?;
        self.proj
            .forward(xs)?
            .reshape((batch, self.dim, 2))?
            .max(D::Minus1)
    }
}

/// Decoder with additive attention: every step aligns the previous hidden
/// state against all annotations, feeds the weighted context through the
/// recurrent cell and projects `(hidden, weighted, embedded)` to the
/// vocabulary, optionally through a maxout layer first.
pub struct AttentionDecoder {
    embedding: Embedding,
    attention: Attention,
    rnn: GruCell,
    maxout: Option<Maxout>,
    fc_out: Linear,
}

impl AttentionDecoder {
    pub fn new(
        vocab_size: usize,
        emb_dim: usize,
        hidden_dim: usize,
        annotation_dim: usize,
        attn_dim: usize,
        maxout_dim: Option<usize>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let embedding = embedding(vocab_size, emb_dim, vb.pp("embedding"))?;
        let attention = Attention::new(annotation_dim, hidden_dim, attn_dim, vb.pp("attention"))?;
        let rnn = GruCell::new(emb_dim + annotation_dim, hidden_dim, vb.pp("gru"))?;
        let feature_dim = hidden_dim + annotation_dim + emb_dim;
        let maxout = match maxout_dim {
            Some(dim) => Some(Maxout::new(feature_dim, dim, vb.pp("maxout"))?),
            None => None,
        };
        let fc_out = linear(
            maxout_dim.unwrap_or(feature_dim),
            vocab_size,
            vb.pp("fc_out"),
        )?;
        Ok(Self {
            embedding,
            attention,
            rnn,
            maxout,
            fc_out,
        })
    }
}

impl DecoderStep for AttentionDecoder {
    fn step(
        &self,
        prev_token: &Tensor,
        prev_hidden: &Tensor,
        context: &Context,
    ) -> Result<(Tensor, Tensor)> {
        let Context::Annotations(annotations) = context else {
            bail!("attention decoder expects encoder annotations, got a fixed vector")
        };
        let embedded = self.embedding.forward(prev_token)?;
        let alignment = self.attention.forward(prev_hidden, annotations)?;
        // weighted sum of annotations: (b, 1, s) x (b, s, c) -> (b, c)
        let weighted = alignment.unsqueeze(1)?.matmul(annotations)?.squeeze(1)?;
        let rnn_input = Tensor::cat(&[&embedded, &weighted], 1)?;
        let hidden = self.rnn.step(&rnn_input, prev_hidden)?;
        let features = Tensor::cat(&[&hidden, &weighted, &embedded], 1)?;
        let features = match &self.maxout {
            Some(maxout) => maxout.forward(&features)?,
            None => features,
        };
        let logits = self.fc_out.forward(&features)?;
        Ok((logits, hidden))
    }
}
