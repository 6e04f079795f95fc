use candle_core::{bail, Device, Result, Tensor, D};
use candle_nn::VarBuilder;
use rand::{Rng, RngCore};

use crate::beam::BeamSearch;
use crate::config::{Config, DecoderVariant};
use crate::decoder::{AttentionDecoder, Context, DecoderStep, PlainDecoder};
use crate::encoder::Encoder;
use crate::tokenizer_helper::SpecialTokens;

/// Encoder plus one decoder variant behind the `DecoderStep` capability.
/// All wiring dimensions are derived here, so a mismatch between embedding,
/// hidden and context sizes fails at construction, before any training step.
pub struct Seq2Seq {
    encoder: Encoder,
    decoder: Box<dyn DecoderStep>,
    fixed_context: bool,
    specials: SpecialTokens,
}

impl Seq2Seq {
    pub fn new(
        config: &Config,
        src_vocab_size: usize,
        tgt_vocab_size: usize,
        specials: SpecialTokens,
        vb: VarBuilder,
    ) -> Result<Self> {
        let encoder = Encoder::new(
            src_vocab_size,
            config.emb_dim,
            config.hidden_dim,
            config.bidirectional,
            vb.pp("encoder"),
        )?;
        let annotation_dim = encoder.annotation_dim();
        let (decoder, fixed_context): (Box<dyn DecoderStep>, bool) = match config.variant {
            DecoderVariant::Plain => (
                // the fixed context is the encoder's final hidden state
                Box::new(PlainDecoder::new(
                    tgt_vocab_size,
                    config.emb_dim,
                    config.hidden_dim,
                    config.hidden_dim,
                    vb.pp("decoder"),
                )?),
                true,
            ),
            DecoderVariant::Attention => (
                Box::new(AttentionDecoder::new(
                    tgt_vocab_size,
                    config.emb_dim,
                    config.hidden_dim,
                    annotation_dim,
                    config.attn_dim,
                    None,
                    vb.pp("decoder"),
                )?),
                false,
            ),
            DecoderVariant::AttentionMaxout => (
                Box::new(AttentionDecoder::new(
                    tgt_vocab_size,
                    config.emb_dim,
                    config.hidden_dim,
                    annotation_dim,
                    config.attn_dim,
                    Some(config.maxout_dim),
                    vb.pp("decoder"),
                )?),
                false,
            ),
        };
        Ok(Self {
            encoder,
            decoder,
            fixed_context,
            specials,
        })
    }

    pub fn specials(&self) -> &SpecialTokens {
        &self.specials
    }

    /// Encodes a source batch once, producing the context shared by every
    /// decoding step and the initial decoder hidden state.
    pub fn encode(&self, src: &Tensor) -> Result<(Context, Tensor)> {
        let (annotations, hidden) = self.encoder.forward(src)?;
        let context = if self.fixed_context {
            Context::Vector(hidden.clone())
        } else {
            Context::Annotations(annotations)
        };
        Ok((context, hidden))
    }

    /// Teacher-forced logits `(batch, tgt_len - 1, vocab)` for one batch.
    pub fn forward_train(
        &self,
        src: &Tensor,
        tgt: &Tensor,
        teacher_forcing_ratio: f64,
        rng: &mut dyn RngCore,
    ) -> Result<Tensor> {
        let (context, hidden) = self.encode(src)?;
        teacher_forced_logits(
            self.decoder.as_ref(),
            &context,
            &hidden,
            tgt,
            teacher_forcing_ratio,
            rng,
        )
    }

    /// Beam-decodes a single `<sos>`-framed source sequence.
    pub fn translate(
        &self,
        src_ids: &[u32],
        beam_width: usize,
        max_len: usize,
        device: &Device,
    ) -> Result<Vec<u32>> {
        let src = Tensor::new(src_ids, device)?.unsqueeze(0)?;
        let (context, hidden) = self.encode(&src)?;
        let search = BeamSearch::new(beam_width, max_len, self.specials.sos, self.specials.eos);
        search.decode(self.decoder.as_ref(), &context, &hidden)
    }
}

/// Training driver: steps the decoder over positions 1..tgt_len, recording
/// the logits of every step. The next input is chosen per step by an
/// independent coin flip on `rng`: the reference token with probability
/// `teacher_forcing_ratio` (teacher forcing), the argmax of the step's own
/// logits otherwise (free running). The length is fixed by the reference
/// batch; `<eos>` detection plays no part in training.
pub fn teacher_forced_logits(
    decoder: &dyn DecoderStep,
    context: &Context,
    init_hidden: &Tensor,
    tgt: &Tensor,
    teacher_forcing_ratio: f64,
    rng: &mut dyn RngCore,
) -> Result<Tensor> {
    let (_batch, tgt_len) = tgt.dims2()?;
    if tgt_len < 2 {
        bail!("target batch needs <sos> plus at least one position, got length {tgt_len}")
    }
    let mut input = tgt.narrow(1, 0, 1)?.squeeze(1)?.contiguous()?;
    let mut hidden = init_hidden.clone();
    let mut steps = Vec::with_capacity(tgt_len - 1);
    for t in 1..tgt_len {
        let (logits, new_hidden) = decoder.step(&input, &hidden, context)?;
        hidden = new_hidden;
        input = if rng.gen::<f64>() < teacher_forcing_ratio {
            tgt.narrow(1, t, 1)?.squeeze(1)?.contiguous()?
        } else {
            logits.argmax(D::Minus1)?
        };
        steps.push(logits);
    }
    Tensor::stack(&steps, 1)
}
