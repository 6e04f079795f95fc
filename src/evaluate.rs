use std::collections::BTreeMap;

use candle_core::{Device, Result};
use tokenizers::Tokenizer;

use crate::bleu::sentence_bleu;
use crate::dataset::PairExample;
use crate::model::Seq2Seq;
use crate::tokenizer_helper::SpecialTokens;

pub struct BleuReport {
    pub mean: f64,
    /// Mean BLEU keyed by source sentence length (specials excluded).
    pub by_src_length: BTreeMap<usize, f64>,
}

/// Beam-decodes every example and scores the candidate against the reference
/// after stripping `<sos>`/`<eos>`/`<pad>` from both sides.
pub fn evaluate_bleu(
    model: &Seq2Seq,
    examples: &[PairExample],
    tgt_tokenizer: &Tokenizer,
    beam_width: usize,
    max_len: usize,
    device: &Device,
) -> Result<BleuReport> {
    let specials = *model.specials();
    let mut total = 0.0;
    let mut by_length: BTreeMap<usize, (f64, usize)> = BTreeMap::new();

    for example in examples {
        let decoded = model.translate(&example.src, beam_width, max_len, device)?;
        let candidate = to_words(&decoded, tgt_tokenizer, &specials);
        let reference = to_words(&example.tgt, tgt_tokenizer, &specials);
        let score = sentence_bleu(&candidate, &reference);
        total += score;

        let src_len = example.src.len().saturating_sub(2);
        let entry = by_length.entry(src_len).or_insert((0.0, 0));
        entry.0 += score;
        entry.1 += 1;
    }

    let mean = if examples.is_empty() {
        0.0
    } else {
        total / examples.len() as f64
    };
    let by_src_length = by_length
        .into_iter()
        .map(|(len, (sum, count))| (len, sum / count as f64))
        .collect();
    Ok(BleuReport {
        mean,
        by_src_length,
    })
}

fn to_words(ids: &[u32], tokenizer: &Tokenizer, specials: &SpecialTokens) -> Vec<String> {
    ids.iter()
        .filter(|&&id| id != specials.sos && id != specials.eos && id != specials.pad)
        .filter_map(|&id| tokenizer.id_to_token(id))
        .collect()
}
