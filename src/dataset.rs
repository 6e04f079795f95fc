use candle_core::{Device, Error, Result, Tensor};
use tokenizers::Tokenizer;

use crate::corpus::ParallelCorpus;
use crate::tokenizer_helper::SpecialTokens;

/// One tokenized sentence pair, both sides framed as `<sos> ... <eos>`.
#[derive(Debug, Clone)]
pub struct PairExample {
    pub src: Vec<u32>,
    pub tgt: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct TranslationDataset {
    pub train_set: Vec<PairExample>,
    pub valid_set: Vec<PairExample>,
    specials: SpecialTokens,
}

impl TranslationDataset {
    pub fn new(
        corpus: &ParallelCorpus,
        src_tokenizer: &Tokenizer,
        tgt_tokenizer: &Tokenizer,
        specials: SpecialTokens,
    ) -> Result<Self> {
        let encode_set = |pairs: &[crate::corpus::SentencePair]| -> Result<Vec<PairExample>> {
            pairs
                .iter()
                .map(|pair| {
                    Ok(PairExample {
                        src: frame(src_tokenizer, &pair.src, &specials)?,
                        tgt: frame(tgt_tokenizer, &pair.tgt, &specials)?,
                    })
                })
                .collect()
        };
        Ok(Self {
            train_set: encode_set(&corpus.train_set)?,
            valid_set: encode_set(&corpus.valid_set)?,
            specials,
        })
    }

    pub fn train_batcher(&self, batch_size: usize, device: &Device) -> PairBatcher<'_> {
        PairBatcher::new(&self.train_set, batch_size, self.specials.pad, device)
    }

    pub fn valid_batcher(&self, batch_size: usize, device: &Device) -> PairBatcher<'_> {
        PairBatcher::new(&self.valid_set, batch_size, self.specials.pad, device)
    }
}

fn frame(tokenizer: &Tokenizer, text: &str, specials: &SpecialTokens) -> Result<Vec<u32>> {
    let encoding = tokenizer
        .encode(text, false)
        .map_err(|e| Error::Msg(format!("tokenizer error: {e}")))?;
    let mut ids = Vec::with_capacity(encoding.get_ids().len() + 2);
    ids.push(specials.sos);
    ids.extend_from_slice(encoding.get_ids());
    ids.push(specials.eos);
    Ok(ids)
}

/// Shuffled iterator over rectangular `(src, tgt)` u32 batches, each side
/// padded to its batch maximum length with the pad id. Building a new
/// batcher restarts the pass with a fresh shuffle.
pub struct PairBatcher<'a> {
    examples: Vec<&'a PairExample>,
    batch_size: usize,
    pad_id: u32,
    device: Device,
    current_idx: usize,
}

impl<'a> PairBatcher<'a> {
    pub fn new(
        examples: &'a [PairExample],
        batch_size: usize,
        pad_id: u32,
        device: &Device,
    ) -> Self {
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        let mut examples = examples.iter().collect::<Vec<_>>();
        examples.shuffle(&mut thread_rng());

        Self {
            examples,
            batch_size,
            pad_id,
            device: device.clone(),
            current_idx: 0,
        }
    }

    fn pad_stack(&self, rows: Vec<&Vec<u32>>) -> Result<Tensor> {
        let max_len = rows.iter().map(|row| row.len()).max().unwrap_or(0);
        let padded = rows
            .into_iter()
            .map(|row| {
                let mut row = row.clone();
                row.resize(max_len, self.pad_id);
                Tensor::new(row, &self.device)
            })
            .collect::<Result<Vec<_>>>()?;
        Tensor::stack(&padded, 0)
    }
}

impl Iterator for PairBatcher<'_> {
    type Item = Result<(Tensor, Tensor)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx >= self.examples.len() {
            return None;
        }
        let end_idx = (self.current_idx + self.batch_size).min(self.examples.len());
        let batch = &self.examples[self.current_idx..end_idx];
        self.current_idx = end_idx;

        let src = self.pad_stack(batch.iter().map(|example| &example.src).collect());
        let tgt = self.pad_stack(batch.iter().map(|example| &example.tgt).collect());
        match (src, tgt) {
            (Ok(src), Ok(tgt)) => Some(Ok((src, tgt))),
            (Err(e), _) | (_, Err(e)) => Some(Err(e)),
        }
    }
}
