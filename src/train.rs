use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use candle_core::DType;
use candle_nn::{AdamW, Optimizer, VarBuilder, VarMap};
use rand::thread_rng;

use crate::checkpoint;
use crate::config::Config;
use crate::corpus::ParallelCorpus;
use crate::dataset::TranslationDataset;
use crate::evaluate::evaluate_bleu;
use crate::loss::{clip_grad_norm, cross_entropy_ignore_pad};
use crate::model::Seq2Seq;
use crate::tokenizer_helper::{SpecialTokens, TokenizerHelper};
use crate::utils::device;

pub fn train_model(config: Config, resume_from: Option<&Path>) -> Result<()> {
    config.validate()?;
    let device = device(false)?;
    let dtype = DType::F32;

    let corpus = ParallelCorpus::new(
        &config.src_lang,
        &config.tgt_lang,
        0.9,
        config.max_src_tokens,
    )?;
    log::info!(
        "corpus: {} train pairs, {} valid pairs",
        corpus.train_set.len(),
        corpus.valid_set.len()
    );

    let tokenizer_helper = TokenizerHelper::with_dir(".");
    let src_tokenizer =
        tokenizer_helper.get_tokenizer(&config.src_lang, corpus.src_sentences(), config.vocab_size)?;
    let tgt_tokenizer =
        tokenizer_helper.get_tokenizer(&config.tgt_lang, corpus.tgt_sentences(), config.vocab_size)?;
    let src_vocab_size = src_tokenizer.get_vocab_size(true);
    let tgt_vocab_size = tgt_tokenizer.get_vocab_size(true);
    log::info!("vocab sizes: src {src_vocab_size}, tgt {tgt_vocab_size}");

    let specials = SpecialTokens::from_tokenizer(&tgt_tokenizer)?;
    let dataset = TranslationDataset::new(&corpus, &src_tokenizer, &tgt_tokenizer, specials)?;

    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, dtype, &device);
    let model = Seq2Seq::new(&config, src_vocab_size, tgt_vocab_size, specials, vb)?;
    if let Some(path) = resume_from {
        checkpoint::load(&mut varmap, path)?;
        log::info!("resumed parameters from {}", path.display());
    }
    let vars = varmap.all_vars();
    let mut optimizer = AdamW::new_lr(vars.clone(), config.lr)?;
    let mut rng = thread_rng();

    for epoch in 0..config.num_epochs {
        let epoch_start = Instant::now();
        let mut epoch_loss = 0f32;
        let mut batches = 0usize;

        for batch in dataset.train_batcher(config.batch_size, &device) {
            let (src, tgt) = batch?;
            let logits =
                model.forward_train(&src, &tgt, config.teacher_forcing_ratio, &mut rng)?;
            // position 0 is the seeded <sos>, labels start at position 1
            let labels = tgt.narrow(1, 1, tgt.dim(1)? - 1)?.contiguous()?;
            let loss = cross_entropy_ignore_pad(&logits, &labels, specials.pad)?;

            let mut grads = loss.backward()?;
            clip_grad_norm(&vars, &mut grads, config.clip_norm)?;
            optimizer.step(&grads)?;

            epoch_loss += loss.to_scalar::<f32>()?;
            batches += 1;
        }

        let train_loss = epoch_loss / batches.max(1) as f32;
        let valid_loss = validation_loss(&model, &dataset, &config, &device)?;
        log::info!(
            "epoch {epoch}: train loss {train_loss:.4}, valid loss {valid_loss:.4} in {:.1?}",
            epoch_start.elapsed()
        );

        let path = checkpoint::save_epoch(&varmap, &config.checkpoint_dir, epoch)?;
        log::info!("epoch {epoch}: checkpoint saved to {}", path.display());

        let sample_len = dataset.valid_set.len().min(config.eval_sentences);
        let sample = &dataset.valid_set[..sample_len];
        let report = evaluate_bleu(
            &model,
            sample,
            &tgt_tokenizer,
            config.beam_width,
            config.max_len,
            &device,
        )?;
        log::info!(
            "epoch {epoch}: validation BLEU {:.4} over {sample_len} sentences",
            report.mean
        );
        for (src_len, score) in &report.by_src_length {
            log::debug!("epoch {epoch}: BLEU {score:.4} at source length {src_len}");
        }
    }

    Ok(())
}

/// Fully teacher-forced loss over the validation set, no parameter updates.
fn validation_loss(
    model: &Seq2Seq,
    dataset: &TranslationDataset,
    config: &Config,
    device: &candle_core::Device,
) -> Result<f32> {
    let specials = *model.specials();
    let mut rng = thread_rng();
    let mut total = 0f32;
    let mut batches = 0usize;
    for batch in dataset.valid_batcher(config.batch_size, device) {
        let (src, tgt) = batch?;
        let logits = model.forward_train(&src, &tgt, 1.0, &mut rng)?;
        let labels = tgt.narrow(1, 1, tgt.dim(1)? - 1)?.contiguous()?;
        let loss = cross_entropy_ignore_pad(&logits, &labels, specials.pad)?;
        total += loss.to_scalar::<f32>()?;
        batches += 1;
    }
    Ok(total / batches.max(1) as f32)
}
