use std::path::PathBuf;

use anyhow::{anyhow, Error, Result};
use tokenizers::models::wordlevel::{WordLevel, WordLevelTrainerBuilder};
use tokenizers::normalizers::Lowercase;
use tokenizers::pre_tokenizers::whitespace::Whitespace;
use tokenizers::{
    AddedToken, DecoderWrapper, NormalizerWrapper, PostProcessorWrapper, PreTokenizerWrapper,
    Tokenizer, TokenizerBuilder,
};

pub const SOS_TOKEN: &str = "<sos>";
pub const EOS_TOKEN: &str = "<eos>";
pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";

/// The four reserved ids every component conditions on, resolved once from a
/// trained tokenizer and passed around explicitly.
#[derive(Debug, Clone, Copy)]
pub struct SpecialTokens {
    pub sos: u32,
    pub eos: u32,
    pub pad: u32,
    pub unk: u32,
}

impl SpecialTokens {
    pub fn from_tokenizer(tokenizer: &Tokenizer) -> Result<Self> {
        let id = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| anyhow!("reserved token {token} missing from vocabulary"))
        };
        Ok(Self {
            sos: id(SOS_TOKEN)?,
            eos: id(EOS_TOKEN)?,
            pad: id(PAD_TOKEN)?,
            unk: id(UNK_TOKEN)?,
        })
    }
}

/// Trains (or reloads) one lowercased word-level tokenizer per language,
/// cached as a json file under `dir`.
pub struct TokenizerHelper {
    dir: PathBuf,
}

impl TokenizerHelper {
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn get_tokenizer(
        &self,
        lang: &str,
        sentences: Vec<String>,
        vocab_size: usize,
    ) -> Result<Tokenizer> {
        let path = self.dir.join(format!("tokenizer_{lang}.json"));
        if path.exists() {
            return Tokenizer::from_file(&path).map_err(Error::msg);
        }
        if sentences.is_empty() {
            return Err(anyhow!("no sentences to train a tokenizer for {lang:?}"));
        }
        self.train(&path, sentences, vocab_size)
    }

    fn train(
        &self,
        path: &std::path::Path,
        sentences: Vec<String>,
        vocab_size: usize,
    ) -> Result<Tokenizer> {
        let mut trainer = WordLevelTrainerBuilder::default()
            .show_progress(false)
            .vocab_size(vocab_size)
            .special_tokens(vec![
                AddedToken::from(UNK_TOKEN, true),
                AddedToken::from(PAD_TOKEN, true),
                AddedToken::from(SOS_TOKEN, true),
                AddedToken::from(EOS_TOKEN, true),
            ])
            .build()
            .map_err(Error::msg)?;

        let mut tokenizer = TokenizerBuilder::<
            WordLevel,
            NormalizerWrapper,
            PreTokenizerWrapper,
            PostProcessorWrapper,
            DecoderWrapper,
        >::default()
        .with_model(
            WordLevel::builder()
                .unk_token(UNK_TOKEN.to_string())
                .build()
                .map_err(Error::msg)?,
        )
        .with_normalizer(Some(NormalizerWrapper::Lowercase(Lowercase)))
        .with_pre_tokenizer(Some(PreTokenizerWrapper::Whitespace(Whitespace::default())))
        .build()
        .map_err(Error::msg)?;

        tokenizer
            .train(&mut trainer, sentences.into_iter())
            .map_err(Error::msg)?
            .save(path, true)
            .map_err(Error::msg)?;

        Tokenizer::from_file(path).map_err(Error::msg)
    }
}
