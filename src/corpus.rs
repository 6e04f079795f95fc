use std::fs::File;

use candle_core::{Error, Result};
use hf_hub::{api::sync::Api, Repo, RepoType};
use parquet::file::reader::SerializedFileReader;

/// One sentence pair of plain text.
#[derive(Debug, Clone)]
pub struct SentencePair {
    pub src: String,
    pub tgt: String,
}

/// Parallel corpus from the Helsinki-NLP opus_books parquet export.
///
/// Pairs whose source side exceeds `max_src_tokens` whitespace tokens are
/// dropped at load time; the remainder is split into train and validation.
// https://huggingface.co/datasets/Helsinki-NLP/opus_books
#[derive(Debug)]
pub struct ParallelCorpus {
    pub train_set: Vec<SentencePair>,
    pub valid_set: Vec<SentencePair>,
}

impl ParallelCorpus {
    pub fn new(
        src_lang: &str,
        tgt_lang: &str,
        train_split: f32,
        max_src_tokens: usize,
    ) -> Result<Self> {
        let pairs = Self::download(src_lang, tgt_lang)?;
        Ok(Self::from_pairs(pairs, train_split, max_src_tokens))
    }

    /// Filter and split already-loaded pairs; `new` goes through here after
    /// downloading.
    pub fn from_pairs(
        mut pairs: Vec<SentencePair>,
        train_split: f32,
        max_src_tokens: usize,
    ) -> Self {
        pairs.retain(|pair| pair.src.split_whitespace().count() <= max_src_tokens);
        let train_size = (pairs.len() as f32 * train_split).round() as usize;
        let valid_set = pairs.split_off(train_size.min(pairs.len()));
        Self {
            train_set: pairs,
            valid_set,
        }
    }

    pub fn src_sentences(&self) -> Vec<String> {
        self.train_set.iter().map(|pair| pair.src.clone()).collect()
    }

    pub fn tgt_sentences(&self) -> Vec<String> {
        self.train_set.iter().map(|pair| pair.tgt.clone()).collect()
    }

    fn download(src_lang: &str, tgt_lang: &str) -> Result<Vec<SentencePair>> {
        let api = Api::new().map_err(|e| Error::Msg(format!("hub api error: {e}")))?;
        let repo = Repo::with_revision(
            "Helsinki-NLP/opus_books".to_string(),
            RepoType::Dataset,
            "refs/convert/parquet".to_string(),
        );
        let local = api
            .repo(repo)
            .get(&format!("{src_lang}-{tgt_lang}/train/0000.parquet"))
            .map_err(|e| Error::Msg(format!("hub api error: {e}")))?;
        let file = File::open(local)?;
        let reader = SerializedFileReader::new(file)
            .map_err(|e| Error::Msg(format!("parquet error: {e}")))?;
        Ok(Self::read_pairs(reader, src_lang, tgt_lang))
    }

    fn read_pairs(
        reader: SerializedFileReader<File>,
        src_lang: &str,
        tgt_lang: &str,
    ) -> Vec<SentencePair> {
        reader
            .into_iter()
            .flatten()
            .filter_map(|row| {
                let mut src = None;
                let mut tgt = None;
                for (_name, field) in row.get_column_iter() {
                    if let parquet::record::Field::Group(translation) = field {
                        for (lang, value) in translation.get_column_iter() {
                            if let parquet::record::Field::Str(text) = value {
                                if lang == src_lang {
                                    src = Some(text.clone());
                                } else if lang == tgt_lang {
                                    tgt = Some(text.clone());
                                }
                            }
                        }
                    }
                }
                Some(SentencePair {
                    src: src?,
                    tgt: tgt?,
                })
            })
            .collect()
    }
}
