use std::path::PathBuf;

use anyhow::{anyhow, Result};

pub mod attention;
pub mod beam;
pub mod bleu;
pub mod checkpoint;
pub mod config;
pub mod corpus;
pub mod dataset;
pub mod decoder;
pub mod encoder;
pub mod evaluate;
pub mod gru;
pub mod loss;
pub mod model;
pub mod tokenizer_helper;
pub mod train;
pub mod utils;

use config::{Config, DecoderVariant};

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "attention-bi".to_string());
    let (variant, bidirectional) = DecoderVariant::parse(&name).ok_or_else(|| {
        anyhow!("unknown model variant {name:?}, expected plain[-bi], attention[-bi] or maxout[-bi]")
    })?;
    let resume_from = args.next().map(PathBuf::from);
    log::info!("training variant {name}");

    let config = Config {
        variant,
        bidirectional,
        ..Config::default()
    };
    train::train_model(config, resume_from.as_deref())
}
