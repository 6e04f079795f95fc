use std::path::PathBuf;

use thiserror::Error;

/// Output side of the model: fixed-context decoding, additive attention,
/// or additive attention with a maxout layer before the output projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderVariant {
    Plain,
    Attention,
    AttentionMaxout,
}

impl DecoderVariant {
    /// Parses a variant name such as `plain`, `attention-bi` or `maxout`.
    /// The `-bi` suffix selects a bidirectional encoder.
    pub fn parse(name: &str) -> Option<(Self, bool)> {
        let (base, bidirectional) = match name.strip_suffix("-bi") {
            Some(base) => (base, true),
            None => (name, false),
        };
        let variant = match base {
            "plain" => Self::Plain,
            "attention" => Self::Attention,
            "maxout" => Self::AttentionMaxout,
            _ => return None,
        };
        Some((variant, bidirectional))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be positive")]
    ZeroDimension(&'static str),
    #[error("beam_width must be at least 1, got {0}")]
    BeamWidth(usize),
    #[error("max_len must be at least 2 to fit <sos> plus one token, got {0}")]
    MaxLen(usize),
    #[error("teacher_forcing_ratio must lie in [0, 1], got {0}")]
    TeacherForcingRatio(f64),
    #[error("clip_norm must be positive and finite, got {0}")]
    ClipNorm(f64),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub variant: DecoderVariant,
    pub bidirectional: bool,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub emb_dim: usize,
    pub hidden_dim: usize,
    pub attn_dim: usize,
    pub maxout_dim: usize,
    pub vocab_size: usize,
    pub max_src_tokens: usize,
    pub max_len: usize,
    pub beam_width: usize,
    pub teacher_forcing_ratio: f64,
    pub clip_norm: f64,
    pub lr: f64,
    pub src_lang: String,
    pub tgt_lang: String,
    pub checkpoint_dir: PathBuf,
    pub eval_sentences: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            variant: DecoderVariant::Attention,
            bidirectional: true,
            num_epochs: 10,
            batch_size: 32,
            emb_dim: 300,
            hidden_dim: 600,
            attn_dim: 600,
            maxout_dim: 300,
            vocab_size: 10_000,
            max_src_tokens: 50,
            max_len: 50,
            beam_width: 3,
            teacher_forcing_ratio: 0.5,
            clip_norm: 1.0,
            lr: 0.0001f64,
            src_lang: "en".to_string(),
            tgt_lang: "fr".to_string(),
            checkpoint_dir: PathBuf::from("checkpoints"),
            eval_sentences: 200,
        }
    }
}

impl Config {
    /// Rejects inconsistent settings before any parameters are allocated or a
    /// single training step runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.emb_dim == 0 {
            return Err(ConfigError::ZeroDimension("emb_dim"));
        }
        if self.hidden_dim == 0 {
            return Err(ConfigError::ZeroDimension("hidden_dim"));
        }
        if self.attn_dim == 0 && self.variant != DecoderVariant::Plain {
            return Err(ConfigError::ZeroDimension("attn_dim"));
        }
        if self.maxout_dim == 0 && self.variant == DecoderVariant::AttentionMaxout {
            return Err(ConfigError::ZeroDimension("maxout_dim"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroDimension("batch_size"));
        }
        if self.beam_width == 0 {
            return Err(ConfigError::BeamWidth(self.beam_width));
        }
        if self.max_len < 2 {
            return Err(ConfigError::MaxLen(self.max_len));
        }
        if !(0.0..=1.0).contains(&self.teacher_forcing_ratio) {
            return Err(ConfigError::TeacherForcingRatio(self.teacher_forcing_ratio));
        }
        if !self.clip_norm.is_finite() || self.clip_norm <= 0.0 {
            return Err(ConfigError::ClipNorm(self.clip_norm));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_configs_fail_fast() {
        let mut config = Config::default();
        config.beam_width = 0;
        assert!(matches!(config.validate(), Err(ConfigError::BeamWidth(0))));

        let mut config = Config::default();
        config.teacher_forcing_ratio = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TeacherForcingRatio(_))
        ));

        let mut config = Config::default();
        config.hidden_dim = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.variant = DecoderVariant::AttentionMaxout;
        config.maxout_dim = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_variant_parse() {
        assert_eq!(
            DecoderVariant::parse("plain"),
            Some((DecoderVariant::Plain, false))
        );
        assert_eq!(
            DecoderVariant::parse("attention-bi"),
            Some((DecoderVariant::Attention, true))
        );
        assert_eq!(
            DecoderVariant::parse("maxout-bi"),
            Some((DecoderVariant::AttentionMaxout, true))
        );
        assert_eq!(DecoderVariant::parse("transformer"), None);
    }
}
