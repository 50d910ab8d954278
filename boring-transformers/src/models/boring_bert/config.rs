use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::activation::Activation;
use crate::layers::attention::{MultiHeadAttentionConfig, SDPAConfig};
use crate::layers::dropout::DropoutConfig;
use crate::layers::feedforward::PointwiseFeedForwardConfig;
use crate::layers::layer_norm::LayerNormConfig;
use crate::layers::transformer::{TransformerEmbeddingsConfig, TransformerLayerConfig};
use crate::models::transformer::{TransformerEncoderConfig, TransformerSequenceClassifierConfig};

/// BoringBERT configuration errors.
#[derive(Debug, Snafu)]
pub enum BoringBertConfigError {
    #[snafu(display("Hidden size {d_model} is not divisible by the number of heads {num_heads}"))]
    HeadsNotDivisor { d_model: usize, num_heads: usize },

    #[snafu(display("Dropout probability must be in [0, 1), was {p}"))]
    InvalidDropout { p: f32 },

    #[snafu(display("Cannot parse configuration"))]
    ParseConfig { source: serde_json::Error },

    #[snafu(display("Cannot read configuration from {}", path.display()))]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Configuration value '{name}' must be larger than zero"))]
    ZeroDimension { name: &'static str },
}

fn default_activation() -> Activation {
    Activation::Gelu
}

fn default_dropout() -> f32 {
    0.1
}

fn default_layer_norm_eps() -> f64 {
    1e-5
}

/// BoringBERT model configuration.
///
/// A flat configuration of the classifier that can be deserialized from
/// JSON. For example:
///
/// ```json
/// {
///   "vocab_size": 100,
///   "d_model": 32,
///   "num_heads": 4,
///   "num_layers": 2,
///   "d_ff": 64,
///   "max_len": 16,
///   "num_classes": 3
/// }
/// ```
///
/// `dropout`, `layer_norm_eps` and `activation` are optional.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BoringBertConfig {
    /// Activation of the feed-forward layers.
    #[serde(default = "default_activation")]
    pub activation: Activation,

    /// Width of the feed-forward intermediate representations.
    pub d_ff: usize,

    /// Width of the hidden representations.
    pub d_model: usize,

    /// Dropout probability used throughout the model.
    #[serde(default = "default_dropout")]
    pub dropout: f32,

    /// Epsilon of the layer norms.
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,

    /// Maximum sequence length.
    pub max_len: usize,

    /// Number of output classes.
    pub num_classes: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Number of transformer layers, may be zero.
    pub num_layers: usize,

    /// Number of pieces in the vocabulary.
    pub vocab_size: usize,
}

impl BoringBertConfig {
    /// Read a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, BoringBertConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).context(ReadConfigSnafu { path })?;
        Self::from_json_str(&json)
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, BoringBertConfigError> {
        serde_json::from_str(json).context(ParseConfigSnafu)
    }

    /// Check that the configuration describes a valid model.
    pub fn validate(&self) -> Result<(), BoringBertConfigError> {
        for (name, value) in [
            ("vocab_size", self.vocab_size),
            ("d_model", self.d_model),
            ("num_heads", self.num_heads),
            ("d_ff", self.d_ff),
            ("max_len", self.max_len),
            ("num_classes", self.num_classes),
        ] {
            ensure!(value > 0, ZeroDimensionSnafu { name });
        }

        ensure!(
            self.d_model % self.num_heads == 0,
            HeadsNotDivisorSnafu {
                d_model: self.d_model,
                num_heads: self.num_heads
            }
        );

        ensure!(
            (0.0..1.0).contains(&self.dropout),
            InvalidDropoutSnafu { p: self.dropout }
        );

        Ok(())
    }
}

impl TryFrom<BoringBertConfig> for TransformerSequenceClassifierConfig {
    type Error = BoxedError;

    fn try_from(config: BoringBertConfig) -> Result<Self, Self::Error> {
        config.validate()?;

        let dropout = DropoutConfig::default().p(config.dropout);
        let layer_norm = LayerNormConfig::default()
            .eps(config.layer_norm_eps)
            .size(config.d_model);

        let embeddings = TransformerEmbeddingsConfig::default()
            .dropout(dropout.clone())
            .embedding_width(config.d_model)
            .n_pieces(config.vocab_size)
            .n_positions(config.max_len);

        let attention = MultiHeadAttentionConfig::default()
            .attention_scorer(Box::new(SDPAConfig::default().dropout(dropout.clone())))
            .hidden_width(config.d_model)
            .n_heads(config.num_heads);

        let feedforward = PointwiseFeedForwardConfig::default()
            .activation(Box::new(config.activation))
            .dropout(dropout.clone())
            .hidden_width(config.d_model)
            .intermediate_width(config.d_ff);

        let layer = TransformerLayerConfig::default()
            .attention(attention)
            .attn_residual_layer_norm(Box::new(layer_norm.clone()))
            .dropout(dropout)
            .feedforward(feedforward)
            .ffn_residual_layer_norm(Box::new(layer_norm.clone()));

        let encoder = TransformerEncoderConfig::default()
            .embeddings(Box::new(embeddings))
            .layer(Box::new(layer))
            .n_hidden_layers(config.num_layers)
            .output_layer_norm(Box::new(layer_norm));

        Ok(Self::default()
            .encoder(Box::new(encoder))
            .hidden_width(config.d_model)
            .n_classes(config.num_classes))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;
    use snafu::{report, ResultExt, Whatever};

    use super::{BoringBertConfig, BoringBertConfigError};
    use crate::layers::activation::Activation;

    fn small_config() -> BoringBertConfig {
        BoringBertConfig {
            activation: Activation::Gelu,
            d_ff: 64,
            d_model: 32,
            dropout: 0.0,
            layer_norm_eps: 1e-5,
            max_len: 16,
            num_classes: 3,
            num_heads: 4,
            num_layers: 2,
            vocab_size: 100,
        }
    }

    #[test]
    #[report]
    fn config_uses_defaults_for_optional_values() -> Result<(), Whatever> {
        let config = BoringBertConfig::from_json_str(
            r#"{
                "vocab_size": 100,
                "d_model": 32,
                "num_heads": 4,
                "num_layers": 2,
                "d_ff": 64,
                "max_len": 16,
                "num_classes": 3
            }"#,
        )
        .whatever_context("Cannot parse configuration")?;

        assert_eq!(
            config,
            BoringBertConfig {
                dropout: 0.1,
                ..small_config()
            }
        );

        Ok(())
    }

    #[test]
    #[report]
    fn config_round_trips_through_json() -> Result<(), Whatever> {
        let config = BoringBertConfig {
            activation: Activation::Relu,
            ..small_config()
        };
        let json = serde_json::to_string(&config).whatever_context("Cannot serialize")?;
        assert!(json.contains(r#""activation":"relu""#));
        assert_eq!(
            BoringBertConfig::from_json_str(&json).whatever_context("Cannot parse")?,
            config
        );

        Ok(())
    }

    #[test]
    #[report]
    fn config_can_be_read_from_file() -> Result<(), Whatever> {
        let path = std::env::temp_dir().join(format!(
            "boring-bert-config-{}.json",
            std::process::id()
        ));
        let json = serde_json::to_string(&small_config()).whatever_context("Cannot serialize")?;
        fs::write(&path, json).whatever_context("Cannot write configuration")?;

        let config = BoringBertConfig::from_json_file(&path);
        fs::remove_file(&path).whatever_context("Cannot remove configuration")?;
        assert_eq!(
            config.whatever_context("Cannot read configuration")?,
            small_config()
        );

        assert!(matches!(
            BoringBertConfig::from_json_file(&path),
            Err(BoringBertConfigError::ReadConfig { .. })
        ));

        Ok(())
    }

    #[test]
    fn config_rejects_missing_fields() {
        assert!(matches!(
            BoringBertConfig::from_json_str(r#"{"vocab_size": 100}"#),
            Err(BoringBertConfigError::ParseConfig { .. })
        ));
    }

    #[test]
    fn config_accepts_valid_values() {
        assert!(small_config().validate().is_ok());
        assert!(BoringBertConfig {
            num_layers: 0,
            ..small_config()
        }
        .validate()
        .is_ok());
    }

    #[rstest]
    #[case::vocab_size(BoringBertConfig { vocab_size: 0, ..small_config() }, "vocab_size")]
    #[case::d_model(BoringBertConfig { d_model: 0, ..small_config() }, "d_model")]
    #[case::num_heads(BoringBertConfig { num_heads: 0, ..small_config() }, "num_heads")]
    #[case::d_ff(BoringBertConfig { d_ff: 0, ..small_config() }, "d_ff")]
    #[case::max_len(BoringBertConfig { max_len: 0, ..small_config() }, "max_len")]
    #[case::num_classes(BoringBertConfig { num_classes: 0, ..small_config() }, "num_classes")]
    fn config_rejects_zero_dimensions(#[case] config: BoringBertConfig, #[case] expected: &str) {
        match config.validate() {
            Err(BoringBertConfigError::ZeroDimension { name }) => assert_eq!(name, expected),
            result => panic!("Expected zero dimension error, got: {result:?}"),
        }
    }

    #[test]
    fn config_rejects_heads_that_do_not_divide_width() {
        assert!(matches!(
            BoringBertConfig {
                num_heads: 5,
                ..small_config()
            }
            .validate(),
            Err(BoringBertConfigError::HeadsNotDivisor {
                d_model: 32,
                num_heads: 5
            })
        ));
    }

    #[rstest]
    #[case(1.0)]
    #[case(-0.1)]
    #[case(f32::NAN)]
    fn config_rejects_invalid_dropout(#[case] p: f32) {
        assert!(matches!(
            BoringBertConfig {
                dropout: p,
                ..small_config()
            }
            .validate(),
            Err(BoringBertConfigError::InvalidDropout { .. })
        ));
    }
}
