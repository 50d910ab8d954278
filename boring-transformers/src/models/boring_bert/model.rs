use std::path::Path;

use candle_nn::VarBuilder;
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::architectures::BuildArchitecture;
use crate::error::BoxedError;
use crate::models::boring_bert::{BoringBertConfig, BoringBertConfigError};
use crate::models::transformer::{
    TransformerSequenceClassifier, TransformerSequenceClassifierConfig,
};

/// BoringBERT errors.
#[derive(Debug, Snafu)]
pub enum BoringBertError {
    #[snafu(display("Cannot build model"))]
    BuildModel { source: BoxedError },

    #[snafu(display("Cannot convert model configuration"))]
    ConvertConfig { source: BoxedError },

    #[snafu(display("Cannot load model configuration"))]
    LoadConfig { source: BoringBertConfigError },
}

/// BoringBERT sequence classifier (Devlin et al., 2018).
///
/// A BERT-style encoder with learned positional encodings and post-norm
/// transformer layers. The sequence representation is the mean of the
/// final hidden representations, which is projected to class logits.
///
/// See [BERT: Pre-training of Deep Bidirectional Transformers for Language Understanding](https://arxiv.org/abs/1810.04805).
pub struct BoringBert;

impl BoringBert {
    /// Construct a classifier from a configuration.
    ///
    /// * `config` - The model configuration.
    /// * `vb` - Variable builder for the model parameters. Use a builder
    ///   that is backed by a `VarMap` for freshly initialized parameters.
    pub fn from_config(
        config: BoringBertConfig,
        vb: VarBuilder,
    ) -> Result<TransformerSequenceClassifier, BoringBertError> {
        debug!(
            vocab_size = config.vocab_size,
            d_model = config.d_model,
            num_heads = config.num_heads,
            num_layers = config.num_layers,
            d_ff = config.d_ff,
            max_len = config.max_len,
            num_classes = config.num_classes,
            dropout = config.dropout,
            "Building BoringBERT"
        );

        let config =
            TransformerSequenceClassifierConfig::try_from(config).context(ConvertConfigSnafu)?;
        config.build(vb).context(BuildModelSnafu)
    }

    /// Construct a classifier from a JSON configuration file.
    ///
    /// * `path` - Path of the JSON configuration.
    /// * `vb` - Variable builder for the model parameters.
    pub fn from_json_file(
        path: impl AsRef<Path>,
        vb: VarBuilder,
    ) -> Result<TransformerSequenceClassifier, BoringBertError> {
        let config = BoringBertConfig::from_json_file(path).context(LoadConfigSnafu)?;
        Self::from_config(config, vb)
    }
}
