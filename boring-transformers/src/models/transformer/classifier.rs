//! Transformer sequence classifier.
use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::debug;

use crate::architectures::{
    BuildArchitecture, BuildEncoder, Encoder, LayerOutputs, SequenceClassifier,
    SequenceClassifierOutput,
};
use crate::error::BoxedError;
use crate::layers::attention::SelfAttentionMask;
use crate::layers::dropout::ForwardMode;
use crate::models::transformer::{TransformerEncoder, TransformerEncoderConfig};

/// Transformer sequence classifier configuration.
#[derive(Debug)]
pub struct TransformerSequenceClassifierConfig {
    encoder: Box<dyn BuildEncoder<Encoder = TransformerEncoder>>,
    hidden_width: usize,
    n_classes: usize,
}

impl TransformerSequenceClassifierConfig {
    /// Encoder.
    ///
    /// Default: `TransformerEncoderConfig::default()`
    pub fn encoder(mut self, encoder: Box<dyn BuildEncoder<Encoder = TransformerEncoder>>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Hidden width of the encoder output.
    ///
    /// Default: `768`
    pub fn hidden_width(mut self, hidden_width: usize) -> Self {
        self.hidden_width = hidden_width;
        self
    }

    /// Number of classes.
    ///
    /// Default: `2`
    pub fn n_classes(mut self, n_classes: usize) -> Self {
        self.n_classes = n_classes;
        self
    }
}

impl Default for TransformerSequenceClassifierConfig {
    fn default() -> Self {
        Self {
            encoder: Box::<TransformerEncoderConfig>::default(),
            hidden_width: 768,
            n_classes: 2,
        }
    }
}

impl BuildArchitecture for TransformerSequenceClassifierConfig {
    type Architecture = TransformerSequenceClassifier;

    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError> {
        debug!(
            hidden_width = self.hidden_width,
            n_classes = self.n_classes,
            "Building transformer sequence classifier"
        );

        Ok(TransformerSequenceClassifier {
            encoder: self
                .encoder
                .build(vb.push_prefix("encoder"))
                .context(BuildEncoderSnafu)?,
            classifier: linear(
                self.hidden_width,
                self.n_classes,
                vb.push_prefix("classifier"),
            )
            .context(BuildClassifierSnafu)?,
        })
    }
}

/// Transformer sequence classifier errors.
#[derive(Debug, Snafu)]
pub enum TransformerSequenceClassifierError {
    #[snafu(display("Cannot build classifier"))]
    BuildClassifier { source: candle_core::Error },

    #[snafu(display("Cannot build encoder"))]
    BuildEncoder { source: BoxedError },

    #[snafu(display("Cannot apply classifier"))]
    Classifier { source: candle_core::Error },

    #[snafu(display("Cannot encode input"))]
    Encode { source: BoxedError },

    #[snafu(display("Encoder did not return any layer outputs"))]
    NoLayers,

    #[snafu(display("Cannot pool encoder output"))]
    Pool { source: candle_core::Error },
}

/// Sequence classifier using a transformer encoder.
///
/// The output of the last encoder layer is averaged over the sequence
/// and then projected to the class logits.
///
/// Pooling does not use the attention mask: padding representations
/// are included in the mean. Callers that need a padding-free mean
/// should use equal-length batches.
pub struct TransformerSequenceClassifier {
    classifier: Linear,
    encoder: TransformerEncoder,
}

impl TransformerSequenceClassifier {
    /// Get the encoder.
    pub fn encoder(&self) -> &TransformerEncoder {
        &self.encoder
    }
}

impl SequenceClassifier for TransformerSequenceClassifier {
    fn forward_t(
        &self,
        piece_ids: &Tensor,
        attention_mask: Option<&SelfAttentionMask>,
        positions: Option<&Tensor>,
        mode: &mut ForwardMode,
    ) -> Result<SequenceClassifierOutput, BoxedError> {
        let encoder_output = self
            .encoder
            .forward_t(piece_ids, attention_mask, positions, mode)
            .context(EncodeSnafu)?;

        let pooled = encoder_output
            .last_layer_output()
            .context(NoLayersSnafu)?
            .mean(1)
            .context(PoolSnafu)?;

        let logits = self.classifier.forward(&pooled).context(ClassifierSnafu)?;

        Ok(SequenceClassifierOutput::new(encoder_output, pooled, logits))
    }
}
