use candle_core::Tensor;

use crate::architectures::{EncoderOutput, LayerOutputs};
use crate::error::BoxedError;
use crate::layers::attention::SelfAttentionMask;
use crate::layers::dropout::ForwardMode;

/// Sequence classifier output.
#[derive(Clone, Debug)]
pub struct SequenceClassifierOutput {
    encoder_output: EncoderOutput,
    logits: Tensor,
    pooled: Tensor,
}

impl SequenceClassifierOutput {
    /// Create a sequence classifier output.
    pub fn new(encoder_output: EncoderOutput, pooled: Tensor, logits: Tensor) -> Self {
        Self {
            encoder_output,
            logits,
            pooled,
        }
    }

    /// Get the output of the encoder used by the classifier.
    pub fn encoder_output(&self) -> &EncoderOutput {
        &self.encoder_output
    }

    /// Get the class logits.
    ///
    /// The logits are unnormalized. Applying softmax to the logits gives
    /// the probability distribution over the classes.
    ///
    /// *Shape:* `(batch_size, n_classes)`
    pub fn logits(&self) -> &Tensor {
        &self.logits
    }

    /// Get the pooled sequence representations.
    ///
    /// *Shape:* `(batch_size, width)`
    pub fn pooled(&self) -> &Tensor {
        &self.pooled
    }
}

impl LayerOutputs for SequenceClassifierOutput {
    fn layer_outputs(&self) -> &[Tensor] {
        self.encoder_output.layer_outputs()
    }

    fn embedding_layer_output(&self) -> Option<&Tensor> {
        self.encoder_output.embedding_layer_output()
    }
}

/// Trait for sequence classifiers.
pub trait SequenceClassifier: Send + Sync {
    /// Classify input sequences.
    ///
    /// Returns the encoder output, pooled representations and the class
    /// logits.
    ///
    /// * `piece_ids` - Input sequence.
    ///   *Shape:* `(batch_size, seq_len)`
    /// * `attention_mask` - Attention mask. Sequence elements for which the
    ///   corresponding mask element is zero are ignored during attention
    ///   calculation. No mask means that all elements are attended to.
    ///   *Shape:* broadcastable to `(batch_size, heads, seq_len, seq_len)`
    /// * `positions` - Input positions.
    ///   *Shape:* `(batch_size, seq_len)`
    /// * `mode` - Forward mode.
    fn forward_t(
        &self,
        piece_ids: &Tensor,
        attention_mask: Option<&SelfAttentionMask>,
        positions: Option<&Tensor>,
        mode: &mut ForwardMode,
    ) -> Result<SequenceClassifierOutput, BoxedError>;
}
