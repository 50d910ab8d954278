use std::fmt::Debug;

use candle_core::Tensor;
use candle_nn::VarBuilder;

mod mask;
pub use mask::{AttentionMask, AttentionMaskError, SelfAttentionMask, SelfAttentionMaskError};

mod multi_head;
pub use multi_head::{MultiHeadAttention, MultiHeadAttentionConfig, MultiHeadAttentionError};

mod sdpa;
pub use sdpa::{SDPAConfig, SDPAError, SDPA};

use crate::error::BoxedError;
use crate::layers::dropout::ForwardMode;

/// Output of an attention module.
#[derive(Clone, Debug)]
pub struct AttentionOutput {
    hidden: Tensor,
    weights: Tensor,
}

impl AttentionOutput {
    /// Create an attention output.
    pub fn new(hidden: Tensor, weights: Tensor) -> Self {
        Self { hidden, weights }
    }

    /// Hidden representations after attention.
    pub fn hidden(&self) -> &Tensor {
        &self.hidden
    }

    /// Attention weights.
    ///
    /// The weights are the softmax-normalized attention scores before
    /// dropout, so the weights of each query sum to one.
    ///
    /// *Shape:* `(batch_size, heads, query_len, key_len)`
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }
}

/// Trait implemented by modules that perform attention scoring.
pub trait AttentionScorer: Send + Sync {
    /// Apply attention scores to the given key, query and value.
    /// Scores that are marked with zero in the attention mask are ignored
    /// by the attention mechanism (if a mask is provided).
    ///
    /// * `query` - Query tensor.
    ///   *Shape:* `(batch_size, heads, query_len, width)`
    /// * `key` - Key tensor.
    ///   *Shape:* `(batch_size, heads, key_len, width)`
    /// * `value` - Value tensor.
    ///   *Shape:* `(batch_size, heads, key_len, width)`
    /// * `attention_mask` - Attention mask, must be broadcastable to the
    ///   attention scores.
    /// * `mode` - Forward mode.
    ///
    /// Returns: Attention values and weights.
    /// *Shape:* `(batch_size, heads, query_len, width)`,
    /// `(batch_size, heads, query_len, key_len)`
    fn forward_t(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        attention_mask: Option<&SelfAttentionMask>,
        mode: &mut ForwardMode,
    ) -> Result<AttentionOutput, BoxedError>;
}

/// Build an attention scorer module.
pub trait BuildAttentionScorer: Debug {
    /// Build an attention scorer.
    ///
    /// * `vb` - Variable builder used for scorer parameters.
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn AttentionScorer>, BoxedError>;
}
