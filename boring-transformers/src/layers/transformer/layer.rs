use candle_core::Tensor;
use candle_nn::VarBuilder;
use snafu::{ResultExt, Snafu};

use crate::architectures::{BuildEncoderLayer, EncoderLayer};
use crate::error::BoxedError;
use crate::layers::attention::{
    MultiHeadAttention, MultiHeadAttentionConfig, MultiHeadAttentionError, SelfAttentionMask,
};
use crate::layers::build_module::{BuildModule, SharedModule};
use crate::layers::dropout::{Dropout, DropoutConfig, DropoutError, ForwardMode};
use crate::layers::feedforward::{
    PointwiseFeedForward, PointwiseFeedForwardConfig, PointwiseFeedForwardError,
};
use crate::layers::layer_norm::LayerNormConfig;

/// Transformer layer configuration.
#[derive(Debug)]
pub struct TransformerLayerConfig {
    attention: MultiHeadAttentionConfig,
    attn_residual_layer_norm: Box<dyn BuildModule>,
    dropout: DropoutConfig,
    feedforward: PointwiseFeedForwardConfig,
    ffn_residual_layer_norm: Box<dyn BuildModule>,
}

impl TransformerLayerConfig {
    /// Attention layer configuration.
    ///
    /// Default: `MultiHeadAttentionConfig::default()`
    pub fn attention(mut self, attention: MultiHeadAttentionConfig) -> Self {
        self.attention = attention;
        self
    }

    /// Layer norm applied after the attention residual connection.
    ///
    /// Default: `LayerNormConfig::default()`
    pub fn attn_residual_layer_norm(
        mut self,
        attn_residual_layer_norm: Box<dyn BuildModule>,
    ) -> Self {
        self.attn_residual_layer_norm = attn_residual_layer_norm;
        self
    }

    /// Dropout applied to the attention and feed-forward outputs before
    /// the residual connections.
    ///
    /// Default: `DropoutConfig::default()`
    pub fn dropout(mut self, dropout: DropoutConfig) -> Self {
        self.dropout = dropout;
        self
    }

    /// Feed-forward layer configuration.
    ///
    /// Default: `PointwiseFeedForwardConfig::default()`
    pub fn feedforward(mut self, feedforward: PointwiseFeedForwardConfig) -> Self {
        self.feedforward = feedforward;
        self
    }

    /// Layer norm applied after the feed-forward residual connection.
    ///
    /// Default: `LayerNormConfig::default()`
    pub fn ffn_residual_layer_norm(
        mut self,
        ffn_residual_layer_norm: Box<dyn BuildModule>,
    ) -> Self {
        self.ffn_residual_layer_norm = ffn_residual_layer_norm;
        self
    }

    /// Build a transformer encoder layer.
    pub fn build(&self, vb: VarBuilder) -> Result<TransformerEncoderLayer, TransformerLayerError> {
        Ok(TransformerEncoderLayer {
            attention: self
                .attention
                .build(vb.push_prefix("attention"))
                .context(BuildAttentionSnafu)?,
            attn_residual_layer_norm: self
                .attn_residual_layer_norm
                .build(vb.push_prefix("attn_residual_layer_norm"))
                .context(BuildLayerNormSnafu)?,
            dropout: self.dropout.build().context(BuildDropoutSnafu)?,
            ffn: self
                .feedforward
                .build(vb.push_prefix("ffn"))
                .context(BuildFeedForwardSnafu)?,
            ffn_residual_layer_norm: self
                .ffn_residual_layer_norm
                .build(vb.push_prefix("ffn_residual_layer_norm"))
                .context(BuildLayerNormSnafu)?,
        })
    }
}

impl Default for TransformerLayerConfig {
    fn default() -> Self {
        Self {
            attention: MultiHeadAttentionConfig::default(),
            attn_residual_layer_norm: Box::<LayerNormConfig>::default(),
            dropout: DropoutConfig::default(),
            feedforward: PointwiseFeedForwardConfig::default(),
            ffn_residual_layer_norm: Box::<LayerNormConfig>::default(),
        }
    }
}

impl BuildEncoderLayer for TransformerLayerConfig {
    fn build_encoder_layer(&self, vb: VarBuilder) -> Result<Box<dyn EncoderLayer>, BoxedError> {
        Ok(Box::new(self.build(vb)?))
    }
}

/// Errors for transformer layers.
#[derive(Debug, Snafu)]
pub enum TransformerLayerError {
    #[snafu(display("Cannot build attention layer"))]
    BuildAttention { source: MultiHeadAttentionError },

    #[snafu(display("Cannot build dropout"))]
    BuildDropout { source: DropoutError },

    #[snafu(display("Cannot build feed-forward layer"))]
    BuildFeedForward { source: PointwiseFeedForwardError },

    #[snafu(display("Cannot build layer norm"))]
    BuildLayerNorm { source: BoxedError },

    #[snafu(display("Cannot apply point-wise feed-forward layer"))]
    FeedForward { source: PointwiseFeedForwardError },

    #[snafu(display("Cannot apply residual connection"))]
    Residual { source: candle_core::Error },

    #[snafu(display("Cannot apply self-attention"))]
    SelfAttention { source: MultiHeadAttentionError },
}

/// Transformer encoder layer (_Vaswani et al., 2017_).
///
/// The layer normalizes after each residual connection (post-norm):
///
/// * `x = LN_1(x + dropout(attention(x, x, x)))`
/// * `x = LN_2(x + dropout(ffn(x)))`
///
/// * _Vaswani et al., 2017_: https://arxiv.org/abs/1706.03762
pub struct TransformerEncoderLayer {
    attention: MultiHeadAttention,
    attn_residual_layer_norm: SharedModule,
    dropout: Dropout,
    ffn: PointwiseFeedForward,
    ffn_residual_layer_norm: SharedModule,
}

impl TransformerEncoderLayer {
    /// Apply the layer and return the self-attention weights.
    ///
    /// * `input` - Hidden representations to apply the layer to.
    ///   *Shape:* `(batch_size, seq_len, width)`
    /// * `attention_mask` - Attention mask. Sequence elements for which the
    ///    corresponding mask element is zero are ignored during attention
    ///    calculation.
    /// * `mode` - Forward mode.
    ///
    /// Returns: layer output and self-attention weights.
    /// *Shape:* `(batch_size, seq_len, width)`,
    /// `(batch_size, heads, seq_len, seq_len)`
    pub fn forward_with_weights(
        &self,
        input: &Tensor,
        attention_mask: Option<&SelfAttentionMask>,
        mode: &mut ForwardMode,
    ) -> Result<(Tensor, Tensor), TransformerLayerError> {
        let attn = self
            .attention
            .forward_t(input, input, input, attention_mask, mode)
            .context(SelfAttentionSnafu)?;

        let residual = self
            .dropout
            .forward_t(attn.hidden(), mode)
            .and_then(|xs| input + xs)
            .and_then(|xs| self.attn_residual_layer_norm.forward_t(&xs, mode.is_train()))
            .context(ResidualSnafu)?;

        let ffn_out = self
            .ffn
            .forward_t(&residual, mode)
            .context(FeedForwardSnafu)?;

        let output = self
            .dropout
            .forward_t(&ffn_out, mode)
            .and_then(|xs| residual + xs)
            .and_then(|xs| self.ffn_residual_layer_norm.forward_t(&xs, mode.is_train()))
            .context(ResidualSnafu)?;

        Ok((output, attn.weights().clone()))
    }
}

impl EncoderLayer for TransformerEncoderLayer {
    fn forward_t(
        &self,
        input: &Tensor,
        attention_mask: Option<&SelfAttentionMask>,
        mode: &mut ForwardMode,
    ) -> Result<Tensor, BoxedError> {
        let (output, _) = self.forward_with_weights(input, attention_mask, mode)?;
        Ok(output)
    }
}
