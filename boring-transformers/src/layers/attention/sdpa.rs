use candle_core::{Tensor, D};
use candle_nn::ops::softmax;
use candle_nn::VarBuilder;
use snafu::{ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::attention::{
    AttentionOutput, AttentionScorer, BuildAttentionScorer, SelfAttentionMask,
    SelfAttentionMaskError,
};
use crate::layers::dropout::{Dropout, DropoutConfig, DropoutError, ForwardMode};

/// Configuration for scaled dot-product attention.
#[derive(Clone, Debug, Default)]
pub struct SDPAConfig {
    dropout: DropoutConfig,
}

impl SDPAConfig {
    /// Dropout to apply to the attention weights.
    ///
    /// Default: `DropoutConfig::default()`
    pub fn dropout(mut self, dropout: DropoutConfig) -> Self {
        self.dropout = dropout;
        self
    }
}

impl BuildAttentionScorer for SDPAConfig {
    fn build(&self, _vb: VarBuilder) -> Result<Box<dyn AttentionScorer>, BoxedError> {
        Ok(Box::new(SDPA {
            dropout: self.dropout.build().context(BuildDropoutSnafu)?,
        }))
    }
}

/// Errors for scaled dot-product attention.
#[derive(Debug, Snafu)]
pub enum SDPAError {
    #[snafu(display("Cannot apply attention mask"))]
    AttentionMask { source: SelfAttentionMaskError },

    #[snafu(display("Cannot calculate attention scores"))]
    AttentionScores { source: candle_core::Error },

    #[snafu(display("Cannot weigh representations using attention weights"))]
    AttentionWeight { source: candle_core::Error },

    #[snafu(display("Cannot build dropout"))]
    BuildDropout { source: DropoutError },

    #[snafu(display("Cannot apply dropout"))]
    Dropout { source: candle_core::Error },

    #[snafu(display("Cannot apply softmax temperature"))]
    Temperature { source: candle_core::Error },
}

/// Scaled dot-product attention.
///
/// See [Vaswani et al., 2017](https://arxiv.org/abs/1706.03762).
pub struct SDPA {
    dropout: Dropout,
}

impl AttentionScorer for SDPA {
    fn forward_t(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        attention_mask: Option<&SelfAttentionMask>,
        mode: &mut ForwardMode,
    ) -> Result<AttentionOutput, BoxedError> {
        // Calculate attention scores.
        let query = query.contiguous().context(AttentionScoresSnafu)?;
        let mut attn_scores = key
            .contiguous()
            .and_then(|key| key.transpose(3, 2))
            .and_then(|key| query.broadcast_matmul(&key))
            .context(AttentionScoresSnafu)?;

        let head_width = key.dim(3).context(TemperatureSnafu)?;
        let temperature = (head_width as f64).sqrt();
        attn_scores = (attn_scores / temperature).context(TemperatureSnafu)?;

        if let Some(attention_mask) = attention_mask {
            attn_scores = attention_mask
                .apply_logit_mask(&attn_scores)
                .context(AttentionMaskSnafu)?;
        }

        let attn_weights = softmax(&attn_scores, D::Minus1).context(AttentionWeightSnafu)?;

        // Apply attention weights.
        let hidden = self
            .dropout
            .forward_t(&attn_weights, mode)
            .context(DropoutSnafu)?;
        let hidden = value
            .contiguous()
            .and_then(|value| hidden.broadcast_matmul(&value))
            .context(AttentionWeightSnafu)?;

        Ok(AttentionOutput::new(hidden, attn_weights))
    }
}
