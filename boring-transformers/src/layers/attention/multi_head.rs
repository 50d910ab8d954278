use candle_core::{Module, Tensor};
use candle_nn::{linear, linear_no_bias, Linear, VarBuilder};
use snafu::{ensure, ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::attention::{
    AttentionOutput, AttentionScorer, BuildAttentionScorer, SDPAConfig, SelfAttentionMask,
};
use crate::layers::dropout::ForwardMode;

/// Multi-head attention configuration.
#[derive(Debug)]
pub struct MultiHeadAttentionConfig {
    attention_scorer: Box<dyn BuildAttentionScorer>,
    hidden_width: usize,
    n_heads: usize,
    use_bias: bool,
}

impl MultiHeadAttentionConfig {
    /// Attention scorer.
    ///
    /// Default: `SDPAConfig::default()`
    pub fn attention_scorer(mut self, attention_scorer: Box<dyn BuildAttentionScorer>) -> Self {
        self.attention_scorer = attention_scorer;
        self
    }

    /// Hidden width of the model.
    ///
    /// Must be divisible by the number of heads.
    ///
    /// Default: `768`
    pub fn hidden_width(mut self, hidden_width: usize) -> Self {
        self.hidden_width = hidden_width;
        self
    }

    /// Number of attention heads.
    ///
    /// Default: `12`
    pub fn n_heads(mut self, n_heads: usize) -> Self {
        self.n_heads = n_heads;
        self
    }

    /// Use bias in the linear projections.
    ///
    /// Default: `true`
    pub fn use_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    /// Build a multi-head attention layer.
    ///
    /// * `vb` - Variable builder used for the attention parameters.
    pub fn build(&self, vb: VarBuilder) -> Result<MultiHeadAttention, MultiHeadAttentionError> {
        ensure!(
            self.n_heads > 0 && self.hidden_width % self.n_heads == 0,
            IncorrectHeadsSnafu {
                hidden_width: self.hidden_width,
                n_heads: self.n_heads,
            }
        );

        let linear_ctor = if self.use_bias {
            linear
        } else {
            linear_no_bias
        };
        let projection = |name: &str| {
            linear_ctor(self.hidden_width, self.hidden_width, vb.push_prefix(name))
                .context(ConstructionSnafu)
        };

        Ok(MultiHeadAttention {
            attention_scorer: self
                .attention_scorer
                .build(vb.push_prefix("scorer"))
                .context(BuildAttentionScorerSnafu)?,
            n_heads: self.n_heads,
            key: projection("key")?,
            output: projection("output")?,
            query: projection("query")?,
            value: projection("value")?,
        })
    }
}

impl Default for MultiHeadAttentionConfig {
    fn default() -> Self {
        Self {
            attention_scorer: Box::<SDPAConfig>::default(),
            hidden_width: 768,
            n_heads: 12,
            use_bias: true,
        }
    }
}

/// Errors for multi-head attention.
#[derive(Debug, Snafu)]
pub enum MultiHeadAttentionError {
    #[snafu(display("Cannot apply attention scorer"))]
    AttentionScorer { source: BoxedError },

    #[snafu(display("Cannot build attention scorer"))]
    BuildAttentionScorer { source: BoxedError },

    #[snafu(display("Cannot combine heads"))]
    CombineHeads { source: candle_core::Error },

    #[snafu(display("Cannot construct layer"))]
    Construction { source: candle_core::Error },

    #[snafu(display(
        "Hidden width ({hidden_width}) must be a non-zero multiple of the number of heads ({n_heads})"
    ))]
    IncorrectHeads { hidden_width: usize, n_heads: usize },

    #[snafu(display("Cannot apply output layer"))]
    Output { source: candle_core::Error },

    #[snafu(display("Cannot calculate key, query, or value"))]
    Qkv { source: candle_core::Error },

    #[snafu(display("Cannot split heads"))]
    SplitHeads { source: candle_core::Error },
}

/// Multi-head attention layer.
///
/// The query, key, and value are projected separately and split into
/// heads. The heads are scored in parallel, then concatenated and
/// projected back to the hidden width.
///
/// See [Vaswani et al., 2017](https://arxiv.org/abs/1706.03762).
pub struct MultiHeadAttention {
    attention_scorer: Box<dyn AttentionScorer>,
    key: Linear,
    n_heads: usize,
    output: Linear,
    query: Linear,
    value: Linear,
}

impl MultiHeadAttention {
    /// Apply attention to the given query, key, and value.
    ///
    /// For self-attention, the same representations are used for the
    /// query, key, and value.
    ///
    /// * `query` - Query representations.
    ///   *Shape:* `(batch_size, query_len, width)`
    /// * `key` - Key representations.
    ///   *Shape:* `(batch_size, key_len, width)`
    /// * `value` - Value representations.
    ///   *Shape:* `(batch_size, key_len, width)`
    /// * `attention_mask` - Attention mask. Scores for which the
    ///   corresponding mask element is zero are ignored.
    /// * `mode` - Forward mode.
    ///
    /// Returns: Hidden representations after attention and the attention
    /// weights of each head.
    /// *Shape:* `(batch_size, query_len, width)`,
    /// `(batch_size, heads, query_len, key_len)`
    pub fn forward_t(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        attention_mask: Option<&SelfAttentionMask>,
        mode: &mut ForwardMode,
    ) -> Result<AttentionOutput, MultiHeadAttentionError> {
        let query = self
            .query
            .forward(query)
            .context(QkvSnafu)?
            .split_heads(self.n_heads)?;
        let key = self
            .key
            .forward(key)
            .context(QkvSnafu)?
            .split_heads(self.n_heads)?;
        let value = self
            .value
            .forward(value)
            .context(QkvSnafu)?
            .split_heads(self.n_heads)?;

        let attn = self
            .attention_scorer
            .forward_t(&query, &key, &value, attention_mask, mode)
            .context(AttentionScorerSnafu)?;

        let hidden = attn
            .hidden()
            .combine_heads()
            .and_then(|xs| self.output.forward(&xs).context(OutputSnafu))?;

        Ok(AttentionOutput::new(hidden, attn.weights().clone()))
    }
}

trait CombineHeads {
    fn combine_heads(&self) -> Result<Tensor, MultiHeadAttentionError>;
}

impl CombineHeads for Tensor {
    fn combine_heads(&self) -> Result<Tensor, MultiHeadAttentionError> {
        let (batch_size, n_heads, seq_len, head_width) =
            self.dims4().context(CombineHeadsSnafu)?;
        self.transpose(1, 2)
            .and_then(|heads| heads.reshape((batch_size, seq_len, n_heads * head_width)))
            .context(CombineHeadsSnafu)
    }
}

trait SplitHeads {
    fn split_heads(&self, n_heads: usize) -> Result<Tensor, MultiHeadAttentionError>;
}

impl SplitHeads for Tensor {
    fn split_heads(&self, n_heads: usize) -> Result<Tensor, MultiHeadAttentionError> {
        let (batch_size, seq_len, model_width) = self.dims3().context(SplitHeadsSnafu)?;
        let head_width = model_width / n_heads;
        self.reshape((batch_size, seq_len, n_heads, head_width))
            .and_then(|heads| heads.transpose(1, 2))
            .context(SplitHeadsSnafu)
    }
}
