use candle_core::{DType, Device, IndexOp, Tensor};
use snafu::{ensure, ResultExt, Snafu};

use crate::util::tensor_ext::MinLike;

/// Errors for attention masks.
#[derive(Debug, Snafu)]
pub enum AttentionMaskError {
    #[snafu(display("Attention mask must be 2D, was {n_dims}D"))]
    AttentionMaskDims { n_dims: usize },

    #[snafu(display("Cannot convert attention mask to boolean mask"))]
    ConvertAttentionMask { source: candle_core::Error },

    #[snafu(display("Cannot create mask from sequence lengths"))]
    FromSeqLens { source: candle_core::Error },

    #[snafu(display("Sequence length {seq_len} is larger than the mask length {max_len}"))]
    SeqLenTooLarge { max_len: usize, seq_len: usize },
}

/// Attention mask.
///
/// Sequence elements for which the corresponding mask element is set to
/// zero are ignored during attention calculation. Guaranteed to be a 2D
/// tensor with shape *(batch_size, seq_len)*.
#[derive(Clone, Debug)]
pub struct AttentionMask {
    bool_mask: Tensor,
}

impl AttentionMask {
    /// Create an input attention mask.
    ///
    /// * `bool_mask` - Mask tensor, non-zero elements can be attended to.
    ///   *Shape:* `(batch_size, seq_len)`
    pub fn new(bool_mask: Tensor) -> Result<Self, AttentionMaskError> {
        let n_dims = bool_mask.dims().len();
        ensure!(n_dims == 2, AttentionMaskDimsSnafu { n_dims });
        Ok(AttentionMask {
            bool_mask: bool_mask.ne(0u32).context(ConvertAttentionMaskSnafu)?,
        })
    }

    /// Create a padding mask from sequence lengths.
    ///
    /// Sequence `i` can be attended to in positions _[0..seq_lens[i])_,
    /// the remaining positions up to `max_len` are padding.
    pub fn from_seq_lens(
        seq_lens: &[usize],
        max_len: usize,
        device: &Device,
    ) -> Result<Self, AttentionMaskError> {
        let mut mask = Vec::with_capacity(seq_lens.len() * max_len);
        for &seq_len in seq_lens {
            ensure!(seq_len <= max_len, SeqLenTooLargeSnafu { max_len, seq_len });
            mask.extend((0..max_len).map(|idx| u8::from(idx < seq_len)));
        }

        Ok(AttentionMask {
            bool_mask: Tensor::from_vec(mask, (seq_lens.len(), max_len), device)
                .context(FromSeqLensSnafu)?,
        })
    }

    /// Get the boolean mask.
    ///
    /// *Shape:* `(batch_size, seq_len)`
    pub fn bool_mask(&self) -> &Tensor {
        &self.bool_mask
    }
}

/// Errors for self-attention masks.
#[derive(Debug, Snafu)]
pub enum SelfAttentionMaskError {
    #[snafu(display("Cannot apply logits mask"))]
    ApplyLogitsMask { source: candle_core::Error },

    #[snafu(display("Cannot convert mask to boolean mask"))]
    BoolMask { source: candle_core::Error },

    #[snafu(display("Cannot create causal mask"))]
    CausalMask { source: candle_core::Error },

    #[snafu(display("Cannot intersect masks"))]
    IntersectMasks { source: candle_core::Error },

    #[snafu(display("Self-attention mask must be 4D, was {n_dims}D"))]
    InvalidDims { n_dims: usize },

    #[snafu(display(
        "Mask with shape {mask_shape:?} cannot be broadcast to attention scores with shape {scores_shape:?}"
    ))]
    MaskShape {
        mask_shape: Vec<usize>,
        scores_shape: Vec<usize>,
    },

    #[snafu(display("Query length {query_len} must not be larger than key length {key_len}"))]
    QueryLen { key_len: usize, query_len: usize },

    #[snafu(display("Cannot reshape attention mask"))]
    Reshape { source: candle_core::Error },
}

/// Self-attention mask.
///
/// A 4D mask that must be broadcastable to the attention scores with shape
/// *(batch_size, heads, query_len, key_len)*. Typical shapes are
/// *(batch_size, 1, 1, key_len)* for padding masks and
/// *(batch_size, 1, query_len, key_len)* for masks that differ per query.
/// Scores for which the corresponding mask element is zero are ignored
/// during attention calculation.
#[derive(Clone, Debug)]
pub struct SelfAttentionMask {
    bool_mask: Tensor,
}

impl TryFrom<&AttentionMask> for SelfAttentionMask {
    type Error = SelfAttentionMaskError;

    fn try_from(attention_mask: &AttentionMask) -> Result<Self, Self::Error> {
        let (batch_size, key_len) = attention_mask
            .bool_mask
            .dims2()
            .context(ReshapeSnafu)?;
        Ok(SelfAttentionMask {
            bool_mask: attention_mask
                .bool_mask
                .reshape((batch_size, 1, 1, key_len))
                .context(ReshapeSnafu)?,
        })
    }
}

impl TryFrom<AttentionMask> for SelfAttentionMask {
    type Error = SelfAttentionMaskError;

    fn try_from(attention_mask: AttentionMask) -> Result<Self, Self::Error> {
        SelfAttentionMask::try_from(&attention_mask)
    }
}

impl SelfAttentionMask {
    /// Create a self-attention mask.
    ///
    /// * `bool_mask` - Mask tensor, non-zero elements can be attended to.
    ///   *Shape:* broadcastable to `(batch_size, heads, query_len, key_len)`
    pub fn new(bool_mask: Tensor) -> Result<Self, SelfAttentionMaskError> {
        let n_dims = bool_mask.dims().len();
        ensure!(n_dims == 4, InvalidDimsSnafu { n_dims });
        Ok(SelfAttentionMask {
            bool_mask: bool_mask.ne(0u32).context(BoolMaskSnafu)?,
        })
    }

    /// Create a causal mask.
    ///
    /// A causal mask ensures that a sequence element can only attend to
    /// preceding elements and itself. When the query is shorter than the
    /// key, the queries are aligned with the last keys.
    ///
    /// *Shape:* `(1, 1, query_len, key_len)`
    pub fn causal_mask(
        query_len: usize,
        key_len: usize,
        device: &Device,
    ) -> Result<Self, SelfAttentionMaskError> {
        ensure!(query_len <= key_len, QueryLenSnafu { key_len, query_len });

        let causal_mask = Tensor::tril2(key_len, DType::U8, device)
            .and_then(|mask| mask.reshape((1, 1, key_len, key_len)))
            .and_then(|mask| mask.i((.., .., key_len - query_len..key_len, ..key_len)))
            .and_then(|mask| mask.contiguous())
            .context(CausalMaskSnafu)?;

        Ok(SelfAttentionMask {
            bool_mask: causal_mask,
        })
    }

    /// Get the boolean mask.
    pub fn bool_mask(&self) -> &Tensor {
        &self.bool_mask
    }

    /// Use the attention mask to mask logits.
    ///
    /// Masked logits are set to the minimum value of the logits' data type,
    /// so that softmax assigns (close to) zero probability to them. If all
    /// keys of a query are masked, the query attends uniformly to all keys.
    /// Such rows have no meaningful attention distribution and should be
    /// avoided by the caller.
    ///
    /// * input - Tensor to which the mask is applied.
    ///   *Shape:* `(batch_size, heads, query_len, key_len)`
    ///
    /// Returns: Logits with the attention mask applied.
    /// *Shape:* `(batch_size, heads, query_len, key_len)`
    pub fn apply_logit_mask(&self, input: &Tensor) -> Result<Tensor, SelfAttentionMaskError> {
        let mask_shape = self.bool_mask.dims();
        let scores_shape = input.dims();
        ensure!(
            mask_shape.len() == scores_shape.len()
                && mask_shape
                    .iter()
                    .zip(scores_shape)
                    .all(|(&mask_dim, &scores_dim)| mask_dim == 1 || mask_dim == scores_dim),
            MaskShapeSnafu {
                mask_shape: mask_shape.to_vec(),
                scores_shape: scores_shape.to_vec()
            }
        );

        // Underflows to -inf for more narrow floating point types, which
        // is ok for masking.
        let blocked_value = input.min_like().context(ApplyLogitsMaskSnafu)?;
        self.bool_mask
            .broadcast_as(input.shape())
            .and_then(|xs| xs.where_cond(input, &blocked_value))
            .context(ApplyLogitsMaskSnafu)
    }

    /// Merge this attention mask with another attention mask.
    ///
    /// An element can be attended to when both masks allow it.
    pub fn intersect(
        &self,
        other: &SelfAttentionMask,
    ) -> Result<SelfAttentionMask, SelfAttentionMaskError> {
        Ok(SelfAttentionMask {
            bool_mask: self
                .bool_mask
                .broadcast_mul(&other.bool_mask)
                .context(IntersectMasksSnafu)?,
        })
    }
}
