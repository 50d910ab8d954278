use std::fmt::Debug;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::error::BoxedError;
use crate::layers::dropout::ForwardMode;

/// Trait for embedding layers.
pub trait Embeddings: Send + Sync {
    /// Look up the embeddings for the given piece identifiers.
    ///
    /// * `piece_ids` - Piece identifiers.
    ///   *Shape:* `(batch_size, seq_len)`
    /// * `positions` - Input positions.
    ///   *Shape:* `(batch_size, seq_len)`
    /// * `mode` - Forward mode.
    ///
    /// Returns: piece embeddings.
    /// *Shape:* `(batch_size, seq_len, width)`
    fn forward_t(
        &self,
        piece_ids: &Tensor,
        positions: Option<&Tensor>,
        mode: &mut ForwardMode,
    ) -> Result<Tensor, BoxedError>;
}

/// Trait for building embedding layers.
pub trait BuildEmbeddings: Debug {
    /// Build an embedding layer.
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn Embeddings>, BoxedError>;
}
