use candle_core::{Module, Tensor};
use candle_nn::{embedding, Embedding, VarBuilder};
use snafu::{ensure, ResultExt, Snafu};

use crate::architectures::{BuildEmbeddings, Embeddings};
use crate::error::BoxedError;
use crate::layers::dropout::{DropoutConfig, ForwardMode};
use crate::layers::embeddings::{
    LearnedPositionalEncoding, LearnedPositionalEncodingConfig, LearnedPositionalEncodingError,
};
use crate::util::tensor_ext::ValueRange;

/// Transformer embeddings configuration.
#[derive(Clone, Debug)]
pub struct TransformerEmbeddingsConfig {
    dropout: DropoutConfig,
    embedding_width: usize,
    n_pieces: usize,
    n_positions: usize,
}

impl TransformerEmbeddingsConfig {
    /// Dropout to apply after adding the positional encodings.
    ///
    /// Default: `DropoutConfig::default()`
    pub fn dropout(mut self, dropout: DropoutConfig) -> Self {
        self.dropout = dropout;
        self
    }

    /// Width of the embeddings.
    ///
    /// Default: `768`
    pub fn embedding_width(mut self, embedding_width: usize) -> Self {
        self.embedding_width = embedding_width;
        self
    }

    /// Number of pieces in the vocabulary.
    ///
    /// Default: `30000`
    pub fn n_pieces(mut self, n_pieces: usize) -> Self {
        self.n_pieces = n_pieces;
        self
    }

    /// Number of positions, the maximum sequence length.
    ///
    /// Default: `512`
    pub fn n_positions(mut self, n_positions: usize) -> Self {
        self.n_positions = n_positions;
        self
    }
}

impl Default for TransformerEmbeddingsConfig {
    fn default() -> Self {
        Self {
            dropout: DropoutConfig::default(),
            embedding_width: 768,
            n_pieces: 30000,
            n_positions: 512,
        }
    }
}

impl BuildEmbeddings for TransformerEmbeddingsConfig {
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn Embeddings>, BoxedError> {
        let piece_embeddings = embedding(
            self.n_pieces,
            self.embedding_width,
            vb.push_prefix("piece_embeddings"),
        )
        .context(ConstructionSnafu)?;

        let position_embeddings = LearnedPositionalEncodingConfig::default()
            .dropout(self.dropout.clone())
            .n_positions(self.n_positions)
            .width(self.embedding_width)
            .build(vb.push_prefix("position_embeddings"))
            .context(BuildPositionEmbeddingsSnafu)?;

        Ok(Box::new(TransformerEmbeddings {
            n_pieces: self.n_pieces,
            piece_embeddings,
            position_embeddings,
        }))
    }
}

/// Errors for transformer embeddings.
#[derive(Debug, Snafu)]
pub enum TransformerEmbeddingsError {
    #[snafu(display("Cannot build position embeddings"))]
    BuildPositionEmbeddings {
        source: LearnedPositionalEncodingError,
    },

    #[snafu(display("Cannot construct embeddings layer"))]
    Construction { source: candle_core::Error },

    #[snafu(display("Cannot embed an empty sequence"))]
    EmptySequence,

    #[snafu(display("Piece identifier {piece_id} is out of range, the vocabulary has {n_pieces} pieces"))]
    PieceIdOutOfRange { piece_id: i64, n_pieces: usize },

    #[snafu(display("Cannot lookup piece embeddings"))]
    PieceEmbeddings { source: candle_core::Error },

    #[snafu(display("Cannot add position embeddings"))]
    PositionEmbeddings {
        source: LearnedPositionalEncodingError,
    },
}

/// Transformer embeddings layer.
///
/// Looks up the piece embeddings and adds learned positional encodings.
pub struct TransformerEmbeddings {
    n_pieces: usize,
    piece_embeddings: Embedding,
    position_embeddings: LearnedPositionalEncoding,
}

impl TransformerEmbeddings {
    /// Check that the piece identifiers can be embedded.
    fn validate_piece_ids(&self, piece_ids: &Tensor) -> Result<(), TransformerEmbeddingsError> {
        let (_, seq_len) = piece_ids.dims2().context(PieceEmbeddingsSnafu)?;
        ensure!(seq_len > 0, EmptySequenceSnafu);

        if let Some((min, max)) = piece_ids.value_range().context(PieceEmbeddingsSnafu)? {
            for piece_id in [min, max] {
                ensure!(
                    piece_id >= 0 && (piece_id as usize) < self.n_pieces,
                    PieceIdOutOfRangeSnafu {
                        piece_id,
                        n_pieces: self.n_pieces
                    }
                );
            }
        }

        Ok(())
    }
}

impl Embeddings for TransformerEmbeddings {
    fn forward_t(
        &self,
        piece_ids: &Tensor,
        positions: Option<&Tensor>,
        mode: &mut ForwardMode,
    ) -> Result<Tensor, BoxedError> {
        self.validate_piece_ids(piece_ids)?;

        let embeddings = self
            .piece_embeddings
            .forward(piece_ids)
            .context(PieceEmbeddingsSnafu)?;

        Ok(self
            .position_embeddings
            .forward_t(&embeddings, positions, mode)
            .context(PositionEmbeddingsSnafu)?)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, IndexOp, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, FromString, ResultExt, Whatever};

    use super::{TransformerEmbeddingsConfig, TransformerEmbeddingsError};
    use crate::architectures::BuildEmbeddings;
    use crate::layers::dropout::ForwardMode;
    use crate::layers::embeddings::LearnedPositionalEncodingError;
    use crate::util::device::tests::test_devices;
    use crate::util::tests::{assert_tensor_eq, find_source};

    fn config() -> TransformerEmbeddingsConfig {
        TransformerEmbeddingsConfig::default()
            .embedding_width(8)
            .n_pieces(20)
            .n_positions(6)
    }

    #[test]
    #[report]
    fn embeddings_add_piece_and_position_vectors() -> Result<(), Whatever> {
        for device in test_devices() {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let embeddings = config()
                .build(vb.clone())
                .map_err(|e| Whatever::with_source(e, "Cannot build embeddings".to_string()))?;

            let piece_ids = Tensor::new(&[[3u32, 7, 19], [0, 0, 1]], &device)
                .whatever_context("Cannot create piece identifiers")?;
            let output = embeddings
                .forward_t(&piece_ids, None, &mut ForwardMode::Inference)
                .map_err(|e| Whatever::with_source(e, "Cannot apply embeddings".to_string()))?;
            assert_eq!(output.dims(), &[2, 3, 8]);

            let pieces = vb
                .get((20, 8), "piece_embeddings.weight")
                .whatever_context("Cannot get piece table")?;
            let positions = vb
                .get((6, 8), "position_embeddings.weight")
                .whatever_context("Cannot get position table")?;

            let expected = pieces
                .i(7)
                .and_then(|piece| piece + positions.i(1)?)
                .whatever_context("Cannot compute expected embedding")?;
            let actual = output
                .i((0, 1))
                .whatever_context("Cannot slice embeddings")?;
            assert_tensor_eq!(actual, expected, epsilon = 1e-6);
        }

        Ok(())
    }

    #[test]
    #[report]
    fn embeddings_reject_out_of_vocabulary_pieces() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let embeddings = config()
            .build(VarBuilder::from_varmap(&varmap, DType::F32, &device))
            .map_err(|e| Whatever::with_source(e, "Cannot build embeddings".to_string()))?;

        let piece_ids = Tensor::new(&[[3u32, 20]], &device)
            .whatever_context("Cannot create piece identifiers")?;
        let err = match embeddings.forward_t(&piece_ids, None, &mut ForwardMode::Inference) {
            Ok(_) => panic!("Out-of-vocabulary piece was embedded"),
            Err(err) => err,
        };
        assert!(matches!(
            find_source::<TransformerEmbeddingsError>(&err),
            Some(TransformerEmbeddingsError::PieceIdOutOfRange {
                piece_id: 20,
                n_pieces: 20
            })
        ));

        let piece_ids = Tensor::new(&[[3i64, -1]], &device)
            .whatever_context("Cannot create piece identifiers")?;
        let err = match embeddings.forward_t(&piece_ids, None, &mut ForwardMode::Inference) {
            Ok(_) => panic!("Negative piece identifier was embedded"),
            Err(err) => err,
        };
        assert!(matches!(
            find_source::<TransformerEmbeddingsError>(&err),
            Some(TransformerEmbeddingsError::PieceIdOutOfRange {
                piece_id: -1,
                n_pieces: 20
            })
        ));

        Ok(())
    }

    #[test]
    #[report]
    fn embeddings_reject_empty_and_long_sequences() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let embeddings = config()
            .build(VarBuilder::from_varmap(&varmap, DType::F32, &device))
            .map_err(|e| Whatever::with_source(e, "Cannot build embeddings".to_string()))?;

        let empty = Tensor::zeros((2, 0), DType::U32, &device)
            .whatever_context("Cannot create piece identifiers")?;
        let err = match embeddings.forward_t(&empty, None, &mut ForwardMode::Inference) {
            Ok(_) => panic!("Empty sequence was embedded"),
            Err(err) => err,
        };
        assert!(matches!(
            find_source::<TransformerEmbeddingsError>(&err),
            Some(TransformerEmbeddingsError::EmptySequence)
        ));

        let long = Tensor::zeros((1, 7), DType::U32, &device)
            .whatever_context("Cannot create piece identifiers")?;
        let err = match embeddings.forward_t(&long, None, &mut ForwardMode::Inference) {
            Ok(_) => panic!("Sequence longer than the number of positions was embedded"),
            Err(err) => err,
        };
        assert!(matches!(
            find_source::<LearnedPositionalEncodingError>(&err),
            Some(LearnedPositionalEncodingError::SequenceTooLong {
                seq_len: 7,
                n_positions: 6
            })
        ));

        Ok(())
    }
}
