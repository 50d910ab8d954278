use candle_core::{Device, Module, Tensor};
use candle_nn::{embedding, Embedding, VarBuilder};
use snafu::{ensure, ResultExt, Snafu};

use crate::layers::dropout::{Dropout, DropoutConfig, DropoutError, ForwardMode};
use crate::util::tensor_ext::ValueRange;

/// Configuration for learned positional encodings.
#[derive(Clone, Debug)]
pub struct LearnedPositionalEncodingConfig {
    dropout: DropoutConfig,
    n_positions: usize,
    width: usize,
}

impl LearnedPositionalEncodingConfig {
    /// Dropout applied after adding the positional encodings.
    ///
    /// Default: `DropoutConfig::default()`
    pub fn dropout(mut self, dropout: DropoutConfig) -> Self {
        self.dropout = dropout;
        self
    }

    /// Maximum number of positions.
    ///
    /// Default: `512`
    pub fn n_positions(mut self, n_positions: usize) -> Self {
        self.n_positions = n_positions;
        self
    }

    /// Width of the positional encodings.
    ///
    /// Default: `768`
    pub fn width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    /// Build learned positional encodings.
    ///
    /// * `vb` - Variable builder used for the position table.
    pub fn build(
        &self,
        vb: VarBuilder,
    ) -> Result<LearnedPositionalEncoding, LearnedPositionalEncodingError> {
        Ok(LearnedPositionalEncoding {
            dropout: self.dropout.build().context(BuildDropoutSnafu)?,
            n_positions: self.n_positions,
            position_embeddings: embedding(self.n_positions, self.width, vb)
                .context(ConstructionSnafu)?,
        })
    }
}

impl Default for LearnedPositionalEncodingConfig {
    fn default() -> Self {
        Self {
            dropout: DropoutConfig::default(),
            n_positions: 512,
            width: 768,
        }
    }
}

/// Errors for learned positional encodings.
#[derive(Debug, Snafu)]
pub enum LearnedPositionalEncodingError {
    #[snafu(display("Cannot build dropout"))]
    BuildDropout { source: DropoutError },

    #[snafu(display("Cannot construct position embeddings"))]
    Construction { source: candle_core::Error },

    #[snafu(display("Cannot apply dropout"))]
    Dropout { source: candle_core::Error },

    #[snafu(display("Cannot add position embeddings"))]
    PositionEmbeddings { source: candle_core::Error },

    #[snafu(display("Position {position} is out of range, the model supports {n_positions} positions"))]
    PositionOutOfRange { position: i64, n_positions: usize },

    #[snafu(display("Sequence length {seq_len} exceeds the maximum of {n_positions} positions"))]
    SequenceTooLong { seq_len: usize, n_positions: usize },
}

/// Learned positional encoding (Devlin et al., 2018).
///
/// A trainable vector per position is added to the representation at that
/// position, followed by dropout.
pub struct LearnedPositionalEncoding {
    dropout: Dropout,
    n_positions: usize,
    position_embeddings: Embedding,
}

impl LearnedPositionalEncoding {
    /// Get position identifiers _[0..seq_len)_.
    fn positions(
        seq_len: usize,
        device: &Device,
    ) -> Result<Tensor, LearnedPositionalEncodingError> {
        Tensor::arange(0, seq_len as i64, device)
            .and_then(|xs| xs.reshape((1, seq_len)))
            .context(PositionEmbeddingsSnafu)
    }

    /// Add positional encodings to the input.
    ///
    /// * `input` - Input representations.
    ///   *Shape:* `(batch_size, seq_len, width)`
    /// * `positions` - Positions of the input. Defaults to _[0..seq_len)_
    ///   for each sequence.
    ///   *Shape:* `(batch_size, seq_len)`
    /// * `mode` - Forward mode.
    ///
    /// Returns: the input with positional encodings added.
    /// *Shape:* `(batch_size, seq_len, width)`
    pub fn forward_t(
        &self,
        input: &Tensor,
        positions: Option<&Tensor>,
        mode: &mut ForwardMode,
    ) -> Result<Tensor, LearnedPositionalEncodingError> {
        let positions = match positions {
            Some(positions) => {
                if let Some((min, max)) =
                    positions.value_range().context(PositionEmbeddingsSnafu)?
                {
                    for position in [min, max] {
                        ensure!(
                            position >= 0 && (position as usize) < self.n_positions,
                            PositionOutOfRangeSnafu {
                                position,
                                n_positions: self.n_positions
                            }
                        );
                    }
                }
                positions.clone()
            }
            None => {
                let (_, seq_len, _) = input.dims3().context(PositionEmbeddingsSnafu)?;
                ensure!(
                    seq_len <= self.n_positions,
                    SequenceTooLongSnafu {
                        seq_len,
                        n_positions: self.n_positions
                    }
                );
                Self::positions(seq_len, input.device())?
            }
        };

        let output = self
            .position_embeddings
            .forward(&positions)
            .and_then(|xs| input.broadcast_add(&xs))
            .context(PositionEmbeddingsSnafu)?;

        self.dropout.forward_t(&output, mode).context(DropoutSnafu)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, IndexOp, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, ResultExt, Whatever};

    use super::{LearnedPositionalEncodingConfig, LearnedPositionalEncodingError};
    use crate::layers::dropout::ForwardMode;
    use crate::util::device::tests::test_devices;
    use crate::util::tests::assert_tensor_eq;

    #[test]
    #[report]
    fn learned_positional_encoding_adds_position_table() -> Result<(), Whatever> {
        for device in test_devices() {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let encoding = LearnedPositionalEncodingConfig::default()
                .n_positions(8)
                .width(4)
                .build(vb.clone())
                .whatever_context("Cannot build positional encoding")?;
            let table = vb
                .get((8, 4), "weight")
                .whatever_context("Cannot get position table")?;

            let input = Tensor::zeros((2, 5, 4), DType::F32, &device)
                .whatever_context("Cannot create input")?;
            let output = encoding
                .forward_t(&input, None, &mut ForwardMode::Inference)
                .whatever_context("Cannot apply positional encoding")?;

            let expected = table
                .i(..5)
                .and_then(|xs| xs.unsqueeze(0))
                .and_then(|xs| xs.broadcast_as((2, 5, 4)))
                .and_then(|xs| xs.contiguous())
                .whatever_context("Cannot slice position table")?;
            assert_tensor_eq!(output, expected);
        }

        Ok(())
    }

    #[test]
    #[report]
    fn learned_positional_encoding_uses_given_positions() -> Result<(), Whatever> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoding = LearnedPositionalEncodingConfig::default()
            .n_positions(8)
            .width(4)
            .build(vb.clone())
            .whatever_context("Cannot build positional encoding")?;
        let table = vb
            .get((8, 4), "weight")
            .whatever_context("Cannot get position table")?;

        let input = Tensor::zeros((1, 2, 4), DType::F32, &Device::Cpu)
            .whatever_context("Cannot create input")?;
        let positions = Tensor::new(&[[7u32, 3]], &Device::Cpu)
            .whatever_context("Cannot create positions")?;
        let output = encoding
            .forward_t(&input, Some(&positions), &mut ForwardMode::Inference)
            .whatever_context("Cannot apply positional encoding")?;

        let expected = Tensor::stack(
            &[
                table.i(7).whatever_context("Cannot index table")?,
                table.i(3).whatever_context("Cannot index table")?,
            ],
            0,
        )
        .and_then(|xs| xs.unsqueeze(0))
        .whatever_context("Cannot stack positions")?;
        assert_tensor_eq!(output, expected);

        Ok(())
    }

    #[test]
    fn learned_positional_encoding_rejects_long_sequences() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoding = LearnedPositionalEncodingConfig::default()
            .n_positions(4)
            .width(4)
            .build(vb)
            .expect("Cannot build positional encoding");

        let input = Tensor::zeros((1, 5, 4), DType::F32, &Device::Cpu).unwrap();
        let err = encoding
            .forward_t(&input, None, &mut ForwardMode::Inference)
            .expect_err("Sequence longer than the position table must fail");
        assert!(matches!(
            err,
            LearnedPositionalEncodingError::SequenceTooLong {
                seq_len: 5,
                n_positions: 4
            }
        ));

        // Sequences up to the number of positions are fine.
        let input = Tensor::zeros((1, 4, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(encoding
            .forward_t(&input, None, &mut ForwardMode::Inference)
            .is_ok());
    }

    #[test]
    fn learned_positional_encoding_rejects_out_of_range_positions() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoding = LearnedPositionalEncodingConfig::default()
            .n_positions(4)
            .width(4)
            .build(vb)
            .expect("Cannot build positional encoding");

        let input = Tensor::zeros((1, 2, 4), DType::F32, &Device::Cpu).unwrap();
        let positions = Tensor::new(&[[0u32, 4]], &Device::Cpu).unwrap();
        let err = encoding
            .forward_t(&input, Some(&positions), &mut ForwardMode::Inference)
            .expect_err("Position outside the table must fail");
        assert!(matches!(
            err,
            LearnedPositionalEncodingError::PositionOutOfRange {
                position: 4,
                n_positions: 4
            }
        ));
    }
}
