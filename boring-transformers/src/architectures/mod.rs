/// Traits for model architectures.
use candle_nn::VarBuilder;

mod embeddings;
pub use embeddings::{BuildEmbeddings, Embeddings};

mod encoder;
pub use encoder::{BuildEncoder, BuildEncoderLayer, Encoder, EncoderLayer, EncoderOutput};

mod output;
pub use output::LayerOutputs;

mod sequence_classifier;
pub use sequence_classifier::{SequenceClassifier, SequenceClassifierOutput};

use crate::error::BoxedError;

/// Trait for building model architectures.
pub trait BuildArchitecture {
    /// The architecture to build.
    type Architecture;

    /// Build the architecture.
    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError>;
}
