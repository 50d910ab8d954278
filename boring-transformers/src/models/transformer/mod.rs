mod classifier;
pub use classifier::{
    TransformerSequenceClassifier, TransformerSequenceClassifierConfig,
    TransformerSequenceClassifierError,
};

mod encoder;
pub use encoder::{TransformerEncoder, TransformerEncoderConfig, TransformerEncoderError};
