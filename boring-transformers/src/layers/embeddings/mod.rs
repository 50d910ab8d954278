/// Embedding layers.
mod learned_positional;
pub use learned_positional::{
    LearnedPositionalEncoding, LearnedPositionalEncodingConfig, LearnedPositionalEncodingError,
};
