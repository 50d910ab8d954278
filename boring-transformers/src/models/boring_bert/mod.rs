/// BoringBERT sequence classifier.
mod config;
pub use config::{BoringBertConfig, BoringBertConfigError};

mod model;
pub use model::{BoringBert, BoringBertError};
