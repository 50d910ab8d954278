//! Models built from transformer layers.
pub mod boring_bert;
pub use boring_bert::{BoringBert, BoringBertConfig};

pub mod transformer;
