use std::fmt::Debug;

use candle_core::ModuleT;
use candle_nn::VarBuilder;

use crate::error::BoxedError;

/// Module that can be shared between threads.
///
/// Forward passes only borrow modules immutably, so independent inputs
/// can be processed concurrently with the same parameters.
pub type SharedModule = Box<dyn ModuleT + Send + Sync>;

/// Traits for types that can build modules.
pub trait BuildModule: Debug {
    /// Build a module.
    ///
    /// * `vb` - Variable builder used for the module parameters.
    fn build(&self, vb: VarBuilder) -> Result<SharedModule, BoxedError>;
}
