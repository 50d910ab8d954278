use candle_nn::{layer_norm, LayerNormConfig as CandleLayerNormConfig, VarBuilder};

use crate::error::BoxedError;
use crate::layers::build_module::{BuildModule, SharedModule};

/// Layer norm configuration.
///
/// Layer normalization (Ba et al., 2016) normalizes each representation
/// to zero mean and unit variance over the last dimension and then applies
/// a learned per-channel scale and shift:
///
/// `(x - mean(x)) / sqrt(var(x) + eps) * weight + bias`
#[derive(Clone, Debug)]
pub struct LayerNormConfig {
    pub affine: bool,
    pub eps: f64,
    pub size: usize,
}

impl LayerNormConfig {
    /// Whether to use an affine transformation.
    ///
    /// Default: `true`
    pub fn affine(mut self, affine: bool) -> Self {
        self.affine = affine;
        self
    }

    /// Epsilon value, added to the variance for numerical stability.
    ///
    /// Default: `1e-5`
    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Dimensionality of the layer.
    ///
    /// Default: `768`
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

impl Default for LayerNormConfig {
    fn default() -> Self {
        Self {
            affine: true,
            eps: 1e-5,
            size: 768,
        }
    }
}

impl BuildModule for LayerNormConfig {
    fn build(&self, vb: VarBuilder) -> Result<SharedModule, BoxedError> {
        Ok(Box::new(layer_norm(
            self.size,
            CandleLayerNormConfig {
                affine: self.affine,
                eps: self.eps,
                remove_mean: true,
            },
            vb,
        )?))
    }
}
