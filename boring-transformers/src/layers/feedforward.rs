use candle_core::{Module, Tensor};
use candle_nn::{linear, linear_no_bias, Linear, VarBuilder};
use snafu::{ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::activation::Activation;
use crate::layers::build_module::{BuildModule, SharedModule};
use crate::layers::dropout::{Dropout, DropoutConfig, DropoutError, ForwardMode};

/// Point-wise feed-forward layer configuration.
#[derive(Debug)]
pub struct PointwiseFeedForwardConfig {
    activation: Box<dyn BuildModule>,
    dropout: DropoutConfig,
    hidden_width: usize,
    intermediate_width: usize,
    use_bias: bool,
}

impl PointwiseFeedForwardConfig {
    /// Activation function.
    ///
    /// Default: `Activation::Gelu`
    pub fn activation(mut self, activation: Box<dyn BuildModule>) -> Self {
        self.activation = activation;
        self
    }

    /// Dropout applied to the output of the activation.
    ///
    /// Default: `DropoutConfig::default()`
    pub fn dropout(mut self, dropout: DropoutConfig) -> Self {
        self.dropout = dropout;
        self
    }

    /// Hidden width, dimensionality of the layer input and output.
    ///
    /// Default: `768`
    pub fn hidden_width(mut self, hidden_width: usize) -> Self {
        self.hidden_width = hidden_width;
        self
    }

    /// Intermediate width inside the feed-forward layer.
    ///
    /// Default: `3072`
    pub fn intermediate_width(mut self, intermediate_width: usize) -> Self {
        self.intermediate_width = intermediate_width;
        self
    }

    /// Use bias in linear transformations.
    ///
    /// Default: `true`
    pub fn use_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    /// Build a point-wise feed-forward layer.
    pub fn build(&self, vb: VarBuilder) -> Result<PointwiseFeedForward, PointwiseFeedForwardError> {
        let linear_ctor = if self.use_bias {
            linear
        } else {
            linear_no_bias
        };

        Ok(PointwiseFeedForward {
            activation: self
                .activation
                .build(vb.push_prefix("activation"))
                .context(BuildActivationSnafu)?,
            dropout: self.dropout.build().context(BuildDropoutSnafu)?,
            intermediate: linear_ctor(
                self.hidden_width,
                self.intermediate_width,
                vb.push_prefix("intermediate"),
            )
            .context(ConstructionSnafu)?,
            output: linear_ctor(
                self.intermediate_width,
                self.hidden_width,
                vb.push_prefix("output"),
            )
            .context(ConstructionSnafu)?,
        })
    }
}

impl Default for PointwiseFeedForwardConfig {
    fn default() -> Self {
        Self {
            activation: Box::new(Activation::Gelu),
            dropout: DropoutConfig::default(),
            hidden_width: 768,
            intermediate_width: 3072,
            use_bias: true,
        }
    }
}

/// Errors for point-wise feed-forward layers.
#[derive(Debug, Snafu)]
pub enum PointwiseFeedForwardError {
    #[snafu(display("Cannot apply activation"))]
    Activation { source: candle_core::Error },

    #[snafu(display("Cannot build activation"))]
    BuildActivation { source: BoxedError },

    #[snafu(display("Cannot build dropout"))]
    BuildDropout { source: DropoutError },

    #[snafu(display("Cannot construct layer"))]
    Construction { source: candle_core::Error },

    #[snafu(display("Cannot apply dropout"))]
    Dropout { source: candle_core::Error },

    #[snafu(display("Cannot apply intermediate projection"))]
    Intermediate { source: candle_core::Error },

    #[snafu(display("Cannot apply output projection"))]
    Output { source: candle_core::Error },
}

/// Point-wise feed-forward layer (_Vaswani et al., 2017_).
///
/// This layer is applied pointwise, meaning that the same
/// transformation is applied to each sequence element. This
/// transformation is:
///
/// `dropout(g(xW_1 + b_1))W_2 + b_2`
///
/// `W_1` and `b_1` transform the input to an intermediate width, `g` is
/// a non-linear activation function and `W_2` and `b_2` transform the
/// output of the activation back to the input width.
///
/// * _Vaswani et al., 2017_: https://arxiv.org/abs/1706.03762
pub struct PointwiseFeedForward {
    activation: SharedModule,
    dropout: Dropout,
    intermediate: Linear,
    output: Linear,
}

impl PointwiseFeedForward {
    /// Apply the feed-forward layer.
    ///
    /// * `input` - Input representations.
    ///   *Shape:* `(batch_size, seq_len, hidden_width)`
    /// * `mode` - Forward mode.
    ///
    /// Returns: output representations.
    /// *Shape:* `(batch_size, seq_len, hidden_width)`
    pub fn forward_t(
        &self,
        input: &Tensor,
        mode: &mut ForwardMode,
    ) -> Result<Tensor, PointwiseFeedForwardError> {
        let intermediate = self
            .intermediate
            .forward(input)
            .context(IntermediateSnafu)?;
        let intermediate = self
            .activation
            .forward_t(&intermediate, mode.is_train())
            .context(ActivationSnafu)?;
        let intermediate = self
            .dropout
            .forward_t(&intermediate, mode)
            .context(DropoutSnafu)?;
        self.output.forward(&intermediate).context(OutputSnafu)
    }
}
