use candle_core::Tensor;
use rand_core::RngCore;
use rand_pcg::Pcg32;
use snafu::{ensure, Snafu};

/// PCG stream used for dropout masks.
const DROPOUT_STREAM: u64 = 0xda3e_39cb_94b9_5bdb;

/// Mode of a forward pass.
///
/// Dropout is the only operation that behaves differently during training.
/// The random state for dropout is owned by the mode and threaded through
/// every forward call, so that a training pass is reproducible given the
/// seed, parameters, and inputs.
#[derive(Clone, Debug)]
pub enum ForwardMode {
    /// Inference mode, dropout is the identity.
    Inference,

    /// Training mode, dropout masks are sampled from the generator.
    Train(Pcg32),
}

impl ForwardMode {
    /// Training mode with a generator that is seeded with `seed`.
    pub fn train(seed: u64) -> Self {
        ForwardMode::Train(Pcg32::new(seed, DROPOUT_STREAM))
    }

    /// Whether this is a training pass.
    pub fn is_train(&self) -> bool {
        matches!(self, ForwardMode::Train(_))
    }
}

/// Dropout errors.
#[derive(Debug, Snafu)]
pub enum DropoutError {
    #[snafu(display("Dropout probability must be in [0, 1), was {p}"))]
    InvalidProbability { p: f32 },
}

/// Dropout configuration.
#[derive(Clone, Debug)]
pub struct DropoutConfig {
    p: f32,
}

impl DropoutConfig {
    /// Dropout probability.
    ///
    /// Must be in `[0, 1)`.
    ///
    /// Default: `0.0`
    pub fn p(mut self, p: f32) -> Self {
        self.p = p;
        self
    }

    /// Build a dropout module.
    pub fn build(&self) -> Result<Dropout, DropoutError> {
        ensure!(
            (0.0..1.0).contains(&self.p),
            InvalidProbabilitySnafu { p: self.p }
        );
        Ok(Dropout { p: self.p })
    }
}

impl Default for DropoutConfig {
    fn default() -> Self {
        Self { p: 0.0 }
    }
}

/// Dropout (Srivastava et al., 2014).
///
/// In training mode, each element is set to zero with probability `p` and
/// the remaining elements are scaled by `1 / (1 - p)`.
#[derive(Clone, Debug)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    /// Apply dropout to the input.
    ///
    /// * `xs` - Input tensor.
    /// * `mode` - Forward mode. Dropout is only applied in training mode.
    pub fn forward_t(
        &self,
        xs: &Tensor,
        mode: &mut ForwardMode,
    ) -> Result<Tensor, candle_core::Error> {
        let rng = match mode {
            ForwardMode::Train(rng) if self.p > 0.0 => rng,
            _ => return Ok(xs.clone()),
        };

        let scale = 1.0 / (1.0 - self.p);
        let mask = (0..xs.elem_count())
            .map(|_| {
                if uniform(rng) < self.p {
                    0f32
                } else {
                    scale
                }
            })
            .collect::<Vec<_>>();

        Tensor::from_vec(mask, xs.shape(), xs.device())
            .and_then(|mask| mask.to_dtype(xs.dtype()))
            .and_then(|mask| xs.mul(&mask))
    }
}

/// Sample a number in `[0, 1)`.
fn uniform(rng: &mut Pcg32) -> f32 {
    let mantissa_bits_shift = u32::BITS - f32::MANTISSA_DIGITS;
    (rng.next_u32() >> mantissa_bits_shift) as f32 / (1u32 << f32::MANTISSA_DIGITS) as f32
}
