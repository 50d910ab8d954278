/// Tensor extension traits.
use candle_core::{DType, Tensor};
use half::{bf16, f16};

/// Get a tensor with the data type's minimum value.
pub trait MinLike: Sized {
    /// Get a new tensor filled with the data type's minimum value.
    ///
    /// The tensor has the same shape and device as `self`.
    fn min_like(&self) -> Result<Self, candle_core::Error>;
}

impl MinLike for Tensor {
    fn min_like(&self) -> Result<Self, candle_core::Error> {
        match self.dtype() {
            DType::BF16 => Tensor::try_from(bf16::MIN),
            DType::F16 => Tensor::try_from(f16::MIN),
            DType::F32 => Tensor::try_from(f32::MIN),
            DType::F64 => Tensor::try_from(f64::MIN),
            DType::U8 => Tensor::try_from(u8::MIN),
            DType::U32 => Tensor::try_from(u32::MIN),
            DType::I64 => Tensor::try_from(i64::MIN),
        }
        .and_then(|scalar| scalar.to_device(self.device()))
        .and_then(|scalar| scalar.broadcast_as(self.shape()))
    }
}

/// Range of the values in an integer tensor.
pub trait ValueRange {
    /// Get the smallest and largest value in the tensor.
    ///
    /// Values are converted to `i64`, so this is intended for identifier
    /// tensors such as piece identifiers or positions. Returns `None` for
    /// empty tensors.
    fn value_range(&self) -> Result<Option<(i64, i64)>, candle_core::Error>;
}

impl ValueRange for Tensor {
    fn value_range(&self) -> Result<Option<(i64, i64)>, candle_core::Error> {
        if self.elem_count() == 0 {
            return Ok(None);
        }

        let values = self
            .flatten_all()
            .and_then(|xs| xs.to_dtype(DType::I64))?;
        let min = values.min(0).and_then(|xs| xs.to_scalar::<i64>())?;
        let max = values.max(0).and_then(|xs| xs.to_scalar::<i64>())?;

        Ok(Some((min, max)))
    }
}
