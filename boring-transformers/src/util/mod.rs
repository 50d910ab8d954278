pub mod device;

pub mod tensor_ext;

#[cfg(test)]
pub(crate) mod tests {
    use std::error::Error;
    use std::fmt::Debug;

    use approx::{assert_relative_eq, AbsDiffEq, Relative, RelativeEq};
    use candle_core::{Device, Shape, Tensor, WithDType};
    use ndarray::{ArrayBase, ArrayD, Data, Dimension};
    use rand_core::RngCore;
    use rand_pcg::Pcg32;

    use crate::error::BoxedError;

    // Like TryInto, but we need our own trait so that we can implement it
    // for external types.
    pub trait IntoArrayD<T> {
        fn into_arrayd(self) -> Result<ArrayD<T>, Box<dyn Error>>;
    }

    impl<T> IntoArrayD<T> for Tensor
    where
        T: WithDType,
    {
        fn into_arrayd(self) -> Result<ArrayD<T>, Box<dyn Error>> {
            (&self).into_arrayd()
        }
    }

    impl<T> IntoArrayD<T> for &Tensor
    where
        T: WithDType,
    {
        fn into_arrayd(self) -> Result<ArrayD<T>, Box<dyn Error>> {
            let data = self.reshape(((),))?.to_vec1()?;
            Ok(ArrayD::from_shape_vec(self.shape().dims(), data)?)
        }
    }

    impl<S, D, T> IntoArrayD<T> for ArrayBase<S, D>
    where
        D: Dimension,
        S: Data<Elem = T>,
        T: Clone,
    {
        fn into_arrayd(self) -> Result<ArrayD<T>, Box<dyn Error>> {
            Ok(self.to_owned().into_dyn())
        }
    }

    /// Check that two tensors are equal with the given absolute (`epsilon`)
    /// and relative (`max_relative`) tolerances.
    macro_rules! assert_tensor_eq {
        ($lhs:expr, $rhs:expr $(, $opt:ident = $val:expr)*) => {
            crate::util::tests::assert_tensor_eq_::<f32>($lhs, $rhs, approx::Relative::default()$(.$opt($val))*)
        };
        ($lhs:expr, $rhs:expr $(, $opt:ident = $val:expr)*,) => {
            crate::util::tests::assert_tensor_eq_::<f32>($lhs, $rhs, approx::Relative::default()$(.$opt($val))*)
        };
    }
    pub(crate) use assert_tensor_eq;

    pub(crate) fn assert_tensor_eq_<T>(
        a: impl IntoArrayD<T>,
        b: impl IntoArrayD<T>,
        relative: Relative<T>,
    ) where
        T: AbsDiffEq<Epsilon = T> + RelativeEq + Clone + Debug,
    {
        let a = a.into_arrayd().expect("Cannot convert array");
        let b = b.into_arrayd().expect("Cannot convert array");

        assert_eq!(
            a.shape(),
            b.shape(),
            "Shape mismatch: {:?}, {:?}",
            a.shape(),
            b.shape()
        );

        assert_relative_eq!(
            a,
            b,
            epsilon = relative.epsilon,
            max_relative = relative.max_relative
        );
    }

    /// Generate a float32 tensor with values in `(-1, 1)` using a PRNG.
    ///
    /// The PRNG is seeded with `seed`, so the same seed always gives the
    /// same tensor.
    pub fn pseudo_random(shape: impl Into<Shape>, seed: u64, device: &Device) -> Tensor {
        let shape = shape.into();
        let mut rng = Pcg32::new(seed, 0);
        let data = (0..shape.elem_count())
            .map(|_| {
                let next = rng.next_u32();

                // Uniform number in [0, 1) from the most significant bits.
                let mantissa_bits_shift = u32::BITS - f32::MANTISSA_DIGITS;
                let zero_one =
                    (next >> mantissa_bits_shift) as f32 / (1 << f32::MANTISSA_DIGITS) as f32;

                // The least significant bit was not used, use it for the sign.
                let sign = (next & 1) as f32;
                zero_one - sign
            })
            .collect::<Vec<_>>();
        Tensor::from_vec(data, shape, device).expect("Cannot allocate random tensor")
    }

    /// Find an error of type `E` in the source chain of `err`.
    pub fn find_source<E>(err: &BoxedError) -> Option<&E>
    where
        E: Error + 'static,
    {
        let err: &(dyn Error + 'static) = &**err;
        let mut current = Some(err);
        while let Some(err) = current {
            if let Some(err) = err.downcast_ref::<E>() {
                return Some(err);
            }
            current = err.source();
        }
        None
    }
}
