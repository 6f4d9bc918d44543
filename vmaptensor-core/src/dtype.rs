use std::{
    fmt::Debug,
    ops::{Add, Mul},
};

/// Marker trait for tensor datatypes.
pub trait DType:
    Debug + Clone + Copy + PartialEq + Send + Sync + 'static + Add<Output = Self> + Mul<Output = Self>
{
    const ZERO: Self;
    const ONE: Self;
    const NAME: &'static str;

    /// The `i`th element of a range starting at `start` with increment `step`.
    fn offset(i: usize, start: Self, step: Self) -> Self;
}

macro_rules! dtype {
    ($rt:ident, $zero:expr, $one:expr, $repr:expr) => {
        impl DType for $rt {
            const ZERO: $rt = $zero;
            const ONE: $rt = $one;
            const NAME: &'static str = $repr;

            fn offset(i: usize, start: Self, step: Self) -> Self {
                (i as $rt) * step + start
            }
        }
    };
}

dtype!(u8, 0u8, 1u8, "u8");
dtype!(u32, 0u32, 1u32, "u32");
dtype!(i32, 0i32, 1i32, "i32");
dtype!(i64, 0i64, 1i64, "i64");
dtype!(f32, 0f32, 1f32, "f32");
dtype!(f64, 0f64, 1f64, "f64");

#[cfg(feature = "bfloat")]
use half::bf16;
#[cfg(feature = "half")]
use half::f16;
#[cfg(feature = "half")]
impl DType for f16 {
    const ZERO: f16 = f16::from_f32_const(0.0);
    const ONE: f16 = f16::from_f32_const(1.0);
    const NAME: &'static str = "f16";

    fn offset(i: usize, start: Self, step: Self) -> Self {
        f16::from_f64_const(i as f64) * step + start
    }
}
#[cfg(feature = "bfloat")]
impl DType for bf16 {
    const ZERO: bf16 = bf16::from_f32_const(0.0);
    const ONE: bf16 = bf16::from_f32_const(1.0);
    const NAME: &'static str = "bf16";

    fn offset(i: usize, start: Self, step: Self) -> Self {
        bf16::from_f64_const(i as f64) * step + start
    }
}
