//! Float trait abstraction for f32/f64 support.
//!
//! The blur and the deconvolution loop are written once against this trait so
//! that callers can trade precision for memory. `f64` is the reference
//! precision; `f32` halves the footprint of the four working volumes.

use num_traits::{Float, FromPrimitive, NumAssign};
use std::fmt::Debug;
use std::iter::Sum;

/// Trait alias for floating point types supported by the deconvolution.
///
/// Combines the bounds the numeric kernels need:
/// - Basic float operations (Float, NumAssign)
/// - Conversion from primitive types (FromPrimitive)
/// - Reductions over volumes (Sum)
/// - Sharing across rayon workers (Send + Sync)
pub trait RicianFloat:
    Float + FromPrimitive + NumAssign + Sum + Debug + Send + Sync + 'static
{
    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Create a value from a usize constant.
    fn usize_as(val: usize) -> Self;
}

impl RicianFloat for f32 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f32
    }
}

impl RicianFloat for f64 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_trait_impl() {
        let val: f32 = RicianFloat::from_f64_c(2.38944);
        assert!((val - 2.38944f32).abs() < 1e-6);

        let usize_val: f32 = RicianFloat::usize_as(60);
        assert_eq!(usize_val, 60.0f32);
    }

    #[test]
    fn test_f64_trait_impl() {
        let val: f64 = RicianFloat::from_f64_c(1.0e-10);
        assert_eq!(val, 1.0e-10);

        let usize_val: f64 = RicianFloat::usize_as(216_000);
        assert_eq!(usize_val, 216_000.0f64);
    }
}
