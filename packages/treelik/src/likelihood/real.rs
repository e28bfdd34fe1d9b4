use crate::constants::SINGLE_PRECISION_SCALING_THRESHOLD;
use ndarray::LinalgScalar;
use num_traits::Float;
use std::fmt::{Debug, Display};
use std::ops::MulAssign;

/// Floating-point type in which a backend stores partials.
///
/// Transition matrices, frequencies and weights always arrive as `f64` and the log-likelihood reduction is carried
/// out in `f64`, so only partials and the pruning products use the storage precision.
pub trait PartialsReal: LinalgScalar + Float + MulAssign + Send + Sync + Debug + Display + 'static {
  const NAME: &'static str;

  /// Lower bound applied to the rescaling threshold, so that values representable in `f64` but not in this type are
  /// still caught before they flush to zero.
  const MIN_SCALING_THRESHOLD: f64;

  fn narrow(x: f64) -> Self;

  fn widen(self) -> f64;
}

impl PartialsReal for f64 {
  const NAME: &'static str = "f64";
  const MIN_SCALING_THRESHOLD: f64 = 0.0;

  #[inline]
  fn narrow(x: f64) -> Self {
    x
  }

  #[inline]
  fn widen(self) -> f64 {
    self
  }
}

impl PartialsReal for f32 {
  const NAME: &'static str = "f32";
  const MIN_SCALING_THRESHOLD: f64 = SINGLE_PRECISION_SCALING_THRESHOLD;

  #[inline]
  #[allow(clippy::cast_possible_truncation)]
  fn narrow(x: f64) -> Self {
    x as f32
  }

  #[inline]
  fn widen(self) -> f64 {
    f64::from(self)
  }
}
