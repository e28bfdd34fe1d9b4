use crate::make_error;
use eyre::{Report, WrapErr};
use ndarray::Array1;
use statrs::distribution::{ContinuousCDF, Gamma};

/// Rate heterogeneity across sites: each site evolves at one of several relative rates, with given probabilities.
/// Rates average to one under the category proportions.
#[derive(Clone, Debug)]
pub struct SiteModel {
  rates: Array1<f64>,
  proportions: Array1<f64>,
}

impl SiteModel {
  /// All sites evolve at the same rate
  pub fn single() -> Self {
    Self {
      rates: Array1::ones(1),
      proportions: Array1::ones(1),
    }
  }

  /// Discrete gamma model with equally probable categories, each represented by the median of its quantile range.
  ///
  /// See: Yang (1994), J. Mol. Evol. 39 (3): 306–314. doi:10.1007/BF00160154
  pub fn gamma(shape: f64, category_count: usize) -> Result<Self, Report> {
    if category_count == 0 {
      return make_error!("Gamma site model needs at least one category");
    }
    if !(shape > 0.0 && shape.is_finite()) {
      return make_error!("Gamma shape must be positive, but got {shape}");
    }
    if category_count == 1 {
      return Ok(Self::single());
    }

    let gamma = Gamma::new(shape, shape).wrap_err("When creating gamma distribution of site rates")?;
    let n = category_count as f64;
    let mut rates = Array1::from_shape_fn(category_count, |i| gamma.inverse_cdf((2.0 * i as f64 + 1.0) / (2.0 * n)));
    let mean = rates.mean().unwrap_or(1.0);
    if !(mean > 0.0 && mean.is_finite()) {
      return make_error!("Gamma site rates with shape {shape} degenerate: mean rate is {mean}");
    }
    rates /= mean;

    Ok(Self {
      rates,
      proportions: Array1::from_elem(category_count, 1.0 / n),
    })
  }

  /// Adds a category of invariant sites (rate zero) with the given probability, rescaling the other rates so that the
  /// mean rate stays one.
  pub fn with_proportion_invariant(self, proportion: f64) -> Result<Self, Report> {
    if !(0.0..1.0).contains(&proportion) {
      return make_error!("Proportion of invariant sites must be in [0, 1), but got {proportion}");
    }
    if proportion == 0.0 {
      return Ok(self);
    }
    let variable = 1.0 - proportion;
    let rates = self.rates.iter().map(|r| r / variable).chain([0.0]).collect();
    let proportions = self.proportions.iter().map(|p| p * variable).chain([proportion]).collect();
    Ok(Self { rates, proportions })
  }

  #[inline]
  pub fn category_count(&self) -> usize {
    self.rates.len()
  }

  pub fn rates(&self) -> &Array1<f64> {
    &self.rates
  }

  pub fn proportions(&self) -> &Array1<f64> {
    &self.proportions
  }
}

impl Default for SiteModel {
  fn default() -> Self {
    Self::single()
  }
}
