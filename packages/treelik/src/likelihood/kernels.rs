//! Pruning arithmetic.
//!
//! Partials of a node are laid out as `(category, pattern, state)`. For a child with transition matrices `M_c`
//! (row-stochastic, `M_c[k][j] = P(j | k)`) the contribution to the parent is
//!
//! ```text
//!   contribution[c][s][k] = Σ_j M_c[k][j] * child[c][s][j]
//! ```
//!
//! which, for the whole pattern block of a category, is the matrix product `child_c · M_cᵀ`. The parent partials are
//! the element-wise product of the contributions of all children, in any order.

use crate::constants::LOG_ZERO;
use crate::likelihood::config::Rescaling;
use crate::likelihood::real::PartialsReal;
use ndarray::linalg::general_mat_mul;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, ArrayViewMut2, Axis, Zip};

/// What a child node contributes to the pruning step: either compact tip states or full partials
#[derive(Clone, Debug)]
pub enum ChildData<'a, T> {
  /// One state per pattern. A state outside `0..state_count` is fully ambiguous (all-ones partial).
  States(&'a [usize]),
  Partials(ArrayView3<'a, T>),
}

/// Applies one child to the partials of one category, either overwriting `out` (first child) or multiplying into it.
fn apply_child<T: PartialsReal>(
  child: &ChildData<'_, T>,
  category: usize,
  matrix: ArrayView2<'_, T>,
  mut out: ArrayViewMut2<'_, T>,
  first: bool,
  scratch: &mut Array2<T>,
) {
  let state_count = matrix.nrows();
  match child {
    ChildData::States(states) => {
      let ambiguous = matrix.sum_axis(Axis(1));
      for (mut row, &state) in out.outer_iter_mut().zip(states.iter()) {
        let contribution = if state < state_count {
          matrix.column(state)
        } else {
          ambiguous.view()
        };
        if first {
          row.assign(&contribution);
        } else {
          row *= &contribution;
        }
      }
    }
    ChildData::Partials(partials) => {
      let child = partials.index_axis(Axis(0), category);
      if first {
        general_mat_mul(T::one(), &child, &matrix.t(), T::zero(), &mut out);
      } else {
        general_mat_mul(T::one(), &child, &matrix.t(), T::zero(), scratch);
        out *= &scratch.view();
      }
    }
  }
}

/// Computes the partials of a node from its children.
///
/// `children` pairs each child with its per-category transition matrices, shaped `(category, state, state)`.
/// Two children is the ordinary binary case; more children (polytomy) are folded in pairwise.
pub fn compute_partials<T: PartialsReal>(
  children: &[(ChildData<'_, T>, ArrayView3<'_, T>)],
  out: &mut Array3<T>,
  parallel: bool,
) {
  let (_, pattern_count, state_count) = out.dim();
  let needs_scratch = children.len() > 1;

  let body = |(category, mut out_c): (usize, ArrayViewMut2<'_, T>)| {
    let mut scratch = if needs_scratch {
      Array2::zeros((pattern_count, state_count))
    } else {
      Array2::zeros((0, 0))
    };
    for (i, (child, matrices)) in children.iter().enumerate() {
      apply_child(
        child,
        category,
        matrices.index_axis(Axis(0), category),
        out_c.view_mut(),
        i == 0,
        &mut scratch,
      );
    }
  };

  if parallel {
    out.axis_iter_mut(Axis(0)).into_par_iter().enumerate().for_each(body);
  } else {
    out.axis_iter_mut(Axis(0)).enumerate().for_each(body);
  }
}

/// Normalizes the partials of one node per pattern according to the rescaling policy and records `ln(max)` of each
/// normalized pattern in `factors`. Factors of patterns left alone are set to exactly zero, so the factors of a node are
/// always derived afresh from its current values.
pub fn rescale_partials<T: PartialsReal>(
  partials: &mut Array3<T>,
  factors: &mut Array1<f64>,
  rescaling: Rescaling,
  parallel: bool,
) {
  let threshold = match rescaling {
    Rescaling::Never => {
      factors.fill(0.0);
      return;
    }
    Rescaling::Always => f64::INFINITY,
    Rescaling::Threshold { threshold } => threshold.max(T::MIN_SCALING_THRESHOLD),
  };

  let scale = |mut block: ArrayViewMut2<'_, T>, factor: &mut f64| {
    let max = block.fold(T::zero(), |acc, &x| if x > acc { x } else { acc });
    let max_wide = max.widen();
    if max_wide > 0.0 && max_wide.is_finite() && max_wide < threshold {
      block.mapv_inplace(|x| x / max);
      *factor = max_wide.ln();
    } else {
      *factor = 0.0;
    }
  };

  let zip = Zip::from(partials.axis_iter_mut(Axis(1))).and(factors);
  if parallel {
    zip.par_for_each(scale);
  } else {
    zip.for_each(scale);
  }
}

/// Expands compact tip states into a `(pattern, state)` partials block
pub fn states_to_partials(states: &[usize], state_count: usize) -> Array2<f64> {
  let mut partials = Array2::zeros((states.len(), state_count));
  for (mut row, &state) in partials.outer_iter_mut().zip(states.iter()) {
    if state < state_count {
      row[state] = 1.0;
    } else {
      row.fill(1.0);
    }
  }
  partials
}

/// Category-weighted sum of a node's partials: `out[s][k] = Σ_c w_c * partials[c][s][k]`
pub fn integrate_partials<T: PartialsReal>(child: &ChildData<'_, T>, category_weights: ArrayView1<'_, f64>, state_count: usize) -> Array2<f64> {
  match child {
    ChildData::States(states) => {
      let total: f64 = category_weights.sum();
      states_to_partials(states, state_count) * total
    }
    ChildData::Partials(partials) => {
      let (_, pattern_count, state_count) = partials.dim();
      let mut out = Array2::<f64>::zeros((pattern_count, state_count));
      for (block, &w) in partials.outer_iter().zip(category_weights.iter()) {
        Zip::from(&mut out).and(&block).for_each(|o, &p| *o += w * p.widen());
      }
      out
    }
  }
}

/// Per-pattern likelihood at the root, before scaling corrections:
/// `L[s] = Σ_c w_c Σ_k π_k * partials[c][s][k]`
pub fn root_site_likelihoods<T: PartialsReal>(
  root: &ChildData<'_, T>,
  frequencies: ArrayView1<'_, f64>,
  category_weights: ArrayView1<'_, f64>,
) -> Array1<f64> {
  let integrated = integrate_partials(root, category_weights, frequencies.len());
  integrated.dot(&frequencies)
}

/// Converts a site likelihood and its accumulated log-scaling correction into a log-likelihood, mapping an underflow
/// to exactly zero (or a malformed value) onto the finite `LOG_ZERO` sentinel.
#[inline]
pub fn site_log_likelihood(likelihood: f64, log_scaling: f64) -> f64 {
  if likelihood > 0.0 && likelihood.is_finite() {
    likelihood.ln() + log_scaling
  } else {
    LOG_ZERO
  }
}
