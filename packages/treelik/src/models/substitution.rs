#![allow(non_snake_case)]

use crate::constants::STOCHASTIC_TOLERANCE;
use crate::make_error;
use eyre::Report;
use ndarray::{Array1, Array2};
use smart_default::SmartDefault;
use std::fmt::Debug;

/// Continuous-time Markov model of character substitution.
///
/// Rates are normalized so that branch lengths are measured in expected substitutions per site.
pub trait SubstitutionModel: Send + Sync + Debug {
  fn name(&self) -> &str;

  fn n_states(&self) -> usize;

  /// Equilibrium frequencies, used as root frequencies
  fn frequencies(&self) -> &Array1<f64>;

  /// Row-stochastic transition matrix for a branch of length `t`: `P[i][j]` is the probability of ending in state `j`
  /// when starting in state `i`.
  fn transition_matrix(&self, t: f64) -> Array2<f64>;
}

fn check_frequencies(pi: &Array1<f64>, n_states: usize) -> Result<Array1<f64>, Report> {
  if pi.len() != n_states {
    return make_error!("Expected {n_states} equilibrium frequencies, but got {}", pi.len());
  }
  if pi.iter().any(|&p| !(p > 0.0 && p.is_finite())) {
    return make_error!("Equilibrium frequencies must be positive, but got {pi}");
  }
  let total = pi.sum();
  if (total - 1.0).abs() > STOCHASTIC_TOLERANCE {
    return make_error!("Equilibrium frequencies must sum to 1, but they sum to {total}");
  }
  Ok(pi / total)
}

/// Felsenstein 1981 model: substitution rate into a state proportional to its equilibrium frequency.
///
/// See: Felsenstein (1981), J. Mol. Evol. 17 (6): 368–376. doi:10.1007/BF01734359
#[derive(Clone, Debug)]
pub struct F81 {
  pi: Array1<f64>,
  beta: f64,
}

impl F81 {
  pub fn new(pi: &Array1<f64>) -> Result<Self, Report> {
    let pi = check_frequencies(pi, pi.len())?;
    if pi.len() < 2 {
      return make_error!("A substitution model needs at least 2 states, but got {}", pi.len());
    }
    let beta = 1.0 / (1.0 - pi.mapv(|p| p * p).sum());
    Ok(Self { pi, beta })
  }
}

impl SubstitutionModel for F81 {
  fn name(&self) -> &str {
    "F81"
  }

  fn n_states(&self) -> usize {
    self.pi.len()
  }

  fn frequencies(&self) -> &Array1<f64> {
    &self.pi
  }

  fn transition_matrix(&self, t: f64) -> Array2<f64> {
    let e = (-self.beta * t).exp();
    let n = self.n_states();
    Array2::from_shape_fn((n, n), |(i, j)| {
      let delta = if i == j { 1.0 } else { 0.0 };
      self.pi[j] + (delta - self.pi[j]) * e
    })
  }
}

#[derive(Copy, Clone, Debug, SmartDefault)]
pub struct JC69Params {
  #[default = 4]
  pub n_states: usize,
}

/// Jukes-Cantor 1969 model: equal frequencies and equal rates between all states.
///
/// See: Jukes and Cantor (1969). Evolution of Protein Molecules. New York: Academic Press. pp. 21–132
#[derive(Clone, Debug)]
pub struct Jc69 {
  inner: F81,
}

impl Jc69 {
  pub fn new(JC69Params { n_states }: JC69Params) -> Result<Self, Report> {
    if n_states < 2 {
      return make_error!("A substitution model needs at least 2 states, but got {n_states}");
    }
    let pi = Array1::from_elem(n_states, 1.0 / n_states as f64);
    Ok(Self { inner: F81::new(&pi)? })
  }
}

impl SubstitutionModel for Jc69 {
  fn name(&self) -> &str {
    "JC69"
  }

  fn n_states(&self) -> usize {
    self.inner.n_states()
  }

  fn frequencies(&self) -> &Array1<f64> {
    self.inner.frequencies()
  }

  fn transition_matrix(&self, t: f64) -> Array2<f64> {
    self.inner.transition_matrix(t)
  }
}

#[derive(Clone, Debug, SmartDefault)]
pub struct HKY85Params {
  /// Ratio of transition to transversion rates
  #[default = 2.0]
  pub kappa: f64,

  /// Frequencies of A, C, G, T
  #[default(Array1::from_elem(4, 0.25))]
  pub pi: Array1<f64>,
}

/// Hasegawa-Kishino-Yano 1985 model: F81 frequencies with separate rates for transitions (A<->G, C<->T) and
/// transversions. Nucleotides only, in the order A, C, G, T.
///
/// See: Hasegawa, Kishino, Yano (1985), J. Mol. Evol. 22 (2): 160–174. doi:10.1007/BF02101694
#[derive(Clone, Debug)]
pub struct Hky85 {
  kappa: f64,
  pi: Array1<f64>,
  beta: f64,
  /// Total frequency of the nucleotide class (purines or pyrimidines) of each state
  class_pi: Array1<f64>,
}

impl Hky85 {
  const PURINES: [usize; 2] = [0, 2];

  pub fn new(HKY85Params { kappa, pi }: &HKY85Params) -> Result<Self, Report> {
    if !(*kappa > 0.0 && kappa.is_finite()) {
      return make_error!("HKY85: kappa must be positive, but got {kappa}");
    }
    let pi = check_frequencies(pi, 4)?;
    let pi_R = pi[0] + pi[2];
    let pi_Y = pi[1] + pi[3];
    let beta = 1.0 / (2.0 * (pi_R * pi_Y + kappa * (pi[0] * pi[2] + pi[1] * pi[3])));
    let class_pi = Array1::from_shape_fn(4, |i| if Self::is_purine(i) { pi_R } else { pi_Y });
    Ok(Self {
      kappa: *kappa,
      pi,
      beta,
      class_pi,
    })
  }

  fn is_purine(state: usize) -> bool {
    Self::PURINES.contains(&state)
  }

  pub const fn kappa(&self) -> f64 {
    self.kappa
  }
}

impl SubstitutionModel for Hky85 {
  fn name(&self) -> &str {
    "HKY85"
  }

  fn n_states(&self) -> usize {
    4
  }

  fn frequencies(&self) -> &Array1<f64> {
    &self.pi
  }

  fn transition_matrix(&self, t: f64) -> Array2<f64> {
    let bt = self.beta * t;
    let e1 = (-bt).exp();
    Array2::from_shape_fn((4, 4), |(i, j)| {
      let pi_j = self.pi[j];
      if Self::is_purine(i) != Self::is_purine(j) {
        return pi_j * (1.0 - e1);
      }
      let class = self.class_pi[j];
      let e2 = (-bt * (1.0 + class * (self.kappa - 1.0))).exp();
      let shared = pi_j + pi_j * (1.0 / class - 1.0) * e1;
      if i == j {
        shared + (class - pi_j) / class * e2
      } else {
        shared - pi_j / class * e2
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pretty_assert_abs_diff_eq;
  use ndarray::{array, Axis};
  use rstest::rstest;

  fn models() -> Vec<Box<dyn SubstitutionModel>> {
    vec![
      Box::new(Jc69::new(JC69Params::default()).unwrap()),
      Box::new(Jc69::new(JC69Params { n_states: 20 }).unwrap()),
      Box::new(F81::new(&array![0.1, 0.2, 0.3, 0.4]).unwrap()),
      Box::new(
        Hky85::new(&HKY85Params {
          kappa: 4.0,
          pi: array![0.1, 0.2, 0.3, 0.4],
        })
        .unwrap(),
      ),
    ]
  }

  #[rstest]
  fn rows_sum_to_one() {
    for model in models() {
      for t in [0.0, 0.01, 0.3, 2.0] {
        let p = model.transition_matrix(t);
        let n = model.n_states();
        pretty_assert_abs_diff_eq!(p.sum_axis(Axis(1)), Array1::<f64>::ones(n), epsilon = 1e-12);
        assert!(p.iter().all(|&x| x >= 0.0), "{} has negative probabilities at t={t}", model.name());
      }
    }
  }

  #[rstest]
  fn zero_length_is_identity() {
    for model in models() {
      let n = model.n_states();
      pretty_assert_abs_diff_eq!(model.transition_matrix(0.0), Array2::<f64>::eye(n), epsilon = 1e-12);
    }
  }

  #[rstest]
  fn long_branches_reach_equilibrium() {
    for model in models() {
      let p = model.transition_matrix(500.0);
      for row in p.outer_iter() {
        pretty_assert_abs_diff_eq!(row.to_owned(), model.frequencies().clone(), epsilon = 1e-9);
      }
    }
  }

  #[rstest]
  fn unit_mean_rate() {
    // Expected number of substitutions over a short branch equals its length
    let t = 1e-6;
    for model in models() {
      let p = model.transition_matrix(t);
      let changes: f64 = (0..model.n_states()).map(|i| model.frequencies()[i] * (1.0 - p[[i, i]])).sum();
      approx::assert_abs_diff_eq!(changes / t, 1.0, epsilon = 1e-5);
    }
  }

  #[rstest]
  fn hky_with_unit_kappa_is_f81() {
    let pi = array![0.1, 0.2, 0.3, 0.4];
    let hky = Hky85::new(&HKY85Params { kappa: 1.0, pi: pi.clone() }).unwrap();
    let f81 = F81::new(&pi).unwrap();
    pretty_assert_abs_diff_eq!(hky.transition_matrix(0.2), f81.transition_matrix(0.2), epsilon = 1e-14);
  }

  #[rstest]
  fn jc69_closed_form() {
    let p = Jc69::new(JC69Params::default()).unwrap().transition_matrix(0.1);
    let e = (-4.0 * 0.1 / 3.0_f64).exp();
    approx::assert_abs_diff_eq!(p[[0, 0]], 0.25 + 0.75 * e, epsilon = 1e-15);
    approx::assert_abs_diff_eq!(p[[0, 1]], 0.25 - 0.25 * e, epsilon = 1e-15);
  }

  #[rstest]
  fn bad_frequencies_are_rejected() {
    assert!(F81::new(&array![0.5, 0.6]).is_err());
    assert!(F81::new(&array![1.0, 0.0]).is_err());
    assert!(Hky85::new(&HKY85Params {
      kappa: 2.0,
      pi: array![0.5, 0.5],
    })
    .is_err());
  }
}
