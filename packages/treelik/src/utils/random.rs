use crate::{make_error, make_internal_report};
use eyre::{Report, WrapErr};
use rand::distributions::WeightedIndex;
use rand::{seq::IteratorRandom, Rng, SeedableRng};
use rand_isaac::Isaac64Rng;
use statrs::distribution::Exp;

pub fn get_random_number_generator(seed: Option<u64>) -> (impl Rng + Send + Sync + Clone) {
  match seed {
    None => Isaac64Rng::from_entropy(),
    Some(seed) => Isaac64Rng::seed_from_u64(seed),
  }
}

pub fn random_choice_maybe<T>(iter: impl IntoIterator<Item = T>, rng: &mut impl Rng) -> Option<T> {
  iter.into_iter().choose(rng)
}

pub fn random_choice<T>(iter: impl IntoIterator<Item = T>, rng: &mut impl Rng) -> Result<T, Report> {
  random_choice_maybe(iter, rng)
    .ok_or_else(|| make_internal_report!("random_choice: expected at least one item, but none found"))
}

pub fn random_remove<T>(v: &mut Vec<T>, rng: &mut impl Rng) -> T {
  let index: usize = rng.gen_range(0..v.len());
  v.swap_remove(index)
}

/// Exponential distribution with the given mean
pub fn exponential(mean: f64) -> Result<Exp, Report> {
  if !(mean > 0.0 && mean.is_finite()) {
    return make_error!("Mean of an exponential distribution must be positive and finite, but got {mean}");
  }
  Exp::new(1.0 / mean).wrap_err_with(|| format!("When creating exponential distribution with mean {mean}"))
}

/// Sampler of indices with probability proportional to the given weights
pub fn weighted_index(weights: &[f64]) -> Result<WeightedIndex<f64>, Report> {
  WeightedIndex::new(weights).wrap_err_with(|| format!("When creating weighted index sampler from {weights:?}"))
}
