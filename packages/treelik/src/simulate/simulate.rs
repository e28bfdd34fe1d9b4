use crate::alphabet::alphabet::Alphabet;
use crate::make_error;
use crate::models::site_model::SiteModel;
use crate::models::substitution::SubstitutionModel;
use crate::tree::tree::Tree;
use crate::utils::random::weighted_index;
use eyre::Report;
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::Array2;
use rand::distributions::WeightedIndex;
use rand::Rng;

/// Evolves random sequences down the tree and returns the tip sequences, keyed by tip name.
///
/// Root states are drawn from the equilibrium frequencies and every site draws its rate category from the site
/// model. Tips without a name are called `taxon_<index>`.
pub fn simulate(
  tree: &Tree,
  model: &dyn SubstitutionModel,
  site_model: &SiteModel,
  sequence_length: usize,
  alphabet: &Alphabet,
  rng: &mut impl Rng,
) -> Result<IndexMap<String, String>, Report> {
  let n_states = model.n_states();
  if alphabet.n_states() != n_states {
    return make_error!(
      "Alphabet '{}' has {} states, but substitution model {} has {}",
      alphabet.name(),
      alphabet.n_states(),
      model.name(),
      n_states
    );
  }

  let rates = site_model.rates();
  let category_sampler = weighted_index(&site_model.proportions().to_vec())?;
  let categories = (0..sequence_length)
    .map(|_| rng.sample(&category_sampler))
    .collect_vec();

  // Samplers of the child state for every branch, category and parent state
  let samplers: Vec<Array2<WeightedIndex<f64>>> = (0..tree.node_count())
    .map(|node| {
      let t = tree.branch_length(node);
      let mut rows = Vec::with_capacity(rates.len() * n_states);
      for &rate in rates {
        let m = model.transition_matrix(rate * t);
        for row in m.outer_iter() {
          rows.push(weighted_index(&row.mapv(|p| p.max(0.0)).to_vec())?);
        }
      }
      Ok(Array2::from_shape_vec((rates.len(), n_states), rows)?)
    })
    .collect::<Result<_, Report>>()?;

  let root_sampler = weighted_index(&model.frequencies().to_vec())?;
  let mut states = Array2::<usize>::zeros((tree.node_count(), sequence_length));
  let root = tree.root();
  for site in 0..sequence_length {
    states[[root, site]] = rng.sample(&root_sampler);
  }

  // Parents before children
  for node in tree.post_order().into_iter().rev() {
    let Some(parent) = tree.parent(node) else { continue };
    for site in 0..sequence_length {
      let from = states[[parent, site]];
      states[[node, site]] = rng.sample(&samplers[node][[categories[site], from]]);
    }
  }

  let names = tree.tip_names();
  (0..tree.tip_count())
    .map(|tip| {
      let name = names[tip].map_or_else(|| format!("taxon_{tip}"), ToOwned::to_owned);
      let seq = states
        .row(tip)
        .iter()
        .map(|&state| alphabet.char(state))
        .collect::<Option<String>>();
      match seq {
        Some(seq) => Ok((name, seq)),
        None => make_error!("Simulated state of tip '{name}' has no character in the alphabet"),
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::substitution::{JC69Params, Jc69};
  use crate::utils::random::get_random_number_generator;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  #[rstest]
  fn zero_length_branches_copy_the_root() {
    let tree = Tree::from_parents(&[Some(2), Some(2), None], &[0.0, 0.0, 0.0], 2).unwrap();
    let model = Jc69::new(JC69Params::default()).unwrap();
    let mut rng = get_random_number_generator(Some(5));
    let alignment = simulate(&tree, &model, &SiteModel::single(), 50, &Alphabet::default(), &mut rng).unwrap();
    assert_eq!(alignment.keys().collect_vec(), vec!["taxon_0", "taxon_1"]);
    assert_eq!(alignment["taxon_0"], alignment["taxon_1"]);
    assert_eq!(alignment["taxon_0"].len(), 50);
  }

  #[rstest]
  fn seeded_simulation_is_reproducible() {
    let mut rng = get_random_number_generator(Some(9));
    let tree = Tree::random(8, 0.1, &mut rng).unwrap();
    let model = Jc69::new(JC69Params::default()).unwrap();
    let site_model = SiteModel::gamma(0.5, 4).unwrap();
    let a = simulate(&tree, &model, &site_model, 30, &Alphabet::default(), &mut get_random_number_generator(Some(1))).unwrap();
    let b = simulate(&tree, &model, &site_model, 30, &Alphabet::default(), &mut get_random_number_generator(Some(1))).unwrap();
    assert_eq!(a, b);
  }
}
