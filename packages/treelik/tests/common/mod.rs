#![allow(dead_code)]

use lazy_static::lazy_static;
use ndarray::{array, Array3};
use treelik::alphabet::alphabet::Alphabet;
use treelik::likelihood::likelihood_core::LikelihoodCore;
use treelik::likelihood::operation::{ChildOperand, Operation};
use treelik::models::site_model::SiteModel;
use treelik::models::substitution::{HKY85Params, Hky85, SubstitutionModel};
use treelik::patterns::site_patterns::SitePatterns;
use treelik::simulate::simulate::simulate;
use treelik::tree::tree::Tree;
use treelik::utils::random::get_random_number_generator;

/// Simulated alignment on a random tree, shared by the integration tests
pub struct Reference {
  pub tree: Tree,
  pub patterns: SitePatterns,
  pub alphabet: Alphabet,
  pub model: Hky85,
  pub site_model: SiteModel,
  /// Transition matrices of the branch above every node, `(category, state, state)`
  pub matrices: Vec<Array3<f64>>,
}

impl Reference {
  pub fn new(tip_count: usize, site_count: usize, seed: u64) -> Self {
    let mut rng = get_random_number_generator(Some(seed));
    let tree = Tree::random(tip_count, 0.08, &mut rng).unwrap();
    let model = Hky85::new(&HKY85Params {
      kappa: 3.0,
      pi: array![0.3, 0.2, 0.2, 0.3],
    })
    .unwrap();
    let site_model = SiteModel::gamma(0.7, 4).unwrap();
    let alphabet = Alphabet::default();
    let alignment = simulate(&tree, &model, &site_model, site_count, &alphabet, &mut rng).unwrap();
    let patterns = SitePatterns::from_alignment(&alignment).unwrap();
    let matrices = (0..tree.node_count())
      .map(|node| matrices_for_branch(&model, &site_model, tree.branch_length(node)))
      .collect();
    Self {
      tree,
      patterns,
      alphabet,
      model,
      site_model,
      matrices,
    }
  }

  /// Tips in the order of the tree, matched to sequences by name
  pub fn set_tips(&self, core: &mut dyn LikelihoodCore) {
    for (tip, name) in self.tree.tip_names().into_iter().enumerate() {
      let taxon = self.patterns.taxon_index(name.unwrap()).unwrap();
      core
        .set_tip_states(tip, &self.patterns.tip_states(&self.alphabet, taxon).unwrap())
        .unwrap();
    }
  }

  pub fn operations(&self) -> Vec<Operation<'_>> {
    self
      .tree
      .internal_post_order()
      .into_iter()
      .map(|node| {
        let children = self
          .tree
          .children(node)
          .iter()
          .map(|&child| ChildOperand::new(child, self.matrices[child].view()))
          .collect();
        Operation::new(node, children)
      })
      .collect()
  }

  pub fn log_likelihood(&self, core: &dyn LikelihoodCore) -> f64 {
    core
      .calculate_log_likelihood(
        self.tree.root(),
        self.model.frequencies().view(),
        self.site_model.proportions().view(),
      )
      .unwrap()
  }

  /// Sets up the tips, runs a full post-order pass and returns the log-likelihood
  pub fn evaluate(&self, core: &mut dyn LikelihoodCore) -> f64 {
    self.set_tips(core);
    core.update_partials_operations(&self.operations()).unwrap();
    self.log_likelihood(core)
  }
}

pub fn matrices_for_branch(model: &dyn SubstitutionModel, site_model: &SiteModel, t: f64) -> Array3<f64> {
  let n = model.n_states();
  let mut m = Array3::zeros((site_model.category_count(), n, n));
  for (mut category, &rate) in m.outer_iter_mut().zip(site_model.rates().iter()) {
    category.assign(&model.transition_matrix(rate * t));
  }
  m
}

lazy_static! {
  pub static ref SMALL: Reference = Reference::new(12, 150, 17);
  pub static ref LARGE: Reference = Reference::new(40, 2000, 23);
}
