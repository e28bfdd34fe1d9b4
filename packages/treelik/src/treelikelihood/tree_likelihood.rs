use crate::alphabet::alphabet::Alphabet;
use crate::constants::LOG_ZERO;
use crate::likelihood::config::{CoreConfig, Precision, Rescaling};
use crate::likelihood::likelihood_core::LikelihoodCore;
use crate::likelihood::operation::{ChildOperand, Operation};
use crate::likelihood::registry::{BackendPreference, BackendRegistry};
use crate::likelihood::slots::SlotIndex;
use crate::{make_error, make_report};
use crate::models::site_model::SiteModel;
use crate::models::substitution::SubstitutionModel;
use crate::patterns::site_patterns::SitePatterns;
use crate::tree::tree::Tree;
use eyre::{Report, WrapErr};
use itertools::Itertools;
use log::{debug, trace, warn};
use ndarray::{Array1, Array3};
use smart_default::SmartDefault;
use std::sync::Arc;

#[derive(Clone, Debug, SmartDefault)]
pub struct TreeLikelihoodParams {
  pub preference: BackendPreference,

  pub rescaling: Rescaling,

  pub precision: Precision,

  pub threads: Option<usize>,

  /// Represent unambiguous tips as compact states rather than partials
  #[default = true]
  pub use_tip_states: bool,

  /// Switch rescaling on when a calculation underflows with rescaling off, and calculate again
  #[default = true]
  pub dynamic_rescaling: bool,
}

#[derive(Clone, Debug)]
struct StoredModels {
  branch_lengths: Vec<f64>,
  model: Arc<dyn SubstitutionModel>,
  site_model: SiteModel,
  log_likelihood: Option<f64>,
  dirty: Vec<bool>,
}

/// Likelihood of an alignment on a tree under a substitution model.
///
/// Keeps track of which branches changed since the last calculation and recomputes only the transition matrices of
/// changed branches and the partials of their ancestors.
#[derive(Debug)]
pub struct TreeLikelihood {
  core: Box<dyn LikelihoodCore>,
  tree: Tree,
  model: Arc<dyn SubstitutionModel>,
  site_model: SiteModel,
  dynamic_rescaling: bool,

  /// Transition matrices of the branch above each node, in two slots for store/restore
  matrices: [Vec<Array3<f64>>; 2],
  matrix_slots: SlotIndex,
  dirty: Vec<bool>,

  log_likelihood: Option<f64>,
  stored: Option<StoredModels>,
}

impl TreeLikelihood {
  pub fn new(
    tree: Tree,
    patterns: &SitePatterns,
    alphabet: &Alphabet,
    model: Arc<dyn SubstitutionModel>,
    site_model: SiteModel,
    registry: &BackendRegistry,
    params: &TreeLikelihoodParams,
  ) -> Result<Self, Report> {
    if alphabet.n_states() != model.n_states() {
      return make_error!(
        "Alphabet '{}' has {} states, but substitution model {} has {}",
        alphabet.name(),
        alphabet.n_states(),
        model.name(),
        model.n_states()
      );
    }
    if tree.tip_count() != patterns.taxon_count() {
      return make_error!(
        "Tree has {} tips, but the alignment has {} sequences",
        tree.tip_count(),
        patterns.taxon_count()
      );
    }

    let config = CoreConfig::new(
      tree.node_count(),
      tree.tip_count(),
      patterns.pattern_count(),
      model.n_states(),
      site_model.category_count(),
    )
    .with_pattern_weights(patterns.weights().to_vec())
    .with_rescaling(params.rescaling)
    .with_precision(params.precision)
    .with_threads(params.threads);

    let mut core = registry.create_core(&config, params.preference)?;

    for (tip, name) in tree.tip_names().into_iter().enumerate() {
      let taxon = match name {
        Some(name) => patterns
          .taxon_index(name)
          .ok_or_else(|| make_report!("Tree tip '{name}' has no sequence in the alignment"))?,
        None => tip,
      };
      let chars = patterns.taxon_chars(taxon);
      if params.use_tip_states && !alphabet.has_partial_ambiguity(&chars) {
        core.set_tip_states(tip, &patterns.tip_states(alphabet, taxon)?)?;
      } else {
        core.set_tip_partials(tip, &patterns.tip_partials(alphabet, taxon)?)?;
      }
    }

    let (c, k) = (site_model.category_count(), model.n_states());
    let allocate = || vec![Array3::zeros((c, k, k)); tree.node_count()];
    let matrices = [allocate(), allocate()];
    let matrix_slots = SlotIndex::new(tree.node_count());
    let dirty = vec![true; tree.node_count()];

    Ok(Self {
      core,
      tree,
      model,
      site_model,
      dynamic_rescaling: params.dynamic_rescaling,
      matrices,
      matrix_slots,
      dirty,
      log_likelihood: None,
      stored: None,
    })
  }

  pub fn core(&self) -> &dyn LikelihoodCore {
    self.core.as_ref()
  }

  pub const fn tree(&self) -> &Tree {
    &self.tree
  }

  pub fn model(&self) -> &dyn SubstitutionModel {
    self.model.as_ref()
  }

  pub const fn site_model(&self) -> &SiteModel {
    &self.site_model
  }

  /// Log-likelihood of the last calculation, if it is still valid
  pub fn log_likelihood(&self) -> Option<f64> {
    self.log_likelihood
  }

  pub fn make_dirty(&mut self, node: usize) -> Result<(), Report> {
    if node >= self.dirty.len() {
      return make_error!("Node {node} is out of range");
    }
    self.dirty[node] = true;
    self.log_likelihood = None;
    Ok(())
  }

  pub fn make_all_dirty(&mut self) {
    self.dirty.fill(true);
    self.log_likelihood = None;
  }

  pub fn set_branch_length(&mut self, node: usize, branch_length: f64) -> Result<(), Report> {
    self.tree.set_branch_length(node, branch_length)?;
    self.make_dirty(node)
  }

  pub fn set_substitution_model(&mut self, model: Arc<dyn SubstitutionModel>) -> Result<(), Report> {
    if model.n_states() != self.core.config().state_count {
      return make_error!(
        "Substitution model {} has {} states, but the likelihood was set up for {}",
        model.name(),
        model.n_states(),
        self.core.config().state_count
      );
    }
    self.model = model;
    self.make_all_dirty();
    Ok(())
  }

  pub fn set_site_model(&mut self, site_model: SiteModel) -> Result<(), Report> {
    if site_model.category_count() != self.core.config().category_count {
      return make_error!(
        "Site model has {} rate categories, but the likelihood was set up for {}",
        site_model.category_count(),
        self.core.config().category_count
      );
    }
    self.site_model = site_model;
    self.make_all_dirty();
    Ok(())
  }

  pub fn calculate_log_likelihood(&mut self) -> Result<f64, Report> {
    if let Some(log_lh) = self.log_likelihood {
      return Ok(log_lh);
    }

    let mut log_lh = self.evaluate()?;
    if self.dynamic_rescaling && log_lh <= LOG_ZERO && !self.core.rescaling().is_enabled() {
      warn!("Likelihood underflowed without rescaling. Enabling rescaling and calculating again.");
      self.core.set_rescaling(Rescaling::threshold())?;
      self.make_all_dirty();
      log_lh = self.evaluate()?;
    }

    debug!("Log-likelihood: {log_lh}");
    self.log_likelihood = Some(log_lh);
    Ok(log_lh)
  }

  /// Per-pattern log-likelihoods of the current state
  pub fn site_log_likelihoods(&mut self) -> Result<Array1<f64>, Report> {
    self.calculate_log_likelihood()?;
    self.core.site_log_likelihoods(
      self.tree.root(),
      self.model.frequencies().view(),
      self.site_model.proportions().view(),
    )
  }

  fn evaluate(&mut self) -> Result<f64, Report> {
    let updated = self.update_matrices();
    let root = self.tree.root();

    // A node's partials change when the branch above any of its children, or anything below that, has changed
    let mut changed = vec![false; self.tree.node_count()];
    let mut operation_nodes = vec![];
    for node in self.tree.post_order() {
      changed[node] = updated[node];
      let children = self.tree.children(node);
      if !children.is_empty() && (children.iter().any(|&child| changed[child]) || !self.core.is_ready(node)?) {
        operation_nodes.push(node);
        changed[node] = true;
      }
    }

    let operations = operation_nodes
      .iter()
      .map(|&node| {
        let children = self
          .tree
          .children(node)
          .iter()
          .map(|&child| ChildOperand::new(child, self.matrices[self.matrix_slots.current(child)][child].view()))
          .collect_vec();
        Operation::new(node, children)
      })
      .collect_vec();

    trace!(
      "Updating {} transition matrices and {} partials",
      updated.iter().filter(|&&u| u).count(),
      operations.len()
    );

    self
      .core
      .update_partials_operations(&operations)
      .wrap_err("When updating partials")?;

    self.core.calculate_log_likelihood(
      root,
      self.model.frequencies().view(),
      self.site_model.proportions().view(),
    )
  }

  /// Recomputes transition matrices of dirty branches, clears the dirty flags and returns which nodes were updated
  fn update_matrices(&mut self) -> Vec<bool> {
    let root = self.tree.root();
    let rates = self.site_model.rates();
    let mut updated = vec![false; self.dirty.len()];
    for node in 0..self.dirty.len() {
      if !self.dirty[node] {
        continue;
      }
      updated[node] = true;
      self.dirty[node] = false;
      if node == root {
        continue;
      }
      let t = self.tree.branch_length(node);
      let (slot, _) = self.matrix_slots.begin_write(node);
      let target = &mut self.matrices[slot][node];
      for (mut category, &rate) in target.outer_iter_mut().zip(rates.iter()) {
        category.assign(&self.model.transition_matrix(rate * t));
      }
    }
    updated
  }

  pub fn store_state(&mut self) {
    self.core.store_state();
    self.matrix_slots.store();
    self.stored = Some(StoredModels {
      branch_lengths: (0..self.tree.node_count()).map(|node| self.tree.branch_length(node)).collect(),
      model: Arc::clone(&self.model),
      site_model: self.site_model.clone(),
      log_likelihood: self.log_likelihood,
      dirty: self.dirty.clone(),
    });
  }

  /// Reverts partials, transition matrices, branch lengths and models to the last `store_state`
  pub fn restore_state(&mut self) -> Result<(), Report> {
    let Some(stored) = self.stored.clone() else {
      return Ok(());
    };
    self.core.restore_state();
    self.matrix_slots.restore();
    for (node, &branch_length) in stored.branch_lengths.iter().enumerate() {
      self.tree.set_branch_length(node, branch_length)?;
    }
    self.model = stored.model;
    self.site_model = stored.site_model;
    self.log_likelihood = stored.log_likelihood;
    self.dirty = stored.dirty;
    Ok(())
  }

  pub fn accept_state(&mut self) {
    self.core.accept_state();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::alphabet::alphabet::AlphabetName;
  use crate::models::substitution::{JC69Params, Jc69};
  use crate::simulate::simulate::simulate;
  use crate::utils::random::get_random_number_generator;
  use approx::assert_abs_diff_eq;
  use indexmap::indexmap;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  fn two_taxa() -> (Tree, SitePatterns) {
    let tree = Tree::from_parents(&[Some(2), Some(2), None], &[0.1, 0.2, 0.0], 2).unwrap();
    let patterns = SitePatterns::from_alignment(&indexmap! {
      "taxon_0".to_owned() => "ACGTA".to_owned(),
      "taxon_1".to_owned() => "ACGTC".to_owned(),
    })
    .unwrap();
    (tree, patterns)
  }

  fn jc69() -> Arc<dyn SubstitutionModel> {
    Arc::new(Jc69::new(JC69Params::default()).unwrap())
  }

  fn likelihood(tree: Tree, patterns: &SitePatterns) -> TreeLikelihood {
    TreeLikelihood::new(
      tree,
      patterns,
      &Alphabet::new(AlphabetName::Nuc),
      jc69(),
      SiteModel::single(),
      &BackendRegistry::default(),
      &TreeLikelihoodParams::default(),
    )
    .unwrap()
  }

  #[rstest]
  fn two_taxa_closed_form() {
    let (tree, patterns) = two_taxa();
    let mut lh = likelihood(tree, &patterns);
    // Tips without names are matched to sequences by position
    let e = (-4.0 * 0.3 / 3.0_f64).exp();
    let same = 0.25 * (0.25 + 0.75 * e);
    let different = 0.25 * (0.25 - 0.25 * e);
    let expected = 4.0 * same.ln() + different.ln();
    assert_abs_diff_eq!(lh.calculate_log_likelihood().unwrap(), expected, epsilon = 1e-12);
  }

  #[rstest]
  fn branch_change_is_picked_up_and_restored() {
    let (tree, patterns) = two_taxa();
    let mut lh = likelihood(tree, &patterns);
    let before = lh.calculate_log_likelihood().unwrap();
    lh.store_state();

    lh.set_branch_length(0, 0.5).unwrap();
    let after = lh.calculate_log_likelihood().unwrap();
    assert!(after < before);

    lh.restore_state().unwrap();
    assert_eq!(lh.log_likelihood(), Some(before));
    lh.make_all_dirty();
    assert_eq!(lh.calculate_log_likelihood().unwrap(), before);
  }

  #[rstest]
  fn dynamic_rescaling_rescues_underflow() {
    assert!(!TreeLikelihoodParams::default().rescaling.is_enabled());
    let mut rng = get_random_number_generator(Some(11));
    let tree = Tree::random(600, 2.0, &mut rng).unwrap();
    let model = jc69();
    let alignment = simulate(&tree, model.as_ref(), &SiteModel::single(), 20, &Alphabet::default(), &mut rng).unwrap();
    let patterns = SitePatterns::from_alignment(&alignment).unwrap();

    let mut lh = likelihood(tree, &patterns);
    let log_lh = lh.calculate_log_likelihood().unwrap();
    assert!(log_lh.is_finite() && log_lh > LOG_ZERO);
    assert!(lh.core().rescaling().is_enabled());
  }

  #[rstest]
  fn mismatched_tip_count_is_rejected() {
    let tree = Tree::from_parents(&[Some(3), Some(3), Some(3), None], &[0.1; 4], 3).unwrap();
    let (_, patterns) = two_taxa();
    let result = TreeLikelihood::new(
      tree,
      &patterns,
      &Alphabet::default(),
      jc69(),
      SiteModel::single(),
      &BackendRegistry::default(),
      &TreeLikelihoodParams::default(),
    );
    assert!(result.is_err());
  }
}
