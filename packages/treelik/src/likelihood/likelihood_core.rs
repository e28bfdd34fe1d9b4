use crate::constants::LOG_ZERO;
use crate::likelihood::config::{CoreConfig, Rescaling};
use crate::likelihood::operation::Operation;
use clap::ValueEnum;
use eyre::Report;
use log::warn;
use ndarray::{Array1, Array2, ArrayView1, ArrayView3};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use strum_macros::Display;

/// Computation strategies a likelihood core can be built with
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
  /// Double precision, operations and categories spread over a rayon thread pool
  Threaded,

  /// Single-precision partials, serial
  SinglePrecision,

  /// Double precision, serial. Always available.
  Scalar,
}

/// Partials engine of Felsenstein's pruning algorithm.
///
/// A core owns the partial likelihoods of every node, one `(pattern, state)` block per rate category, together with
/// per-pattern log-scaling factors. Node partials are computed bottom-up from the children's partials and the
/// transition matrices along the child branches; the root partials are then reduced to a log-likelihood. The whole
/// state can be checkpointed with `store_state` and brought back with `restore_state`.
///
/// All backends compute the same quantities and differ only in precision and scheduling.
pub trait LikelihoodCore: Send + Sync + Debug {
  fn kind(&self) -> BackendKind;

  fn config(&self) -> &CoreConfig;

  fn rescaling(&self) -> Rescaling {
    self.config().rescaling
  }

  /// Changes the rescaling policy for subsequent updates. Already computed nodes keep their factors, which stay
  /// consistent with their stored values.
  fn set_rescaling(&mut self, rescaling: Rescaling) -> Result<(), Report>;

  /// Sets the partials of one rate category of a node from a `pattern × state` row-major array
  fn set_node_partials(&mut self, node: usize, category: usize, partials: &[f64]) -> Result<(), Report>;

  /// Sets the partials of a tip. Accepts either one `pattern × state` array, replicated over all categories, or a full
  /// `category × pattern × state` array.
  fn set_tip_partials(&mut self, node: usize, partials: &[f64]) -> Result<(), Report>;

  /// Sets a tip from observed states, one per pattern. A state outside `0..state_count` means fully ambiguous.
  fn set_tip_states(&mut self, node: usize, states: &[usize]) -> Result<(), Report>;

  /// Current partials of one category of a node, as `pattern × state`
  fn partials(&self, node: usize, category: usize) -> Result<Array2<f64>, Report>;

  /// Current per-pattern log-scaling factors of a node
  fn scaling_factors(&self, node: usize) -> Result<Array1<f64>, Report>;

  /// Whether the node holds partials that can feed a pruning step
  fn is_ready(&self, node: usize) -> Result<bool, Report>;

  /// Executes a batch of pruning steps. Operations may come in any order that is consistent with their dependencies
  /// being resolvable; every child must either be ready or be produced by another operation of the batch.
  fn update_partials_operations(&mut self, operations: &[Operation<'_>]) -> Result<(), Report>;

  /// Computes the partials of `node` from two children
  fn update_partials<'a>(
    &mut self,
    node: usize,
    left: usize,
    left_matrices: ArrayView3<'a, f64>,
    right: usize,
    right_matrices: ArrayView3<'a, f64>,
  ) -> Result<(), Report> {
    self.update_partials_operations(&[Operation::binary(node, left, left_matrices, right, right_matrices)])
  }

  /// Category-weighted sum of the node's partials, `pattern × state`, in the node's scaled units
  fn integrate_partials(&self, node: usize, category_weights: ArrayView1<'_, f64>) -> Result<Array2<f64>, Report>;

  /// Sum over all nodes of the log-scaling factors of one pattern
  fn log_scaling_factor(&self, pattern: usize) -> Result<f64, Report>;

  /// Per-pattern log-likelihoods at `root`, scaling corrections included. Patterns whose likelihood underflows to
  /// zero yield `LOG_ZERO`.
  fn site_log_likelihoods(
    &self,
    root: usize,
    frequencies: ArrayView1<'_, f64>,
    category_weights: ArrayView1<'_, f64>,
  ) -> Result<Array1<f64>, Report>;

  /// Total log-likelihood: the pattern-weighted sum of site log-likelihoods. Returns `LOG_ZERO` when any weighted
  /// pattern has zero likelihood or the sum is not finite.
  fn calculate_log_likelihood(
    &self,
    root: usize,
    frequencies: ArrayView1<'_, f64>,
    category_weights: ArrayView1<'_, f64>,
  ) -> Result<f64, Report> {
    let sites = self.site_log_likelihoods(root, frequencies, category_weights)?;
    let config = self.config();
    let mut log_lh = 0.0;
    for (pattern, &site) in sites.iter().enumerate() {
      let weight = config.pattern_weight(pattern);
      if weight == 0.0 {
        continue;
      }
      if site <= LOG_ZERO {
        return Ok(LOG_ZERO);
      }
      log_lh += weight * site;
    }
    if !log_lh.is_finite() {
      warn!("Log-likelihood is not finite ({log_lh}), reporting it as {LOG_ZERO:e}");
      return Ok(LOG_ZERO);
    }
    Ok(log_lh)
  }

  /// Checkpoints partials, scaling factors and tip states of all nodes
  fn store_state(&mut self);

  /// Reverts to the last checkpoint. Without a prior `store_state` this does nothing.
  fn restore_state(&mut self);

  /// Commits the current state. Nothing needs to happen for the buffers: the next `store_state` overwrites the
  /// checkpoint anyway.
  fn accept_state(&mut self) {}
}
