use crate::likelihood::buffer::{NodeBlock, PartialsBuffer};
use crate::likelihood::config::{CoreConfig, Rescaling};
use crate::likelihood::error::CoreError;
use crate::likelihood::kernels::{
  compute_partials, integrate_partials, rescale_partials, root_site_likelihoods, site_log_likelihood, states_to_partials,
};
use crate::likelihood::likelihood_core::{BackendKind, LikelihoodCore};
use crate::likelihood::operation::{schedule_frontiers, Operation};
use crate::likelihood::real::PartialsReal;
use eyre::Report;
use itertools::Itertools;
use log::trace;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

/// How a core schedules its work
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Execution {
  Serial,

  /// Independent operations of a batch, rate categories and patterns are processed on rayon workers
  Parallel,
}

/// Likelihood core over partials stored as `T`, with serial or parallel execution.
///
/// Every backend of the crate is an instance of this type: `f64` serial (scalar), `f64` parallel (threaded) and
/// `f32` serial (single precision).
#[derive(Debug)]
pub struct GeneralLikelihoodCore<T> {
  kind: BackendKind,
  config: CoreConfig,
  execution: Execution,
  pool: Option<Arc<rayon::ThreadPool>>,
  buffer: PartialsBuffer<T>,
}

impl<T: PartialsReal> GeneralLikelihoodCore<T> {
  pub fn new(kind: BackendKind, config: CoreConfig, execution: Execution) -> Result<Self, Report> {
    config.validate()?;

    let pool = match (execution, config.threads) {
      (Execution::Parallel, Some(threads)) => Some(Arc::new(
        rayon::ThreadPoolBuilder::new()
          .num_threads(threads)
          .thread_name(|i| format!("treelik-worker-{i}"))
          .build()?,
      )),
      _ => None,
    };

    let buffer = PartialsBuffer::new(
      config.node_count,
      config.category_count,
      config.pattern_count,
      config.state_count,
    );

    trace!("Created {kind} likelihood core ({}, {:?}): {config}", T::NAME, execution);

    Ok(Self {
      kind,
      config,
      execution,
      pool,
      buffer,
    })
  }

  pub const fn execution(&self) -> Execution {
    self.execution
  }

  /// Borrows the partials of one category of a node in storage precision, without copying
  pub fn partials_view(&self, node: usize, category: usize) -> Result<ArrayView2<'_, T>, Report> {
    self.check_category(category)?;
    let block = self.ready_block(node)?;
    if block.states.is_some() {
      return Err(
        CoreError::InvalidState(format!(
          "Node {node} holds compact tip states and has no partials to borrow"
        ))
        .into(),
      );
    }
    Ok(block.partials.index_axis(Axis(0), category))
  }

  fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
    match &self.pool {
      Some(pool) => pool.install(f),
      None => f(),
    }
  }

  fn is_parallel(&self) -> bool {
    self.execution == Execution::Parallel
  }

  fn check_node(&self, node: usize) -> Result<(), Report> {
    if node >= self.config.node_count {
      return Err(
        CoreError::InvalidState(format!(
          "Node index {node} is out of range: the core holds {} nodes",
          self.config.node_count
        ))
        .into(),
      );
    }
    Ok(())
  }

  fn check_tip(&self, node: usize) -> Result<(), Report> {
    self.check_node(node)?;
    if node >= self.config.tip_count {
      return Err(
        CoreError::InvalidState(format!(
          "Node {node} is not a tip: tips occupy indices 0..{}",
          self.config.tip_count
        ))
        .into(),
      );
    }
    Ok(())
  }

  fn check_category(&self, category: usize) -> Result<(), Report> {
    if category >= self.config.category_count {
      return Err(
        CoreError::InvalidState(format!(
          "Category index {category} is out of range: the core holds {} categories",
          self.config.category_count
        ))
        .into(),
      );
    }
    Ok(())
  }

  fn check_pattern(&self, pattern: usize) -> Result<(), Report> {
    if pattern >= self.config.pattern_count {
      return Err(
        CoreError::InvalidState(format!(
          "Pattern index {pattern} is out of range: the core holds {} patterns",
          self.config.pattern_count
        ))
        .into(),
      );
    }
    Ok(())
  }

  fn check_category_weights(&self, weights: ArrayView1<'_, f64>) -> Result<(), Report> {
    if weights.len() != self.config.category_count {
      return Err(CoreError::dimension_mismatch("category weights", self.config.category_count, weights.len()).into());
    }
    Ok(())
  }

  fn check_matrices(&self, node: usize, matrices: &ArrayView3<'_, f64>) -> Result<(), Report> {
    let c = self.config.category_count;
    let k = self.config.state_count;
    if matrices.dim() != (c, k, k) {
      return Err(
        CoreError::dimension_mismatch(
          format!("transition matrices of the branch above node {node}"),
          format!("{c}x{k}x{k}"),
          format!("{:?}", matrices.shape()),
        )
        .into(),
      );
    }
    Ok(())
  }

  fn ready_block(&self, node: usize) -> Result<&NodeBlock<T>, Report> {
    self.check_node(node)?;
    let block = self.buffer.current(node);
    if !block.ready {
      return Err(CoreError::not_ready(node, "its partials have been neither set nor computed").into());
    }
    Ok(block)
  }

  /// Checks a whole batch before anything is modified, so that a rejected batch leaves the core untouched
  fn validate_operations(&self, operations: &[Operation<'_>]) -> Result<Vec<Vec<usize>>, Report> {
    let destinations: HashSet<usize> = operations.iter().map(|op| op.destination).collect();
    for op in operations {
      self.check_node(op.destination)?;
      if op.children.is_empty() {
        return Err(
          CoreError::InvalidState(format!("Operation on node {} has no children", op.destination)).into(),
        );
      }
      for child in &op.children {
        self.check_node(child.node)?;
        if child.node == op.destination {
          return Err(
            CoreError::InvalidState(format!("Node {} cannot be its own child", op.destination)).into(),
          );
        }
        self.check_matrices(child.node, &child.matrices)?;
        if !destinations.contains(&child.node) && !self.buffer.current(child.node).ready {
          return Err(
            CoreError::not_ready(
              child.node,
              format!(
                "it is a child of node {} but is neither set up nor computed in this batch",
                op.destination
              ),
            )
            .into(),
          );
        }
      }
    }
    schedule_frontiers(operations)
  }

  fn run_operation(
    buffer: &PartialsBuffer<T>,
    op: &Operation<'_>,
    matrices: &[Array3<T>],
    block: &mut NodeBlock<T>,
    rescaling: Rescaling,
    parallel: bool,
  ) {
    let children = op
      .children
      .iter()
      .zip(matrices.iter())
      .map(|(child, m)| (buffer.current(child.node).as_child(), m.view()))
      .collect_vec();
    compute_partials(&children, &mut block.partials, parallel);
    rescale_partials(&mut block.partials, &mut block.scaling, rescaling, parallel);
    block.states = None;
    block.ready = true;
  }
}

impl<T: PartialsReal> LikelihoodCore for GeneralLikelihoodCore<T> {
  fn kind(&self) -> BackendKind {
    self.kind
  }

  fn config(&self) -> &CoreConfig {
    &self.config
  }

  fn set_rescaling(&mut self, rescaling: Rescaling) -> Result<(), Report> {
    let config = CoreConfig {
      rescaling,
      ..self.config.clone()
    };
    config.validate()?;
    self.config = config;
    Ok(())
  }

  fn set_node_partials(&mut self, node: usize, category: usize, partials: &[f64]) -> Result<(), Report> {
    self.check_node(node)?;
    self.check_category(category)?;
    let expected = self.config.partials_size();
    if partials.len() != expected {
      return Err(
        CoreError::InvalidState(format!(
          "Partials of node {node} must hold {} patterns x {} states = {expected} values, but got {}",
          self.config.pattern_count,
          self.config.state_count,
          partials.len()
        ))
        .into(),
      );
    }
    let values = ArrayView2::from_shape((self.config.pattern_count, self.config.state_count), partials)?;

    let block = self.buffer.begin_write(node, true);
    block.materialize_states();

    // The new category arrives unscaled, so the kept categories give up their scaling factors too
    if block.scaling.iter().any(|&factor| factor != 0.0) {
      for (c, mut partials) in block.partials.outer_iter_mut().enumerate() {
        if c == category {
          continue;
        }
        for (mut row, &factor) in partials.outer_iter_mut().zip(block.scaling.iter()) {
          let unscale = T::narrow(factor.exp());
          row.mapv_inplace(|x| x * unscale);
        }
      }
      block.scaling.fill(0.0);
    }

    block
      .partials
      .index_axis_mut(Axis(0), category)
      .zip_mut_with(&values, |dst, &src| *dst = T::narrow(src));
    block.ready = true;
    Ok(())
  }

  fn set_tip_partials(&mut self, node: usize, partials: &[f64]) -> Result<(), Report> {
    self.check_tip(node)?;
    let CoreConfig {
      category_count: c,
      pattern_count: p,
      state_count: k,
      ..
    } = self.config;

    let values = if partials.len() == p * k {
      let tip = ArrayView2::from_shape((p, k), partials)?.mapv(T::narrow);
      let mut values = Array3::zeros((c, p, k));
      for mut category in values.outer_iter_mut() {
        category.assign(&tip);
      }
      values
    } else if partials.len() == c * p * k {
      ArrayView3::from_shape((c, p, k), partials)?.mapv(T::narrow)
    } else {
      return Err(
        CoreError::InvalidState(format!(
          "Tip partials of node {node} must hold {} values (patterns x states) or {} values (categories x patterns x states), but got {}",
          p * k,
          c * p * k,
          partials.len()
        ))
        .into(),
      );
    };

    let block = self.buffer.begin_write(node, false);
    block.partials.assign(&values);
    block.scaling.fill(0.0);
    block.states = None;
    block.ready = true;
    Ok(())
  }

  fn set_tip_states(&mut self, node: usize, states: &[usize]) -> Result<(), Report> {
    self.check_tip(node)?;
    if states.len() != self.config.pattern_count {
      return Err(
        CoreError::InvalidState(format!(
          "Tip states of node {node} must hold one state per pattern ({}), but got {}",
          self.config.pattern_count,
          states.len()
        ))
        .into(),
      );
    }

    let block = self.buffer.begin_write(node, false);
    block.states = Some(states.to_vec());
    block.scaling.fill(0.0);
    block.ready = true;
    Ok(())
  }

  fn partials(&self, node: usize, category: usize) -> Result<Array2<f64>, Report> {
    self.check_category(category)?;
    let block = self.ready_block(node)?;
    let partials = match &block.states {
      Some(states) => states_to_partials(states, self.config.state_count),
      None => block.partials.index_axis(Axis(0), category).mapv(T::widen),
    };
    Ok(partials)
  }

  fn scaling_factors(&self, node: usize) -> Result<Array1<f64>, Report> {
    self.check_node(node)?;
    Ok(self.buffer.current(node).scaling.clone())
  }

  fn is_ready(&self, node: usize) -> Result<bool, Report> {
    self.check_node(node)?;
    Ok(self.buffer.current(node).ready)
  }

  fn update_partials_operations(&mut self, operations: &[Operation<'_>]) -> Result<(), Report> {
    let frontiers = self.validate_operations(operations)?;
    let rescaling = self.config.rescaling;
    let parallel = self.is_parallel();

    for frontier in frontiers {
      let mut work = frontier
        .iter()
        .map(|&i| {
          let op = &operations[i];
          let matrices = op.children.iter().map(|child| child.matrices.mapv(T::narrow)).collect_vec();
          (i, matrices, self.buffer.take_for_write(op.destination))
        })
        .collect_vec();

      {
        let buffer = &self.buffer;
        let run = |(i, matrices, block): &mut (usize, Vec<Array3<T>>, NodeBlock<T>)| {
          Self::run_operation(buffer, &operations[*i], matrices, block, rescaling, parallel);
        };
        if parallel {
          self.install(|| work.par_iter_mut().for_each(run));
        } else {
          work.iter_mut().for_each(run);
        }
      }

      for (i, _, block) in work {
        self.buffer.put_back(operations[i].destination, block);
      }
    }
    Ok(())
  }

  fn integrate_partials(&self, node: usize, category_weights: ArrayView1<'_, f64>) -> Result<Array2<f64>, Report> {
    self.check_category_weights(category_weights)?;
    let block = self.ready_block(node)?;
    Ok(integrate_partials(&block.as_child(), category_weights, self.config.state_count))
  }

  fn log_scaling_factor(&self, pattern: usize) -> Result<f64, Report> {
    self.check_pattern(pattern)?;
    Ok(self.buffer.log_scaling_factor(pattern))
  }

  fn site_log_likelihoods(
    &self,
    root: usize,
    frequencies: ArrayView1<'_, f64>,
    category_weights: ArrayView1<'_, f64>,
  ) -> Result<Array1<f64>, Report> {
    if frequencies.len() != self.config.state_count {
      return Err(CoreError::dimension_mismatch("root frequencies", self.config.state_count, frequencies.len()).into());
    }
    self.check_category_weights(category_weights)?;
    let block = self.ready_block(root)?;

    let likelihoods = root_site_likelihoods(&block.as_child(), frequencies, category_weights);
    let scaling = self.buffer.log_scaling_factors(self.config.pattern_count);
    Ok(
      likelihoods
        .iter()
        .zip(scaling.iter())
        .map(|(&l, &s)| site_log_likelihood(l, s))
        .collect(),
    )
  }

  fn store_state(&mut self) {
    self.buffer.store();
  }

  fn restore_state(&mut self) {
    self.buffer.restore();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::likelihood::error::core_error;
  use crate::likelihood::operation::ChildOperand;
  use crate::pretty_assert_abs_diff_eq;
  use approx::assert_abs_diff_eq;
  use ndarray::{array, Array3};
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  fn identity(categories: usize, states: usize) -> Array3<f64> {
    Array3::from_shape_fn((categories, states, states), |(_, i, j)| if i == j { 1.0 } else { 0.0 })
  }

  fn scalar_core(config: CoreConfig) -> GeneralLikelihoodCore<f64> {
    GeneralLikelihoodCore::new(BackendKind::Scalar, config, Execution::Serial).unwrap()
  }

  #[rstest]
  fn two_tips_with_identity_matrices() {
    let mut core = scalar_core(CoreConfig::new(3, 2, 1, 2, 1));
    core.set_tip_states(0, &[0]).unwrap();
    core.set_tip_states(1, &[0]).unwrap();
    let m = identity(1, 2);
    core.update_partials(2, 0, m.view(), 1, m.view()).unwrap();

    assert_eq!(core.partials(2, 0).unwrap(), array![[1.0, 0.0]]);
    let log_lh = core
      .calculate_log_likelihood(2, array![0.5, 0.5].view(), array![1.0].view())
      .unwrap();
    assert_abs_diff_eq!(log_lh, 0.5_f64.ln(), epsilon = 1e-15);
  }

  #[rstest]
  fn replicated_tip_partials_fill_all_categories() {
    let mut core = scalar_core(CoreConfig::new(1, 1, 2, 2, 3));
    core.set_tip_partials(0, &[1.0, 0.0, 0.5, 0.5]).unwrap();
    for category in 0..3 {
      assert_eq!(core.partials(0, category).unwrap(), array![[1.0, 0.0], [0.5, 0.5]]);
    }
  }

  #[rstest]
  fn per_category_partials_survive_store_and_restore() {
    let mut core = scalar_core(CoreConfig::new(1, 1, 1, 2, 2));
    core.set_node_partials(0, 0, &[1.0, 2.0]).unwrap();
    core.set_node_partials(0, 1, &[3.0, 4.0]).unwrap();
    core.store_state();

    core.set_node_partials(0, 0, &[5.0, 6.0]).unwrap();
    assert_eq!(core.partials(0, 0).unwrap(), array![[5.0, 6.0]]);
    assert_eq!(core.partials(0, 1).unwrap(), array![[3.0, 4.0]]);

    core.restore_state();
    assert_eq!(core.partials(0, 0).unwrap(), array![[1.0, 2.0]]);
  }

  #[rstest]
  fn setting_one_category_of_a_state_tip_keeps_the_others() {
    let mut core = scalar_core(CoreConfig::new(1, 1, 1, 2, 2));
    core.set_tip_states(0, &[1]).unwrap();
    core.set_node_partials(0, 0, &[0.5, 0.5]).unwrap();
    assert_eq!(core.partials(0, 0).unwrap(), array![[0.5, 0.5]]);
    assert_eq!(core.partials(0, 1).unwrap(), array![[0.0, 1.0]]);
  }

  #[rstest]
  fn setting_one_category_keeps_the_others_on_their_true_scale() {
    let config = CoreConfig::new(3, 2, 1, 2, 2).with_rescaling(Rescaling::Always);
    let mut core = scalar_core(config);
    core.set_tip_partials(0, &[0.5, 0.25]).unwrap();
    core.set_tip_partials(1, &[0.25, 0.5]).unwrap();
    let m = identity(2, 2);
    core.update_partials(2, 0, m.view(), 1, m.view()).unwrap();

    let (frequencies, weights) = (array![0.5, 0.5], array![0.0, 1.0]);
    let before = core.calculate_log_likelihood(2, frequencies.view(), weights.view()).unwrap();
    assert_abs_diff_eq!(before, (0.5 * 0.125 + 0.5 * 0.125_f64).ln(), epsilon = 1e-12);

    let current = core.partials(2, 0).unwrap();
    core.set_node_partials(2, 0, current.as_slice().unwrap()).unwrap();

    let after = core.calculate_log_likelihood(2, frequencies.view(), weights.view()).unwrap();
    assert_abs_diff_eq!(after, before, epsilon = 1e-12);
    assert_eq!(core.scaling_factors(2).unwrap(), array![0.0]);
    pretty_assert_abs_diff_eq!(core.partials(2, 1).unwrap(), array![[0.125, 0.125]], epsilon = 1e-15);
  }

  #[rstest]
  fn polytomy_multiplies_all_children() {
    let mut core = scalar_core(CoreConfig::new(4, 3, 1, 2, 1));
    core.set_tip_partials(0, &[0.5, 1.0]).unwrap();
    core.set_tip_partials(1, &[0.5, 1.0]).unwrap();
    core.set_tip_partials(2, &[0.5, 0.25]).unwrap();
    let m = identity(1, 2);
    core
      .update_partials_operations(&[Operation::new(
        3,
        vec![
          ChildOperand::new(0, m.view()),
          ChildOperand::new(1, m.view()),
          ChildOperand::new(2, m.view()),
        ],
      )])
      .unwrap();
    assert_eq!(core.partials(3, 0).unwrap(), array![[0.125, 0.25]]);
  }

  #[rstest]
  fn scaling_factors_are_added_back() {
    let config = CoreConfig::new(3, 2, 1, 2, 1).with_rescaling(Rescaling::Always);
    let mut core = scalar_core(config);
    core.set_tip_partials(0, &[0.5, 0.25]).unwrap();
    core.set_tip_partials(1, &[0.5, 0.25]).unwrap();
    let m = identity(1, 2);
    core.update_partials(2, 0, m.view(), 1, m.view()).unwrap();

    pretty_assert_abs_diff_eq!(core.partials(2, 0).unwrap(), array![[1.0, 0.25]], epsilon = 1e-15);
    assert_abs_diff_eq!(core.log_scaling_factor(0).unwrap(), 0.25_f64.ln(), epsilon = 1e-15);

    let log_lh = core
      .calculate_log_likelihood(2, array![0.5, 0.5].view(), array![1.0].view())
      .unwrap();
    assert_abs_diff_eq!(log_lh, (0.5 * 0.25 + 0.5 * 0.0625_f64).ln(), epsilon = 1e-12);
  }

  #[rstest]
  fn zero_likelihood_reports_log_zero() {
    let mut core = scalar_core(CoreConfig::new(3, 2, 1, 2, 1));
    core.set_tip_states(0, &[0]).unwrap();
    core.set_tip_states(1, &[1]).unwrap();
    let m = identity(1, 2);
    core.update_partials(2, 0, m.view(), 1, m.view()).unwrap();
    let log_lh = core
      .calculate_log_likelihood(2, array![0.5, 0.5].view(), array![1.0].view())
      .unwrap();
    assert_eq!(log_lh, crate::constants::LOG_ZERO);
  }

  #[rstest]
  fn unready_child_is_rejected_without_side_effects() {
    let mut core = scalar_core(CoreConfig::new(3, 2, 1, 2, 1));
    core.set_tip_states(0, &[0]).unwrap();
    let m = identity(1, 2);
    let report = core.update_partials(2, 0, m.view(), 1, m.view()).unwrap_err();
    assert!(matches!(core_error(&report), Some(CoreError::NotReady { node: 1, .. })));
    assert!(!core.is_ready(2).unwrap());
  }

  #[rstest]
  fn malformed_matrices_are_rejected() {
    let mut core = scalar_core(CoreConfig::new(3, 2, 1, 2, 1));
    core.set_tip_states(0, &[0]).unwrap();
    core.set_tip_states(1, &[0]).unwrap();
    let m = identity(1, 2);
    let wrong = identity(2, 2);
    let report = core.update_partials(2, 0, m.view(), 1, wrong.view()).unwrap_err();
    assert!(matches!(core_error(&report), Some(CoreError::DimensionMismatch { .. })));
  }

  #[rstest]
  #[case::node_out_of_range(5, vec![0])]
  #[case::not_a_tip(2, vec![0])]
  #[case::wrong_length(0, vec![0, 1])]
  fn bad_tip_states_are_rejected(#[case] node: usize, #[case] states: Vec<usize>) {
    let mut core = scalar_core(CoreConfig::new(3, 2, 1, 2, 1));
    let report = core.set_tip_states(node, &states).unwrap_err();
    assert!(matches!(core_error(&report), Some(CoreError::InvalidState(_))));
  }

  #[rstest]
  fn root_must_be_ready() {
    let core = scalar_core(CoreConfig::new(3, 2, 1, 2, 1));
    let report = core
      .calculate_log_likelihood(2, array![0.5, 0.5].view(), array![1.0].view())
      .unwrap_err();
    assert!(matches!(core_error(&report), Some(CoreError::NotReady { node: 2, .. })));
  }

  #[rstest]
  fn single_precision_agrees_with_double() {
    let m = Array3::from_shape_fn((2, 2, 2), |(c, i, j)| if i == j { 0.9 - 0.1 * c as f64 } else { 0.1 + 0.1 * c as f64 });
    let evaluate = |core: &mut dyn LikelihoodCore| {
      core.set_tip_states(0, &[0, 1, 2]).unwrap();
      core.set_tip_partials(1, &[0.2, 0.8, 1.0, 0.0, 0.5, 0.5]).unwrap();
      core.update_partials(2, 0, m.view(), 1, m.view()).unwrap();
      core
        .calculate_log_likelihood(2, array![0.4, 0.6].view(), array![0.5, 0.5].view())
        .unwrap()
    };
    let config = CoreConfig::new(3, 2, 3, 2, 2);
    let mut double = scalar_core(config.clone());
    let mut single = GeneralLikelihoodCore::<f32>::new(BackendKind::SinglePrecision, config, Execution::Serial).unwrap();
    let expected = evaluate(&mut double);
    assert_abs_diff_eq!(evaluate(&mut single), expected, epsilon = 1e-5 * expected.abs());
  }

  #[rstest]
  fn partials_view_borrows_storage() {
    let mut core = scalar_core(CoreConfig::new(1, 1, 1, 2, 1));
    core.set_tip_partials(0, &[0.25, 0.75]).unwrap();
    assert_eq!(core.partials_view(0, 0).unwrap(), array![[0.25, 0.75]]);
  }
}
