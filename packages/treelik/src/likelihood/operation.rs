use crate::likelihood::error::CoreError;
use eyre::Report;
use itertools::Itertools;
use ndarray::ArrayView3;
use std::collections::HashMap;

/// One child of a pruning step: the node and its per-category transition matrices, shaped `(category, state, state)`
/// with `matrices[c][k][j] = P(j | k)` along the branch above the child.
#[derive(Clone, Debug)]
pub struct ChildOperand<'a> {
  pub node: usize,
  pub matrices: ArrayView3<'a, f64>,
}

impl<'a> ChildOperand<'a> {
  pub const fn new(node: usize, matrices: ArrayView3<'a, f64>) -> Self {
    Self { node, matrices }
  }
}

/// Recompute the partials of `destination` from its children
#[derive(Clone, Debug)]
pub struct Operation<'a> {
  pub destination: usize,
  pub children: Vec<ChildOperand<'a>>,
}

impl<'a> Operation<'a> {
  pub fn new(destination: usize, children: Vec<ChildOperand<'a>>) -> Self {
    Self { destination, children }
  }

  pub fn binary(
    destination: usize,
    left: usize,
    left_matrices: ArrayView3<'a, f64>,
    right: usize,
    right_matrices: ArrayView3<'a, f64>,
  ) -> Self {
    Self::new(
      destination,
      vec![
        ChildOperand::new(left, left_matrices),
        ChildOperand::new(right, right_matrices),
      ],
    )
  }
}

/// Groups a batch of operations into frontiers.
///
/// A frontier is a set of operations whose inputs are all resolved: each child is either produced by an operation of
/// an earlier frontier or not produced within the batch at all. Operations of one frontier write distinct nodes and
/// read none of each other's outputs, so they can run concurrently. Returns indices into `operations`, preserving
/// input order inside each frontier.
pub fn schedule_frontiers(operations: &[Operation<'_>]) -> Result<Vec<Vec<usize>>, Report> {
  let mut producers = HashMap::with_capacity(operations.len());
  for (i, op) in operations.iter().enumerate() {
    if let Some(previous) = producers.insert(op.destination, i) {
      return Err(
        CoreError::InvalidState(format!(
          "Node {} is the destination of both operation {previous} and operation {i} of the same batch",
          op.destination
        ))
        .into(),
      );
    }
  }

  // For each operation: how many of its inputs are still pending, and which operations wait for its output
  let mut pending = vec![0_usize; operations.len()];
  let mut dependents = vec![vec![]; operations.len()];
  for (i, op) in operations.iter().enumerate() {
    for child in &op.children {
      if let Some(&producer) = producers.get(&child.node) {
        pending[i] += 1;
        dependents[producer].push(i);
      }
    }
  }

  let mut frontier = (0..operations.len()).filter(|&i| pending[i] == 0).collect_vec();
  let mut frontiers = vec![];
  let mut scheduled = 0;
  while !frontier.is_empty() {
    scheduled += frontier.len();
    let mut next = vec![];
    for &i in &frontier {
      for &dependent in &dependents[i] {
        pending[dependent] -= 1;
        if pending[dependent] == 0 {
          next.push(dependent);
        }
      }
    }
    next.sort_unstable();
    frontiers.push(frontier);
    frontier = next;
  }

  if scheduled != operations.len() {
    let stuck = (0..operations.len())
      .filter(|&i| pending[i] > 0)
      .map(|i| operations[i].destination)
      .join(", ");
    return Err(CoreError::InvalidState(format!("Operations form a cycle through nodes: {stuck}")).into());
  }

  Ok(frontiers)
}
