use crate::make_error;
use crate::utils::random::{exponential, random_remove};
use eyre::Report;
use itertools::Itertools;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
  pub parent: Option<usize>,
  pub children: Vec<usize>,
  /// Length of the branch to the parent. Unused at the root.
  pub branch_length: f64,
  pub name: Option<String>,
}

/// Rooted tree stored as an arena. Tips occupy indices `0..tip_count`, internal nodes follow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tree {
  nodes: Vec<TreeNode>,
  tip_count: usize,
  root: usize,
}

impl Tree {
  /// Builds a tree from the parent of every node (`None` for the root) and the branch length above every node
  pub fn from_parents(parents: &[Option<usize>], branch_lengths: &[f64], tip_count: usize) -> Result<Self, Report> {
    let node_count = parents.len();
    if branch_lengths.len() != node_count {
      return make_error!(
        "Expected one branch length per node ({node_count}), but got {}",
        branch_lengths.len()
      );
    }
    if tip_count == 0 || tip_count > node_count {
      return make_error!("Tip count must be between 1 and the node count ({node_count}), but got {tip_count}");
    }

    let roots = parents.iter().positions(Option::is_none).collect_vec();
    let root = match roots.as_slice() {
      [root] => *root,
      _ => return make_error!("A tree must have exactly one root, but found {}", roots.len()),
    };

    let mut nodes = branch_lengths
      .iter()
      .map(|&branch_length| TreeNode {
        branch_length,
        ..TreeNode::default()
      })
      .collect_vec();

    for (node, parent) in parents.iter().enumerate() {
      let Some(parent) = *parent else { continue };
      if parent >= node_count {
        return make_error!("Parent {parent} of node {node} is out of range");
      }
      if parent < tip_count {
        return make_error!("Node {parent} is a tip and cannot be the parent of node {node}");
      }
      if !(branch_lengths[node] >= 0.0 && branch_lengths[node].is_finite()) {
        return make_error!(
          "Branch length above node {node} must be finite and non-negative, but got {}",
          branch_lengths[node]
        );
      }
      nodes[node].parent = Some(parent);
      nodes[parent].children.push(node);
    }

    if let Some(childless) = (tip_count..node_count).find(|&node| nodes[node].children.is_empty()) {
      return make_error!("Internal node {childless} has no children");
    }

    let tree = Self { nodes, tip_count, root };
    let visited = tree.post_order().len();
    if visited != node_count {
      return make_error!("Tree is not connected: only {visited} of {node_count} nodes are reachable from the root");
    }
    Ok(tree)
  }

  /// Random binary topology on `tip_count` tips: lineages are joined pairwise in random order, with exponentially
  /// distributed branch lengths of the given mean.
  pub fn random(tip_count: usize, mean_branch_length: f64, rng: &mut impl Rng) -> Result<Self, Report> {
    if tip_count < 2 {
      return make_error!("A random tree needs at least 2 tips, but got {tip_count}");
    }
    let node_count = 2 * tip_count - 1;
    let mut parents = vec![None; node_count];
    let mut branch_lengths = vec![0.0; node_count];

    let branch_length = exponential(mean_branch_length)?;
    let mut lineages = (0..tip_count).collect_vec();
    for parent in tip_count..node_count {
      for _ in 0..2 {
        let child = random_remove(&mut lineages, rng);
        parents[child] = Some(parent);
        branch_lengths[child] = rng.sample(branch_length);
      }
      lineages.push(parent);
    }

    let mut tree = Self::from_parents(&parents, &branch_lengths, tip_count)?;
    for tip in 0..tip_count {
      tree.nodes[tip].name = Some(format!("taxon_{tip}"));
    }
    Ok(tree)
  }

  #[inline]
  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  #[inline]
  pub const fn tip_count(&self) -> usize {
    self.tip_count
  }

  #[inline]
  pub const fn root(&self) -> usize {
    self.root
  }

  #[inline]
  pub fn is_tip(&self, node: usize) -> bool {
    node < self.tip_count
  }

  #[inline]
  pub fn node(&self, node: usize) -> &TreeNode {
    &self.nodes[node]
  }

  #[inline]
  pub fn parent(&self, node: usize) -> Option<usize> {
    self.nodes[node].parent
  }

  #[inline]
  pub fn children(&self, node: usize) -> &[usize] {
    &self.nodes[node].children
  }

  #[inline]
  pub fn branch_length(&self, node: usize) -> f64 {
    self.nodes[node].branch_length
  }

  pub fn set_branch_length(&mut self, node: usize, branch_length: f64) -> Result<(), Report> {
    if node >= self.node_count() {
      return make_error!("Node {node} is out of range");
    }
    if !(branch_length >= 0.0 && branch_length.is_finite()) {
      return make_error!("Branch length must be finite and non-negative, but got {branch_length}");
    }
    self.nodes[node].branch_length = branch_length;
    Ok(())
  }

  pub fn set_tip_names(&mut self, names: impl IntoIterator<Item = impl Into<String>>) {
    for (node, name) in self.nodes.iter_mut().take(self.tip_count).zip(names) {
      node.name = Some(name.into());
    }
  }

  pub fn tip_names(&self) -> Vec<Option<&str>> {
    self.nodes[..self.tip_count].iter().map(|node| node.name.as_deref()).collect()
  }

  /// Nodes ordered so that every node comes after all of its descendants, ending with the root
  pub fn post_order(&self) -> Vec<usize> {
    let mut order = Vec::with_capacity(self.node_count());
    let mut stack = vec![(self.root, false)];
    while let Some((node, expanded)) = stack.pop() {
      if expanded {
        order.push(node);
      } else {
        stack.push((node, true));
        stack.extend(self.children(node).iter().rev().map(|&child| (child, false)));
      }
    }
    order
  }

  /// Internal nodes in post-order
  pub fn internal_post_order(&self) -> Vec<usize> {
    self.post_order().into_iter().filter(|&node| !self.is_tip(node)).collect()
  }

  /// Nodes from `node` up to the root, inclusive
  pub fn path_to_root(&self, node: usize) -> Vec<usize> {
    let mut path = vec![node];
    let mut current = node;
    while let Some(parent) = self.parent(current) {
      path.push(parent);
      current = parent;
    }
    path
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::utils::random::get_random_number_generator;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  // ((0,1)4,(2,3)5)6
  fn balanced() -> Tree {
    Tree::from_parents(
      &[Some(4), Some(4), Some(5), Some(5), Some(6), Some(6), None],
      &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.0],
      4,
    )
    .unwrap()
  }

  #[rstest]
  fn post_order_visits_children_first() {
    assert_eq!(balanced().post_order(), vec![0, 1, 4, 2, 3, 5, 6]);
    assert_eq!(balanced().internal_post_order(), vec![4, 5, 6]);
  }

  #[rstest]
  fn path_to_root() {
    assert_eq!(balanced().path_to_root(2), vec![2, 5, 6]);
  }

  #[rstest]
  #[case::two_roots(&[None, Some(2), None], &[0.1, 0.1, 0.0], 2)]
  #[case::tip_as_parent(&[Some(1), Some(2), None], &[0.1, 0.1, 0.0], 2)]
  #[case::negative_branch(&[Some(2), Some(2), None], &[-0.1, 0.1, 0.0], 2)]
  #[case::childless_internal(&[Some(3), Some(3), Some(3), None], &[0.1, 0.1, 0.1, 0.0], 2)]
  #[case::cycle(&[Some(2), Some(3), None, Some(4), Some(3)], &[0.1; 5], 2)]
  fn malformed_trees_are_rejected(#[case] parents: &[Option<usize>], #[case] lengths: &[f64], #[case] tips: usize) {
    assert!(Tree::from_parents(parents, lengths, tips).is_err());
  }

  #[rstest]
  fn random_tree_rejects_non_positive_mean_branch_length() {
    let mut rng = get_random_number_generator(Some(3));
    assert!(Tree::random(5, 0.0, &mut rng).is_err());
    assert!(Tree::random(5, f64::NAN, &mut rng).is_err());
  }

  #[rstest]
  fn random_tree_is_binary_and_reproducible() {
    let a = Tree::random(10, 0.1, &mut get_random_number_generator(Some(3))).unwrap();
    let b = Tree::random(10, 0.1, &mut get_random_number_generator(Some(3))).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.node_count(), 19);
    assert!((10..19).all(|node| a.children(node).len() == 2));
    assert_eq!(a.post_order().len(), 19);
  }
}
