use crate::likelihood::kernels::{states_to_partials, ChildData};
use crate::likelihood::real::PartialsReal;
use crate::likelihood::slots::SlotIndex;
use ndarray::{Array1, Array3, Axis};

/// Everything a node holds in one buffer slot
#[derive(Clone, Debug)]
pub struct NodeBlock<T> {
  /// `(category, pattern, state)`, unused while `states` is set
  pub partials: Array3<T>,

  /// Log-scaling factor of each pattern (zero when the pattern was not rescaled)
  pub scaling: Array1<f64>,

  /// Compact tip states, if the node was set up from observed states
  pub states: Option<Vec<usize>>,

  pub ready: bool,
}

impl<T: PartialsReal> NodeBlock<T> {
  fn allocate(category_count: usize, pattern_count: usize, state_count: usize) -> Self {
    Self {
      partials: Array3::zeros((category_count, pattern_count, state_count)),
      scaling: Array1::zeros(pattern_count),
      states: None,
      ready: false,
    }
  }

  fn placeholder() -> Self {
    Self {
      partials: Array3::zeros((0, 0, 0)),
      scaling: Array1::zeros(0),
      states: None,
      ready: false,
    }
  }

  fn copy_from(&mut self, other: &Self) {
    self.partials.assign(&other.partials);
    self.scaling.assign(&other.scaling);
    self.states.clone_from(&other.states);
    self.ready = other.ready;
  }

  pub fn as_child(&self) -> ChildData<'_, T> {
    match &self.states {
      Some(states) => ChildData::States(states),
      None => ChildData::Partials(self.partials.view()),
    }
  }

  /// Replaces compact states with the equivalent partials in every category
  pub fn materialize_states(&mut self) {
    if let Some(states) = self.states.take() {
      let state_count = self.partials.len_of(Axis(2));
      let expanded = states_to_partials(&states, state_count).mapv(T::narrow);
      for mut block in self.partials.outer_iter_mut() {
        block.assign(&expanded);
      }
    }
  }
}

/// Two slots of partials, scaling factors and tip states per node, with store/restore by index swap.
///
/// All storage is allocated up front, so updates never allocate node-sized buffers.
#[derive(Clone, Debug)]
pub struct PartialsBuffer<T> {
  blocks: [Vec<NodeBlock<T>>; 2],
  slots: SlotIndex,
}

impl<T: PartialsReal> PartialsBuffer<T> {
  pub fn new(node_count: usize, category_count: usize, pattern_count: usize, state_count: usize) -> Self {
    let allocate = || {
      (0..node_count)
        .map(|_| NodeBlock::allocate(category_count, pattern_count, state_count))
        .collect::<Vec<_>>()
    };
    Self {
      blocks: [allocate(), allocate()],
      slots: SlotIndex::new(node_count),
    }
  }

  #[inline]
  pub fn node_count(&self) -> usize {
    self.slots.len()
  }

  #[inline]
  pub fn current(&self, node: usize) -> &NodeBlock<T> {
    &self.blocks[self.slots.current(node)][node]
  }

  /// Returns the live block of the node for modification.
  ///
  /// With `preserve`, a node that has just moved off its stored slot starts from a copy of the stored value, so that
  /// partial writes (one category at a time) keep the rest of the node intact.
  pub fn begin_write(&mut self, node: usize, preserve: bool) -> &mut NodeBlock<T> {
    let (slot, moved) = self.slots.begin_write(node);
    let [first, second] = &mut self.blocks;
    let (target, source) = if slot == 0 { (first, second) } else { (second, first) };
    if moved && preserve {
      target[node].copy_from(&source[node]);
    }
    &mut target[node]
  }

  /// Moves the live block of the node out of the buffer, to be overwritten entirely and handed back with `put_back`.
  /// Nothing else may read the node in between.
  pub fn take_for_write(&mut self, node: usize) -> NodeBlock<T> {
    let (slot, _) = self.slots.begin_write(node);
    std::mem::replace(&mut self.blocks[slot][node], NodeBlock::placeholder())
  }

  pub fn put_back(&mut self, node: usize, block: NodeBlock<T>) {
    let slot = self.slots.current(node);
    self.blocks[slot][node] = block;
  }

  /// Sum over all nodes of the log-scaling factor of the pattern
  pub fn log_scaling_factor(&self, pattern: usize) -> f64 {
    (0..self.node_count())
      .map(|node| self.current(node))
      .filter(|block| block.states.is_none())
      .map(|block| block.scaling[pattern])
      .sum()
  }

  /// Per-pattern sums of the log-scaling factors over all nodes
  pub fn log_scaling_factors(&self, pattern_count: usize) -> Array1<f64> {
    let mut total = Array1::zeros(pattern_count);
    for node in 0..self.node_count() {
      let block = self.current(node);
      if block.states.is_none() {
        total += &block.scaling;
      }
    }
    total
  }

  pub fn store(&mut self) {
    self.slots.store();
  }

  pub fn restore(&mut self) {
    self.slots.restore();
  }
}
