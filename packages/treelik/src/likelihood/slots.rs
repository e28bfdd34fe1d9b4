//! Index-swapped double buffering for store/restore.
//!
//! Every node owns two physical slots. `current[node]` selects the slot that holds the live value and
//! `stored[node]` the slot that holds the value at the last `store()`. The first write to a node after a store moves
//! the node onto its other slot, so the stored slot is never overwritten; further writes in the same cycle reuse the
//! already moved slot. Restoring is then a copy of the index vector, with no data movement.

#[derive(Clone, Debug)]
pub struct SlotIndex {
  current: Vec<usize>,
  stored: Vec<usize>,
  has_stored: bool,
}

impl SlotIndex {
  pub fn new(len: usize) -> Self {
    Self {
      current: vec![0; len],
      stored: vec![0; len],
      has_stored: false,
    }
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.current.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.current.is_empty()
  }

  /// Slot holding the live value of the node
  #[inline]
  pub fn current(&self, index: usize) -> usize {
    self.current[index]
  }

  /// Slot holding the value as of the last store
  #[inline]
  pub fn stored(&self, index: usize) -> usize {
    self.stored[index]
  }

  /// Whether the node has been written since the last store
  #[inline]
  pub fn is_touched(&self, index: usize) -> bool {
    self.has_stored && self.current[index] != self.stored[index]
  }

  /// Prepares the node for a write and returns the slot to write into.
  ///
  /// Returns `(slot, moved)`, where `moved` tells whether the node has just left its stored slot, in which case the
  /// returned slot holds stale data from an earlier cycle.
  pub fn begin_write(&mut self, index: usize) -> (usize, bool) {
    if self.has_stored && self.current[index] == self.stored[index] {
      self.current[index] = 1 - self.current[index];
      (self.current[index], true)
    } else {
      (self.current[index], false)
    }
  }

  pub fn store(&mut self) {
    self.stored.copy_from_slice(&self.current);
    self.has_stored = true;
  }

  /// Reverts every node to its stored slot. A no-op before the first store.
  pub fn restore(&mut self) {
    if self.has_stored {
      self.current.copy_from_slice(&self.stored);
    }
  }
}
