//! Releases out-of-order completions in step-id order.

use crate::types::StepId;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: StepId,
    pending: BTreeMap<StepId, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new(first: StepId) -> Self {
        Self {
            next: first,
            pending: BTreeMap::new(),
        }
    }

    /// Accept item `id` and return every item that is now releasable, in order.
    ///
    /// Ids below the next expected one are stale and dropped.
    pub fn push(&mut self, id: StepId, item: T) -> Vec<(StepId, T)> {
        if id < self.next {
            return Vec::new();
        }
        self.pending.insert(id, item);
        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            ready.push((self.next, item));
            self.next += 1;
        }
        ready
    }

    pub fn next_expected(&self) -> StepId {
        self.next
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty()
    }
}
