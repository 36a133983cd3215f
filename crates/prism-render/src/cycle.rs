// SPDX-License-Identifier: CEPL-1.0
use std::collections::VecDeque;

/// Fixed-size ring of per-frame resources that rotates ownership instead of
/// advancing an index. The back is the current slot; the front is the slot
/// that was current one `cycle()` ago.
#[derive(Debug)]
pub struct Cycle<T> {
    slots: VecDeque<T>,
}

impl<T> Cycle<T> {
    /// Panics on an empty ring.
    pub fn new(slots: Vec<T>) -> Self {
        assert!(!slots.is_empty(), "a frame ring needs at least one slot");
        Self {
            slots: slots.into(),
        }
    }

    /// Builds `count` slots, stopping at the first failure. Slots built
    /// before the failure are dropped.
    pub fn try_from_fn<E>(
        count: usize,
        mut make: impl FnMut(usize) -> Result<T, E>,
    ) -> Result<Self, E> {
        let slots = (0..count.max(1)).map(&mut make).collect::<Result<Vec<_>, E>>()?;
        Ok(Self::new(slots))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn current(&self) -> &T {
        &self.slots[self.slots.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut T {
        let last = self.slots.len() - 1;
        &mut self.slots[last]
    }

    pub fn prev(&self) -> &T {
        &self.slots[0]
    }

    /// Rotate by one; call once per frame before touching `current()`.
    pub fn cycle(&mut self) {
        if let Some(slot) = self.slots.pop_back() {
            self.slots.push_front(slot);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.slots.iter_mut()
    }

    pub fn into_inner(self) -> Vec<T> {
        self.slots.into()
    }
}
