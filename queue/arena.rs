//! Slot storage for queue elements
//!
//! Values live in a vector of slots. A slot is either occupied or on the free
//! list; removing a value puts its slot at the front of the free list and the
//! next insertion takes it back. Indices stay valid until the slot is freed.
//!
//! Invariants:
//! * Every vacant slot is on the free list exactly once
//! * `live` is the number of occupied slots

use std::collections::TryReserveError;
use std::mem;
use std::ops::{Index, IndexMut};

pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Option<usize>,
    live: usize,
}

enum Slot<T> {
    Occupied(T),
    Vacant { next_free: Option<usize> },
}

impl<T> Arena<T> {
    /// Create a new empty arena. Does not allocate.
    pub(crate) const fn new() -> Arena<T> {
        Arena {
            slots: Vec::new(),
            free: None,
            live: 0,
        }
    }

    /// Make sure the next `insert` will not need to allocate.
    pub(crate) fn try_reserve(&mut self) -> Result<(), TryReserveError> {
        if self.free.is_some() {
            return Ok(());
        }
        self.slots.try_reserve(1)
    }

    /// Store `val` and return its index. If `try_reserve` succeeded since the
    /// last insertion, this does not allocate.
    pub(crate) fn insert(&mut self, val: T) -> usize {
        self.live += 1;

        match self.free {
            Some(index) => {
                let old = mem::replace(&mut self.slots[index], Slot::Occupied(val));
                if let Slot::Vacant { next_free } = old {
                    self.free = next_free;
                }
                index
            }
            None => {
                self.slots.push(Slot::Occupied(val));
                self.slots.len() - 1
            }
        }
    }

    /// Take the value out of slot `index` and return the slot to the free list.
    /// Returns `None` if the slot is not occupied.
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        match self.slots.get(index) {
            Some(Slot::Occupied(_)) => {}
            _ => return None,
        }

        let vacant = Slot::Vacant {
            next_free: self.free,
        };
        match mem::replace(&mut self.slots[index], vacant) {
            Slot::Occupied(val) => {
                self.free = Some(index);
                self.live -= 1;
                Some(val)
            }
            Slot::Vacant { .. } => None,
        }
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        match self.slots.get(index) {
            Some(Slot::Occupied(val)) => Some(val),
            _ => None,
        }
    }

    /// Return the number of occupied slots
    pub(crate) fn live(&self) -> usize {
        self.live
    }

    /// Return the number of slots, occupied or not
    pub(crate) fn slots(&self) -> usize {
        self.slots.len()
    }

    /// Drop every value and give the slot storage back to the allocator
    pub(crate) fn clear(&mut self) {
        self.slots = Vec::new();
        self.free = None;
        self.live = 0;
    }
}

impl<T> Index<usize> for Arena<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Some(val) => val,
            None => panic!("Vacant slot! {} of {}", index, self.slots.len()),
        }
    }
}

impl<T> IndexMut<usize> for Arena<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        let len = self.slots.len();
        match self.slots.get_mut(index) {
            Some(Slot::Occupied(val)) => val,
            _ => panic!("Vacant slot! {} of {}", index, len),
        }
    }
}
