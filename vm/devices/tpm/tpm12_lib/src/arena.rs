// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fixed-capacity slot storage with typed handles.

use std::marker::PhantomData;

/// A typed index into a [`SlotArena<T>`].
pub struct Handle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    /// The raw slot index.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({})", self.index)
    }
}

/// A fixed number of slots, each either occupied or free.
#[derive(Debug, Clone)]
pub struct SlotArena<T> {
    slots: Vec<Option<T>>,
}

impl<T> SlotArena<T> {
    /// An arena with `capacity` free slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handle for slot `index`, if it is in range.
    pub fn handle(&self, index: u32) -> Option<Handle<T>> {
        ((index as usize) < self.slots.len()).then(|| Handle::new(index))
    }

    /// The first free slot.
    pub fn find_free(&self) -> Option<Handle<T>> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(|i| Handle::new(i as u32))
    }

    /// Store `value` in the first free slot. Returns `None` when full.
    pub fn insert(&mut self, value: T) -> Option<Handle<T>> {
        let handle = self.find_free()?;
        self.slots[handle.index as usize] = Some(value);
        Some(handle)
    }

    /// Store `value` at `handle`, returning the previous occupant.
    pub fn insert_at(&mut self, handle: Handle<T>, value: T) -> Option<T> {
        self.slots[handle.index as usize].replace(value)
    }

    /// The value at `handle`, if the slot is occupied.
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots.get(handle.index as usize)?.as_ref()
    }

    /// Mutable access to the value at `handle`.
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slots.get_mut(handle.index as usize)?.as_mut()
    }

    /// Empty the slot at `handle`, returning its value.
    pub fn free(&mut self, handle: Handle<T>) -> Option<T> {
        self.slots.get_mut(handle.index as usize)?.take()
    }

    /// Every occupied slot in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| Some((Handle::new(i as u32), slot.as_ref()?)))
    }

    /// Every slot in index order, occupied or not.
    pub fn slots(&self) -> impl Iterator<Item = Option<&T>> {
        self.slots.iter().map(Option::as_ref)
    }

    /// Handle of the first occupied slot whose value satisfies `f`.
    pub fn find(&self, mut f: impl FnMut(&T) -> bool) -> Option<Handle<T>> {
        self.iter()
            .find(|(_, value)| f(value))
            .map(|(handle, _)| handle)
    }

    /// Free every slot whose value does not satisfy `f`.
    pub fn retain(&mut self, mut f: impl FnMut(&T) -> bool) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|value| !f(value)) {
                *slot = None;
            }
        }
    }

    /// Free every slot.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_lowest_free_slot() {
        let mut arena = SlotArena::new(3);
        let a = arena.insert("a").unwrap();
        let b = arena.insert("b").unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));

        assert_eq!(arena.free(a), Some("a"));
        assert_eq!(arena.find_free(), Some(a));
        assert_eq!(arena.insert("c"), Some(a));
        arena.insert("d").unwrap();
        assert_eq!(arena.insert("e"), None);
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn handles_are_range_checked() {
        let mut arena: SlotArena<u32> = SlotArena::new(2);
        assert!(arena.handle(2).is_none());
        let h = arena.handle(1).unwrap();
        assert!(arena.get(h).is_none());
        assert_eq!(arena.insert_at(h, 5), None);
        assert_eq!(arena.insert_at(h, 6), Some(5));
        assert_eq!(arena.iter().map(|(h, v)| (h.index(), *v)).collect::<Vec<_>>(), [(1, 6)]);
    }

    #[test]
    fn retain_and_find() {
        let mut arena = SlotArena::new(4);
        for v in [10, 11, 12, 13] {
            arena.insert(v);
        }
        arena.retain(|v| v % 2 == 0);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.find(|v| *v == 12).map(|h| h.index()), Some(2));
        assert!(arena.find(|v| *v == 11).is_none());
        arena.clear();
        assert!(arena.is_empty());
    }
}
