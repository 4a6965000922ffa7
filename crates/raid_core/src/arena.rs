//! Generation-checked slot storage.
//!
//! Units hold handles to the buildings they target rather than references.
//! When a building is destroyed its slot is retired and the generation
//! bumped, so any handle still pointing at it simply fails to resolve.
//! Retired values stay in place because destruction scoring still needs
//! their hit points.

use serde::{Deserialize, Serialize};

/// Index plus generation into an [`Arena`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Handle {
    /// Slot index.
    pub index: u32,
    /// Slot generation at the time the handle was issued.
    pub generation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Slot<T> {
    generation: u32,
    live: bool,
    value: T,
}

/// Append-only arena with retirable slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> Arena<T> {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value and return its handle.
    pub fn insert(&mut self, value: T) -> Handle {
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            live: true,
            value,
        });
        Handle {
            index,
            generation: 0,
        }
    }

    fn slot(&self, handle: Handle) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.live && s.generation == handle.generation)
    }

    /// Resolve a live handle.
    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slot(handle).map(|s| &s.value)
    }

    /// Resolve a live handle mutably.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.live && s.generation == handle.generation)
            .map(|s| &mut s.value)
    }

    /// Whether a handle still resolves.
    #[must_use]
    pub fn is_live(&self, handle: Handle) -> bool {
        self.slot(handle).is_some()
    }

    /// Retire a slot. Returns false if the handle was already stale.
    pub fn retire(&mut self, handle: Handle) -> bool {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.live && slot.generation == handle.generation => {
                slot.live = false;
                slot.generation = slot.generation.wrapping_add(1);
                true
            }
            _ => false,
        }
    }

    /// Live values with their handles, in insertion order.
    pub fn iter_live(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter(|(_, s)| s.live).map(|(i, s)| {
            (
                Handle {
                    index: i as u32,
                    generation: s.generation,
                },
                &s.value,
            )
        })
    }

    /// Every value, live or retired, in insertion order.
    pub fn iter_all(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().map(|s| &s.value)
    }

    /// Number of slots ever allocated.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if nothing was ever inserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of live slots.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.live).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut arena = Arena::new();
        let a = arena.insert("cannon");
        let b = arena.insert("wall");
        assert_eq!(arena.get(a), Some(&"cannon"));
        assert_eq!(arena.get(b), Some(&"wall"));
        assert_eq!(arena.live_count(), 2);
    }

    #[test]
    fn test_retired_handle_is_stale() {
        let mut arena = Arena::new();
        let a = arena.insert(10);
        assert!(arena.retire(a));
        assert!(!arena.is_live(a));
        assert_eq!(arena.get(a), None);
        assert!(!arena.retire(a), "second retire must be a no-op");

        // Value is still visible to scoring.
        assert_eq!(arena.iter_all().copied().collect::<Vec<_>>(), vec![10]);
        assert_eq!(arena.iter_live().count(), 0);
    }

    #[test]
    fn test_forged_generation_rejected() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        let forged = Handle {
            index: a.index,
            generation: a.generation + 1,
        };
        assert_eq!(arena.get(forged), None);
        assert!(arena.get_mut(forged).is_none());
        assert_eq!(arena.get(Handle { index: 9, generation: 0 }), None);
    }
}
