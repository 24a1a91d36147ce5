//! Opaque, niche-optimized handles and the arena that owns handle-addressed data.
//!
//! Every entity kind (WMEs, preferences, slots, instantiations, goal dependency
//! sets) lives in its own [`Arena`]. Handles are never reused, so a handle to a
//! deallocated entity simply misses in the arena instead of aliasing a newer one.

use std::collections::BTreeMap;
use std::num::NonZeroU64;

/// A copyable, ordered key into an [`Arena`].
pub trait Handle: Copy + Ord + std::fmt::Debug {
    fn from_raw(raw: NonZeroU64) -> Self;
    fn raw(self) -> u64;
}

/// Declare a `NonZeroU64` newtype handle with a display prefix.
macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(std::num::NonZeroU64);

        impl $name {
            /// Create a handle from a raw `u64`. Returns `None` for zero.
            pub fn new(raw: u64) -> Option<Self> {
                std::num::NonZeroU64::new(raw).map($name)
            }

            /// Get the underlying `u64` value.
            pub fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl $crate::handle::Handle for $name {
            fn from_raw(raw: std::num::NonZeroU64) -> Self {
                $name(raw)
            }

            fn raw(self) -> u64 {
                self.0.get()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

pub(crate) use handle_type;

/// Handle-addressed storage with monotonically increasing keys.
///
/// Backed by a `BTreeMap` so iteration is deterministic (allocation order).
#[derive(Debug, Clone)]
pub struct Arena<H: Handle, T> {
    entries: BTreeMap<H, T>,
    next: u64,
}

impl<H: Handle, T> Arena<H, T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next: 1,
        }
    }

    /// Allocate the next handle without storing anything under it.
    fn allocate(&mut self) -> H {
        let raw = NonZeroU64::new(self.next).unwrap_or(NonZeroU64::MIN);
        self.next += 1;
        H::from_raw(raw)
    }

    /// Store a value built from its own handle.
    pub fn insert_with(&mut self, build: impl FnOnce(H) -> T) -> H {
        let handle = self.allocate();
        self.entries.insert(handle, build(handle));
        handle
    }

    pub fn insert(&mut self, value: T) -> H {
        self.insert_with(|_| value)
    }

    pub fn get(&self, handle: H) -> Option<&T> {
        self.entries.get(&handle)
    }

    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        self.entries.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: H) -> Option<T> {
        self.entries.remove(&handle)
    }

    pub fn contains(&self, handle: H) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.entries.iter().map(|(h, v)| (*h, v))
    }

    pub fn handles(&self) -> Vec<H> {
        self.entries.keys().copied().collect()
    }

    /// Peek at the raw value the next allocation will use.
    pub fn peek_next(&self) -> u64 {
        self.next
    }
}

impl<H: Handle, T> Default for Arena<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    handle_type!(TestId, "t");

    #[test]
    fn handle_niche_optimization() {
        assert_eq!(
            std::mem::size_of::<Option<TestId>>(),
            std::mem::size_of::<TestId>()
        );
    }

    #[test]
    fn handles_are_never_reused() {
        let mut arena: Arena<TestId, &str> = Arena::new();
        let a = arena.insert("a");
        arena.remove(a);
        let b = arena.insert("b");
        assert_ne!(a, b);
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn insert_with_sees_own_handle() {
        let mut arena: Arena<TestId, u64> = Arena::new();
        let h = arena.insert_with(|h| h.get() * 10);
        assert_eq!(arena.get(h), Some(&(h.get() * 10)));
    }

    #[test]
    fn iteration_follows_allocation_order() {
        let mut arena: Arena<TestId, u32> = Arena::new();
        let handles: Vec<_> = (0..5).map(|i| arena.insert(i)).collect();
        assert_eq!(arena.handles(), handles);
        assert_eq!(handles[0].to_string(), "t:1");
    }
}
