//! # Column Storage
//!
//! One pre-allocated, dense array per entity field. Slot `i` of every
//! column belongs to the entity with index `i`; no column ever grows.

/// Fixed-size column of one field, indexed by entity slot.
#[derive(Clone, Debug)]
pub struct Column<T: Copy + Default> {
    data: Box<[T]>,
}

impl<T: Copy + Default> Column<T> {
    /// Allocates `capacity` default slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { data: vec![T::default(); capacity].into_boxed_slice() }
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-capacity column.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Value at `index`, or `None` past the end.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.data.get(index).copied()
    }

    /// Mutable slot at `index`.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.data.get_mut(index)
    }

    /// Overwrites a slot. Returns `false` past the end.
    #[inline]
    pub fn set(&mut self, index: usize, value: T) -> bool {
        match self.data.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Restores a slot to its default.
    #[inline]
    pub fn reset(&mut self, index: usize) {
        self.set(index, T::default());
    }

    /// Whole column, for batch passes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Whole column, mutable, for batch passes.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}
