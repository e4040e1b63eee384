//! # Entity Handles
//!
//! Entities are lightweight identifiers consisting of:
//! - An index into the store columns
//! - A generation counter that invalidates handles on destroy

/// Generation-checked handle to an entity slot.
///
/// The ID is split into two parts:
/// - Lower 32 bits: dense slot index
/// - Upper 32 bits: generation, bumped every time the slot is destroyed
///
/// A handle kept past its entity's destroy reads as not alive, even after
/// the slot has been reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Creates a handle from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Sentinel returned when the store is full.
    pub const INVALID: Self = Self(u64::MAX);

    /// Checks for the sentinel.
    #[inline]
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 == u64::MAX
    }

    /// Raw bits, as sent on the wire.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Handle from raw wire bits. Liveness is not implied.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_invalid() {
            f.write_str("entity(invalid)")
        } else {
            write!(f, "entity({}v{})", self.index(), self.generation())
        }
    }
}

/// Slot bookkeeping: liveness, generation and attached components.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct EntitySlot {
    /// Current generation of the slot.
    pub generation: u32,
    /// Bitmask of attached components (up to 64 component types).
    pub component_mask: u64,
    /// Whether the slot holds a live entity.
    pub alive: bool,
}

impl EntitySlot {
    /// Handle for the current occupant.
    #[inline]
    pub const fn handle(self, index: u32) -> EntityId {
        EntityId::new(index, self.generation)
    }

    /// True if alive and carrying every bit in `mask`.
    #[inline]
    pub const fn matches(self, mask: u64) -> bool {
        self.alive && (self.component_mask & mask) == mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_roundtrip() {
        let id = EntityId::new(12345, 67890);
        assert_eq!(id.index(), 12345);
        assert_eq!(id.generation(), 67890);
        assert_eq!(EntityId::from_bits(id.to_bits()), id);
    }

    #[test]
    fn test_invalid_sentinel() {
        assert!(EntityId::INVALID.is_invalid());
        assert!(EntityId::default().is_invalid());
        assert!(!EntityId::new(0, 0).is_invalid());
    }

    #[test]
    fn test_slot_mask_matching() {
        let mut slot = EntitySlot { generation: 2, component_mask: 0b101, alive: true };
        assert!(slot.matches(0b001));
        assert!(slot.matches(0b101));
        assert!(!slot.matches(0b010));
        assert_eq!(slot.handle(9), EntityId::new(9, 2));

        slot.alive = false;
        assert!(!slot.matches(0));
    }
}
