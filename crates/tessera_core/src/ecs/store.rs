//! # Entity Store
//!
//! The canonical table of simulated entities. Pre-allocates every column
//! at creation time.

use tessera_shared::{AirState, ChunkId, EntityKind, EntitySnapshot, Rotation};

use super::component::{Component, InputFlags, Position, Velocity};
use super::entity::{EntityId, EntitySlot};
use super::storage::Column;
use crate::air::{AirTracker, AirTransition};

/// An entity crossed a chunk border during simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkMove {
    /// Entity that moved
    pub entity: EntityId,
    /// Chunk it was recorded in
    pub from: ChunkId,
    /// Chunk it is in now
    pub to: ChunkId,
}

/// Structure-of-arrays entity table with generation-checked handles.
///
/// All memory is pre-allocated at creation. `create`, `destroy` and every
/// accessor are O(1) and never allocate; only the dirty list grows, and it
/// is bounded by the capacity.
///
/// Every accessor takes an [`EntityId`] and answers `None`/`false` for a
/// dead or stale handle, so a handle that outlives its entity can never
/// read or write the slot's next occupant.
///
/// # Example
///
/// ```rust
/// use tessera_core::{EntityStore, Position};
/// use tessera_shared::EntityKind;
///
/// let mut store = EntityStore::new(16);
/// let npc = store.spawn(EntityKind::Npc, Position::new(1.0, 0.0, 2.0));
/// assert!(store.is_alive(npc));
/// assert!(store.destroy(npc));
/// assert!(!store.is_alive(npc));
/// ```
pub struct EntityStore {
    slots: Box<[EntitySlot]>,
    /// Free list of slot indices for reuse.
    free_indices: Vec<u32>,
    alive_count: usize,

    pub(crate) kinds: Column<EntityKind>,
    pub(crate) positions: Column<Position>,
    pub(crate) velocities: Column<Velocity>,
    pub(crate) rotations: Column<Rotation>,
    pub(crate) grounded: Column<bool>,
    pub(crate) air: Column<AirTracker>,
    pub(crate) inputs: Column<InputFlags>,
    pub(crate) chunks: Column<ChunkId>,

    dirty_flags: Column<bool>,
    dirty: Vec<EntityId>,

    /// Air-state changes since the last drain.
    transitions: Vec<(EntityId, AirTransition)>,
    /// Chunk border crossings since the last drain.
    chunk_moves: Vec<ChunkMove>,
}

impl EntityStore {
    /// Creates a store with room for `capacity` entities.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero or does not fit a 32-bit index.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        assert!(capacity < u32::MAX as usize, "Capacity must fit a 32-bit index");

        Self {
            slots: vec![EntitySlot::default(); capacity].into_boxed_slice(),
            free_indices: (0..capacity as u32).rev().collect(),
            alive_count: 0,
            kinds: Column::new(capacity),
            positions: Column::new(capacity),
            velocities: Column::new(capacity),
            rotations: Column::new(capacity),
            grounded: Column::new(capacity),
            air: Column::new(capacity),
            inputs: Column::new(capacity),
            chunks: Column::new(capacity),
            dirty_flags: Column::new(capacity),
            dirty: Vec::with_capacity(capacity),
            transitions: Vec::new(),
            chunk_moves: Vec::new(),
        }
    }

    /// Maximum number of live entities.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub const fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// No free slot left.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.free_indices.is_empty()
    }

    /// Claims a slot with no components attached.
    ///
    /// Returns [`EntityId::INVALID`] when the store is full.
    pub fn create(&mut self) -> EntityId {
        let Some(index) = self.free_indices.pop() else {
            return EntityId::INVALID;
        };
        let slot = &mut self.slots[index as usize];
        slot.alive = true;
        slot.component_mask = 0;
        self.alive_count += 1;
        slot.handle(index)
    }

    /// Claims a slot and attaches the standard movement components.
    ///
    /// The entity starts at rest, grounded in the air-state sense, with no
    /// input held. Returns [`EntityId::INVALID`] when the store is full.
    pub fn spawn(&mut self, kind: EntityKind, position: Position) -> EntityId {
        let id = self.create();
        if id.is_invalid() {
            return id;
        }
        let idx = id.index() as usize;
        self.kinds.set(idx, kind);
        self.positions.set(idx, position);
        self.air.set(idx, AirTracker::grounded_at(position.0.y));
        self.slots[idx].component_mask = Position::mask()
            | Velocity::mask()
            | Rotation::mask()
            | InputFlags::mask()
            | AirTracker::mask();
        id
    }

    /// Destroys an entity and bumps its slot generation.
    ///
    /// Returns `false` for dead, stale or invalid handles.
    pub fn destroy(&mut self, id: EntityId) -> bool {
        let Some(idx) = self.index_of(id) else {
            return false;
        };

        let slot = &mut self.slots[idx];
        slot.alive = false;
        slot.component_mask = 0;
        slot.generation = slot.generation.wrapping_add(1);
        self.alive_count -= 1;

        self.kinds.reset(idx);
        self.positions.reset(idx);
        self.velocities.reset(idx);
        self.rotations.reset(idx);
        self.grounded.reset(idx);
        self.air.reset(idx);
        self.inputs.reset(idx);
        self.chunks.reset(idx);
        // Stale entries in `dirty` are dropped by `take_dirty`.
        self.dirty_flags.reset(idx);

        self.free_indices.push(id.index());
        true
    }

    /// Checks a handle against the slot's current generation.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.index_of(id).is_some()
    }

    #[inline]
    fn index_of(&self, id: EntityId) -> Option<usize> {
        if id.is_invalid() {
            return None;
        }
        let idx = id.index() as usize;
        let slot = self.slots.get(idx)?;
        (slot.alive && slot.generation == id.generation()).then_some(idx)
    }

    /// Live handle occupying slot `index`, if any.
    #[inline]
    #[must_use]
    pub fn handle_at(&self, index: usize) -> Option<EntityId> {
        let slot = self.slots.get(index)?;
        slot.alive.then(|| slot.handle(index as u32))
    }

    /// True if slot `index` is alive and carries every bit of `mask`.
    #[inline]
    pub(crate) fn slot_matches(&self, index: usize, mask: u64) -> bool {
        self.slots.get(index).is_some_and(|slot| slot.matches(mask))
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Attaches component `C`. No data is written.
    pub fn add_component<C: Component>(&mut self, id: EntityId) -> bool {
        match self.index_of(id) {
            Some(idx) => {
                self.slots[idx].component_mask |= C::mask();
                true
            }
            None => false,
        }
    }

    /// Detaches component `C`.
    pub fn remove_component<C: Component>(&mut self, id: EntityId) -> bool {
        match self.index_of(id) {
            Some(idx) => {
                self.slots[idx].component_mask &= !C::mask();
                true
            }
            None => false,
        }
    }

    /// Checks for component `C`.
    #[must_use]
    pub fn has_component<C: Component>(&self, id: EntityId) -> bool {
        self.index_of(id).is_some_and(|idx| self.slots[idx].matches(C::mask()))
    }

    /// Live entities carrying every component in `mask`.
    pub fn query(&self, mask: u64) -> impl Iterator<Item = EntityId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, slot)| slot.matches(mask))
            .map(|(idx, slot)| slot.handle(idx as u32))
    }

    /// Every live entity.
    pub fn iter_alive(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.query(0)
    }

    // =========================================================================
    // Field accessors
    // =========================================================================

    /// Entity kind.
    #[must_use]
    pub fn kind(&self, id: EntityId) -> Option<EntityKind> {
        self.index_of(id).and_then(|idx| self.kinds.get(idx))
    }

    /// Position.
    #[must_use]
    pub fn position(&self, id: EntityId) -> Option<Position> {
        self.index_of(id).and_then(|idx| self.positions.get(idx))
    }

    /// Writes position and marks dirty.
    pub fn set_position(&mut self, id: EntityId, position: Position) -> bool {
        self.write(id, |store, idx| store.positions.set(idx, position))
    }

    /// Velocity.
    #[must_use]
    pub fn velocity(&self, id: EntityId) -> Option<Velocity> {
        self.index_of(id).and_then(|idx| self.velocities.get(idx))
    }

    /// Writes velocity and marks dirty.
    pub fn set_velocity(&mut self, id: EntityId, velocity: Velocity) -> bool {
        self.write(id, |store, idx| store.velocities.set(idx, velocity))
    }

    /// Rotation.
    #[must_use]
    pub fn rotation(&self, id: EntityId) -> Option<Rotation> {
        self.index_of(id).and_then(|idx| self.rotations.get(idx))
    }

    /// Writes rotation and marks dirty.
    pub fn set_rotation(&mut self, id: EntityId, rotation: Rotation) -> bool {
        self.write(id, |store, idx| store.rotations.set(idx, rotation))
    }

    /// Ground contact.
    #[must_use]
    pub fn grounded(&self, id: EntityId) -> Option<bool> {
        self.index_of(id).and_then(|idx| self.grounded.get(idx))
    }

    /// Writes ground contact and marks dirty.
    pub fn set_grounded(&mut self, id: EntityId, grounded: bool) -> bool {
        self.write(id, |store, idx| store.grounded.set(idx, grounded))
    }

    /// Air-state tracker.
    #[must_use]
    pub fn air(&self, id: EntityId) -> Option<AirTracker> {
        self.index_of(id).and_then(|idx| self.air.get(idx))
    }

    /// Current air state.
    #[must_use]
    pub fn air_state(&self, id: EntityId) -> Option<AirState> {
        self.air(id).map(|tracker| tracker.state())
    }

    /// Replaces the air-state tracker and marks dirty.
    pub fn set_air(&mut self, id: EntityId, tracker: AirTracker) -> bool {
        self.write(id, |store, idx| store.air.set(idx, tracker))
    }

    /// Held input.
    #[must_use]
    pub fn input(&self, id: EntityId) -> Option<InputFlags> {
        self.index_of(id).and_then(|idx| self.inputs.get(idx))
    }

    /// Writes held input and marks dirty.
    pub fn set_input(&mut self, id: EntityId, input: InputFlags) -> bool {
        self.write(id, |store, idx| store.inputs.set(idx, input))
    }

    /// Owning chunk as last recorded.
    #[must_use]
    pub fn chunk(&self, id: EntityId) -> Option<ChunkId> {
        self.index_of(id).and_then(|idx| self.chunks.get(idx))
    }

    /// Records the owning chunk. Membership itself lives in the chunk
    /// registry; this column only feeds snapshots and chunk tracking.
    pub fn set_chunk(&mut self, id: EntityId, chunk: ChunkId) -> bool {
        match self.index_of(id) {
            Some(idx) => self.chunks.set(idx, chunk),
            None => false,
        }
    }

    #[inline]
    fn write(&mut self, id: EntityId, apply: impl FnOnce(&mut Self, usize) -> bool) -> bool {
        let Some(idx) = self.index_of(id) else {
            return false;
        };
        let written = apply(self, idx);
        self.mark_dirty_index(idx);
        written
    }

    // =========================================================================
    // Dirty tracking
    // =========================================================================

    /// Flags an entity for the next delta.
    pub fn mark_dirty(&mut self, id: EntityId) -> bool {
        match self.index_of(id) {
            Some(idx) => {
                self.mark_dirty_index(idx);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub(crate) fn mark_dirty_index(&mut self, index: usize) {
        let Some(flag) = self.dirty_flags.get_mut(index) else {
            return;
        };
        if *flag {
            return;
        }
        *flag = true;
        if let Some(id) = self.handle_at(index) {
            self.dirty.push(id);
        }
    }

    /// Whether the entity changed since the last [`EntityStore::take_dirty`].
    #[must_use]
    pub fn is_dirty(&self, id: EntityId) -> bool {
        self.index_of(id).is_some_and(|idx| self.dirty_flags.get(idx) == Some(true))
    }

    /// Drains the dirty set. Entities destroyed since they were marked are
    /// left out.
    pub fn take_dirty(&mut self) -> Vec<EntityId> {
        let mut drained = std::mem::take(&mut self.dirty);
        drained.retain(|id| match self.index_of(*id) {
            Some(idx) => {
                self.dirty_flags.reset(idx);
                true
            }
            None => false,
        });
        drained
    }

    // =========================================================================
    // System output
    // =========================================================================

    pub(crate) fn record_transition(&mut self, index: usize, transition: AirTransition) {
        if let Some(id) = self.handle_at(index) {
            self.transitions.push((id, transition));
        }
    }

    /// Drains air-state changes recorded by the systems.
    pub fn take_transitions(&mut self) -> Vec<(EntityId, AirTransition)> {
        std::mem::take(&mut self.transitions)
    }

    pub(crate) fn record_chunk_move(&mut self, index: usize, from: ChunkId, to: ChunkId) {
        if let Some(entity) = self.handle_at(index) {
            self.chunk_moves.push(ChunkMove { entity, from, to });
        }
    }

    /// Drains chunk crossings recorded by the systems.
    pub fn take_chunk_moves(&mut self) -> Vec<ChunkMove> {
        std::mem::take(&mut self.chunk_moves)
    }

    /// Wire view of one entity.
    #[must_use]
    pub fn snapshot(&self, id: EntityId) -> Option<EntitySnapshot> {
        let idx = self.index_of(id)?;
        Some(EntitySnapshot {
            entity_id: id.to_bits(),
            kind: self.kinds.get(idx)?,
            position: self.positions.get(idx)?.0,
            rotation: self.rotations.get(idx)?,
            velocity: self.velocities.get(idx)?.0,
            grounded: self.grounded.get(idx)?,
            air_state: self.air.get(idx)?.state(),
            chunk_id: self.chunks.get(idx)?,
        })
    }
}
