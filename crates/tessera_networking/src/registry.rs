//! # Chunk Registry
//!
//! Spatial partition of the world into square chunks and the index that
//! bounds broadcast cost.
//!
//! ## Design
//!
//! ```text
//! ChunkId ──▶ Chunk { subscribers, present players, owned entities, sequence }
//! PlayerId ──▶ subscribed chunks, present chunks
//! EntityId ──▶ owning chunk
//! ```
//!
//! A broadcast about an entity touches the subscribers of its chunk (and of
//! the other side of a handoff in flight), never every connection.
//!
//! The registry stores handles only. Whether an entity is alive is always
//! asked of the [`EntityStore`].
//!
//! ## Tick ordering
//!
//! Handoffs recorded during a tick stay visible to [`ChunkRegistry::chunks_for_entity`]
//! until [`ChunkRegistry::end_tick`], which clears them, then recomputes
//! lifecycle states, then evicts idle chunks. Eviction never sees a handoff.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tessera_core::{EntityId, EntityStore};
use tessera_shared::protocol::{FailureReason, PresenceAction};
use tessera_shared::{ChunkId, ChunkState, EntitySnapshot, PlayerId, SessionId, Vec3, WorldGrid};

/// Result of a successful [`ChunkRegistry::subscribe_player`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// New subscription created.
    Subscribed,
    /// The player already held it; position and LOD were refreshed.
    AlreadySubscribed,
}

/// Why a subscription was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// The player holds the maximum number of subscriptions.
    #[error("subscription limit of {limit} reached")]
    LimitExceeded {
        /// Configured cap
        limit: usize,
    },

    /// The chunk lies outside the world.
    #[error("chunk {0} is outside the world")]
    OutOfBounds(ChunkId),
}

impl SubscribeError {
    /// Reason reported in the subscribe ack.
    #[must_use]
    pub const fn reason(&self) -> FailureReason {
        match self {
            Self::LimitExceeded { .. } => FailureReason::LimitExceeded,
            Self::OutOfBounds(_) => FailureReason::OutOfBounds,
        }
    }
}

/// One subscription.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Subscriber {
    /// Subscribing player
    pub player: PlayerId,
    /// Connection that receives the broadcasts
    pub session: SessionId,
    /// Player position when the subscription was last refreshed
    pub position: Vec3,
    /// Level-of-detail hint from the client
    pub lod: Option<u8>,
}

/// A player entered or left a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresenceChange {
    /// Chunk affected
    pub chunk: ChunkId,
    /// Entered or left
    pub action: PresenceAction,
    /// Players present after the change
    pub player_count: u32,
}

/// An entity changed owning chunk this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handoff {
    /// Entity moved
    pub entity: EntityId,
    /// Previous owner
    pub from: ChunkId,
    /// New owner
    pub to: ChunkId,
}

/// A chunk's lifecycle state changed in [`ChunkRegistry::end_tick`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleChange {
    /// Chunk affected
    pub chunk: ChunkId,
    /// State before
    pub previous: ChunkState,
    /// State after
    pub current: ChunkState,
}

#[derive(Debug, Default)]
struct Chunk {
    /// Last state reported to subscribers.
    state: ChunkState,
    present: BTreeSet<PlayerId>,
    subscribers: BTreeMap<PlayerId, Subscriber>,
    entities: BTreeSet<EntityId>,
    sequence: u64,
    last_active_tick: u64,
}

impl Chunk {
    fn lifecycle(&self) -> ChunkState {
        if !self.present.is_empty() {
            ChunkState::Hot
        } else if !self.subscribers.is_empty() || !self.entities.is_empty() {
            ChunkState::Warm
        } else {
            ChunkState::Cold
        }
    }
}

/// Per-room chunk index.
pub struct ChunkRegistry {
    grid: WorldGrid,
    max_subscriptions: usize,
    unload_grace_ticks: u64,
    current_tick: u64,
    chunks: HashMap<ChunkId, Chunk>,
    subscriptions: HashMap<PlayerId, BTreeSet<ChunkId>>,
    presence: HashMap<PlayerId, BTreeSet<ChunkId>>,
    owners: HashMap<EntityId, ChunkId>,
    /// Handoffs recorded since the last `end_tick`.
    handoffs: Vec<Handoff>,
}

impl ChunkRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(grid: WorldGrid, max_subscriptions: usize, unload_grace_ticks: u64) -> Self {
        Self {
            grid,
            max_subscriptions,
            unload_grace_ticks,
            current_tick: 0,
            chunks: HashMap::new(),
            subscriptions: HashMap::new(),
            presence: HashMap::new(),
            owners: HashMap::new(),
            handoffs: Vec::new(),
        }
    }

    /// World partition used for bounds checks.
    #[must_use]
    pub const fn grid(&self) -> &WorldGrid {
        &self.grid
    }

    fn chunk_mut(&mut self, id: ChunkId) -> &mut Chunk {
        let tick = self.current_tick;
        let chunk = self.chunks.entry(id).or_insert_with(|| {
            tracing::trace!(chunk = %id, "chunk created");
            Chunk::default()
        });
        chunk.last_active_tick = tick;
        chunk
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribes a player to a chunk.
    ///
    /// Re-subscribing is idempotent: it refreshes position and LOD and never
    /// counts against the cap twice.
    ///
    /// # Errors
    ///
    /// [`SubscribeError::OutOfBounds`] outside the world,
    /// [`SubscribeError::LimitExceeded`] when the player is at the cap.
    pub fn subscribe_player(
        &mut self,
        chunk: ChunkId,
        player: PlayerId,
        session: SessionId,
        position: Vec3,
        lod: Option<u8>,
    ) -> Result<SubscribeOutcome, SubscribeError> {
        if !self.grid.contains_chunk(chunk) {
            return Err(SubscribeError::OutOfBounds(chunk));
        }

        let subscriber = Subscriber { player, session, position, lod };
        let held = self.subscriptions.entry(player).or_default();
        if held.contains(&chunk) {
            self.chunk_mut(chunk).subscribers.insert(player, subscriber);
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }
        if held.len() >= self.max_subscriptions {
            return Err(SubscribeError::LimitExceeded { limit: self.max_subscriptions });
        }
        held.insert(chunk);
        self.chunk_mut(chunk).subscribers.insert(player, subscriber);
        Ok(SubscribeOutcome::Subscribed)
    }

    /// Drops one subscription. Returns false if there was none.
    pub fn unsubscribe_player(&mut self, chunk: ChunkId, player: PlayerId) -> bool {
        let removed = self
            .subscriptions
            .get_mut(&player)
            .is_some_and(|held| held.remove(&chunk));
        if !removed {
            return false;
        }
        if self.subscriptions.get(&player).is_some_and(BTreeSet::is_empty) {
            self.subscriptions.remove(&player);
        }
        if let Some(state) = self.chunks.get_mut(&chunk) {
            state.subscribers.remove(&player);
        }
        true
    }

    /// Drops every subscription of a player. Returns the chunks dropped.
    pub fn unsubscribe_player_from_all(&mut self, player: PlayerId) -> Vec<ChunkId> {
        let held = self.subscriptions.remove(&player).unwrap_or_default();
        for chunk in &held {
            if let Some(state) = self.chunks.get_mut(chunk) {
                state.subscribers.remove(&player);
            }
        }
        held.into_iter().collect()
    }

    /// True when the player is subscribed to the chunk.
    #[must_use]
    pub fn is_subscribed(&self, chunk: ChunkId, player: PlayerId) -> bool {
        self.subscriptions.get(&player).is_some_and(|held| held.contains(&chunk))
    }

    /// Chunks the player is subscribed to, ascending.
    pub fn subscriptions_of(&self, player: PlayerId) -> impl Iterator<Item = ChunkId> + '_ {
        self.subscriptions.get(&player).into_iter().flatten().copied()
    }

    /// Number of subscriptions a player holds.
    #[must_use]
    pub fn subscription_count(&self, player: PlayerId) -> usize {
        self.subscriptions.get(&player).map_or(0, BTreeSet::len)
    }

    /// Subscribers of a chunk, by player id.
    pub fn subscribers(&self, chunk: ChunkId) -> impl Iterator<Item = &Subscriber> + '_ {
        self.chunks.get(&chunk).into_iter().flat_map(|c| c.subscribers.values())
    }

    /// Number of subscribers of a chunk.
    #[must_use]
    pub fn subscriber_count(&self, chunk: ChunkId) -> usize {
        self.chunks.get(&chunk).map_or(0, |c| c.subscribers.len())
    }

    // =========================================================================
    // Presence
    // =========================================================================

    /// Records whether a player is standing in a chunk.
    ///
    /// Independent of subscription. Returns a change only when membership
    /// actually flips.
    pub fn set_player_present(&mut self, chunk: ChunkId, player: PlayerId, present: bool) -> Option<PresenceChange> {
        let action = if present {
            let state = self.chunk_mut(chunk);
            if !state.present.insert(player) {
                return None;
            }
            self.presence.entry(player).or_default().insert(chunk);
            PresenceAction::Entered
        } else {
            let state = self.chunks.get_mut(&chunk)?;
            if !state.present.remove(&player) {
                return None;
            }
            state.last_active_tick = self.current_tick;
            if let Some(held) = self.presence.get_mut(&player) {
                held.remove(&chunk);
                if held.is_empty() {
                    self.presence.remove(&player);
                }
            }
            PresenceAction::Left
        };
        Some(PresenceChange { chunk, action, player_count: self.player_count(chunk) })
    }

    /// Chunks the player is present in, ascending.
    #[must_use]
    pub fn chunks_with_player_present(&self, player: PlayerId) -> Vec<ChunkId> {
        self.presence.get(&player).map(|held| held.iter().copied().collect()).unwrap_or_default()
    }

    /// Players standing in a chunk.
    #[must_use]
    pub fn player_count(&self, chunk: ChunkId) -> u32 {
        self.chunks.get(&chunk).map_or(0, |c| c.present.len() as u32)
    }

    /// True when the player is standing in the chunk.
    #[must_use]
    pub fn is_present(&self, chunk: ChunkId, player: PlayerId) -> bool {
        self.chunks.get(&chunk).is_some_and(|c| c.present.contains(&player))
    }

    // =========================================================================
    // Entity membership
    // =========================================================================

    /// Places an entity in a chunk. An entity already owned elsewhere is
    /// moved without recording a handoff.
    pub fn insert_entity(&mut self, entity: EntityId, chunk: ChunkId) {
        if let Some(previous) = self.owners.insert(entity, chunk) {
            if previous != chunk {
                if let Some(state) = self.chunks.get_mut(&previous) {
                    state.entities.remove(&entity);
                }
            }
        }
        self.chunk_mut(chunk).entities.insert(entity);
    }

    /// Removes an entity from its chunk. Returns the chunk it was in.
    pub fn remove_entity(&mut self, entity: EntityId) -> Option<ChunkId> {
        let chunk = self.owners.remove(&entity)?;
        if let Some(state) = self.chunks.get_mut(&chunk) {
            state.entities.remove(&entity);
            state.last_active_tick = self.current_tick;
        }
        Some(chunk)
    }

    /// Moves an entity to another chunk in one step and records the handoff
    /// for the rest of the tick.
    ///
    /// Returns `None` if the entity already belongs to `to`. An entity the
    /// registry does not know is inserted and logged.
    pub fn move_entity(&mut self, entity: EntityId, to: ChunkId) -> Option<Handoff> {
        let Some(from) = self.owners.get(&entity).copied() else {
            tracing::error!(%entity, chunk = %to, "moving an entity the registry does not own");
            self.insert_entity(entity, to);
            return None;
        };
        if from == to {
            return None;
        }
        if let Some(state) = self.chunks.get_mut(&from) {
            state.entities.remove(&entity);
            state.last_active_tick = self.current_tick;
        }
        self.owners.insert(entity, to);
        self.chunk_mut(to).entities.insert(entity);

        let handoff = Handoff { entity, from, to };
        self.handoffs.push(handoff);
        Some(handoff)
    }

    /// Owning chunk of an entity.
    #[must_use]
    pub fn find_entity(&self, entity: EntityId) -> Option<ChunkId> {
        self.owners.get(&entity).copied()
    }

    /// Chunks whose subscribers must hear about an entity: `origin` plus
    /// both sides of any handoff it made this tick.
    #[must_use]
    pub fn chunks_for_entity(&self, origin: ChunkId, entity: EntityId) -> Vec<ChunkId> {
        let mut chunks = vec![origin];
        for handoff in self.handoffs.iter().filter(|h| h.entity == entity) {
            for side in [handoff.from, handoff.to] {
                if !chunks.contains(&side) {
                    chunks.push(side);
                }
            }
        }
        chunks
    }

    /// Handoffs recorded this tick, in order.
    #[must_use]
    pub fn handoffs(&self) -> &[Handoff] {
        &self.handoffs
    }

    /// Snapshots of every live entity owned by a chunk.
    ///
    /// Liveness comes from the store. A handle the store no longer knows is
    /// a registry bug: it is logged and skipped.
    #[must_use]
    pub fn visible_entities(&self, chunk: ChunkId, store: &EntityStore) -> Vec<EntitySnapshot> {
        let Some(state) = self.chunks.get(&chunk) else {
            return Vec::new();
        };
        state
            .entities
            .iter()
            .filter_map(|&entity| {
                let snapshot = store.snapshot(entity);
                if snapshot.is_none() {
                    tracing::error!(%entity, chunk = %chunk, "registry references a dead entity");
                }
                snapshot
            })
            .collect()
    }

    /// Number of entities owned by a chunk.
    #[must_use]
    pub fn entity_count(&self, chunk: ChunkId) -> usize {
        self.chunks.get(&chunk).map_or(0, |c| c.entities.len())
    }

    /// Number of entities the registry tracks.
    #[must_use]
    pub fn tracked_entities(&self) -> usize {
        self.owners.len()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Last reported lifecycle state; `None` for a chunk not loaded.
    #[must_use]
    pub fn chunk_state(&self, chunk: ChunkId) -> Option<ChunkState> {
        self.chunks.get(&chunk).map(|c| c.state)
    }

    /// Current broadcast sequence of a chunk.
    #[must_use]
    pub fn sequence(&self, chunk: ChunkId) -> u64 {
        self.chunks.get(&chunk).map_or(0, |c| c.sequence)
    }

    /// Advances and returns the broadcast sequence of a chunk.
    pub fn next_sequence(&mut self, chunk: ChunkId) -> u64 {
        let state = self.chunk_mut(chunk);
        state.sequence += 1;
        state.sequence
    }

    /// Number of chunks held in memory.
    #[must_use]
    pub fn loaded_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// True when the chunk is held in memory.
    #[must_use]
    pub fn is_loaded(&self, chunk: ChunkId) -> bool {
        self.chunks.contains_key(&chunk)
    }

    /// Closes a tick.
    ///
    /// In order: clears this tick's handoffs, recomputes every lifecycle
    /// state, evicts cold chunks idle for longer than the grace period.
    /// Returns the state changes, sorted by chunk.
    pub fn end_tick(&mut self, tick: u64) -> Vec<LifecycleChange> {
        self.handoffs.clear();

        let mut changes = Vec::new();
        for (&id, chunk) in &mut self.chunks {
            let current = chunk.lifecycle();
            if current != ChunkState::Cold {
                chunk.last_active_tick = tick;
            }
            if current != chunk.state {
                changes.push(LifecycleChange { chunk: id, previous: chunk.state, current });
                chunk.state = current;
            }
        }
        changes.sort_by_key(|c| (c.chunk.x, c.chunk.z));

        let grace = self.unload_grace_ticks;
        let before = self.chunks.len();
        self.chunks.retain(|id, chunk| {
            let idle = chunk.state == ChunkState::Cold && tick.saturating_sub(chunk.last_active_tick) >= grace;
            if idle {
                tracing::debug!(chunk = %id, "chunk evicted");
            }
            !idle
        });
        if self.chunks.len() != before {
            tracing::trace!(evicted = before - self.chunks.len(), loaded = self.chunks.len(), "chunks evicted");
        }

        self.current_tick = tick + 1;
        changes
    }
}
