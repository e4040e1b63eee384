//! # Authoritative Room
//!
//! One room owns its entity store, chunk registry, systems, timers,
//! validator and sessions. Nothing is shared between rooms.
//!
//! ## Tick
//!
//! ```text
//! NPC AI ─▶ systems ─▶ chunk reassignment ─▶ due timers ─▶ entity deltas ─▶ end_tick
//! ```
//!
//! Inbound frames are handled between ticks, on the same thread. Every
//! handler runs to completion before the next frame or tick.
//!
//! ## Ownership
//!
//! The store decides whether an entity exists. Entities are destroyed only
//! through [`Room::destroy_entity`], which also drops them from the registry
//! and cancels their timers.

mod chat;
mod deltas;
mod handlers;
mod items;
mod npc;

pub use items::{InteractError, WorldItem};
pub use npc::{NpcBrain, NpcMode};

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tessera_core::{
    AirStateSystem, ChunkTrackingSystem, EntityId, EntityStore, InputSystem, PhysicsSettings, PhysicsSystem, Position,
    Scheduler, SpeedLimits, TickContext,
};
use tessera_security::MovementValidator;
use tessera_shared::protocol::{EntityDelta, EntityUpdate, PlayerPresence, StateChange, Welcome};
use tessera_shared::{
    ChunkId, ClientMessage, DeltaType, EntityKind, EntitySnapshot, PlayerId, ServerMessage, SessionId, TesseraConfig,
    Vec3, WorldGrid,
};

use crate::registry::{ChunkRegistry, PresenceChange};
use crate::streaming::{decode_frame, validate_shape, Outbox, Session, SessionTable};
use crate::timers::{TimerAction, TimerOwner, TimerQueue};
use deltas::{PendingChange, PendingDeltas};

/// Why the room refused a connection-level request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// No free entity slot for the player.
    #[error("entity store is full")]
    StoreFull,

    /// The session is not connected.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// The session is already connected.
    #[error("session {0} is already connected")]
    DuplicateSession(SessionId),

    /// The player is connected on another session.
    #[error("player {0} is already in the room")]
    PlayerInRoom(PlayerId),

    /// The session limit is reached.
    #[error("room is full ({0} sessions)")]
    RoomFull(usize),
}

/// A delta entry plus the chunks whose subscribers already get it elsewhere.
struct Outgoing {
    update: EntityUpdate,
    delivered_via: Vec<ChunkId>,
}

/// The authoritative simulation of one world.
pub struct Room {
    config: TesseraConfig,
    grid: WorldGrid,
    store: EntityStore,
    registry: ChunkRegistry,
    scheduler: Scheduler,
    timers: TimerQueue,
    validator: MovementValidator,
    sessions: SessionTable,
    outbox: Outbox,
    pending: PendingDeltas,
    items: Vec<WorldItem>,
    npcs: BTreeMap<EntityId, NpcBrain>,
    rng: StdRng,
    tick: u64,
    now_ms: u64,
}

impl Room {
    /// Builds a room and populates it with NPCs and items.
    #[must_use]
    pub fn new(config: TesseraConfig) -> Self {
        let grid = config.world.grid();
        let mut scheduler = Scheduler::new();
        scheduler
            .add(InputSystem::new(SpeedLimits::default()))
            .add(PhysicsSystem::new(PhysicsSettings {
                gravity: config.world.gravity,
                ground_height: config.world.ground_height,
                ground_epsilon: config.world.ground_epsilon,
            }))
            .add(AirStateSystem::new(config.air, config.world.jump_velocity))
            .add(ChunkTrackingSystem::new(grid));

        let mut room = Self {
            grid,
            store: EntityStore::new(config.world.entity_capacity),
            registry: ChunkRegistry::new(
                grid,
                config.streaming.max_subscriptions_per_player,
                config.world.unload_grace_ticks,
            ),
            scheduler,
            timers: TimerQueue::new(),
            validator: MovementValidator::new(config.anti_cheat.clone()),
            sessions: SessionTable::new(),
            outbox: Outbox::new(),
            pending: PendingDeltas::default(),
            items: WorldItem::from_config(&config.gameplay.items),
            npcs: BTreeMap::new(),
            rng: StdRng::seed_from_u64(config.world.seed),
            tick: 0,
            now_ms: 0,
            config,
        };
        room.spawn_npcs();
        room.spawn_items();
        tracing::info!(
            npcs = room.npcs.len(),
            items = room.items.len(),
            chunk_size = grid.chunk_size(),
            chunks_per_axis = grid.chunks_per_axis(),
            "room ready"
        );
        room
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Spawns a player for a new session and queues `session:welcome`.
    ///
    /// # Errors
    ///
    /// [`RoomError::DuplicateSession`], [`RoomError::PlayerInRoom`],
    /// [`RoomError::RoomFull`] or [`RoomError::StoreFull`].
    pub fn connect(&mut self, session: SessionId, player: PlayerId) -> Result<EntityId, RoomError> {
        if self.sessions.contains(session) {
            return Err(RoomError::DuplicateSession(session));
        }
        if self.sessions.by_player(player).is_some() {
            return Err(RoomError::PlayerInRoom(player));
        }
        if self.sessions.len() >= self.config.server.max_sessions {
            return Err(RoomError::RoomFull(self.sessions.len()));
        }

        let spawn = self.grid.clamp(self.config.gameplay.spawn_point);
        let entity = self.spawn_entity(EntityKind::Player, spawn).ok_or(RoomError::StoreFull)?;
        let chunk = self.grid.chunk_of(spawn);
        self.sessions.insert(Session::new(session, player, entity, chunk));
        self.validator.reset_anchor(player, spawn, self.now_ms);
        if let Some(change) = self.registry.set_player_present(chunk, player, true) {
            self.broadcast_presence(player, change);
        }

        self.outbox.send(
            session,
            ServerMessage::Welcome(Welcome {
                player_id: player,
                entity_id: entity.to_bits(),
                server_time: self.now_ms,
                chunk_size: self.grid.chunk_size(),
                world_size: self.grid.half_extent() * 2.0,
            }),
        );
        tracing::info!(session, player, %entity, chunk = %chunk, "player connected");
        Ok(entity)
    }

    /// Tears a session down: presence (one `left` per chunk), subscriptions,
    /// timers, validator state, the player entity and queued messages.
    ///
    /// # Errors
    ///
    /// [`RoomError::UnknownSession`] if the session is not connected.
    pub fn disconnect(&mut self, session: SessionId) -> Result<(), RoomError> {
        let Session { player, entity, .. } = self.sessions.remove(session).ok_or(RoomError::UnknownSession(session))?;
        self.outbox.discard(session);

        let dropped = self.registry.unsubscribe_player_from_all(player);
        for chunk in self.registry.chunks_with_player_present(player) {
            if let Some(change) = self.registry.set_player_present(chunk, player, false) {
                self.broadcast_presence(player, change);
            }
        }
        let cancelled = self.timers.cancel_owner(TimerOwner::Player(player));
        self.validator.forget(player);
        self.destroy_entity(entity);

        tracing::info!(session, player, subscriptions = dropped.len(), timers = cancelled, "player disconnected");
        Ok(())
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Decodes and handles one raw frame.
    ///
    /// Malformed or oversized frames are answered with `chunk:error` and
    /// leave the room untouched.
    ///
    /// # Errors
    ///
    /// [`RoomError::UnknownSession`] if the session is not connected.
    pub fn handle_message(&mut self, session: SessionId, raw: &str, now_ms: u64) -> Result<(), RoomError> {
        if !self.sessions.contains(session) {
            return Err(RoomError::UnknownSession(session));
        }
        self.advance_clock(now_ms);
        match decode_frame(raw, &self.config.streaming) {
            Ok(message) => self.dispatch(session, message, now_ms),
            Err(err) => {
                tracing::debug!(session, %err, "frame rejected");
                self.outbox.send(session, ServerMessage::error(err.code(), err.to_string()));
                Ok(())
            }
        }
    }

    /// Handles an already decoded message. Shape is validated here.
    ///
    /// # Errors
    ///
    /// [`RoomError::UnknownSession`] if the session is not connected.
    pub fn handle_client_message(
        &mut self,
        session: SessionId,
        message: ClientMessage,
        now_ms: u64,
    ) -> Result<(), RoomError> {
        if !self.sessions.contains(session) {
            return Err(RoomError::UnknownSession(session));
        }
        self.advance_clock(now_ms);
        if let Err(err) = validate_shape(&message, &self.config.streaming) {
            tracing::debug!(session, event = message.event_name(), %err, "message rejected");
            self.outbox.send(session, ServerMessage::error(err.code(), err.to_string()));
            return Ok(());
        }
        self.dispatch(session, message, now_ms)
    }

    fn dispatch(&mut self, session: SessionId, message: ClientMessage, now_ms: u64) -> Result<(), RoomError> {
        tracing::trace!(session, event = message.event_name(), "message");
        match message {
            ClientMessage::Subscribe(request) => self.handle_subscribe(session, &request),
            ClientMessage::Unsubscribe(request) => self.handle_unsubscribe(session, &request.chunks),
            ClientMessage::Position(update) => self.handle_position(session, &update, now_ms),
            ClientMessage::EntityInteract(request) => self.handle_interact(session, &request),
            ClientMessage::Resync(request) => self.handle_resync(session, &request.chunks),
            ClientMessage::Chat(request) => self.handle_chat(session, &request),
        }
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Runs one fixed-length simulation step at room time `now_ms`.
    pub fn tick(&mut self, now_ms: u64) {
        self.tick += 1;
        self.advance_clock(now_ms);
        let ctx = TickContext { tick: self.tick, dt: self.config.tick_seconds(), now_ms: self.now_ms };

        self.drive_npcs();
        self.scheduler.run(&mut self.store, &ctx);

        for moved in self.store.take_chunk_moves() {
            self.reassign_chunk(moved.entity, moved.to);
        }
        for (entity, transition) in self.store.take_transitions() {
            tracing::trace!(%entity, from = ?transition.from, to = ?transition.to, "air transition");
        }

        self.run_timers();
        self.flush_deltas();

        for change in self.registry.end_tick(self.tick) {
            let message = ServerMessage::StateChange(StateChange {
                chunk_id: change.chunk,
                previous_state: change.previous,
                new_state: change.current,
                server_time: self.now_ms,
            });
            let targets: Vec<SessionId> = self.registry.subscribers(change.chunk).map(|s| s.session).collect();
            self.outbox.broadcast(targets, &message);
        }
    }

    /// Takes every queued outbound message, in send order.
    pub fn drain_outbox(&mut self) -> Vec<(SessionId, ServerMessage)> {
        self.outbox.drain()
    }

    /// Snapshot of every live entity. Only meaningful between ticks.
    #[must_use]
    pub fn snapshot_entities(&self) -> Vec<EntitySnapshot> {
        self.store.iter_alive().filter_map(|id| self.store.snapshot(id)).collect()
    }

    // =========================================================================
    // Entity lifecycle
    // =========================================================================

    /// Destroys an entity everywhere: registry, timers, NPC brain, store.
    /// Returns false for a dead or stale handle.
    pub fn destroy_entity(&mut self, entity: EntityId) -> bool {
        if !self.store.is_alive(entity) {
            return false;
        }
        let chunk = self.registry.remove_entity(entity);
        self.timers.cancel_owner(TimerOwner::Entity(entity));
        self.npcs.remove(&entity);
        self.store.destroy(entity);

        match chunk {
            Some(chunk) => self.pending.deleted(entity, chunk),
            None => tracing::error!(%entity, "destroyed entity was not in any chunk"),
        }
        true
    }

    fn spawn_entity(&mut self, kind: EntityKind, position: Vec3) -> Option<EntityId> {
        let position = self.grid.clamp(position);
        let entity = self.store.spawn(kind, Position(position));
        if entity.is_invalid() {
            tracing::warn!(?kind, "entity store full");
            return None;
        }
        let chunk = self.grid.chunk_of(position);
        self.store.set_chunk(entity, chunk);
        self.registry.insert_entity(entity, chunk);
        self.pending.created(entity, chunk);
        Some(entity)
    }

    /// Records an ownership change already applied to the store.
    fn reassign_chunk(&mut self, entity: EntityId, to: ChunkId) {
        if let Some(handoff) = self.registry.move_entity(entity, to) {
            self.pending.moved(entity, handoff.from, handoff.to);
        }
    }

    fn broadcast_presence(&mut self, player: PlayerId, change: PresenceChange) {
        let message = ServerMessage::PlayerPresence(PlayerPresence {
            player_id: player,
            chunk_id: change.chunk,
            action: change.action,
            player_count: change.player_count,
        });
        let targets: Vec<SessionId> = self.registry.subscribers(change.chunk).map(|s| s.session).collect();
        self.outbox.broadcast(targets, &message);
    }

    fn run_timers(&mut self) {
        for timer in self.timers.pop_due(self.now_ms) {
            match timer.action {
                TimerAction::RespawnItem { spawn } => self.respawn_item(spawn),
                TimerAction::PickupCooldown => {}
                TimerAction::NpcWander { npc } => self.npc_wander(npc),
            }
        }
    }

    /// Builds one `chunk:entity-delta` per chunk with changes and subscribers.
    ///
    /// A handoff goes out once per session: in the destination chunk's delta
    /// if the session watches it, otherwise in the origin's.
    fn flush_deltas(&mut self) {
        let changes = self.pending.take();
        let dirty = self.store.take_dirty();
        let mut per_chunk: BTreeMap<ChunkId, Vec<Outgoing>> = BTreeMap::new();

        for (&entity, change) in &changes {
            match *change {
                PendingChange::Created(chunk) => {
                    let Some(snapshot) = self.store.snapshot(entity) else {
                        tracing::error!(%entity, "created entity missing from store");
                        continue;
                    };
                    per_chunk.entry(chunk).or_default().push(Outgoing {
                        update: update(entity, DeltaType::Create, Some(snapshot), None),
                        delivered_via: Vec::new(),
                    });
                }
                PendingChange::Moved { from, to } => {
                    let Some(snapshot) = self.store.snapshot(entity) else {
                        tracing::error!(%entity, "moved entity missing from store");
                        continue;
                    };
                    // Destination first, then origin, then anything crossed on the way.
                    let mut sides = vec![to, from];
                    for chunk in self.registry.chunks_for_entity(to, entity) {
                        if !sides.contains(&chunk) {
                            sides.push(chunk);
                        }
                    }
                    for (i, chunk) in sides.iter().enumerate() {
                        per_chunk.entry(*chunk).or_default().push(Outgoing {
                            update: update(entity, DeltaType::Handoff, Some(snapshot.clone()), Some(to)),
                            delivered_via: sides[..i].to_vec(),
                        });
                    }
                }
                PendingChange::Deleted(chunk) => {
                    per_chunk.entry(chunk).or_default().push(Outgoing {
                        update: update(entity, DeltaType::Delete, None, None),
                        delivered_via: Vec::new(),
                    });
                }
            }
        }

        for entity in dirty {
            if changes.contains_key(&entity) {
                continue;
            }
            let (Some(chunk), Some(snapshot)) = (self.registry.find_entity(entity), self.store.snapshot(entity)) else {
                tracing::error!(%entity, "dirty entity unknown to registry or store");
                continue;
            };
            per_chunk.entry(chunk).or_default().push(Outgoing {
                update: update(entity, DeltaType::Update, Some(snapshot), None),
                delivered_via: Vec::new(),
            });
        }

        for (chunk, outgoing) in per_chunk {
            let subscribers: Vec<(PlayerId, SessionId)> =
                self.registry.subscribers(chunk).map(|s| (s.player, s.session)).collect();
            if subscribers.is_empty() {
                continue;
            }
            let sequence = self.registry.next_sequence(chunk);
            for (player, session) in subscribers {
                let updates = outgoing
                    .iter()
                    .filter(|o| !o.delivered_via.iter().any(|c| self.registry.is_subscribed(*c, player)))
                    .map(|o| o.update.clone())
                    .collect();
                self.outbox.send(
                    session,
                    ServerMessage::EntityDelta(EntityDelta {
                        chunk_id: chunk,
                        updates,
                        server_time: self.now_ms,
                        sequence,
                    }),
                );
            }
        }
    }

    fn advance_clock(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Configuration the room was built with.
    #[must_use]
    pub const fn config(&self) -> &TesseraConfig {
        &self.config
    }

    /// Canonical entity state.
    #[must_use]
    pub const fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Chunk index.
    #[must_use]
    pub const fn registry(&self) -> &ChunkRegistry {
        &self.registry
    }

    /// Connected sessions.
    #[must_use]
    pub const fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// One session.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Pending timers.
    #[must_use]
    pub const fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    /// Movement validator.
    #[must_use]
    pub const fn validator(&self) -> &MovementValidator {
        &self.validator
    }

    /// Item spawn points.
    #[must_use]
    pub fn items(&self) -> &[WorldItem] {
        &self.items
    }

    /// Live NPCs and their AI state.
    #[must_use]
    pub const fn npcs(&self) -> &BTreeMap<EntityId, NpcBrain> {
        &self.npcs
    }

    /// Ticks run so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Room clock in milliseconds.
    #[must_use]
    pub const fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Queued outbound messages.
    #[must_use]
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }
}

fn update(entity: EntityId, delta_type: DeltaType, snapshot: Option<EntitySnapshot>, to: Option<ChunkId>) -> EntityUpdate {
    EntityUpdate { entity_id: entity.to_bits(), delta_type, entity: snapshot, handoff_to: to }
}
