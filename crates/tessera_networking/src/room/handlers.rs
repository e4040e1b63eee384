//! Per-message handlers. Shape is already validated when these run.

use tessera_core::{InputFlags, Position, Velocity};
use tessera_security::{sanitize_position, sanitize_rotation, sanitize_velocity, MovementVerdict};
use tessera_shared::protocol::{
    ChunkData, InteractRequest, PositionUpdate, SubscribeAck, SubscribeFailure, SubscribeRequest, UnsubscribeAck,
};
use tessera_shared::{ChunkId, ErrorCode, PlayerId, ServerMessage, SessionId};

use super::{Room, RoomError};
use crate::registry::SubscribeOutcome;
use crate::streaming::Session;

impl Room {
    fn session_or_err(&self, session: SessionId) -> Result<&Session, RoomError> {
        self.sessions.get(session).ok_or(RoomError::UnknownSession(session))
    }

    /// Full contents of a chunk at its current sequence.
    pub(super) fn chunk_data(&self, chunk: ChunkId) -> ServerMessage {
        ServerMessage::ChunkData(ChunkData {
            chunk_id: chunk,
            entities: self.registry.visible_entities(chunk, &self.store),
            server_state: self.registry.chunk_state(chunk).unwrap_or_default(),
            sequence: self.registry.sequence(chunk),
        })
    }

    pub(super) fn handle_subscribe(&mut self, session: SessionId, request: &SubscribeRequest) -> Result<(), RoomError> {
        let player = self.session_or_err(session)?.player;
        let mut ack = SubscribeAck::default();
        let mut fresh = Vec::new();

        for (i, &chunk) in request.chunks.iter().enumerate() {
            let lod = request.lod_levels.as_ref().and_then(|lods| lods.get(i).copied());
            match self.registry.subscribe_player(chunk, player, session, request.position, lod) {
                Ok(outcome) => {
                    if !ack.subscribed.contains(&chunk) {
                        ack.subscribed.push(chunk);
                    }
                    if outcome == SubscribeOutcome::Subscribed {
                        fresh.push(chunk);
                    }
                }
                Err(err) => {
                    tracing::debug!(session, player, chunk = %chunk, %err, "subscription refused");
                    ack.failed.push(SubscribeFailure { chunk_id: chunk, reason: err.reason() });
                }
            }
        }

        tracing::debug!(
            session,
            player,
            subscribed = ack.subscribed.len(),
            failed = ack.failed.len(),
            held = self.registry.subscription_count(player),
            "subscribe"
        );
        self.outbox.send(session, ServerMessage::SubscribeAck(ack));
        for chunk in fresh {
            let data = self.chunk_data(chunk);
            self.outbox.send(session, data);
        }
        Ok(())
    }

    pub(super) fn handle_unsubscribe(&mut self, session: SessionId, chunks: &[ChunkId]) -> Result<(), RoomError> {
        let player = self.session_or_err(session)?.player;
        let unsubscribed = chunks
            .iter()
            .copied()
            .filter(|chunk| self.registry.unsubscribe_player(*chunk, player))
            .collect();
        self.outbox.send(session, ServerMessage::UnsubscribeAck(UnsubscribeAck { unsubscribed }));
        Ok(())
    }

    pub(super) fn handle_resync(&mut self, session: SessionId, chunks: &[ChunkId]) -> Result<(), RoomError> {
        let player = self.session_or_err(session)?.player;
        for &chunk in chunks {
            let message = if self.registry.is_subscribed(chunk, player) {
                self.chunk_data(chunk)
            } else {
                ServerMessage::error(ErrorCode::NotSubscribed, format!("not subscribed to chunk {chunk}"))
            };
            self.outbox.send(session, message);
        }
        Ok(())
    }

    /// Throttle, sanitize, validate, then apply to canonical state.
    ///
    /// Throttled and rejected updates are dropped without a reply; the
    /// client converges on its next accepted update.
    pub(super) fn handle_position(
        &mut self,
        session: SessionId,
        update: &PositionUpdate,
        now_ms: u64,
    ) -> Result<(), RoomError> {
        let interval = self.config.streaming.position_update_interval_ms;
        let state = self.sessions.get_mut(session).ok_or(RoomError::UnknownSession(session))?;
        if !state.admit_position(now_ms, interval) {
            tracing::trace!(session, dropped = state.dropped_updates(), "position update throttled");
            return Ok(());
        }
        let (player, entity, old_chunk) = (state.player, state.entity, state.current_chunk);

        let sanitized = sanitize_position(update.position, &self.grid).and_then(|position| {
            Ok((
                position,
                sanitize_rotation(update.rotation)?,
                sanitize_velocity(update.velocity, self.validator.speed_limit())?,
            ))
        });
        let (position, rotation, velocity) = match sanitized {
            Ok(values) => values,
            Err(rejection) => {
                self.outbox.send(session, ServerMessage::error(ErrorCode::InvalidPayload, rejection.to_string()));
                return Ok(());
            }
        };

        if let MovementVerdict::Rejected(rejection) = self.validator.check(player, position, now_ms) {
            if let Some(state) = self.sessions.get_mut(session) {
                state.record_rejection();
            }
            tracing::debug!(session, player, %rejection, "position update dropped");
            return Ok(());
        }

        let held = self.store.input(entity).unwrap_or_default();
        let input = InputFlags::from_parts(
            update.input.crouch,
            update.input.sprint,
            update.input.jump || held.jump_requested(),
        );
        self.store.set_position(entity, Position(position));
        self.store.set_rotation(entity, rotation);
        self.store.set_velocity(entity, Velocity(velocity));
        self.store.set_input(entity, input);

        let new_chunk = self.grid.chunk_of(position);
        if update.current_chunk.is_some_and(|claimed| claimed != new_chunk) {
            tracing::trace!(session, claimed = ?update.current_chunk, actual = %new_chunk, "client chunk disagrees");
        }
        if new_chunk != old_chunk {
            self.relocate_player(session, player, old_chunk, new_chunk);
        }
        Ok(())
    }

    /// Moves a player's entity and presence to another chunk.
    fn relocate_player(&mut self, session: SessionId, player: PlayerId, from: ChunkId, to: ChunkId) {
        let Some(state) = self.sessions.get_mut(session) else {
            return;
        };
        state.current_chunk = to;
        let entity = state.entity;

        self.store.set_chunk(entity, to);
        self.reassign_chunk(entity, to);
        if let Some(change) = self.registry.set_player_present(from, player, false) {
            self.broadcast_presence(player, change);
        }
        if let Some(change) = self.registry.set_player_present(to, player, true) {
            self.broadcast_presence(player, change);
        }
        tracing::debug!(session, player, from = %from, to = %to, "player changed chunk");
    }

    pub(super) fn handle_interact(&mut self, session: SessionId, request: &InteractRequest) -> Result<(), RoomError> {
        let (player, entity) = {
            let state = self.session_or_err(session)?;
            (state.player, state.entity)
        };
        if let Err(err) = self.interact(player, entity, request) {
            tracing::debug!(session, player, target = request.entity_id, %err, "interaction refused");
            self.outbox.send(session, ServerMessage::error(err.code(), err.to_string()));
        }
        Ok(())
    }
}
