//! # Streaming Session Layer
//!
//! Per-connection bookkeeping and everything that happens to a frame before
//! the room touches shared state.
//!
//! ## Pipeline
//!
//! ```text
//! raw line ─▶ decode ─▶ validate shape ─▶ (position only) throttle ─▶ room
//!               │             │
//!               └─────────────┴──▶ chunk:error to the sender, frame dropped
//! ```
//!
//! The throttle is a backpressure bound: however fast a client sends, at
//! most one position update per interval reaches the validator.

use std::collections::{BTreeMap, HashMap};

use tessera_core::EntityId;
use tessera_shared::protocol::{ChunkList, PositionUpdate, SubscribeRequest};
use tessera_shared::{ChunkId, ClientMessage, PlayerId, ProtocolError, ServerMessage, SessionId, StreamingSettings};

/// One connected client.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    /// Transport connection id
    pub id: SessionId,
    /// Player bound to the connection
    pub player: PlayerId,
    /// The player's entity
    pub entity: EntityId,
    /// Chunk the player's canonical position is in
    pub current_chunk: ChunkId,
    last_position_ms: Option<u64>,
    dropped_updates: u64,
    rejected_updates: u64,
}

impl Session {
    /// Creates a session for a freshly spawned player.
    #[must_use]
    pub fn new(id: SessionId, player: PlayerId, entity: EntityId, current_chunk: ChunkId) -> Self {
        Self {
            id,
            player,
            entity,
            current_chunk,
            last_position_ms: None,
            dropped_updates: 0,
            rejected_updates: 0,
        }
    }

    /// Admits a position update if at least `interval_ms` passed since the
    /// last admitted one. Refused updates are counted.
    pub fn admit_position(&mut self, now_ms: u64, interval_ms: u64) -> bool {
        let admitted = self
            .last_position_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= interval_ms);
        if admitted {
            self.last_position_ms = Some(now_ms);
        } else {
            self.dropped_updates += 1;
        }
        admitted
    }

    /// Counts an update refused by the anti-cheat validator.
    pub fn record_rejection(&mut self) {
        self.rejected_updates += 1;
    }

    /// Position updates dropped by the throttle.
    #[must_use]
    pub const fn dropped_updates(&self) -> u64 {
        self.dropped_updates
    }

    /// Position updates refused by the validator.
    #[must_use]
    pub const fn rejected_updates(&self) -> u64 {
        self.rejected_updates
    }
}

/// Sessions of one room, with a player index.
#[derive(Default)]
pub struct SessionTable {
    sessions: BTreeMap<SessionId, Session>,
    by_player: HashMap<PlayerId, SessionId>,
}

impl SessionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session. The caller checks for duplicates first.
    pub fn insert(&mut self, session: Session) {
        self.by_player.insert(session.player, session.id);
        self.sessions.insert(session.id, session);
    }

    /// Removes a session.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        self.by_player.remove(&session.player);
        Some(session)
    }

    /// Session by id.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Mutable session by id.
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Session of a player.
    #[must_use]
    pub fn by_player(&self, player: PlayerId) -> Option<&Session> {
        self.by_player.get(&player).and_then(|id| self.sessions.get(id))
    }

    /// True when the id is connected.
    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// All sessions, by id.
    pub fn iter(&self) -> impl Iterator<Item = &Session> + '_ {
        self.sessions.values()
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Messages waiting to be written, in send order.
#[derive(Default)]
pub struct Outbox {
    queue: Vec<(SessionId, ServerMessage)>,
}

impl Outbox {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one message.
    pub fn send(&mut self, session: SessionId, message: ServerMessage) {
        self.queue.push((session, message));
    }

    /// Queues a copy of the message for every session.
    pub fn broadcast(&mut self, sessions: impl IntoIterator<Item = SessionId>, message: &ServerMessage) {
        for session in sessions {
            self.queue.push((session, message.clone()));
        }
    }

    /// Drops everything queued for a session.
    pub fn discard(&mut self, session: SessionId) {
        self.queue.retain(|(s, _)| *s != session);
    }

    /// Takes the queue.
    pub fn drain(&mut self) -> Vec<(SessionId, ServerMessage)> {
        std::mem::take(&mut self.queue)
    }

    /// Queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Decodes one frame and checks its shape.
///
/// # Errors
///
/// Any [`ProtocolError`]; the caller reports it as `chunk:error`.
pub fn decode_frame(raw: &str, limits: &StreamingSettings) -> Result<ClientMessage, ProtocolError> {
    let message = ClientMessage::decode(raw)?;
    validate_shape(&message, limits)?;
    Ok(message)
}

/// Checks sizes and numbers a decoder cannot check.
///
/// # Errors
///
/// [`ProtocolError::BatchTooLarge`], [`ProtocolError::LodMismatch`] or
/// [`ProtocolError::NonFinite`].
pub fn validate_shape(message: &ClientMessage, limits: &StreamingSettings) -> Result<(), ProtocolError> {
    match message {
        ClientMessage::Subscribe(SubscribeRequest { chunks, position, lod_levels }) => {
            check_batch(chunks.len(), limits.max_subscribe_batch)?;
            if let Some(lods) = lod_levels {
                if lods.len() != chunks.len() {
                    return Err(ProtocolError::LodMismatch { chunks: chunks.len(), lods: lods.len() });
                }
            }
            if !position.is_finite() {
                return Err(ProtocolError::NonFinite("position"));
            }
        }
        ClientMessage::Unsubscribe(ChunkList { chunks }) | ClientMessage::Resync(ChunkList { chunks }) => {
            // Never more than a player can hold.
            check_batch(chunks.len(), limits.max_subscriptions_per_player.max(limits.max_subscribe_batch))?;
        }
        ClientMessage::Position(PositionUpdate { position, rotation, velocity, client_time, .. }) => {
            if !position.is_finite() {
                return Err(ProtocolError::NonFinite("position"));
            }
            if !velocity.is_finite() {
                return Err(ProtocolError::NonFinite("velocity"));
            }
            if !rotation.is_finite() {
                return Err(ProtocolError::NonFinite("rotation"));
            }
            if !client_time.is_finite() {
                return Err(ProtocolError::NonFinite("clientTime"));
            }
        }
        ClientMessage::EntityInteract(_) | ClientMessage::Chat(_) => {}
    }
    Ok(())
}

fn check_batch(len: usize, max: usize) -> Result<(), ProtocolError> {
    if len > max {
        return Err(ProtocolError::BatchTooLarge { len, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_shared::{ErrorCode, Rotation, Vec3};

    fn limits() -> StreamingSettings {
        StreamingSettings { max_subscriptions_per_player: 25, max_subscribe_batch: 4, position_update_interval_ms: 50 }
    }

    #[test]
    fn test_throttle_counts_drops() {
        let mut session = Session::new(1, 1, EntityId::new(0, 0), ChunkId::new(0, 0));
        assert!(session.admit_position(1_000, 50));
        assert!(!session.admit_position(1_010, 50));
        assert!(!session.admit_position(1_049, 50));
        assert!(session.admit_position(1_050, 50));
        assert_eq!(session.dropped_updates(), 2);
    }

    #[test]
    fn test_oversized_subscribe_rejected() {
        let chunks: Vec<_> = (0..5).map(|x| format!("\"{x},0\"")).collect();
        let raw = format!(
            r#"{{"event":"chunk:subscribe","data":{{"chunks":[{}],"position":{{"x":0,"y":0,"z":0}}}}}}"#,
            chunks.join(",")
        );
        let err = decode_frame(&raw, &limits()).unwrap_err();
        assert!(matches!(err, ProtocolError::BatchTooLarge { len: 5, max: 4 }));
        assert_eq!(err.code(), ErrorCode::BatchTooLarge);
    }

    #[test]
    fn test_lod_levels_must_be_parallel() {
        let raw = r#"{"event":"chunk:subscribe","data":{"chunks":["0,0","1,0"],"position":{"x":0,"y":0,"z":0},"lodLevels":[1]}}"#;
        let err = decode_frame(raw, &limits()).unwrap_err();
        assert!(matches!(err, ProtocolError::LodMismatch { chunks: 2, lods: 1 }));
    }

    #[test]
    fn test_non_finite_position_rejected() {
        let message = ClientMessage::Position(PositionUpdate {
            position: Vec3::new(f32::NAN, 0.0, 0.0),
            rotation: Rotation::default(),
            velocity: Vec3::ZERO,
            current_chunk: None,
            client_time: 0.0,
            input: tessera_shared::protocol::InputState::default(),
        });
        let err = validate_shape(&message, &limits()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPayload);
    }

    #[test]
    fn test_outbox_discard_and_drain() {
        let mut outbox = Outbox::new();
        let msg = ServerMessage::error(ErrorCode::InvalidPayload, "x");
        outbox.broadcast([1, 2, 3], &msg);
        outbox.discard(2);
        let drained = outbox.drain();
        assert_eq!(drained.iter().map(|(s, _)| *s).collect::<Vec<_>>(), vec![1, 3]);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_session_table_player_index() {
        let mut table = SessionTable::new();
        table.insert(Session::new(10, 7, EntityId::new(0, 0), ChunkId::new(0, 0)));
        assert_eq!(table.by_player(7).map(|s| s.id), Some(10));
        assert!(table.remove(10).is_some());
        assert!(table.by_player(7).is_none());
        assert!(table.is_empty());
    }
}
