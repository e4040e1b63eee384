//! Network protocol types shared between client and server.
//!
//! Every frame is one JSON object `{"event": <name>, "data": {...}}` on its
//! own line. Field names are camelCase. Both client and server must agree on
//! these definitions.

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkId;
use crate::math::{Rotation, Vec3};

/// Stable player account id, assigned by the auth layer.
pub type PlayerId = u64;

/// Connection id, assigned by the transport.
pub type SessionId = u64;

/// Entity handle as sent on the wire (generation in the high 32 bits).
pub type WireEntityId = u64;

// =============================================================================
// SHARED ENUMS
// =============================================================================

/// What an entity is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Connected player
    #[default]
    Player,
    /// Server-driven character
    Npc,
    /// Pickup lying in the world
    Item,
}

/// Physical air state used for simulation and animation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AirState {
    /// Standing or walking on ground
    #[default]
    Grounded,
    /// Rising after a jump
    Jumping,
    /// Airborne without a jump, or a long descent
    Falling,
    /// Short recovery after touching down
    Landing,
}

/// Chunk lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkState {
    /// Nobody watching, nothing inside
    #[default]
    Cold,
    /// Subscribers or entities, no player present
    Warm,
    /// At least one player present
    Hot,
}

/// Kind of change in an entity delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaType {
    /// Entity appeared in the chunk
    Create,
    /// Entity state changed
    Update,
    /// Entity was destroyed
    Delete,
    /// Entity moved to another chunk
    Handoff,
}

/// Presence transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    /// Player entered the chunk
    Entered,
    /// Player left the chunk
    Left,
}

/// Chat routing channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatChannel {
    /// Everyone in the room
    #[default]
    Global,
    /// Players within the proximity radius
    Proximity,
}

/// Why a single chunk in a subscribe batch failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Per-player subscription cap reached
    LimitExceeded,
    /// Chunk lies outside the world
    OutOfBounds,
}

/// Error codes carried by `chunk:error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Frame could not be decoded or failed shape validation
    InvalidPayload,
    /// Subscribe batch larger than allowed
    BatchTooLarge,
    /// Interaction target is not alive in the named chunk
    EntityNotFound,
    /// Interaction target is too far away
    OutOfRange,
    /// Interaction type is unknown or not allowed right now
    InvalidInteraction,
    /// Chunk is not subscribed by this session
    NotSubscribed,
    /// Chat message was empty after sanitizing
    ChatRejected,
}

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

/// Input flags reported alongside a position update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputState {
    /// Crouch held
    pub crouch: bool,
    /// Sprint held
    pub sprint: bool,
    /// Jump pressed this frame
    pub jump: bool,
}

/// `chunk:subscribe`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Chunks to subscribe to
    pub chunks: Vec<ChunkId>,
    /// Client position at request time
    pub position: Vec3,
    /// Optional LOD hint per chunk, parallel to `chunks`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lod_levels: Option<Vec<u8>>,
}

/// `chunk:unsubscribe`, `chunk:resync`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkList {
    /// Chunks named by the request
    pub chunks: Vec<ChunkId>,
}

/// `chunk:position`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    /// Claimed position
    pub position: Vec3,
    /// Facing
    #[serde(default)]
    pub rotation: Rotation,
    /// Claimed velocity
    #[serde(default)]
    pub velocity: Vec3,
    /// Chunk the client believes it is in. Advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_chunk: Option<ChunkId>,
    /// Client clock in milliseconds. Advisory only.
    #[serde(default)]
    pub client_time: f64,
    /// Held input flags
    #[serde(default)]
    pub input: InputState,
}

/// `chunk:entity-interact`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractRequest {
    /// Chunk the client saw the entity in
    pub chunk_id: ChunkId,
    /// Target entity
    pub entity_id: WireEntityId,
    /// Interaction name, e.g. `"pickup"`
    pub interaction_type: String,
    /// Free-form interaction payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `chat:send`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Routing channel
    #[serde(default)]
    pub channel: ChatChannel,
    /// Message body
    pub text: String,
}

/// Every message a client may send.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    /// Subscribe to a batch of chunks
    #[serde(rename = "chunk:subscribe")]
    Subscribe(SubscribeRequest),
    /// Drop subscriptions
    #[serde(rename = "chunk:unsubscribe")]
    Unsubscribe(ChunkList),
    /// Movement report
    #[serde(rename = "chunk:position")]
    Position(PositionUpdate),
    /// Interact with an entity
    #[serde(rename = "chunk:entity-interact")]
    EntityInteract(InteractRequest),
    /// Ask for full chunk data again after a sequence gap
    #[serde(rename = "chunk:resync")]
    Resync(ChunkList),
    /// Chat line
    #[serde(rename = "chat:send")]
    Chat(ChatRequest),
}

impl ClientMessage {
    /// Decodes one frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] for invalid JSON, unknown events
    /// or missing fields.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Event name, for logging.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "chunk:subscribe",
            Self::Unsubscribe(_) => "chunk:unsubscribe",
            Self::Position(_) => "chunk:position",
            Self::EntityInteract(_) => "chunk:entity-interact",
            Self::Resync(_) => "chunk:resync",
            Self::Chat(_) => "chat:send",
        }
    }
}

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

/// Full view of one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    /// Handle
    pub entity_id: WireEntityId,
    /// Player, NPC or item
    pub kind: EntityKind,
    /// Canonical position
    pub position: Vec3,
    /// Canonical facing
    pub rotation: Rotation,
    /// Canonical velocity
    pub velocity: Vec3,
    /// Ground contact
    pub grounded: bool,
    /// Air state for animation
    pub air_state: AirState,
    /// Owning chunk
    pub chunk_id: ChunkId,
}

/// One entry of `chunk:entity-delta`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdate {
    /// Entity the update is about
    pub entity_id: WireEntityId,
    /// Kind of change
    #[serde(rename = "type")]
    pub delta_type: DeltaType,
    /// New state, absent for deletes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntitySnapshot>,
    /// Destination chunk for handoffs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_to: Option<ChunkId>,
}

/// A failed chunk in a subscribe ack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeFailure {
    /// Chunk that was refused
    pub chunk_id: ChunkId,
    /// Why
    pub reason: FailureReason,
}

/// `session:welcome`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// Player the session is bound to
    pub player_id: PlayerId,
    /// Player entity handle
    pub entity_id: WireEntityId,
    /// Room clock in milliseconds
    pub server_time: u64,
    /// Chunk edge length, so the client can map positions to chunks
    pub chunk_size: f32,
    /// World edge length
    pub world_size: f32,
}

/// `chunk:subscribe-ack`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeAck {
    /// Newly or already subscribed chunks
    pub subscribed: Vec<ChunkId>,
    /// Refused chunks
    pub failed: Vec<SubscribeFailure>,
}

/// `chunk:unsubscribe-ack`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeAck {
    /// Chunks that were actually dropped
    pub unsubscribed: Vec<ChunkId>,
}

/// `chunk:data`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkData {
    /// Chunk described
    pub chunk_id: ChunkId,
    /// Every live entity owned by the chunk
    pub entities: Vec<EntitySnapshot>,
    /// Lifecycle state
    pub server_state: ChunkState,
    /// Current broadcast sequence
    pub sequence: u64,
}

/// `chunk:player-presence`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPresence {
    /// Player that moved
    pub player_id: PlayerId,
    /// Chunk affected
    pub chunk_id: ChunkId,
    /// Entered or left
    pub action: PresenceAction,
    /// Players present after the change
    pub player_count: u32,
}

/// `chunk:entity-delta`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDelta {
    /// Chunk the delta belongs to
    pub chunk_id: ChunkId,
    /// Changes since the previous delta
    pub updates: Vec<EntityUpdate>,
    /// Room clock in milliseconds
    pub server_time: u64,
    /// Per-chunk broadcast sequence
    pub sequence: u64,
}

/// `chunk:state-change`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    /// Chunk affected
    pub chunk_id: ChunkId,
    /// State before
    pub previous_state: ChunkState,
    /// State after
    pub new_state: ChunkState,
    /// Room clock in milliseconds
    pub server_time: u64,
}

/// `chunk:error`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Machine-readable code
    pub code: ErrorCode,
    /// Human-readable detail
    pub message: String,
}

/// `chat:message`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBroadcast {
    /// Sender
    pub player_id: PlayerId,
    /// Channel it was sent on
    pub channel: ChatChannel,
    /// Sanitized body
    pub text: String,
    /// Room clock in milliseconds
    pub server_time: u64,
}

/// Every message the server may send.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    /// Sent once after connect
    #[serde(rename = "session:welcome")]
    Welcome(Welcome),
    /// Per-chunk subscribe results
    #[serde(rename = "chunk:subscribe-ack")]
    SubscribeAck(SubscribeAck),
    /// Full chunk contents
    #[serde(rename = "chunk:data")]
    ChunkData(ChunkData),
    /// Unsubscribe results
    #[serde(rename = "chunk:unsubscribe-ack")]
    UnsubscribeAck(UnsubscribeAck),
    /// Player entered or left a chunk
    #[serde(rename = "chunk:player-presence")]
    PlayerPresence(PlayerPresence),
    /// Entity changes for one chunk
    #[serde(rename = "chunk:entity-delta")]
    EntityDelta(EntityDelta),
    /// Chunk lifecycle change
    #[serde(rename = "chunk:state-change")]
    StateChange(StateChange),
    /// Request was rejected
    #[serde(rename = "chunk:error")]
    Error(ErrorPayload),
    /// Chat line
    #[serde(rename = "chat:message")]
    Chat(ChatBroadcast),
}

impl ServerMessage {
    /// Builds a `chunk:error`.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload { code, message: message.into() })
    }

    /// Encodes one frame, without the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Event name, for logging.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Welcome(_) => "session:welcome",
            Self::SubscribeAck(_) => "chunk:subscribe-ack",
            Self::ChunkData(_) => "chunk:data",
            Self::UnsubscribeAck(_) => "chunk:unsubscribe-ack",
            Self::PlayerPresence(_) => "chunk:player-presence",
            Self::EntityDelta(_) => "chunk:entity-delta",
            Self::StateChange(_) => "chunk:state-change",
            Self::Error(_) => "chunk:error",
            Self::Chat(_) => "chat:message",
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Inbound frame rejected before it touched any shared state.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Bad JSON, unknown event or wrong field types.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A numeric field was NaN or infinite.
    #[error("non-finite value in `{0}`")]
    NonFinite(&'static str),

    /// Too many chunks in one request.
    #[error("batch of {len} chunks exceeds limit of {max}")]
    BatchTooLarge {
        /// Requested
        len: usize,
        /// Allowed
        max: usize,
    },

    /// `lodLevels` present but not parallel to `chunks`.
    #[error("lodLevels has {lods} entries for {chunks} chunks")]
    LodMismatch {
        /// Chunks in the request
        chunks: usize,
        /// LOD entries in the request
        lods: usize,
    },

    /// Outbound serialization failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Wire code reported to the sender.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BatchTooLarge { .. } => ErrorCode::BatchTooLarge,
            Self::Malformed(_) | Self::NonFinite(_) | Self::LodMismatch { .. } | Self::Encode(_) => {
                ErrorCode::InvalidPayload
            }
        }
    }
}
