//! # Default Tuning Constants
//!
//! Defaults for every configuration section. A TOML file may override any
//! of them at startup; nothing reads these after the config is built.

// =============================================================================
// SERVER
// =============================================================================

/// Server bind address (accepts connections from all interfaces)
pub const SERVER_BIND: &str = "0.0.0.0:7777";

/// Tick rate (updates per second)
pub const TICK_RATE: u32 = 20;

/// Maximum concurrent sessions per room
pub const MAX_SESSIONS: usize = 256;

/// Bound of the event and command channels between transport and room
pub const CHANNEL_CAPACITY: usize = 4096;

/// Longest accepted inbound frame in bytes
pub const MAX_FRAME_BYTES: usize = 16 * 1024;

// =============================================================================
// WORLD
// =============================================================================

/// Chunk edge length in world units
pub const CHUNK_SIZE: f32 = 64.0;

/// World edge length in world units (12 x 12 chunks)
pub const WORLD_SIZE: f32 = 768.0;

/// Entity slots per room
pub const ENTITY_CAPACITY: usize = 4096;

/// NPCs spawned when the room starts
pub const NPC_COUNT: usize = 16;

/// Ground plane height
pub const GROUND_HEIGHT: f32 = 0.0;

/// Distance above ground that still counts as contact
pub const GROUND_EPSILON: f32 = 0.05;

/// Gravity, world units per second squared
pub const GRAVITY: f32 = 20.0;

/// Vertical impulse of a jump
pub const JUMP_VELOCITY: f32 = 6.0;

/// Ticks an empty cold chunk is kept before eviction
pub const UNLOAD_GRACE_TICKS: u64 = 200;

// =============================================================================
// STREAMING
// =============================================================================

/// Concurrent subscriptions per player (a 5 x 5 grid)
pub const MAX_SUBSCRIPTIONS_PER_PLAYER: usize = 25;

/// Chunks per subscribe request
pub const MAX_SUBSCRIBE_BATCH: usize = 25;

/// Minimum spacing of accepted position updates per session
pub const POSITION_UPDATE_INTERVAL_MS: u64 = 50;

// =============================================================================
// ANTI-CHEAT
// =============================================================================

/// Fastest legitimate horizontal speed (sprint), units per second
pub const MAX_SPEED: f32 = 10.0;

/// Fastest legitimate vertical speed (terminal fall), units per second
pub const MAX_VERTICAL_SPEED: f32 = 50.0;

/// Multiplier on both speed limits for network jitter
pub const SPEED_TOLERANCE: f32 = 1.5;

/// Consecutive rejections before a player is flagged
pub const FLAG_THRESHOLD: u32 = 10;

// =============================================================================
// MOVEMENT
// =============================================================================

/// Walking speed cap
pub const WALK_SPEED: f32 = 4.0;

/// Sprinting speed cap
pub const SPRINT_SPEED: f32 = 7.0;

/// Crouching speed cap
pub const CROUCH_SPEED: f32 = 2.0;

// =============================================================================
// GAMEPLAY
// =============================================================================

/// Longest chat line after sanitizing, in characters
pub const CHAT_MAX_LENGTH: usize = 200;

/// Radius of the proximity chat channel
pub const PROXIMITY_CHAT_RADIUS: f32 = 50.0;

/// Farthest distance an item can be picked up from
pub const PICKUP_RANGE: f32 = 3.0;

/// Delay before a picked item spawns again
pub const ITEM_RESPAWN_MS: u64 = 30_000;

/// Delay between two pickups by the same player
pub const PICKUP_COOLDOWN_MS: u64 = 500;
