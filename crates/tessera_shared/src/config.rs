//! Room configuration.
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! file (or no file) yields a working room.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunk::WorldGrid;
use crate::constants;
use crate::math::Vec3;

/// Configuration loading failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that failed
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parse but make no sense together.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result alias for config loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// `[server]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address
    pub bind: String,
    /// Ticks per second
    pub tick_rate: u32,
    /// Concurrent sessions accepted
    pub max_sessions: usize,
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: constants::SERVER_BIND.to_string(),
            tick_rate: constants::TICK_RATE,
            max_sessions: constants::MAX_SESSIONS,
            log_level: "info".to_string(),
        }
    }
}

/// `[world]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    /// Chunk edge length
    pub chunk_size: f32,
    /// World edge length
    pub world_size: f32,
    /// Entity slots
    pub entity_capacity: usize,
    /// NPCs spawned at startup
    pub npc_count: usize,
    /// Seed for NPC placement and wandering
    pub seed: u64,
    /// Ground plane height
    pub ground_height: f32,
    /// Contact tolerance above ground
    pub ground_epsilon: f32,
    /// Downward acceleration
    pub gravity: f32,
    /// Jump impulse for simulated entities
    pub jump_velocity: f32,
    /// Idle ticks before an empty cold chunk is evicted
    pub unload_grace_ticks: u64,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            chunk_size: constants::CHUNK_SIZE,
            world_size: constants::WORLD_SIZE,
            entity_capacity: constants::ENTITY_CAPACITY,
            npc_count: constants::NPC_COUNT,
            seed: 0x7E55_E7A0,
            ground_height: constants::GROUND_HEIGHT,
            ground_epsilon: constants::GROUND_EPSILON,
            gravity: constants::GRAVITY,
            jump_velocity: constants::JUMP_VELOCITY,
            unload_grace_ticks: constants::UNLOAD_GRACE_TICKS,
        }
    }
}

impl WorldSettings {
    /// Grid described by these settings.
    #[must_use]
    pub fn grid(&self) -> WorldGrid {
        WorldGrid::new(self.chunk_size, self.world_size)
    }
}

/// `[streaming]`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Subscriptions per player
    pub max_subscriptions_per_player: usize,
    /// Chunks per subscribe request
    pub max_subscribe_batch: usize,
    /// Minimum spacing of accepted position updates
    pub position_update_interval_ms: u64,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            max_subscriptions_per_player: constants::MAX_SUBSCRIPTIONS_PER_PLAYER,
            max_subscribe_batch: constants::MAX_SUBSCRIBE_BATCH,
            position_update_interval_ms: constants::POSITION_UPDATE_INTERVAL_MS,
        }
    }
}

/// `[anti_cheat]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiCheatSettings {
    /// Fastest legitimate horizontal speed
    pub max_speed: f32,
    /// Fastest legitimate vertical speed
    pub max_vertical_speed: f32,
    /// Jitter multiplier on both speeds
    pub tolerance: f32,
    /// Consecutive rejections before flagging
    pub flag_threshold: u32,
}

impl Default for AntiCheatSettings {
    fn default() -> Self {
        Self {
            max_speed: constants::MAX_SPEED,
            max_vertical_speed: constants::MAX_VERTICAL_SPEED,
            tolerance: constants::SPEED_TOLERANCE,
            flag_threshold: constants::FLAG_THRESHOLD,
        }
    }
}

/// `[air]` - thresholds of the air-state machine. Times in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirConfig {
    /// Grace period after leaving ground during which a jump is still allowed
    pub coyote_time: f32,
    /// Minimum time between two jumps
    pub jump_cooldown: f32,
    /// How long an airborne jump press is remembered
    pub jump_buffer_time: f32,
    /// Airborne time required before a fall is declared
    pub fall_delay: f32,
    /// Downward speed required before a fall is declared
    pub fall_velocity_threshold: f32,
    /// Drop below the apex required before a fall is declared
    pub fall_distance_threshold: f32,
    /// Speed below which a touchdown counts as a landing
    pub landing_velocity_threshold: f32,
    /// Vertical speed that counts as clearly descending
    pub apex_epsilon: f32,
    /// Contact time that forces a landing regardless of velocity
    pub forced_landing_timeout: f32,
    /// Descent time that turns a jump into a fall
    pub long_fall_time: f32,
    /// Drop below the apex that turns a jump into a fall
    pub long_fall_distance: f32,
    /// Duration of the landing state
    pub landing_duration: f32,
    /// Contact time before a new jump is allowed
    pub min_grounded_time: f32,
    /// Airborne time a jump must accumulate before it is consumed
    pub min_airborne_time: f32,
}

impl Default for AirConfig {
    fn default() -> Self {
        Self {
            coyote_time: 0.12,
            jump_cooldown: 0.3,
            jump_buffer_time: 0.15,
            fall_delay: 0.15,
            fall_velocity_threshold: 2.0,
            fall_distance_threshold: 1.5,
            landing_velocity_threshold: 12.0,
            apex_epsilon: 0.05,
            forced_landing_timeout: 0.1,
            long_fall_time: 0.6,
            long_fall_distance: 4.0,
            landing_duration: 0.1,
            min_grounded_time: 0.05,
            min_airborne_time: 0.1,
        }
    }
}

/// A pickup spawn point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemSpawn {
    /// Item type name
    pub item_type: String,
    /// Where it appears
    pub position: Vec3,
}

/// `[gameplay]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameplaySettings {
    /// Longest chat line
    pub chat_max_length: usize,
    /// Proximity chat radius
    pub proximity_radius: f32,
    /// Pickup reach
    pub pickup_range: f32,
    /// Respawn delay after a pickup
    pub item_respawn_ms: u64,
    /// Delay between two pickups by one player
    pub pickup_cooldown_ms: u64,
    /// NPC wander radius around their home
    pub npc_wander_radius: f32,
    /// NPC walking speed
    pub npc_speed: f32,
    /// Where new players appear
    pub spawn_point: Vec3,
    /// Pickup spawn points
    pub items: Vec<ItemSpawn>,
}

impl Default for GameplaySettings {
    fn default() -> Self {
        Self {
            chat_max_length: constants::CHAT_MAX_LENGTH,
            proximity_radius: constants::PROXIMITY_CHAT_RADIUS,
            pickup_range: constants::PICKUP_RANGE,
            item_respawn_ms: constants::ITEM_RESPAWN_MS,
            pickup_cooldown_ms: constants::PICKUP_COOLDOWN_MS,
            npc_wander_radius: 12.0,
            npc_speed: 2.0,
            spawn_point: Vec3::ZERO,
            items: vec![
                ItemSpawn { item_type: "health".to_string(), position: Vec3::new(10.0, 0.0, 10.0) },
                ItemSpawn { item_type: "ammo".to_string(), position: Vec3::new(-40.0, 0.0, 20.0) },
                ItemSpawn { item_type: "gem".to_string(), position: Vec3::new(100.0, 0.0, -100.0) },
            ],
        }
    }
}

/// Full room configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    /// `[server]`
    pub server: ServerSettings,
    /// `[world]`
    pub world: WorldSettings,
    /// `[streaming]`
    pub streaming: StreamingSettings,
    /// `[anti_cheat]`
    pub anti_cheat: AntiCheatSettings,
    /// `[air]`
    pub air: AirConfig,
    /// `[gameplay]`
    pub gameplay: GameplaySettings,
}

impl TesseraConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for bad TOML, [`ConfigError::Invalid`] for
    /// values that fail [`TesseraConfig::validate`].
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when the file cannot be read, otherwise as
    /// [`TesseraConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if !(self.world.chunk_size > 0.0) {
            return invalid("world.chunk_size must be positive");
        }
        if !(self.world.world_size >= self.world.chunk_size) {
            return invalid("world.world_size must be at least one chunk");
        }
        if self.world.entity_capacity == 0 {
            return invalid("world.entity_capacity must be non-zero");
        }
        if self.server.tick_rate == 0 {
            return invalid("server.tick_rate must be non-zero");
        }
        if self.streaming.max_subscriptions_per_player == 0 {
            return invalid("streaming.max_subscriptions_per_player must be non-zero");
        }
        if self.streaming.max_subscribe_batch == 0 {
            return invalid("streaming.max_subscribe_batch must be non-zero");
        }
        if !(self.anti_cheat.max_speed > 0.0) || !(self.anti_cheat.tolerance >= 1.0) {
            return invalid("anti_cheat.max_speed must be positive and tolerance at least 1");
        }
        if !(self.anti_cheat.max_vertical_speed > 0.0) {
            return invalid("anti_cheat.max_vertical_speed must be positive");
        }
        let gameplay = &self.gameplay;
        for (name, value) in [
            ("gameplay.npc_wander_radius", gameplay.npc_wander_radius),
            ("gameplay.npc_speed", gameplay.npc_speed),
            ("gameplay.pickup_range", gameplay.pickup_range),
            ("gameplay.proximity_radius", gameplay.proximity_radius),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(ConfigError::Invalid(format!("{name} must be finite and non-negative")));
            }
        }
        if !self.world.grid().contains(self.gameplay.spawn_point) {
            return invalid("gameplay.spawn_point lies outside the world");
        }
        Ok(())
    }

    /// Seconds per tick.
    #[must_use]
    pub fn tick_seconds(&self) -> f32 {
        1.0 / self.server.tick_rate as f32
    }
}
