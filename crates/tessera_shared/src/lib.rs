//! # Tessera Shared
//!
//! Common types used by both client and server.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on:
//! - an async runtime
//! - sockets or any transport
//!
//! If you need I/O, put it in `tessera_networking`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod chunk;
pub mod config;
pub mod constants;
pub mod math;
pub mod protocol;

pub use chunk::{ChunkId, ChunkIdParseError, WorldGrid};
pub use config::{
    AirConfig, AntiCheatSettings, ConfigError, ConfigResult, GameplaySettings, ItemSpawn, ServerSettings,
    StreamingSettings, TesseraConfig, WorldSettings,
};
pub use math::{Rotation, Vec3};
pub use protocol::{
    AirState, ChunkState, ClientMessage, DeltaType, EntityKind, EntitySnapshot, ErrorCode, PlayerId, ProtocolError,
    ServerMessage, SessionId, WireEntityId,
};
