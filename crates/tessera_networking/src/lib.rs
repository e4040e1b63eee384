//! # Tessera Networking - Interest Management
//!
//! Everything between a socket and the entity store.
//!
//! ## Architecture
//!
//! - **Registry**: chunk subscriptions, player presence, entity ownership
//!   and the Cold/Warm/Hot lifecycle
//! - **Streaming**: sessions, frame shape checks, position throttling
//! - **Room**: the authoritative simulation; validates every client claim
//!   and sends each subscriber only the chunks it asked for
//! - **Server**: fixed-rate tick thread plus a tokio TCP transport
//!
//! ## Security Model
//!
//! ```text
//! CLIENT                                   ROOM
//!   |                                        |
//!   |--- chunk:position "I am at X" -------->|
//!   |                                        | <- throttle, sanitize,
//!   |                                        |    speed check
//!   |<-- chunk:entity-delta (canonical X) ---|
//!   |                                        |
//! ```
//!
//! The client never decides where it is. The room always validates.
//!
//! ## Example
//!
//! ```rust
//! use tessera_networking::Room;
//! use tessera_shared::TesseraConfig;
//!
//! let mut room = Room::new(TesseraConfig::default());
//! room.connect(1, 1).unwrap();
//! room.handle_message(
//!     1,
//!     r#"{"event":"chunk:subscribe","data":{"chunks":["0,0"],"position":{"x":0,"y":0,"z":0}}}"#,
//!     0,
//! )
//! .unwrap();
//! room.tick(50);
//! assert!(!room.drain_outbox().is_empty());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod registry;
pub mod room;
pub mod server;
pub mod streaming;
pub mod tick;
pub mod timers;

pub use registry::{
    ChunkRegistry, Handoff, LifecycleChange, PresenceChange, SubscribeError, SubscribeOutcome, Subscriber,
};
pub use room::{InteractError, NpcBrain, NpcMode, Room, RoomError, WorldItem};
pub use server::{
    NetworkCommand, NetworkEvent, RoomServer, ServerChannels, ServerError, Transport, TransportError,
    CHANNEL_CAPACITY, MAX_FRAME_BYTES,
};
pub use streaming::{decode_frame, validate_shape, Outbox, Session, SessionTable};
pub use tick::{TickLoop, TickStats, MAX_CATCH_UP};
pub use timers::{Timer, TimerAction, TimerKey, TimerOwner, TimerQueue};
