//! # Tessera Core
//!
//! The simulation side of a room:
//! - A fixed-capacity, structure-of-arrays entity store
//! - The air-state machine driving jump/fall/landing
//! - A stage-ordered system scheduler and the built-in systems
//!
//! ## Architecture Rules
//!
//! 1. **No heap allocations in hot path** - All columns are pre-allocated
//! 2. **Handles are generation-checked** - A stale handle never reads a reused slot
//! 3. **One writer** - The store is owned by exactly one room
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::{EntityStore, Position, Scheduler, TickContext};
//! use tessera_shared::EntityKind;
//!
//! let mut store = EntityStore::new(1024);
//! let player = store.spawn(EntityKind::Player, Position::new(31.0, 0.0, 31.0));
//! let mut scheduler = Scheduler::new();
//! scheduler.run(&mut store, &TickContext { tick: 1, dt: 0.05, now_ms: 50 });
//! assert!(store.is_alive(player));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod air;
pub mod ecs;
pub mod schedule;
pub mod systems;

pub use air::{AirInputs, AirStep, AirTracker, AirTransition};
pub use ecs::{ChunkMove, Column, Component, EntityId, EntityStore, InputFlags, Position, Simulated, Velocity};
pub use schedule::{Scheduler, Stage, System, TickContext};
pub use systems::{AirStateSystem, ChunkTrackingSystem, InputSystem, PhysicsSettings, PhysicsSystem, SpeedLimits};
