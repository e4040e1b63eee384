//! # Entity Component System
//!
//! A fixed-capacity, structure-of-arrays entity table.
//!
//! ## Design Philosophy
//!
//! - All storage is pre-allocated when the store is created
//! - Fields live in dense columns indexed by slot
//! - Entity handles carry a generation; stale handles read as dead
//! - Systems select entities by component mask

mod component;
mod entity;
mod storage;
mod store;

pub use component::{Component, InputFlags, Position, Simulated, Velocity};
pub use entity::EntityId;
pub use storage::Column;
pub use store::{ChunkMove, EntityStore};
