//! # Tessera Security
//!
//! Server-side validation of everything a client claims.
//!
//! ## Architecture
//!
//! ```text
//! CLIENT FRAME                      ROOM STATE
//!     │                                 ▲
//!     │── sanitize ──► finite, clamped  │
//!     │                     │           │
//!     │                     ▼           │
//!     │              MovementValidator ─┘ accepted only
//!     │                     │
//!     │                     └── rejected: dropped, counted, flagged
//! ```
//!
//! The validator keeps a single anchor (last accepted position and time)
//! per player. It does not look at history, so a teleport followed by a
//! long enough wait, or short bursts that stay under the limit on
//! average, are not detected.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod anti_cheat;
pub mod validation;

pub use anti_cheat::{MovementValidator, MovementVerdict};
pub use validation::{sanitize_chat, sanitize_position, sanitize_rotation, sanitize_velocity, Rejection};
