//! # Component System
//!
//! Components are pure data containers with no behavior.
//! They must be Copy and have a fixed size so every column can be
//! pre-allocated.

use bytemuck::{Pod, Zeroable};
use tessera_shared::{Rotation, Vec3};

/// Marker trait for ECS components.
///
/// Components must be:
/// - `Copy`: No heap allocations, bitwise copyable
/// - `Default`: Must have a default value for pre-allocation
///
/// The `ID` selects the bit in an entity's component mask, which is what
/// [`crate::EntityStore::query`] matches against.
pub trait Component: Copy + Default + Send + Sync + 'static {
    /// Unique identifier for this component type (0-63).
    const ID: u8;

    /// Mask bit for this component.
    #[inline]
    #[must_use]
    fn mask() -> u64 {
        1 << Self::ID
    }
}

/// World-space position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(transparent)]
pub struct Position(pub Vec3);

impl Component for Position {
    const ID: u8 = 0;
}

impl Position {
    /// Creates a new position.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self(Vec3::new(x, y, z))
    }
}

/// Movement in world units per second.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(transparent)]
pub struct Velocity(pub Vec3);

impl Component for Velocity {
    const ID: u8 = 1;
}

impl Velocity {
    /// Creates a new velocity.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self(Vec3::new(x, y, z))
    }
}

impl Component for Rotation {
    const ID: u8 = 2;
}

/// Held input, packed into one byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct InputFlags(pub u8);

impl Component for InputFlags {
    const ID: u8 = 3;
}

impl InputFlags {
    /// Crouch held.
    pub const CROUCH: u8 = 1 << 0;
    /// Sprint held.
    pub const SPRINT: u8 = 1 << 1;
    /// Jump requested and not yet consumed.
    pub const JUMP: u8 = 1 << 2;

    /// Builds flags from individual inputs.
    #[must_use]
    pub const fn from_parts(crouch: bool, sprint: bool, jump: bool) -> Self {
        let mut bits = 0;
        if crouch {
            bits |= Self::CROUCH;
        }
        if sprint {
            bits |= Self::SPRINT;
        }
        if jump {
            bits |= Self::JUMP;
        }
        Self(bits)
    }

    /// Crouch held.
    #[inline]
    #[must_use]
    pub const fn is_crouching(self) -> bool {
        self.0 & Self::CROUCH != 0
    }

    /// Sprint held. Crouch wins over sprint.
    #[inline]
    #[must_use]
    pub const fn is_sprinting(self) -> bool {
        self.0 & Self::SPRINT != 0 && !self.is_crouching()
    }

    /// Jump requested.
    #[inline]
    #[must_use]
    pub const fn jump_requested(self) -> bool {
        self.0 & Self::JUMP != 0
    }

    /// Same flags with the jump request consumed.
    #[inline]
    #[must_use]
    pub const fn without_jump(self) -> Self {
        Self(self.0 & !Self::JUMP)
    }
}

/// Marker for entities the server integrates itself (NPCs, items).
///
/// Players are not simulated; their position comes from validated client
/// reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Simulated;

impl Component for Simulated {
    const ID: u8 = 5;
}
