//! Built-in systems, one per stage.
//!
//! Only entities carrying [`Simulated`] are moved by the server. Players
//! are positioned by validated client reports; for them these systems only
//! derive ground contact and air state.

use tessera_shared::{AirConfig, ChunkId, WorldGrid};

use crate::air::{AirInputs, AirTracker};
use crate::ecs::{Component, EntityStore, InputFlags, Position, Simulated, Velocity};
use crate::schedule::{Stage, System, TickContext};

/// Horizontal speed caps per stance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeedLimits {
    /// Walking
    pub walk: f32,
    /// Sprint held
    pub sprint: f32,
    /// Crouch held
    pub crouch: f32,
}

impl Default for SpeedLimits {
    fn default() -> Self {
        Self {
            walk: tessera_shared::constants::WALK_SPEED,
            sprint: tessera_shared::constants::SPRINT_SPEED,
            crouch: tessera_shared::constants::CROUCH_SPEED,
        }
    }
}

impl SpeedLimits {
    /// Cap for the given input.
    #[must_use]
    pub fn for_input(&self, input: InputFlags) -> f32 {
        if input.is_crouching() {
            self.crouch
        } else if input.is_sprinting() {
            self.sprint
        } else {
            self.walk
        }
    }
}

/// Caps the horizontal velocity of simulated entities by stance.
pub struct InputSystem {
    limits: SpeedLimits,
}

impl InputSystem {
    /// Creates the system.
    #[must_use]
    pub const fn new(limits: SpeedLimits) -> Self {
        Self { limits }
    }
}

impl System for InputSystem {
    fn name(&self) -> &'static str {
        "input"
    }

    fn stage(&self) -> Stage {
        Stage::Input
    }

    fn run(&mut self, store: &mut EntityStore, _ctx: &TickContext) {
        let mask = Simulated::mask() | Velocity::mask() | InputFlags::mask();
        for idx in 0..store.capacity() {
            if !store.slot_matches(idx, mask) {
                continue;
            }
            let Some(input) = store.inputs.get(idx) else { continue };
            let cap = self.limits.for_input(input);
            let Some(velocity) = store.velocities.get_mut(idx) else { continue };
            let capped = velocity.0.clamp_horizontal(cap);
            if capped != velocity.0 {
                velocity.0 = capped;
                store.mark_dirty_index(idx);
            }
        }
    }
}

/// Ground plane and gravity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhysicsSettings {
    /// Downward acceleration
    pub gravity: f32,
    /// Height of the ground plane
    pub ground_height: f32,
    /// Distance above ground still counted as contact
    pub ground_epsilon: f32,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            gravity: tessera_shared::constants::GRAVITY,
            ground_height: tessera_shared::constants::GROUND_HEIGHT,
            ground_epsilon: tessera_shared::constants::GROUND_EPSILON,
        }
    }
}

/// Integrates simulated entities and resolves ground contact for all.
///
/// Contact velocity survives the touchdown step so the air-state machine
/// can see the impact; it is zeroed on the following step.
pub struct PhysicsSystem {
    settings: PhysicsSettings,
}

impl PhysicsSystem {
    /// Creates the system.
    #[must_use]
    pub const fn new(settings: PhysicsSettings) -> Self {
        Self { settings }
    }
}

impl System for PhysicsSystem {
    fn name(&self) -> &'static str {
        "physics"
    }

    fn stage(&self) -> Stage {
        Stage::Physics
    }

    fn run(&mut self, store: &mut EntityStore, ctx: &TickContext) {
        let PhysicsSettings { gravity, ground_height, ground_epsilon } = self.settings;
        let simulated_mask = Simulated::mask() | Velocity::mask();

        for idx in 0..store.capacity() {
            if !store.slot_matches(idx, Position::mask() | AirTracker::mask()) {
                continue;
            }
            let simulated = store.slot_matches(idx, simulated_mask);
            let (Some(Position(mut pos)), Some(Velocity(mut vel)), Some(was_grounded)) =
                (store.positions.get(idx), store.velocities.get(idx), store.grounded.get(idx))
            else {
                continue;
            };
            let (old_pos, old_vel) = (pos, vel);

            if simulated {
                if was_grounded && vel.y < 0.0 {
                    vel.y = 0.0;
                }
                if !was_grounded || vel.y > 0.0 {
                    vel.y -= gravity * ctx.dt;
                }
                pos += vel * ctx.dt;
                if pos.y < ground_height {
                    pos.y = ground_height;
                }
            }
            let grounded = pos.y <= ground_height + ground_epsilon;

            if pos != old_pos || vel != old_vel || grounded != was_grounded {
                store.positions.set(idx, Position(pos));
                store.velocities.set(idx, Velocity(vel));
                store.grounded.set(idx, grounded);
                store.mark_dirty_index(idx);
            }
        }
    }
}

/// Steps every entity's air-state tracker.
///
/// Consumes the jump request flag. Simulated entities receive the jump
/// impulse here; players jump on their own client.
pub struct AirStateSystem {
    config: AirConfig,
    jump_velocity: f32,
}

impl AirStateSystem {
    /// Creates the system.
    #[must_use]
    pub const fn new(config: AirConfig, jump_velocity: f32) -> Self {
        Self { config, jump_velocity }
    }
}

impl System for AirStateSystem {
    fn name(&self) -> &'static str {
        "air_state"
    }

    fn stage(&self) -> Stage {
        Stage::Animation
    }

    fn run(&mut self, store: &mut EntityStore, ctx: &TickContext) {
        let mask = AirTracker::mask() | Position::mask() | Velocity::mask();
        for idx in 0..store.capacity() {
            if !store.slot_matches(idx, mask) {
                continue;
            }
            let (Some(tracker), Some(pos), Some(mut vel), Some(grounded), Some(input)) = (
                store.air.get(idx),
                store.positions.get(idx),
                store.velocities.get(idx),
                store.grounded.get(idx),
                store.inputs.get(idx),
            ) else {
                continue;
            };

            let step = tracker.step(
                &self.config,
                &AirInputs {
                    grounded,
                    y: pos.0.y,
                    vertical_velocity: vel.0.y,
                    jump_pressed: input.jump_requested(),
                    dt: ctx.dt,
                },
            );
            store.air.set(idx, step.tracker);
            if input.jump_requested() {
                store.inputs.set(idx, input.without_jump());
            }
            if step.jumped && store.slot_matches(idx, Simulated::mask()) {
                vel.0.y = self.jump_velocity;
                store.velocities.set(idx, vel);
                store.mark_dirty_index(idx);
            }
            if let Some(transition) = step.transition {
                tracing::trace!(slot = idx, from = ?transition.from, to = ?transition.to, "air state");
                store.record_transition(idx, transition);
                store.mark_dirty_index(idx);
            }
        }
    }
}

/// Keeps simulated entities inside the world and records chunk crossings.
pub struct ChunkTrackingSystem {
    grid: WorldGrid,
}

impl ChunkTrackingSystem {
    /// Creates the system.
    #[must_use]
    pub const fn new(grid: WorldGrid) -> Self {
        Self { grid }
    }
}

impl System for ChunkTrackingSystem {
    fn name(&self) -> &'static str {
        "chunk_tracking"
    }

    fn stage(&self) -> Stage {
        Stage::Network
    }

    fn run(&mut self, store: &mut EntityStore, _ctx: &TickContext) {
        let mask = Simulated::mask() | Position::mask();
        for idx in 0..store.capacity() {
            if !store.slot_matches(idx, mask) {
                continue;
            }
            let (Some(Position(pos)), Some(recorded)) = (store.positions.get(idx), store.chunks.get(idx)) else {
                continue;
            };
            let inside = self.grid.clamp(pos);
            if inside != pos {
                store.positions.set(idx, Position(inside));
                store.mark_dirty_index(idx);
            }
            let current: ChunkId = self.grid.chunk_of(inside);
            if current != recorded {
                store.chunks.set(idx, current);
                store.record_chunk_move(idx, recorded, current);
            }
        }
    }
}
