//! # Air-State Machine
//!
//! Per-entity tracker that turns raw ground-contact signals into stable
//! Grounded / Jumping / Falling / Landing states.
//!
//! Contact from the physics layer flickers: slopes, step edges and
//! floating-point noise all drop contact for a frame or two. Every
//! transition is therefore gated on time, velocity and distance, never on
//! contact alone.
//!
//! ```text
//!            jump                   touchdown
//! GROUNDED ────────▶ JUMPING ───────────────────▶ LANDING ──▶ GROUNDED
//!    │                  │ long descent               ▲
//!    │ gated fall       ▼                            │ touchdown
//!    └────────────────▶ FALLING ─────────────────────┘
//! ```
//!
//! [`AirTracker::step`] is pure: it takes the previous tracker and returns
//! the next one, so the same inputs always give the same states.

use tessera_shared::{AirConfig, AirState};

use crate::ecs::Component;

/// Inputs for one step of the machine.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AirInputs {
    /// Ground contact this step
    pub grounded: bool,
    /// Current height
    pub y: f32,
    /// Current vertical velocity (negative is down)
    pub vertical_velocity: f32,
    /// Jump pressed this step
    pub jump_pressed: bool,
    /// Seconds since the previous step
    pub dt: f32,
}

/// A state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AirTransition {
    /// State before
    pub from: AirState,
    /// State after
    pub to: AirState,
}

/// Result of [`AirTracker::step`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AirStep {
    /// Tracker after the step
    pub tracker: AirTracker,
    /// State change, if any
    pub transition: Option<AirTransition>,
    /// A jump fired this step; the caller applies the impulse
    pub jumped: bool,
}

/// Timers and memory of the air-state machine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AirTracker {
    state: AirState,
    /// Time spent in the current state
    state_time: f32,
    /// Continuous time without contact
    airborne_time: f32,
    /// Continuous time with contact
    grounded_time: f32,
    /// Continuous time moving down while airborne
    descent_time: f32,
    /// Highest Y since the last contact
    apex_y: f32,
    since_jump: f32,
    jump_executed: bool,
    /// Airborne time accumulated since the executed jump began
    jump_airborne_time: f32,
    /// Remaining lifetime of a buffered press, zero when empty
    jump_buffer: f32,
}

impl Default for AirTracker {
    fn default() -> Self {
        Self {
            state: AirState::Grounded,
            state_time: 0.0,
            airborne_time: 0.0,
            grounded_time: 0.0,
            descent_time: 0.0,
            apex_y: 0.0,
            since_jump: f32::INFINITY,
            jump_executed: false,
            jump_airborne_time: 0.0,
            jump_buffer: 0.0,
        }
    }
}

impl Component for AirTracker {
    const ID: u8 = 4;
}

impl AirTracker {
    /// Tracker resting on ground at height `y`.
    #[must_use]
    pub fn grounded_at(y: f32) -> Self {
        Self { apex_y: y, ..Self::default() }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> AirState {
        self.state
    }

    /// Grounded state.
    #[inline]
    #[must_use]
    pub const fn is_grounded(&self) -> bool {
        matches!(self.state, AirState::Grounded)
    }

    /// Jumping state.
    #[inline]
    #[must_use]
    pub const fn is_jumping(&self) -> bool {
        matches!(self.state, AirState::Jumping)
    }

    /// Falling state.
    #[inline]
    #[must_use]
    pub const fn is_falling(&self) -> bool {
        matches!(self.state, AirState::Falling)
    }

    /// Landing state.
    #[inline]
    #[must_use]
    pub const fn is_landing(&self) -> bool {
        matches!(self.state, AirState::Landing)
    }

    /// A jump fired and has not been consumed yet.
    #[inline]
    #[must_use]
    pub const fn jump_executed(&self) -> bool {
        self.jump_executed
    }

    /// A press is waiting in the buffer.
    #[inline]
    #[must_use]
    pub fn has_buffered_jump(&self) -> bool {
        self.jump_buffer > 0.0
    }

    /// Drop below the apex at height `y`.
    #[inline]
    #[must_use]
    pub fn fall_distance(&self, y: f32) -> f32 {
        (self.apex_y - y).max(0.0)
    }

    /// Advances the machine by one step.
    #[must_use]
    pub fn step(&self, config: &AirConfig, inputs: &AirInputs) -> AirStep {
        let mut next = *self;
        let dt = inputs.dt.max(0.0);
        let vy = inputs.vertical_velocity;

        next.state_time += dt;
        next.since_jump += dt;
        if inputs.grounded {
            next.grounded_time += dt;
            next.airborne_time = 0.0;
            next.descent_time = 0.0;
            next.apex_y = inputs.y;
        } else {
            next.airborne_time += dt;
            next.grounded_time = 0.0;
            next.apex_y = next.apex_y.max(inputs.y);
            next.descent_time = if vy < 0.0 { next.descent_time + dt } else { 0.0 };
            if next.jump_executed {
                next.jump_airborne_time += dt;
            }
        }

        if next.jump_executed
            && next.grounded_time >= config.min_grounded_time
            && next.jump_airborne_time >= config.min_airborne_time
        {
            next.jump_executed = false;
            next.jump_airborne_time = 0.0;
        }

        next.jump_buffer = (next.jump_buffer - dt).max(0.0);

        let on_ground_state = matches!(self.state, AirState::Grounded | AirState::Landing);
        let can_jump = on_ground_state
            && (inputs.jump_pressed || next.jump_buffer > 0.0)
            && !next.jump_executed
            && next.since_jump >= config.jump_cooldown
            && (inputs.grounded || next.airborne_time <= config.coyote_time);

        if inputs.jump_pressed && !can_jump && (!inputs.grounded || !on_ground_state) {
            next.jump_buffer = config.jump_buffer_time;
        }

        let fall_distance = next.fall_distance(inputs.y);
        let gated_fall = !inputs.grounded
            && -vy > config.fall_velocity_threshold
            && next.airborne_time > config.fall_delay
            && fall_distance > config.fall_distance_threshold;
        // Contact counted from state entry, so the take-off step never forces a landing.
        let contact_in_state = next.grounded_time.min(next.state_time);

        let target = match self.state {
            AirState::Grounded | AirState::Landing if can_jump => Some(AirState::Jumping),
            AirState::Grounded => gated_fall.then_some(AirState::Falling),
            AirState::Jumping => {
                let soft_touchdown = vy.abs() < config.landing_velocity_threshold && vy <= -config.apex_epsilon;
                if inputs.grounded && (soft_touchdown || contact_in_state >= config.forced_landing_timeout) {
                    Some(AirState::Landing)
                } else if !inputs.grounded
                    && next.descent_time >= config.long_fall_time
                    && fall_distance >= config.long_fall_distance
                {
                    Some(AirState::Falling)
                } else {
                    None
                }
            }
            AirState::Falling => (inputs.grounded
                && (vy.abs() < config.landing_velocity_threshold
                    || contact_in_state >= config.forced_landing_timeout))
                .then_some(AirState::Landing),
            AirState::Landing => {
                if gated_fall {
                    Some(AirState::Falling)
                } else if next.state_time >= config.landing_duration {
                    Some(AirState::Grounded)
                } else {
                    None
                }
            }
        };

        let jumped = target == Some(AirState::Jumping);
        if jumped {
            next.jump_executed = true;
            next.jump_airborne_time = 0.0;
            next.since_jump = 0.0;
            next.jump_buffer = 0.0;
        }

        let transition = target.filter(|to| *to != self.state).map(|to| {
            next.state = to;
            next.state_time = 0.0;
            AirTransition { from: self.state, to }
        });

        AirStep { tracker: next, transition, jumped }
    }
}
