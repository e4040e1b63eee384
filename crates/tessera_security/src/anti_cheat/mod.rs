//! # Movement Validation
//!
//! Server-side speed check for client-reported positions.
//!
//! ## Detection Method
//!
//! - **Speed**: horizontal distance from the last accepted position,
//!   divided by the room time elapsed since it was accepted.
//! - **Vertical speed**: height change over the same interval, bounded
//!   separately by a terminal-fall limit so real falls still pass.
//!
//! A rejected update leaves the anchor unchanged, so the next update is
//! measured against the same accepted point.

use std::collections::HashMap;

use tessera_shared::{AntiCheatSettings, PlayerId, Vec3};

use crate::validation::Rejection;

/// Outcome of [`MovementValidator::check`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MovementVerdict {
    /// Apply the update. `speed` is the measured horizontal speed.
    Accepted {
        /// Units per second since the previous accepted position
        speed: f32,
    },
    /// Drop the update; canonical state must not change.
    Rejected(Rejection),
}

impl MovementVerdict {
    /// True for [`MovementVerdict::Accepted`].
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Per-player tracking state.
#[derive(Clone, Copy, Debug)]
struct PlayerTrack {
    /// Last accepted position.
    anchor: Vec3,
    /// Room time of the last accepted position.
    anchor_ms: u64,
    /// Rejections since the last accept.
    consecutive_rejections: u32,
    /// Rejections over the whole session.
    total_rejections: u32,
    flagged: bool,
}

/// Speed validator keyed by player.
pub struct MovementValidator {
    settings: AntiCheatSettings,
    players: HashMap<PlayerId, PlayerTrack>,
}

impl MovementValidator {
    /// Creates a validator.
    #[must_use]
    pub fn new(settings: AntiCheatSettings) -> Self {
        Self { settings, players: HashMap::new() }
    }

    /// Fastest accepted horizontal speed, tolerance included.
    #[must_use]
    pub fn speed_limit(&self) -> f32 {
        self.settings.max_speed * self.settings.tolerance
    }

    /// Fastest accepted vertical speed, tolerance included.
    #[must_use]
    pub fn vertical_speed_limit(&self) -> f32 {
        self.settings.max_vertical_speed * self.settings.tolerance
    }

    /// Sets the anchor without checking, e.g. on spawn or a server-side
    /// teleport. Violation counters are kept.
    pub fn reset_anchor(&mut self, player: PlayerId, position: Vec3, now_ms: u64) {
        let track = self.players.entry(player).or_insert(PlayerTrack {
            anchor: position,
            anchor_ms: now_ms,
            consecutive_rejections: 0,
            total_rejections: 0,
            flagged: false,
        });
        track.anchor = position;
        track.anchor_ms = now_ms;
    }

    /// Checks a reported position against the last accepted one.
    ///
    /// The first report for an unknown player is accepted and becomes the
    /// anchor.
    pub fn check(&mut self, player: PlayerId, position: Vec3, now_ms: u64) -> MovementVerdict {
        let horizontal_limit = self.speed_limit();
        let vertical_limit = self.vertical_speed_limit();
        let flag_threshold = self.settings.flag_threshold;

        if !self.players.contains_key(&player) {
            self.reset_anchor(player, position, now_ms);
            return MovementVerdict::Accepted { speed: 0.0 };
        }
        let Some(track) = self.players.get_mut(&player) else {
            return MovementVerdict::Accepted { speed: 0.0 };
        };

        // Same-millisecond reports are measured over one millisecond.
        let elapsed_s = now_ms.saturating_sub(track.anchor_ms).max(1) as f32 / 1000.0;
        let delta = position - track.anchor;
        let speed = delta.horizontal_length() / elapsed_s;
        let vertical_speed = delta.y.abs() / elapsed_s;

        let (speed, limit) = if vertical_speed > vertical_limit {
            (vertical_speed, vertical_limit)
        } else {
            (speed, horizontal_limit)
        };
        if speed <= limit {
            track.anchor = position;
            track.anchor_ms = now_ms;
            track.consecutive_rejections = 0;
            return MovementVerdict::Accepted { speed };
        }

        track.consecutive_rejections += 1;
        track.total_rejections += 1;
        tracing::debug!(player, speed, limit, streak = track.consecutive_rejections, "movement rejected");

        if track.consecutive_rejections >= flag_threshold && !track.flagged {
            track.flagged = true;
            tracing::warn!(
                player,
                speed,
                limit,
                total = track.total_rejections,
                "player flagged for repeated speed violations"
            );
        }

        MovementVerdict::Rejected(Rejection::TooFast { speed, limit })
    }

    /// Drops all state for a player. Called on disconnect.
    pub fn forget(&mut self, player: PlayerId) -> bool {
        self.players.remove(&player).is_some()
    }

    /// Whether the player crossed the flag threshold this session.
    #[must_use]
    pub fn is_flagged(&self, player: PlayerId) -> bool {
        self.players.get(&player).is_some_and(|t| t.flagged)
    }

    /// Total rejections this session.
    #[must_use]
    pub fn violations(&self, player: PlayerId) -> u32 {
        self.players.get(&player).map_or(0, |t| t.total_rejections)
    }

    /// Last accepted position.
    #[must_use]
    pub fn anchor(&self, player: PlayerId) -> Option<Vec3> {
        self.players.get(&player).map(|t| t.anchor)
    }

    /// Number of players with state.
    #[must_use]
    pub fn tracked_players(&self) -> usize {
        self.players.len()
    }
}

impl Default for MovementValidator {
    fn default() -> Self {
        Self::new(AntiCheatSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> MovementValidator {
        MovementValidator::new(AntiCheatSettings {
            max_speed: 10.0,
            max_vertical_speed: 50.0,
            tolerance: 1.5,
            flag_threshold: 3,
        })
    }

    #[test]
    fn test_normal_movement_accepted() {
        let mut v = validator();
        v.reset_anchor(1, Vec3::ZERO, 0);

        // 5 u/s
        assert!(v.check(1, Vec3::new(0.25, 0.0, 0.0), 50).is_accepted());
        assert!(v.check(1, Vec3::new(0.5, 0.0, 0.0), 100).is_accepted());
        assert_eq!(v.anchor(1), Some(Vec3::new(0.5, 0.0, 0.0)));
        assert_eq!(v.violations(1), 0);
    }

    #[test]
    fn test_teleport_rejected_and_anchor_kept() {
        let mut v = validator();
        v.reset_anchor(1, Vec3::new(31.0, 0.0, 31.0), 0);

        let verdict = v.check(1, Vec3::new(131.0, 0.0, 31.0), 50);
        assert!(matches!(verdict, MovementVerdict::Rejected(Rejection::TooFast { .. })));
        assert_eq!(v.anchor(1), Some(Vec3::new(31.0, 0.0, 31.0)));
        assert_eq!(v.violations(1), 1);
    }

    #[test]
    fn test_implausible_vertical_jump_rejected() {
        let mut v = validator();
        v.reset_anchor(1, Vec3::ZERO, 0);

        // 10 000 u/s straight up
        let verdict = v.check(1, Vec3::new(0.0, 500.0, 0.0), 50);
        let MovementVerdict::Rejected(Rejection::TooFast { speed, limit }) = verdict else {
            panic!("expected rejection, got {verdict:?}");
        };
        assert!((speed - 10_000.0).abs() < 1.0);
        assert_eq!(limit, 75.0);
        assert_eq!(v.anchor(1), Some(Vec3::ZERO));
        assert_eq!(v.violations(1), 1);
    }

    #[test]
    fn test_fall_within_terminal_speed_accepted() {
        let mut v = validator();
        v.reset_anchor(1, Vec3::new(0.0, 100.0, 0.0), 0);

        // 60 u/s down, above run speed but under 50 * 1.5
        assert!(v.check(1, Vec3::new(0.0, 97.0, 0.0), 50).is_accepted());
        // 100 u/s down
        assert!(!v.check(1, Vec3::new(0.0, 92.0, 0.0), 100).is_accepted());
        assert_eq!(v.anchor(1), Some(Vec3::new(0.0, 97.0, 0.0)));
    }

    #[test]
    fn test_flagged_after_consecutive_rejections() {
        let mut v = validator();
        v.reset_anchor(7, Vec3::ZERO, 0);

        for i in 1..=2 {
            assert!(!v.check(7, Vec3::new(500.0, 0.0, 0.0), i * 50).is_accepted());
            assert!(!v.is_flagged(7));
        }
        assert!(!v.check(7, Vec3::new(500.0, 0.0, 0.0), 150).is_accepted());
        assert!(v.is_flagged(7));
    }

    #[test]
    fn test_accept_resets_streak() {
        let mut v = validator();
        v.reset_anchor(7, Vec3::ZERO, 0);
        v.check(7, Vec3::new(500.0, 0.0, 0.0), 50);
        v.check(7, Vec3::new(500.0, 0.0, 0.0), 100);
        assert!(v.check(7, Vec3::new(0.5, 0.0, 0.0), 150).is_accepted());
        v.check(7, Vec3::new(500.0, 0.0, 0.0), 200);
        v.check(7, Vec3::new(500.0, 0.0, 0.0), 250);
        assert!(!v.is_flagged(7));
        assert_eq!(v.violations(7), 4);
    }

    #[test]
    fn test_wait_then_teleport_passes() {
        // Single-anchor limitation: enough elapsed time legitimises any distance.
        let mut v = validator();
        v.reset_anchor(1, Vec3::ZERO, 0);
        assert!(v.check(1, Vec3::new(150.0, 0.0, 0.0), 10_000).is_accepted());
    }

    #[test]
    fn test_forget_and_unknown_player() {
        let mut v = validator();
        assert!(v.check(9, Vec3::new(5.0, 0.0, 5.0), 0).is_accepted());
        assert_eq!(v.tracked_players(), 1);
        assert!(v.forget(9));
        assert!(!v.forget(9));
        assert_eq!(v.anchor(9), None);
    }
}
