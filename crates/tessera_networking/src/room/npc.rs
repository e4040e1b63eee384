//! Server-driven NPCs.
//!
//! An NPC idles for a random 2-5 s, walks to a random point within the
//! wander radius of its home, then idles again. Idle periods are room
//! timers owned by the NPC, so destroying it cancels them.

use rand::Rng;
use tessera_core::{EntityId, Position, Simulated, Velocity};
use tessera_shared::{EntityKind, Rotation, Vec3};

use super::Room;
use crate::timers::{TimerAction, TimerOwner};

/// Range of an idle period in milliseconds.
const IDLE_MS: std::ops::RangeInclusive<u64> = 2_000..=5_000;

/// Horizontal distance at which a target counts as reached.
const ARRIVAL_DISTANCE: f32 = 0.5;

/// Fraction of the world half-extent NPCs spawn within.
const SPAWN_SPREAD: f32 = 0.9;

/// What an NPC is doing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NpcMode {
    /// Standing still until its wander timer fires
    Idle,
    /// Walking toward a point
    Walking {
        /// Destination
        target: Vec3,
    },
}

/// AI state of one NPC.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NpcBrain {
    /// Point the NPC wanders around
    pub home: Vec3,
    /// Current behaviour
    pub mode: NpcMode,
}

impl Room {
    pub(super) fn spawn_npcs(&mut self) {
        let spread = self.grid.half_extent() * SPAWN_SPREAD;
        let ground = self.config.world.ground_height;
        for _ in 0..self.config.world.npc_count {
            let home = Vec3::new(
                self.rng.gen_range(-spread..=spread),
                ground,
                self.rng.gen_range(-spread..=spread),
            );
            let Some(npc) = self.spawn_entity(EntityKind::Npc, home) else {
                break;
            };
            self.store.add_component::<Simulated>(npc);
            self.npcs.insert(npc, NpcBrain { home, mode: NpcMode::Idle });
            self.schedule_idle(npc);
        }
    }

    fn schedule_idle(&mut self, npc: EntityId) {
        let due = self.now_ms + self.rng.gen_range(IDLE_MS);
        self.timers.schedule(TimerOwner::Entity(npc), due, TimerAction::NpcWander { npc });
    }

    /// An idle period ended: pick a new target.
    pub(super) fn npc_wander(&mut self, npc: EntityId) {
        if !self.store.is_alive(npc) {
            return;
        }
        let Some(home) = self.npcs.get(&npc).map(|brain| brain.home) else {
            return;
        };
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let radius = self.rng.gen_range(0.0..=self.config.gameplay.npc_wander_radius);
        let target = self.grid.clamp(Vec3::new(
            home.x + angle.cos() * radius,
            home.y,
            home.z + angle.sin() * radius,
        ));
        if let Some(brain) = self.npcs.get_mut(&npc) {
            brain.mode = NpcMode::Walking { target };
        }
    }

    /// Steers walking NPCs. Runs before the systems integrate velocity.
    pub(super) fn drive_npcs(&mut self) {
        let speed = self.config.gameplay.npc_speed;
        let dt = self.config.tick_seconds();
        let mut arrived = Vec::new();

        for (&npc, brain) in &mut self.npcs {
            let NpcMode::Walking { target } = brain.mode else {
                continue;
            };
            let (Some(Position(position)), Some(Velocity(velocity))) =
                (self.store.position(npc), self.store.velocity(npc))
            else {
                continue;
            };
            let (dx, dz) = (target.x - position.x, target.z - position.z);
            let distance = dx.hypot(dz);

            if distance <= ARRIVAL_DISTANCE {
                brain.mode = NpcMode::Idle;
                self.store.set_velocity(npc, Velocity::new(0.0, velocity.y, 0.0));
                arrived.push(npc);
                continue;
            }
            let step = speed.min(distance / dt);
            self.store.set_velocity(npc, Velocity::new(dx / distance * step, velocity.y, dz / distance * step));
            self.store.set_rotation(npc, Rotation::new(dx.atan2(dz), 0.0));
        }

        for npc in arrived {
            self.schedule_idle(npc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_shared::{ChunkId, DeltaType, ServerMessage, TesseraConfig};

    fn room_with_npcs(count: usize) -> Room {
        let mut config = TesseraConfig::default();
        config.world.npc_count = count;
        config.gameplay.items.clear();
        Room::new(config)
    }

    #[test]
    fn test_npcs_spawn_idle_with_timers() {
        let room = room_with_npcs(3);
        assert_eq!(room.npcs().len(), 3);
        for (&npc, brain) in room.npcs() {
            assert_eq!(brain.mode, NpcMode::Idle);
            assert!(room.store().has_component::<Simulated>(npc));
            assert!(room.timers().is_pending(TimerOwner::Entity(npc), TimerAction::NpcWander { npc }));
            assert!(room.registry().find_entity(npc).is_some());
        }
    }

    #[test]
    fn test_npc_walks_to_target_then_idles() {
        let mut room = room_with_npcs(1);
        let npc = *room.npcs().keys().next().unwrap();
        room.timers.cancel_owner(TimerOwner::Entity(npc));

        room.npc_wander(npc);
        let NpcMode::Walking { target } = room.npcs()[&npc].mode else {
            panic!("expected walking");
        };

        // Radius 12 at speed 2 takes at most 6 s.
        let mut now = 0;
        while room.npcs()[&npc].mode != NpcMode::Idle && now < 10_000 {
            now += 50;
            room.tick(now);
        }
        assert_eq!(room.npcs()[&npc].mode, NpcMode::Idle);
        let position = room.store().position(npc).unwrap().0;
        assert!((position.x - target.x).hypot(position.z - target.z) <= ARRIVAL_DISTANCE);
        assert_eq!(room.store().velocity(npc).unwrap().0.horizontal_length(), 0.0);
        assert!(room.timers().is_pending(TimerOwner::Entity(npc), TimerAction::NpcWander { npc }));
    }

    #[test]
    fn test_destroyed_npc_timer_cancelled() {
        let mut room = room_with_npcs(1);
        let npc = *room.npcs().keys().next().unwrap();
        let chunk = room.registry().find_entity(npc).unwrap();
        assert_eq!(room.registry().entity_count(chunk), 1);

        assert!(room.destroy_entity(npc));
        assert_eq!(room.timers().pending_for(TimerOwner::Entity(npc)), 0);
        assert!(room.npcs().is_empty());
        assert_eq!(room.registry().find_entity(npc), None);
        assert_eq!(room.registry().entity_count(chunk), 0);
        room.tick(10_000);
        assert!(!room.store().is_alive(npc));
    }

    #[test]
    fn test_npc_crossing_chunk_border_hands_off_once() {
        let mut room = room_with_npcs(0);
        let (west, east) = (ChunkId::new(0, 0), ChunkId::new(1, 0));
        let ground = room.config.world.ground_height;
        let npc = room.spawn_entity(EntityKind::Npc, Vec3::new(62.0, ground, 10.0)).unwrap();
        room.store.add_component::<Simulated>(npc);
        let target = Vec3::new(66.0, ground, 10.0);
        room.npcs.insert(npc, NpcBrain { home: target, mode: NpcMode::Walking { target } });
        assert_eq!(room.registry().find_entity(npc), Some(west));

        room.connect(1, 1).unwrap();
        let frame = serde_json::json!({
            "event": "chunk:subscribe",
            "data": { "chunks": ["0,0", "1,0"], "position": { "x": 0.0, "y": 0.0, "z": 0.0 } }
        });
        room.handle_message(1, &frame.to_string(), 0).unwrap();

        // 4 units at 2 u/s
        let mut handoffs = Vec::new();
        for now in (0..=3_000).step_by(50) {
            room.tick(now);
            for (session, message) in room.drain_outbox() {
                let ServerMessage::EntityDelta(delta) = message else {
                    continue;
                };
                handoffs.extend(
                    delta
                        .updates
                        .iter()
                        .filter(|u| u.delta_type == DeltaType::Handoff)
                        .map(|u| (session, delta.chunk_id, u.entity_id, u.handoff_to)),
                );
            }
        }

        assert_eq!(handoffs, vec![(1, east, npc.to_bits(), Some(east))]);
        assert_eq!(room.npcs()[&npc].mode, NpcMode::Idle);
        assert_eq!(room.registry().find_entity(npc), Some(east));
        assert_eq!(room.registry().entity_count(east), 1);
        // Only the player is left in the origin chunk.
        assert_eq!(room.registry().entity_count(west), 1);
    }
}
