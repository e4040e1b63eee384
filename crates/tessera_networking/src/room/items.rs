//! World items and the pickup interaction.

use tessera_core::{EntityId, EntityStore};
use tessera_shared::protocol::InteractRequest;
use tessera_shared::{EntityKind, ErrorCode, ItemSpawn, PlayerId, Vec3};

use super::Room;
use crate::timers::{TimerAction, TimerOwner};

/// Interaction types the room understands.
const PICKUP: &str = "pickup";

/// A pickup spawn point and whatever currently lies on it.
#[derive(Clone, Debug, PartialEq)]
pub struct WorldItem {
    /// Spawn point index, stable for the room's lifetime
    pub id: usize,
    /// Item type name
    pub item_type: String,
    /// Where the item appears
    pub position: Vec3,
    /// The item entity, `None` while waiting to respawn
    pub entity: Option<EntityId>,
}

impl WorldItem {
    /// Empty spawn points for the configured list.
    #[must_use]
    pub fn from_config(spawns: &[ItemSpawn]) -> Vec<Self> {
        spawns
            .iter()
            .enumerate()
            .map(|(id, spawn)| Self {
                id,
                item_type: spawn.item_type.clone(),
                position: spawn.position,
                entity: None,
            })
            .collect()
    }
}

/// Why an interaction was refused.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum InteractError {
    /// Target is not alive in the named chunk.
    #[error("entity {0} not found")]
    EntityNotFound(u64),

    /// Target is alive but cannot be picked up.
    #[error("entity {0} is not an item")]
    NotAnItem(u64),

    /// The player picked something up too recently.
    #[error("pickup on cooldown")]
    OnCooldown,

    /// The player is too far from the target.
    #[error("target is {distance:.1} away, reach is {range:.1}")]
    OutOfRange {
        /// Canonical distance
        distance: f32,
        /// Allowed reach
        range: f32,
    },

    /// Interaction type is not known.
    #[error("unknown interaction {0:?}")]
    Unknown(String),
}

impl InteractError {
    /// Code sent in `chunk:error`.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::EntityNotFound(_) => ErrorCode::EntityNotFound,
            Self::OutOfRange { .. } => ErrorCode::OutOfRange,
            Self::NotAnItem(_) | Self::OnCooldown | Self::Unknown(_) => ErrorCode::InvalidInteraction,
        }
    }
}

impl Room {
    pub(super) fn spawn_items(&mut self) {
        for spawn in 0..self.items.len() {
            self.respawn_item(spawn);
        }
    }

    /// Places a fresh entity on a spawn point unless one is still there.
    pub(super) fn respawn_item(&mut self, spawn: usize) {
        let Some(item) = self.items.get(spawn) else {
            tracing::error!(spawn, "respawn for unknown item spawn");
            return;
        };
        if item.entity.is_some_and(|entity| self.store.is_alive(entity)) {
            return;
        }
        let position = item.position;
        let entity = self.spawn_entity(EntityKind::Item, position);
        if let Some(item) = self.items.get_mut(spawn) {
            item.entity = entity;
            tracing::debug!(spawn, item_type = %item.item_type, ?entity, "item spawned");
        }
    }

    /// Runs an `entity-interact` request for a player.
    pub(super) fn interact(
        &mut self,
        player: PlayerId,
        actor: EntityId,
        request: &InteractRequest,
    ) -> Result<(), InteractError> {
        let target = EntityId::from_bits(request.entity_id);
        if !self.store.is_alive(target) || self.registry.find_entity(target) != Some(request.chunk_id) {
            return Err(InteractError::EntityNotFound(request.entity_id));
        }
        if request.interaction_type != PICKUP {
            return Err(InteractError::Unknown(request.interaction_type.clone()));
        }
        self.pickup(player, actor, target)
    }

    fn pickup(&mut self, player: PlayerId, actor: EntityId, target: EntityId) -> Result<(), InteractError> {
        let Some(spawn) = self.items.iter().position(|item| item.entity == Some(target)) else {
            return Err(InteractError::NotAnItem(target.to_bits()));
        };
        if self.timers.is_pending(TimerOwner::Player(player), TimerAction::PickupCooldown) {
            return Err(InteractError::OnCooldown);
        }
        let distance = distance_between(&self.store, actor, target).ok_or(InteractError::EntityNotFound(target.to_bits()))?;
        let range = self.config.gameplay.pickup_range;
        if distance > range {
            return Err(InteractError::OutOfRange { distance, range });
        }

        self.destroy_entity(target);
        let item = &mut self.items[spawn];
        item.entity = None;
        let item_type = item.item_type.clone();

        let now = self.now_ms;
        self.timers.schedule(
            TimerOwner::ItemSpawn(spawn),
            now + self.config.gameplay.item_respawn_ms,
            TimerAction::RespawnItem { spawn },
        );
        self.timers.schedule(
            TimerOwner::Player(player),
            now + self.config.gameplay.pickup_cooldown_ms,
            TimerAction::PickupCooldown,
        );
        tracing::info!(player, spawn, %item_type, "item picked up");
        Ok(())
    }
}

fn distance_between(store: &EntityStore, a: EntityId, b: EntityId) -> Option<f32> {
    Some(store.position(a)?.0.distance(store.position(b)?.0))
}
