//! # Room Timers
//!
//! Delayed actions on the room clock: item respawns, pickup cooldowns,
//! NPC idle periods.
//!
//! Every timer has an owner. Destroying an entity or disconnecting a player
//! cancels everything the owner scheduled, in the same call. Timers that do
//! fire must still re-check that their target is alive before acting.

use std::collections::{BTreeMap, HashMap};

use tessera_core::EntityId;
use tessera_shared::PlayerId;

/// Who a timer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerOwner {
    /// A connected player
    Player(PlayerId),
    /// A world item spawn point, by index
    ItemSpawn(usize),
    /// A live entity
    Entity(EntityId),
}

/// What happens when a timer fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerAction {
    /// Put a fresh item back on its spawn point.
    RespawnItem {
        /// Spawn point index
        spawn: usize,
    },
    /// The player may pick up again.
    PickupCooldown,
    /// An idle NPC picks a new wander target.
    NpcWander {
        /// The NPC
        npc: EntityId,
    },
}

/// A timer that came due.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timer {
    /// Owner it was scheduled under
    pub owner: TimerOwner,
    /// Room time it was due at
    pub due_ms: u64,
    /// Action to run
    pub action: TimerAction,
}

/// Handle returned by [`TimerQueue::schedule`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey {
    due_ms: u64,
    seq: u64,
}

/// Due-time ordered queue with an owner index.
#[derive(Default)]
pub struct TimerQueue {
    queue: BTreeMap<TimerKey, Timer>,
    by_owner: HashMap<TimerOwner, Vec<TimerKey>>,
    next_seq: u64,
}

impl TimerQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules an action. Timers due at the same time fire in scheduling
    /// order.
    pub fn schedule(&mut self, owner: TimerOwner, due_ms: u64, action: TimerAction) -> TimerKey {
        let key = TimerKey { due_ms, seq: self.next_seq };
        self.next_seq += 1;
        self.queue.insert(key, Timer { owner, due_ms, action });
        self.by_owner.entry(owner).or_default().push(key);
        key
    }

    /// Cancels one timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        let Some(timer) = self.queue.remove(&key) else {
            return false;
        };
        self.unlink(timer.owner, key);
        true
    }

    /// Cancels everything an owner scheduled. Returns how many were pending.
    pub fn cancel_owner(&mut self, owner: TimerOwner) -> usize {
        let keys = self.by_owner.remove(&owner).unwrap_or_default();
        keys.iter().filter(|key| self.queue.remove(*key).is_some()).count()
    }

    /// True when the owner has a pending timer with this action.
    #[must_use]
    pub fn is_pending(&self, owner: TimerOwner, action: TimerAction) -> bool {
        self.by_owner
            .get(&owner)
            .is_some_and(|keys| keys.iter().any(|k| self.queue.get(k).is_some_and(|t| t.action == action)))
    }

    /// Number of pending timers owned by `owner`.
    #[must_use]
    pub fn pending_for(&self, owner: TimerOwner) -> usize {
        self.by_owner.get(&owner).map_or(0, Vec::len)
    }

    /// Removes and returns every timer due at or before `now_ms`, earliest
    /// first.
    pub fn pop_due(&mut self, now_ms: u64) -> Vec<Timer> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().due_ms > now_ms {
                break;
            }
            let key = *entry.key();
            let timer = entry.remove();
            self.unlink(timer.owner, key);
            due.push(timer);
        }
        due
    }

    /// Pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn unlink(&mut self, owner: TimerOwner, key: TimerKey) {
        if let Some(keys) = self.by_owner.get_mut(&owner) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.by_owner.remove(&owner);
            }
        }
    }
}
