//! Structural entity changes collected between two flushes.
//!
//! Field changes come from the store's dirty set. Creates, moves and deletes
//! are recorded here as they happen and folded so that one entity yields at
//! most one structural change per tick.

use std::collections::BTreeMap;

use tessera_core::EntityId;
use tessera_shared::ChunkId;

/// Net structural change of one entity since the last flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PendingChange {
    /// Appeared in the chunk.
    Created(ChunkId),
    /// Owned by `from` at the last flush, by `to` now.
    Moved { from: ChunkId, to: ChunkId },
    /// Destroyed; observers of the chunk knew it.
    Deleted(ChunkId),
}

#[derive(Default)]
pub(crate) struct PendingDeltas {
    changes: BTreeMap<EntityId, PendingChange>,
}

impl PendingDeltas {
    pub(crate) fn created(&mut self, entity: EntityId, chunk: ChunkId) {
        self.changes.insert(entity, PendingChange::Created(chunk));
    }

    pub(crate) fn moved(&mut self, entity: EntityId, from: ChunkId, to: ChunkId) {
        let folded = match self.changes.get(&entity).copied() {
            None => Some(PendingChange::Moved { from, to }),
            Some(PendingChange::Created(_)) => Some(PendingChange::Created(to)),
            // Back where observers last saw it: a plain update.
            Some(PendingChange::Moved { from: first, .. }) if first == to => None,
            Some(PendingChange::Moved { from: first, .. }) => Some(PendingChange::Moved { from: first, to }),
            Some(deleted @ PendingChange::Deleted(_)) => Some(deleted),
        };
        match folded {
            Some(change) => self.changes.insert(entity, change),
            None => self.changes.remove(&entity),
        };
    }

    pub(crate) fn deleted(&mut self, entity: EntityId, chunk: ChunkId) {
        match self.changes.get(&entity).copied() {
            // Nobody saw it.
            Some(PendingChange::Created(_)) => {
                self.changes.remove(&entity);
            }
            Some(PendingChange::Moved { from, .. }) => {
                self.changes.insert(entity, PendingChange::Deleted(from));
            }
            Some(PendingChange::Deleted(_)) => {}
            None => {
                self.changes.insert(entity, PendingChange::Deleted(chunk));
            }
        }
    }

    pub(crate) fn take(&mut self) -> BTreeMap<EntityId, PendingChange> {
        std::mem::take(&mut self.changes)
    }
}
