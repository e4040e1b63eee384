//! # System Scheduler
//!
//! Systems run once per tick in a fixed stage order:
//!
//! ```text
//! Input ──▶ Physics ──▶ Animation ──▶ Network
//! ```
//!
//! Within a stage, lower priority runs first; equal priorities keep
//! insertion order.

use crate::ecs::EntityStore;

/// Execution stage of a system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Turn held input into movement intent.
    Input,
    /// Integrate motion, resolve ground contact.
    Physics,
    /// Air state and other animation-driving state.
    Animation,
    /// Collect changes for broadcast.
    Network,
}

/// Per-tick timing handed to every system.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickContext {
    /// Tick number, starting at 1
    pub tick: u64,
    /// Seconds simulated by this tick
    pub dt: f32,
    /// Room clock in milliseconds
    pub now_ms: u64,
}

/// One unit of per-tick work over the entity store.
pub trait System: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Stage the system belongs to.
    fn stage(&self) -> Stage;

    /// Order within the stage. Lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// Runs the system for one tick.
    fn run(&mut self, store: &mut EntityStore, ctx: &TickContext);
}

/// Ordered list of systems.
#[derive(Default)]
pub struct Scheduler {
    systems: Vec<Box<dyn System>>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a system in stage/priority order.
    pub fn add(&mut self, system: impl System + 'static) -> &mut Self {
        let key = (system.stage(), system.priority());
        // After every existing system with an equal or smaller key.
        let at = self
            .systems
            .partition_point(|existing| (existing.stage(), existing.priority()) <= key);
        tracing::debug!(system = system.name(), stage = ?key.0, priority = key.1, "system registered");
        self.systems.insert(at, Box::new(system));
        self
    }

    /// Number of registered systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// True when no system is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// System names in execution order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.systems.iter().map(|s| s.name())
    }

    /// Runs every system once, in order.
    pub fn run(&mut self, store: &mut EntityStore, ctx: &TickContext) {
        for system in &mut self.systems {
            system.run(store, ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Probe {
        name: &'static str,
        stage: Stage,
        priority: i32,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl System for Probe {
        fn name(&self) -> &'static str {
            self.name
        }
        fn stage(&self) -> Stage {
            self.stage
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn run(&mut self, _store: &mut EntityStore, _ctx: &TickContext) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    #[test]
    fn test_stage_then_priority_then_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let probe = |name, stage, priority| Probe { name, stage, priority, log: Arc::clone(&log) };

        let mut scheduler = Scheduler::new();
        scheduler
            .add(probe("net", Stage::Network, 0))
            .add(probe("anim", Stage::Animation, 0))
            .add(probe("physics_late", Stage::Physics, 10))
            .add(probe("input", Stage::Input, 0))
            .add(probe("physics_a", Stage::Physics, 0))
            .add(probe("physics_b", Stage::Physics, 0));

        let expected = ["input", "physics_a", "physics_b", "physics_late", "anim", "net"];
        assert_eq!(scheduler.names().collect::<Vec<_>>(), expected);

        let mut store = EntityStore::new(1);
        scheduler.run(&mut store, &TickContext { tick: 1, dt: 0.05, now_ms: 50 });
        assert_eq!(*log.lock().unwrap(), expected);
    }
}
