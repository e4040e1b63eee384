//! # Room Tick Loop
//!
//! Fixed-timestep driver for a room.
//!
//! The loop owns the room clock: [`TickLoop::now_ms`] is the wall time since
//! the loop started, and it is what the room stamps on `serverTime` and
//! schedules timers against. When the host falls behind, at most
//! [`MAX_CATCH_UP`] ticks run back to back; the rest of the backlog is
//! dropped and counted.

use std::time::{Duration, Instant};

/// Ticks run back to back before the backlog is dropped.
pub const MAX_CATCH_UP: u32 = 5;

/// Fixed-timestep tick controller.
pub struct TickLoop {
    tick_duration: Duration,
    started: Instant,
    last_poll: Instant,
    accumulator: Duration,
    tick_count: u64,
    burst: u32,
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickStats {
    /// Fastest tick
    pub min_tick_us: u64,
    /// Slowest tick
    pub max_tick_us: u64,
    /// Rolling average
    pub avg_tick_us: u64,
    /// Ticks that overran one tick period
    pub late_ticks: u64,
    /// Ticks dropped from the backlog
    pub skipped_ticks: u64,
    /// Ticks measured
    pub total_ticks: u64,
}

impl TickStats {
    fn fresh(period: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: duration_us(period),
            late_ticks: 0,
            skipped_ticks: 0,
            total_ticks: 0,
        }
    }
}

impl TickLoop {
    /// Creates a loop ticking `tick_rate` times per second. A rate of zero
    /// is treated as one.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        let now = Instant::now();
        Self {
            tick_duration,
            started: now,
            last_poll: now,
            accumulator: Duration::ZERO,
            tick_count: 0,
            burst: 0,
            stats: TickStats::fresh(tick_duration),
        }
    }

    /// True when a tick is due. Call until it returns false.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last_poll);
        self.last_poll = now;

        if self.accumulator < self.tick_duration {
            self.burst = 0;
            return false;
        }
        if self.burst >= MAX_CATCH_UP {
            let backlog = self.accumulator.as_micros() / self.tick_duration.as_micros().max(1);
            self.stats.skipped_ticks += u64::try_from(backlog).unwrap_or(u64::MAX);
            self.accumulator = Duration::ZERO;
            self.burst = 0;
            tracing::warn!(skipped = backlog, "tick loop fell behind, dropping backlog");
            return false;
        }
        true
    }

    /// Starts a tick. Returns the start time for [`TickLoop::end_tick`].
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.accumulator = self.accumulator.saturating_sub(self.tick_duration);
        self.tick_count += 1;
        self.burst += 1;
        Instant::now()
    }

    /// Finishes a tick and records its duration.
    pub fn end_tick(&mut self, start: Instant) {
        let elapsed = start.elapsed();
        let us = duration_us(elapsed);

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + us) / 16;

        if elapsed > self.tick_duration {
            self.stats.late_ticks += 1;
            tracing::debug!(tick = self.tick_count, took_us = us, "late tick");
        }
    }

    /// Sleeps until the next tick is due. Spins for the last half
    /// millisecond.
    pub fn wait_for_next_tick(&self) {
        let due = self.tick_duration.saturating_sub(self.accumulator);
        let deadline = self.last_poll + due;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining > Duration::from_millis(1) {
            std::thread::sleep(remaining - Duration::from_micros(500));
        }
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }

    /// Room clock: milliseconds since the loop was created.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Ticks started.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Target tick length.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Clears statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TickStats::fresh(self.tick_duration);
    }
}

fn duration_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}
