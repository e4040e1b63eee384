//! # Room Server
//!
//! Glue between the transport and one [`Room`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ROOM SERVER                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  events   ┌──────────────┐                 │
//! │  │ Transport    │──────────▶│ Tick thread  │                 │
//! │  │ (tokio)      │◀──────────│ (fixed rate) │                 │
//! │  └──────────────┘  commands └──────┬───────┘                 │
//! │                                    │                         │
//! │                          ┌─────────▼─────────┐               │
//! │                          │ Room              │               │
//! │                          │ - entity store    │               │
//! │                          │ - chunk registry  │               │
//! │                          │ - sessions        │               │
//! │                          └───────────────────┘               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both channels are bounded. Inbound frames are applied between ticks on
//! the tick thread, so the room is never touched concurrently.

mod transport;

pub use transport::{Transport, TransportError, MAX_FRAME_BYTES};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tessera_shared::{ConfigError, SessionId, TesseraConfig};

use crate::room::{Room, RoomError};
use crate::tick::TickLoop;

pub use tessera_shared::constants::CHANNEL_CAPACITY;

/// Seconds between two status log lines.
const STATS_INTERVAL_SECS: u64 = 5;

/// Server startup or runtime failure.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Runtime setup failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Event from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A client connected.
    Connected {
        /// Transport connection id
        session: SessionId,
    },
    /// A client sent one frame.
    Frame {
        /// Sender
        session: SessionId,
        /// Raw frame text
        text: String,
    },
    /// A client's connection closed.
    Disconnected {
        /// The closed connection
        session: SessionId,
    },
}

/// Command to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkCommand {
    /// Write one frame.
    Send {
        /// Target connection
        session: SessionId,
        /// Encoded message
        frame: String,
    },
    /// Close a connection.
    Close {
        /// Connection to close
        session: SessionId,
    },
    /// Stop accepting and close everything.
    Shutdown,
}

/// Transport-side channel ends.
pub struct ServerChannels {
    /// Where the transport pushes events
    pub events: Sender<NetworkEvent>,
    /// Where the transport pulls commands
    pub commands: Receiver<NetworkCommand>,
}

/// Drives a room from transport events at a fixed tick rate.
pub struct RoomServer {
    room: Room,
    event_rx: Receiver<NetworkEvent>,
    command_tx: Sender<NetworkCommand>,
    running: Arc<AtomicBool>,
    tick: AtomicU64,
    dropped_frames: AtomicU64,
}

impl RoomServer {
    /// Builds the room and the channel pair.
    #[must_use]
    pub fn new(config: TesseraConfig) -> (Self, ServerChannels) {
        let (event_tx, event_rx) = bounded(CHANNEL_CAPACITY);
        let (command_tx, command_rx) = bounded(CHANNEL_CAPACITY);
        let server = Self {
            room: Room::new(config),
            event_rx,
            command_tx,
            running: Arc::new(AtomicBool::new(false)),
            tick: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
        };
        (server, ServerChannels { events: event_tx, commands: command_rx })
    }

    /// Ticks run so far.
    #[inline]
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Outbound frames dropped because the command channel was full.
    #[inline]
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// True while [`RoomServer::run`] is looping.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Flag that stops [`RoomServer::run`] when cleared.
    #[must_use]
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// The room.
    #[must_use]
    pub const fn room(&self) -> &Room {
        &self.room
    }

    /// One server step: apply queued events, tick the room, flush output.
    pub fn tick(&mut self, now_ms: u64) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_event(event, now_ms);
        }
        self.room.tick(now_ms);
        self.flush();
        self.tick.fetch_add(1, Ordering::Relaxed);
    }

    fn handle_event(&mut self, event: NetworkEvent, now_ms: u64) {
        match event {
            NetworkEvent::Connected { session } => {
                // Authentication happens upstream; the connection id names the player.
                if let Err(err) = self.room.connect(session, session) {
                    tracing::warn!(session, %err, "connection refused");
                    self.send(NetworkCommand::Close { session });
                }
            }
            NetworkEvent::Frame { session, text } => {
                if let Err(err) = self.room.handle_message(session, &text, now_ms) {
                    tracing::debug!(session, %err, "frame from unknown session");
                }
            }
            NetworkEvent::Disconnected { session } => match self.room.disconnect(session) {
                Ok(()) | Err(RoomError::UnknownSession(_)) => {}
                Err(err) => tracing::warn!(session, %err, "disconnect failed"),
            },
        }
    }

    fn flush(&mut self) {
        for (session, message) in self.room.drain_outbox() {
            match message.encode() {
                Ok(frame) => self.send(NetworkCommand::Send { session, frame }),
                Err(err) => tracing::error!(session, event = message.event_name(), %err, "encode failed"),
            }
        }
    }

    fn send(&self, command: NetworkCommand) {
        match self.command_tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    tracing::warn!(dropped, "command channel full, dropping frames");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("transport gone, command dropped");
            }
        }
    }

    /// Runs at the configured rate until the running flag is cleared or
    /// `duration` elapses, then tells the transport to shut down.
    pub fn run(&mut self, duration: Option<Duration>) {
        let mut tick_loop = TickLoop::new(self.room.config().server.tick_rate);
        let started = Instant::now();
        let stats_every = u64::from(self.room.config().server.tick_rate) * STATS_INTERVAL_SECS;
        let mut last_stats = 0;

        self.running.store(true, Ordering::Relaxed);
        tracing::info!(tick_rate = self.room.config().server.tick_rate, "room server running");

        while self.is_running() {
            if duration.is_some_and(|limit| started.elapsed() >= limit) {
                break;
            }
            tick_loop.wait_for_next_tick();
            while tick_loop.should_tick() {
                let start = tick_loop.begin_tick();
                self.tick(tick_loop.now_ms());
                tick_loop.end_tick(start);

                let ticks = tick_loop.tick_count();
                if ticks - last_stats >= stats_every {
                    last_stats = ticks;
                    let stats = tick_loop.stats();
                    tracing::info!(
                        tick = ticks,
                        sessions = self.room.sessions().len(),
                        entities = self.room.store().alive_count(),
                        loaded_chunks = self.room.registry().loaded_chunks(),
                        avg_tick_us = stats.avg_tick_us,
                        late_ticks = stats.late_ticks,
                        skipped_ticks = stats.skipped_ticks,
                        dropped_frames = self.dropped_frames(),
                        "status"
                    );
                }
            }
        }

        self.running.store(false, Ordering::Relaxed);
        self.send(NetworkCommand::Shutdown);
        let stats = tick_loop.stats();
        tracing::info!(
            ticks = stats.total_ticks,
            avg_tick_us = stats.avg_tick_us,
            max_tick_us = stats.max_tick_us,
            late_ticks = stats.late_ticks,
            "room server stopped"
        );
    }
}
