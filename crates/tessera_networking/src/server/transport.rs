//! Newline-delimited JSON over TCP.
//!
//! Each connection runs one task that reads frames and writes queued
//! output. Frames go to the tick thread over the bounded event channel;
//! commands come back through a pump thread that routes them to the
//! connection tasks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tessera_shared::SessionId;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify};

use super::{NetworkCommand, NetworkEvent};

pub use tessera_shared::constants::MAX_FRAME_BYTES;

/// Outbound frames buffered per connection before output is dropped.
const OUTBOUND_QUEUE: usize = 1024;

/// Transport failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Accepting a connection failed.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),
}

/// Write side of one connection, as seen by the command pump.
struct Route {
    frames: mpsc::Sender<String>,
    close: Arc<Notify>,
}

type Routes = Arc<Mutex<HashMap<SessionId, Route>>>;

/// Accepts connections and moves frames between sockets and the channels.
pub struct Transport {
    listener: TcpListener,
    events: Sender<NetworkEvent>,
    routes: Routes,
    next_session: Arc<AtomicU64>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Transport {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// [`TransportError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: &str, events: Sender<NetworkEvent>) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr: addr.to_string(), source })?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            listener,
            events,
            routes: Arc::new(Mutex::new(HashMap::new())),
            next_session: Arc::new(AtomicU64::new(1)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Address actually bound.
    ///
    /// # Errors
    ///
    /// Whatever the OS reports.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.routes.lock().len()
    }

    /// Starts the thread that routes commands to connections. It exits on
    /// [`NetworkCommand::Shutdown`] or when the server drops its sender,
    /// and in both cases stops the accept loop.
    ///
    /// # Errors
    ///
    /// If the thread cannot be spawned.
    pub fn spawn_command_pump(
        &self,
        commands: Receiver<NetworkCommand>,
    ) -> std::io::Result<std::thread::JoinHandle<()>> {
        let routes = Arc::clone(&self.routes);
        let shutdown = self.shutdown_tx.clone();
        std::thread::Builder::new()
            .name("tessera-commands".to_string())
            .spawn(move || pump_commands(&routes, &commands, &shutdown))
    }

    /// Accept loop. Returns once shutdown is signalled.
    ///
    /// # Errors
    ///
    /// [`TransportError::Accept`] if the listener fails.
    pub async fn run(self) -> Result<(), TransportError> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        match self.local_addr() {
            Ok(addr) => tracing::info!(%addr, "listening"),
            Err(err) => tracing::warn!(%err, "listening on unknown address"),
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.map_err(TransportError::Accept)?;
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::debug!(%peer, %err, "set_nodelay failed");
                    }
                    self.open(stream, peer);
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        let open: Vec<SessionId> = self.routes.lock().keys().copied().collect();
        tracing::info!(open = open.len(), "transport shutting down");
        Ok(())
    }

    fn open(&self, stream: TcpStream, peer: SocketAddr) {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (frames_tx, frames_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let close = Arc::new(Notify::new());
        self.routes.lock().insert(session, Route { frames: frames_tx, close: Arc::clone(&close) });

        if !forward(&self.events, NetworkEvent::Connected { session }) {
            tracing::warn!(session, %peer, "event channel full, refusing connection");
            self.routes.lock().remove(&session);
            return;
        }
        tracing::info!(session, %peer, "connection accepted");

        let events = self.events.clone();
        let routes = Arc::clone(&self.routes);
        let shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            serve_connection(session, stream, frames_rx, &close, shutdown, &events).await;
            routes.lock().remove(&session);
            // Disconnects are never dropped; block off the runtime until the channel has space.
            let _ = tokio::task::spawn_blocking(move || events.send(NetworkEvent::Disconnected { session })).await;
            tracing::info!(session, "connection closed");
        });
    }
}

/// Pushes an event without blocking the runtime. False when the channel is
/// full or gone.
fn forward(events: &Sender<NetworkEvent>, event: NetworkEvent) -> bool {
    events.try_send(event).is_ok()
}

async fn serve_connection(
    session: SessionId,
    stream: TcpStream,
    mut outbound: mpsc::Receiver<String>,
    close: &Notify,
    mut shutdown: watch::Receiver<bool>,
    events: &Sender<NetworkEvent>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut pending = Vec::new();

    loop {
        let limit = (MAX_FRAME_BYTES + 2).saturating_sub(pending.len()) as u64;
        let mut limited = (&mut reader).take(limit);
        tokio::select! {
            read = limited.read_until(b'\n', &mut pending) => {
                match read {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!(session, %err, "read failed");
                        break;
                    }
                }
                if pending.last() != Some(&b'\n') {
                    if pending.len() > MAX_FRAME_BYTES {
                        tracing::warn!(session, "frame too long, closing");
                        break;
                    }
                    continue;
                }
                let text = frame_text(&pending);
                pending.clear();
                if text.len() > MAX_FRAME_BYTES {
                    tracing::warn!(session, "frame too long, closing");
                    break;
                }
                if text.is_empty() {
                    continue;
                }
                if !forward(events, NetworkEvent::Frame { session, text }) {
                    tracing::warn!(session, "event channel full, frame dropped");
                }
            }
            out = outbound.recv() => {
                let Some(mut frame) = out else { break };
                frame.push('\n');
                if let Err(err) = writer.write_all(frame.as_bytes()).await {
                    tracing::debug!(session, %err, "write failed");
                    break;
                }
            }
            () = close.notified() => break,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

/// Strips the line terminator. Invalid UTF-8 is passed on lossily so the
/// room answers it with `chunk:error`.
fn frame_text(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

fn pump_commands(
    routes: &Mutex<HashMap<SessionId, Route>>,
    commands: &Receiver<NetworkCommand>,
    shutdown: &watch::Sender<bool>,
) {
    while let Ok(command) = commands.recv() {
        match command {
            NetworkCommand::Send { session, frame } => {
                let routes = routes.lock();
                let Some(route) = routes.get(&session) else {
                    continue;
                };
                if route.frames.try_send(frame).is_err() {
                    tracing::warn!(session, "slow client, frame dropped");
                }
            }
            NetworkCommand::Close { session } => {
                if let Some(route) = routes.lock().get(&session) {
                    route.close.notify_one();
                }
            }
            NetworkCommand::Shutdown => break,
        }
    }
    let _ = shutdown.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    async fn start() -> (SocketAddr, Receiver<NetworkEvent>, Sender<NetworkCommand>) {
        let (event_tx, event_rx) = crossbeam_channel::bounded(64);
        let (command_tx, command_rx) = crossbeam_channel::bounded(64);
        let transport = Transport::bind("127.0.0.1:0", event_tx).await.unwrap();
        let addr = transport.local_addr().unwrap();
        let _pump = transport.spawn_command_pump(command_rx).unwrap();
        let _accept = tokio::spawn(transport.run());
        (addr, event_rx, command_tx)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_frames_in_and_out() {
        let (addr, events, commands) = start().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();

        let Ok(NetworkEvent::Connected { session }) = events.recv_timeout(WAIT) else {
            panic!("expected connect");
        };

        writer.write_all(b"{\"event\":\"x\"}\r\n\n").await.unwrap();
        assert_eq!(
            events.recv_timeout(WAIT).unwrap(),
            NetworkEvent::Frame { session, text: "{\"event\":\"x\"}".to_string() }
        );

        commands.send(NetworkCommand::Send { session, frame: "hello".to_string() }).unwrap();
        let mut lines = BufReader::new(reader).lines();
        let line = tokio::time::timeout(WAIT, lines.next_line()).await.unwrap().unwrap();
        assert_eq!(line.as_deref(), Some("hello"));

        drop(writer);
        drop(lines);
        assert_eq!(events.recv_timeout(WAIT).unwrap(), NetworkEvent::Disconnected { session });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_command_disconnects() {
        let (addr, events, commands) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let Ok(NetworkEvent::Connected { session }) = events.recv_timeout(WAIT) else {
            panic!("expected connect");
        };

        commands.send(NetworkCommand::Close { session }).unwrap();
        assert_eq!(events.recv_timeout(WAIT).unwrap(), NetworkEvent::Disconnected { session });

        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(WAIT, stream.read(&mut buf)).await.unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_oversized_frame_closes_connection() {
        let (addr, events, _commands) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let Ok(NetworkEvent::Connected { session }) = events.recv_timeout(WAIT) else {
            panic!("expected connect");
        };

        let big = vec![b'a'; MAX_FRAME_BYTES + 10];
        let _ = stream.write_all(&big).await;
        assert_eq!(events.recv_timeout(WAIT).unwrap(), NetworkEvent::Disconnected { session });
    }

    #[test]
    fn test_frame_text_strips_terminators() {
        assert_eq!(frame_text(b"abc\r\n"), "abc");
        assert_eq!(frame_text(b"abc\n"), "abc");
        assert_eq!(frame_text(&[0xff, b'\n']), "\u{fffd}");
    }
}
