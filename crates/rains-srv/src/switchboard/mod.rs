//! Switchboard: TCP connections to peers, one reader and one writer task
//! per peer, exchanging length-prefixed frames.
//!
//! Outbound frames go through a bounded per-peer queue; a full queue is an
//! error for the sender rather than unbounded buffering. Inbound frames
//! from every peer share one bounded queue, so slow processing pushes back
//! on the readers.

pub mod frame;

use rains_core::{wire, Message};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::SrvError;
use frame::Frame;

/// How long a new connection may take to complete the handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Sending side of the transport, as seen by the engine and dispatcher.
pub trait Outbound: Send + Sync {
    /// Queue `message` for `peer` without blocking.
    fn send(&self, peer: &str, message: Message) -> crate::Result<()>;
}

/// Something that happened on a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete frame, not yet decoded.
    Frame { peer: String, bytes: Vec<u8> },
    /// A frame over the size limit, skipped unread.
    Oversized { peer: String, size: usize },
    /// The connection ended.
    Closed { peer: String },
}

#[derive(Debug)]
struct Outbox {
    /// Identifies the connection that owns this queue.
    id: u64,
    sender: mpsc::Sender<Vec<u8>>,
}

#[derive(Debug)]
struct Shared {
    node_name: String,
    peers: BTreeMap<String, SocketAddr>,
    max_frame: usize,
    outbox_capacity: usize,
    next_id: AtomicU64,
    outboxes: Mutex<HashMap<String, Outbox>>,
    inbox: mpsc::Sender<Inbound>,
    runtime: Handle,
}

impl Shared {
    fn outboxes(&self) -> crate::Result<MutexGuard<'_, HashMap<String, Outbox>>> {
        self.outboxes
            .lock()
            .map_err(|_| SrvError::Internal("switchboard lock poisoned".into()))
    }

    /// Open a fresh outbound queue for `peer`, replacing any previous one.
    fn open_outbox(&self, peer: &str) -> crate::Result<(u64, mpsc::Receiver<Vec<u8>>)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.outbox_capacity);
        self.outboxes()?
            .insert(peer.to_string(), Outbox { id, sender });
        Ok((id, receiver))
    }

    /// Drop `peer`'s queue if it still belongs to connection `id`.
    fn close_outbox(&self, peer: &str, id: u64) {
        if let Ok(mut outboxes) = self.outboxes() {
            if outboxes.get(peer).is_some_and(|o| o.id == id) {
                outboxes.remove(peer);
            }
        }
    }

    /// Queue `bytes` for `peer`. A configured peer without a connection is
    /// dialed; its queue accepts frames before the connection is up.
    fn send_bytes(self: &Arc<Self>, peer: &str, bytes: Vec<u8>) -> crate::Result<()> {
        let sender = {
            let mut outboxes = self.outboxes()?;
            let open = outboxes
                .get(peer)
                .filter(|outbox| !outbox.sender.is_closed())
                .map(|outbox| outbox.sender.clone());
            match open {
                Some(sender) => sender,
                None => {
                    let addr = *self.peers.get(peer).ok_or_else(|| {
                        SrvError::Switchboard(format!("no connection to peer '{peer}'"))
                    })?;
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let (sender, receiver) = mpsc::channel(self.outbox_capacity);
                    outboxes.insert(
                        peer.to_string(),
                        Outbox {
                            id,
                            sender: sender.clone(),
                        },
                    );
                    debug!(peer = %peer, addr = %addr, "dialing peer");
                    self.runtime
                        .spawn(connect(Arc::clone(self), peer.to_string(), addr, id, receiver));
                    sender
                }
            }
        };
        sender.try_send(bytes).map_err(|e| match e {
            TrySendError::Full(_) => {
                warn!(peer = %peer, "outbound queue full, dropping message");
                SrvError::Switchboard(format!("outbound queue for '{peer}' is full"))
            }
            TrySendError::Closed(_) => {
                SrvError::Switchboard(format!("connection to '{peer}' is closed"))
            }
        })
    }
}

/// Peer connection manager.
#[derive(Debug)]
pub struct Switchboard {
    shared: Arc<Shared>,
    inbox: tokio::sync::Mutex<mpsc::Receiver<Inbound>>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Switchboard {
    /// Bind the listener and start accepting connections.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn bind(config: &ServerConfig) -> crate::Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|e| SrvError::Switchboard(format!("bind {}: {e}", config.listen)))?;
        let local_addr = listener.local_addr()?;
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity);

        let shared = Arc::new(Shared {
            node_name: config.node_name.clone(),
            peers: config.peers.clone(),
            max_frame: config.limits.max_message_size,
            outbox_capacity: config.outbox_capacity,
            next_id: AtomicU64::new(0),
            outboxes: Mutex::new(HashMap::new()),
            inbox: inbox_tx,
            runtime: Handle::current(),
        });
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        info!(addr = %local_addr, node = %config.node_name, "switchboard listening");

        Ok(Self {
            shared,
            inbox: tokio::sync::Mutex::new(inbox_rx),
            local_addr,
            accept_task,
        })
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next inbound event from any peer.
    pub async fn receive(&self) -> Option<Inbound> {
        self.inbox.lock().await.recv().await
    }

    /// Close the connection to `peer`. Queued frames are still written.
    pub fn close(&self, peer: &str) -> crate::Result<bool> {
        Ok(self.shared.outboxes()?.remove(peer).is_some())
    }

    /// Names of peers with an open outbound queue.
    pub fn peers(&self) -> crate::Result<Vec<String>> {
        let mut names: Vec<_> = self.shared.outboxes()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

impl Outbound for Switchboard {
    fn send(&self, peer: &str, message: Message) -> crate::Result<()> {
        let bytes = wire::encode(&message)?;
        self.shared.send_bytes(peer, bytes)
    }
}

impl Drop for Switchboard {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(addr = %addr, "accepted connection");
                tokio::spawn(accepted(Arc::clone(&shared), stream, addr));
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

async fn handshake(
    shared: &Shared,
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
) -> crate::Result<String> {
    let exchange = async {
        frame::write_hello(writer, &shared.node_name).await?;
        frame::read_hello(reader).await
    };
    tokio::time::timeout(HANDSHAKE_TIMEOUT, exchange)
        .await
        .map_err(|_| SrvError::Switchboard("handshake timed out".into()))?
}

async fn accepted(shared: Arc<Shared>, stream: TcpStream, addr: SocketAddr) {
    let (mut reader, mut writer) = stream.into_split();
    let peer = match handshake(&shared, &mut reader, &mut writer).await {
        Ok(peer) => peer,
        Err(e) => {
            warn!(addr = %addr, error = %e, "handshake failed");
            return;
        }
    };
    let (id, receiver) = match shared.open_outbox(&peer) {
        Ok(outbox) => outbox,
        Err(e) => {
            warn!(peer = %peer, error = %e, "cannot register peer");
            return;
        }
    };
    info!(peer = %peer, addr = %addr, "peer connected");
    serve(shared, peer, id, reader, writer, receiver).await;
}

async fn connect(
    shared: Arc<Shared>,
    peer: String,
    addr: SocketAddr,
    id: u64,
    receiver: mpsc::Receiver<Vec<u8>>,
) {
    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(peer = %peer, addr = %addr, error = %e, "failed to connect to peer");
            closed(&shared, peer, id).await;
            return;
        }
    };
    let (mut reader, mut writer) = stream.into_split();
    match handshake(&shared, &mut reader, &mut writer).await {
        Ok(announced) if announced != peer => {
            warn!(peer = %peer, announced = %announced, "peer announced a different name");
        }
        Ok(_) => {}
        Err(e) => {
            warn!(peer = %peer, addr = %addr, error = %e, "handshake failed");
            closed(&shared, peer, id).await;
            return;
        }
    }
    info!(peer = %peer, addr = %addr, "connected to peer");
    serve(shared, peer, id, reader, writer, receiver).await;
}

/// Run a connection until either side ends it.
async fn serve(
    shared: Arc<Shared>,
    peer: String,
    id: u64,
    mut reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    receiver: mpsc::Receiver<Vec<u8>>,
) {
    let writer_task = tokio::spawn(write_loop(peer.clone(), writer, receiver));
    loop {
        let event = match frame::read_frame(&mut reader, shared.max_frame).await {
            Ok(Some(Frame::Payload(bytes))) => Inbound::Frame {
                peer: peer.clone(),
                bytes,
            },
            Ok(Some(Frame::Oversized(size))) => {
                debug!(peer = %peer, size, "oversized frame");
                Inbound::Oversized {
                    peer: peer.clone(),
                    size,
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(peer = %peer, error = %e, "read failed");
                break;
            }
        };
        if shared.inbox.send(event).await.is_err() {
            break;
        }
    }
    writer_task.abort();
    info!(peer = %peer, "peer disconnected");
    closed(&shared, peer, id).await;
}

async fn closed(shared: &Shared, peer: String, id: u64) {
    shared.close_outbox(&peer, id);
    // The receiving side may already be gone during shutdown.
    let _ = shared.inbox.send(Inbound::Closed { peer }).await;
}

async fn write_loop(
    peer: String,
    mut writer: OwnedWriteHalf,
    mut receiver: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(bytes) = receiver.recv().await {
        if let Err(e) = frame::write_frame(&mut writer, &bytes).await {
            debug!(peer = %peer, error = %e, "write failed");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
