//! In-memory transport for tests and local simulations.
//!
//! Every node joins a [`MemoryNetwork`] and receives an [`Inbox`]. To talk
//! to another node it holds a [`MemoryPeer`], which implements [`Peer`] and
//! keeps that node's [`PeerState`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, RwLock};

use mansync_core::Manifest;

use crate::error::{Result, SyncError};
use crate::peer::{Peer, PeerId, PeerState};

/// Capacity of each node's inbox.
const INBOX_CAPACITY: usize = 1000;

/// A message in flight.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The sending node.
    pub from: PeerId,
    /// Encoded message bytes.
    pub bytes: Bytes,
}

/// Shared state for the memory transport network.
pub struct MemoryNetwork {
    /// Sender channels for each node.
    senders: RwLock<HashMap<PeerId, mpsc::Sender<Envelope>>>,
}

impl MemoryNetwork {
    /// Create a new memory network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node to the network and return its inbox.
    ///
    /// Joining again with the same ID replaces the previous inbox.
    pub async fn join(&self, node_id: PeerId) -> Inbox {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.senders.write().await.insert(node_id, tx);
        Inbox {
            node_id,
            receiver: rx,
        }
    }

    /// Detach a node; later sends to it fail.
    pub async fn leave(&self, node_id: &PeerId) {
        self.senders.write().await.remove(node_id);
    }

    /// Whether a node is attached.
    pub async fn is_connected(&self, node_id: &PeerId) -> bool {
        self.senders.read().await.contains_key(node_id)
    }

    /// A handle through which `local` talks to `remote`.
    pub fn peer(self: &Arc<Self>, local: PeerId, remote: PeerId) -> MemoryPeer {
        MemoryPeer {
            local,
            remote,
            network: Arc::clone(self),
            state: Mutex::new(PeerState::new(remote)),
            can_send: AtomicBool::new(true),
            fail_next_send: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
        }
    }

    async fn deliver(&self, from: PeerId, to: &PeerId, bytes: Bytes) -> Result<()> {
        let sender = self
            .senders
            .read()
            .await
            .get(to)
            .cloned()
            .ok_or_else(|| SyncError::Transport(format!("peer {} not found", to)))?;
        sender
            .send(Envelope { from, bytes })
            .await
            .map_err(|_| SyncError::Transport(format!("peer {} disconnected", to)))
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
        }
    }
}

/// Receiving end of a node's connection to the network.
pub struct Inbox {
    node_id: PeerId,
    receiver: mpsc::Receiver<Envelope>,
}

impl Inbox {
    /// The node this inbox belongs to.
    pub fn node_id(&self) -> PeerId {
        self.node_id
    }

    /// Wait for the next envelope. `None` once the network drops the node.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Wait for the next envelope, giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Envelope> {
        tokio::time::timeout(timeout, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    /// Take an envelope if one is already queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }
}

/// In-memory [`Peer`] implementation.
pub struct MemoryPeer {
    local: PeerId,
    remote: PeerId,
    network: Arc<MemoryNetwork>,
    state: Mutex<PeerState>,
    can_send: AtomicBool,
    fail_next_send: AtomicBool,
    sent: AtomicUsize,
}

impl MemoryPeer {
    /// The node sending through this handle.
    pub fn local_id(&self) -> PeerId {
        self.local
    }

    /// Allow or block sending.
    pub fn set_can_send(&self, can_send: bool) {
        self.can_send.store(can_send, Ordering::SeqCst);
    }

    /// Make the next `send` fail without delivering anything.
    pub fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    /// Number of messages delivered so far.
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Snapshot of the peer state.
    pub async fn state(&self) -> PeerState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl Peer for MemoryPeer {
    fn peer_id(&self) -> PeerId {
        self.remote
    }

    async fn last_known_manifest(&self) -> Option<Manifest> {
        self.state.lock().await.last_known_manifest.clone()
    }

    async fn set_last_known_manifest(&self, manifest: Option<Manifest>) -> Result<()> {
        self.state.lock().await.last_known_manifest = manifest;
        Ok(())
    }

    fn can_send(&self) -> bool {
        self.can_send.load(Ordering::SeqCst)
    }

    async fn send(&self, bytes: Bytes) -> Result<()> {
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Transport("injected send failure".into()));
        }
        self.network.deliver(self.local, &self.remote, bytes).await?;
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
