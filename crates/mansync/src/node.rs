//! The SyncNode: one object store reconciling with many peers.
//!
//! A node owns a [`SyncEngine`] over its data source and a registry of
//! peers. It routes inbound bytes to the engine on behalf of the sending
//! peer, and drives outbound sync rounds across all peers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use mansync_core::{Digest, Manifest, Object};
use mansync_store::{DataSource, MergeOutcome};
use mansync_sync::{EngineConfig, Inbox, Peer, PeerId, SyncEngine, SyncError};

use crate::error::{NodeError, Result};

/// Configuration for a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Engine configuration.
    pub engine: EngineConfig,
    /// How long an inbox must stay quiet before pumping stops.
    pub idle_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            idle_timeout: Duration::from_millis(200),
        }
    }
}

impl NodeConfig {
    /// Set the engine configuration.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set the idle timeout used by [`SyncNode::pump_until_idle`].
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Result of syncing with every registered peer.
#[derive(Debug, Default)]
pub struct SyncAllReport {
    /// Peers a message was sent to.
    pub sent: Vec<PeerId>,
    /// Peers that needed nothing.
    pub idle: Vec<PeerId>,
    /// Peers whose round failed.
    pub failed: Vec<(PeerId, SyncError)>,
}

impl SyncAllReport {
    /// Whether every peer's round succeeded.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of draining an inbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Envelopes processed.
    pub handled: usize,
    /// Replies sent in response.
    pub replies: usize,
    /// Envelopes that failed (bad bytes, unknown sender, failed round).
    pub errors: usize,
}

impl PumpReport {
    fn absorb(&mut self, other: PumpReport) {
        self.handled += other.handled;
        self.replies += other.replies;
        self.errors += other.errors;
    }
}

/// One object store reconciling with a set of peers.
pub struct SyncNode<D: DataSource> {
    id: PeerId,
    engine: SyncEngine<D>,
    config: NodeConfig,
    peers: RwLock<HashMap<PeerId, Arc<dyn Peer>>>,
}

impl<D: DataSource> SyncNode<D> {
    /// Create a node over `source`.
    pub fn new(id: PeerId, source: Arc<D>, config: NodeConfig) -> Self {
        Self {
            id,
            engine: SyncEngine::with_config(source, config.engine.clone()),
            config,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// This node's identity.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// The data source being reconciled.
    pub fn source(&self) -> &Arc<D> {
        self.engine.source()
    }

    /// The underlying engine.
    pub fn engine(&self) -> &SyncEngine<D> {
        &self.engine
    }

    /// The node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local data
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a local object.
    pub async fn insert(&self, object: Object) -> Result<MergeOutcome> {
        Ok(self.source().insert_or_merge(object).await?)
    }

    /// Current manifest.
    pub async fn manifest(&self) -> Result<Manifest> {
        Ok(self.source().current_manifest().await?)
    }

    /// Current manifest digest.
    pub async fn manifest_digest(&self) -> Result<Digest> {
        Ok(self.source().current_manifest_digest().await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Peer registry
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a peer, replacing any peer with the same ID.
    pub async fn add_peer(&self, peer: Arc<dyn Peer>) -> Option<Arc<dyn Peer>> {
        let peer_id = peer.peer_id();
        debug!(node = %self.id, peer = %peer_id, "adding peer");
        self.peers.write().await.insert(peer_id, peer)
    }

    /// Unregister a peer.
    pub async fn remove_peer(&self, peer_id: &PeerId) -> Option<Arc<dyn Peer>> {
        let removed = self.peers.write().await.remove(peer_id);
        if removed.is_some() {
            self.engine.forget_peer(peer_id).await;
            debug!(node = %self.id, peer = %peer_id, "removed peer");
        }
        removed
    }

    /// Registered peer IDs, in ascending order.
    pub async fn peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Look up a registered peer.
    pub async fn peer(&self, peer_id: &PeerId) -> Result<Arc<dyn Peer>> {
        self.peers
            .read()
            .await
            .get(peer_id)
            .cloned()
            .ok_or(NodeError::UnknownPeer(*peer_id))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one sync round with a single peer.
    pub async fn sync_peer(&self, peer_id: &PeerId, force: bool) -> Result<bool> {
        let peer = self.peer(peer_id).await?;
        Ok(self.engine.sync_with_peer(peer.as_ref(), force).await?)
    }

    /// Run one sync round with every registered peer.
    ///
    /// A failing peer is recorded in the report; the remaining peers are
    /// still synced.
    pub async fn sync_all(&self, force: bool) -> SyncAllReport {
        let peers: Vec<Arc<dyn Peer>> = {
            let registry = self.peers.read().await;
            let mut peers: Vec<_> = registry.values().cloned().collect();
            peers.sort_by_key(|p| p.peer_id());
            peers
        };

        let mut report = SyncAllReport::default();
        for peer in peers {
            let peer_id = peer.peer_id();
            match self.engine.sync_with_peer(peer.as_ref(), force).await {
                Ok(true) => report.sent.push(peer_id),
                Ok(false) => report.idle.push(peer_id),
                Err(e) => {
                    warn!(node = %self.id, peer = %peer_id, error = %e, "sync failed");
                    report.failed.push((peer_id, e));
                }
            }
        }

        info!(
            node = %self.id,
            sent = report.sent.len(),
            idle = report.idle.len(),
            failed = report.failed.len(),
            "sync round complete"
        );
        report
    }

    /// Handle bytes received from a registered peer.
    pub async fn receive(&self, from: &PeerId, bytes: &[u8]) -> Result<bool> {
        let peer = self.peer(from).await.map_err(|e| {
            warn!(node = %self.id, peer = %from, "message from unknown peer");
            e
        })?;
        Ok(self.engine.handle_message(peer.as_ref(), bytes).await?)
    }

    /// Handle every envelope already queued in `inbox`, without waiting.
    pub async fn pump(&self, inbox: &mut Inbox) -> PumpReport {
        let mut report = PumpReport::default();
        while let Some(envelope) = inbox.try_recv() {
            report.absorb(self.handle_envelope(&envelope.from, &envelope.bytes).await);
        }
        report
    }

    /// Handle envelopes until `inbox` has been quiet for `idle`.
    pub async fn pump_until_idle(&self, inbox: &mut Inbox, idle: Duration) -> PumpReport {
        let mut report = PumpReport::default();
        while let Some(envelope) = inbox.recv_timeout(idle).await {
            report.absorb(self.handle_envelope(&envelope.from, &envelope.bytes).await);
        }
        debug!(node = %self.id, handled = report.handled, "inbox idle");
        report
    }

    /// [`pump_until_idle`](Self::pump_until_idle) with the configured timeout.
    pub async fn pump_until_quiet(&self, inbox: &mut Inbox) -> PumpReport {
        self.pump_until_idle(inbox, self.config.idle_timeout).await
    }

    async fn handle_envelope(&self, from: &PeerId, bytes: &[u8]) -> PumpReport {
        let mut report = PumpReport {
            handled: 1,
            ..PumpReport::default()
        };
        match self.receive(from, bytes).await {
            Ok(true) => report.replies = 1,
            Ok(false) => {}
            Err(e) => {
                warn!(node = %self.id, peer = %from, error = %e, "failed to handle message");
                report.errors = 1;
            }
        }
        report
    }
}
