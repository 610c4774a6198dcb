//! Reconciliation engine.
//!
//! The engine turns one inbound message (or one sync trigger) into at most
//! one reply. It has no conversation state of its own: every decision is
//! made from the local manifest and the peer's last known manifest.
//!
//! ## Decision table
//!
//! ```text
//! ManifestDigest(d)
//!   local == d, last_known == d   -> nothing
//!   local == d                    -> ManifestDigest(local), last_known = local
//!   last_known == d               -> delta against last_known
//!   otherwise                     -> Manifest(local)
//! Manifest(m)
//!   (always)                      -> last_known = m
//!   digest(m) == local            -> ManifestDigest(local)
//!   otherwise                     -> delta against m
//! ManifestDeltaAndObjects(base, -r, +a, objects)
//!   base == local                 -> apply, then ManifestDigest or delta
//!   otherwise                     -> apply, then Manifest(local)
//! ```
//!
//! `last_known` changes are committed before the reply is sent and rolled
//! back to the value seen on entry if sending fails.
//!
//! A delta that cannot carry every addition ships a window of them. Each
//! peer keeps a cursor so the next window starts where the last one ended;
//! otherwise a batch the receiver keeps rejecting by merge would be resent
//! forever while the objects that would win never leave.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use mansync_core::{Digest, Manifest, Object};
use mansync_store::{DataSource, MergeOutcome, StoreError};

use crate::codec;
use crate::error::{Result, SyncError};
use crate::messages::{limits, ManifestDelta, Message};
use crate::peer::{Peer, PeerId};

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum objects carried by one delta.
    pub max_objects_per_message: usize,
    /// Attempts to build a delta before giving up on corrupted objects.
    pub max_build_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_objects_per_message: limits::MAX_OBJECTS_PER_MESSAGE,
            max_build_attempts: limits::MAX_BUILD_ATTEMPTS,
        }
    }
}

impl EngineConfig {
    /// Set the per-message object limit.
    pub fn with_max_objects_per_message(mut self, max: usize) -> Self {
        self.max_objects_per_message = max;
        self
    }

    /// Set the number of delta build attempts.
    pub fn with_max_build_attempts(mut self, attempts: usize) -> Self {
        self.max_build_attempts = attempts;
        self
    }
}

/// Counts of what happened while applying received objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub merged: usize,
    pub conflicts: usize,
}

impl ApplyReport {
    /// Total objects processed.
    pub fn total(&self) -> usize {
        self.inserted + self.duplicates + self.merged + self.conflicts
    }

    fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Duplicate => self.duplicates += 1,
            MergeOutcome::Merged => self.merged += 1,
            MergeOutcome::Conflict => self.conflicts += 1,
        }
    }
}

/// The outcome of one decision: what to send, and what to remember.
#[derive(Debug, Default)]
struct Plan {
    reply: Option<Message>,
    last_known: Option<Manifest>,
    /// Window cursor to keep if the reply is a delta and goes out.
    cursor: Option<Digest>,
}

impl Plan {
    fn idle() -> Self {
        Self::default()
    }

    fn reply(message: Message) -> Self {
        Self {
            reply: Some(message),
            ..Self::default()
        }
    }

    fn committing(mut self, last_known: Manifest) -> Self {
        self.last_known = Some(last_known);
        self
    }
}

/// Per-peer state held for a whole decision plus send.
#[derive(Debug, Default)]
struct PeerRound {
    /// Last digest shipped in a truncated delta.
    cursor: Option<Digest>,
}

/// Reconciliation engine over a shared data source.
pub struct SyncEngine<D: DataSource> {
    source: Arc<D>,
    config: EngineConfig,
    peer_rounds: Mutex<HashMap<PeerId, Arc<Mutex<PeerRound>>>>,
}

impl<D: DataSource> SyncEngine<D> {
    /// Create an engine with the default configuration.
    pub fn new(source: Arc<D>) -> Self {
        Self::with_config(source, EngineConfig::default())
    }

    /// Create an engine with a custom configuration.
    pub fn with_config(source: Arc<D>, config: EngineConfig) -> Self {
        Self {
            source,
            config,
            peer_rounds: Mutex::new(HashMap::new()),
        }
    }

    /// The data source being reconciled.
    pub fn source(&self) -> &Arc<D> {
        &self.source
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drop the round state kept for a peer.
    pub async fn forget_peer(&self, peer_id: &PeerId) {
        self.peer_rounds.lock().await.remove(peer_id);
    }

    /// Process one inbound message from `peer`.
    ///
    /// Returns whether a reply was sent. Undecodable input is rejected
    /// before any state is read or written.
    pub async fn handle_message<P: Peer + ?Sized>(&self, peer: &P, bytes: &[u8]) -> Result<bool> {
        let peer_id = peer.peer_id();
        let message = codec::decode(bytes).map_err(|e| {
            warn!(peer = %peer_id, error = %e, len = bytes.len(), "rejecting undecodable message");
            e
        })?;
        debug!(peer = %peer_id, %message, "received");

        let round = self.peer_round(peer_id).await;
        let mut round = round.lock().await;
        let previous = peer.last_known_manifest().await;

        let plan = match message {
            Message::ManifestDigest(digest) => self.on_manifest_digest(peer, &round, digest).await,
            Message::Manifest(manifest) => self.on_manifest(peer, &round, manifest).await,
            Message::ManifestDeltaAndObjects(delta) => self.on_delta(peer, &round, delta).await,
        };
        let plan = plan.map_err(|e| log_round_failure(peer_id, e))?;

        self.finish_round(peer, &mut round, previous, plan).await
    }

    /// Start or continue reconciliation with `peer`.
    ///
    /// With `force`, a digest is sent even when the peer is believed to be
    /// in sync. Returns whether a message was sent.
    pub async fn sync_with_peer<P: Peer + ?Sized>(&self, peer: &P, force: bool) -> Result<bool> {
        let peer_id = peer.peer_id();
        let round = self.peer_round(peer_id).await;
        let mut round = round.lock().await;

        if !peer.can_send() {
            debug!(peer = %peer_id, "peer cannot send; skipping sync");
            return Ok(false);
        }

        let local = self.source.current_manifest_digest().await?;
        let previous = peer.last_known_manifest().await;
        let plan = match &previous {
            None => Plan::reply(Message::ManifestDigest(local)),
            Some(known) if known.digest() == local => {
                if force {
                    Plan::reply(Message::ManifestDigest(local))
                } else {
                    debug!(peer = %peer_id, "already in sync");
                    Plan::idle()
                }
            }
            Some(known) => self
                .build_delta(known, &round)
                .await
                .map_err(|e| log_round_failure(peer_id, e))?,
        };

        self.finish_round(peer, &mut round, previous, plan).await
    }

    /// Insert received objects into the data source.
    ///
    /// Conflicts are logged and counted; they never abort the batch.
    pub async fn apply_objects(&self, objects: Vec<Object>) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        for object in objects {
            let digest = object.digest();
            let outcome = self.source.insert_or_merge(object).await?;
            if outcome == MergeOutcome::Conflict {
                warn!(%digest, "merge conflict resolved by tie-breaker");
            }
            report.record(outcome);
        }
        Ok(report)
    }

    async fn peer_round(&self, peer_id: PeerId) -> Arc<Mutex<PeerRound>> {
        let mut rounds = self.peer_rounds.lock().await;
        Arc::clone(rounds.entry(peer_id).or_default())
    }

    async fn on_manifest_digest<P: Peer + ?Sized>(
        &self,
        peer: &P,
        round: &PeerRound,
        digest: Digest,
    ) -> Result<Plan> {
        let local = self.source.current_manifest().await?;
        let local_digest = local.digest();
        let last_known = peer.last_known_manifest().await;
        let known_digest = last_known.as_ref().map(Manifest::digest);

        if local_digest == digest {
            if known_digest == Some(digest) {
                debug!(peer = %peer.peer_id(), "digests match; nothing to send");
                return Ok(Plan::idle());
            }
            return Ok(Plan::reply(Message::ManifestDigest(local_digest)).committing(local));
        }

        match last_known {
            Some(known) if known_digest == Some(digest) => self.build_delta(&known, round).await,
            _ => Ok(Plan::reply(Message::Manifest(local))),
        }
    }

    async fn on_manifest<P: Peer + ?Sized>(
        &self,
        peer: &P,
        round: &PeerRound,
        manifest: Manifest,
    ) -> Result<Plan> {
        // Recorded even when no reply goes out.
        peer.set_last_known_manifest(Some(manifest.clone()))
            .await
            .map_err(|e| SyncError::PeerState(format!("record failed: {}", e)))?;

        let local_digest = self.source.current_manifest_digest().await?;
        if manifest.digest() == local_digest {
            return Ok(Plan::reply(Message::ManifestDigest(local_digest)));
        }
        self.build_delta(&manifest, round).await
    }

    async fn on_delta<P: Peer + ?Sized>(
        &self,
        peer: &P,
        round: &PeerRound,
        delta: ManifestDelta,
    ) -> Result<Plan> {
        let peer_id = peer.peer_id();
        let before = self.source.current_manifest().await?;

        if before.digest() == delta.base_digest {
            let peer_after = before.patch(&delta.removals, &delta.additions)?;
            let report = self.apply_objects(delta.objects).await?;
            debug!(peer = %peer_id, ?report, "applied delta");

            let local = self.source.current_manifest().await?;
            if local.digest() == peer_after.digest() {
                return Ok(
                    Plan::reply(Message::ManifestDigest(local.digest())).committing(peer_after)
                );
            }
            return self.build_delta(&peer_after, round).await;
        }

        // The delta was built against a manifest we no longer hold. Its
        // objects are still valid content.
        let report = self.apply_objects(delta.objects).await?;
        debug!(peer = %peer_id, ?report, base = %delta.base_digest, "applied delta with stale base");

        let local = self.source.current_manifest().await?;
        let known_digest = peer.last_known_manifest().await.map(|m| m.digest());
        if known_digest == Some(local.digest()) {
            // Redelivery of a delta we already applied.
            return Ok(Plan::reply(Message::ManifestDigest(local.digest())));
        }
        Ok(Plan::reply(Message::Manifest(local)))
    }

    /// Build a delta that takes the peer from `base` to the local manifest.
    ///
    /// When the additions do not fit in one message, the window shipped
    /// starts after the peer's cursor.
    async fn build_delta(&self, base: &Manifest, round: &PeerRound) -> Result<Plan> {
        let max_attempts = self.config.max_build_attempts.max(1);
        let max_objects = self.config.max_objects_per_message.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let local = self.source.current_manifest().await?;
            let diff = local.diff(base);
            let (additions, cursor) = diff
                .additions
                .window_for_transfer(round.cursor.as_ref(), max_objects);
            let truncated = additions.len() < diff.additions.len();

            match self.source.objects_for(&additions).await {
                Ok(objects) => {
                    let last_known = if truncated {
                        debug!(
                            sent = additions.len(),
                            pending = diff.additions.len(),
                            "truncating delta"
                        );
                        base.patch(&diff.removals, &additions)?
                    } else {
                        local
                    };
                    let delta = ManifestDelta {
                        base_digest: base.digest(),
                        removals: diff.removals,
                        additions,
                        objects,
                    };
                    let mut plan = Plan::reply(Message::ManifestDeltaAndObjects(delta))
                        .committing(last_known);
                    plan.cursor = cursor;
                    return Ok(plan);
                }
                Err(StoreError::Corruption { digest, reason }) => {
                    warn!(%digest, %reason, attempt, "dropping corrupted object");
                    self.source.forget_object(&digest).await?;
                    if attempt >= max_attempts {
                        return Err(SyncError::CorruptionRetriesExhausted { attempts: attempt });
                    }
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    debug!(error = %e, attempt, "manifest changed while building delta");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Commit, encode and send a plan's reply.
    ///
    /// `previous` is the peer's last known manifest when the round began;
    /// a failed send restores it.
    async fn finish_round<P: Peer + ?Sized>(
        &self,
        peer: &P,
        round: &mut PeerRound,
        previous: Option<Manifest>,
        plan: Plan,
    ) -> Result<bool> {
        let peer_id = peer.peer_id();
        let Some(reply) = plan.reply.filter(|m| !m.is_empty()) else {
            return Ok(false);
        };

        if !peer.can_send() {
            debug!(peer = %peer_id, %reply, "peer cannot send; dropping reply");
            return Ok(false);
        }

        let committed = plan.last_known.is_some() || peer.last_known_manifest().await != previous;
        if let Some(next) = plan.last_known {
            peer.set_last_known_manifest(Some(next))
                .await
                .map_err(|e| SyncError::PeerState(format!("commit failed: {}", e)))?;
        }

        debug!(peer = %peer_id, %reply, "sending");
        if let Err(e) = peer.send(codec::encode(&reply)).await {
            warn!(peer = %peer_id, error = %e, "send failed; rolling back peer state");
            if committed {
                peer.set_last_known_manifest(previous)
                    .await
                    .map_err(|e| SyncError::PeerState(format!("rollback failed: {}", e)))?;
            }
            return Err(match e {
                SyncError::Transport(reason) => SyncError::Transport(reason),
                other => SyncError::Transport(other.to_string()),
            });
        }

        if matches!(reply, Message::ManifestDeltaAndObjects(_)) {
            round.cursor = plan.cursor;
        }
        Ok(true)
    }
}

fn log_round_failure(peer_id: PeerId, e: SyncError) -> SyncError {
    match &e {
        SyncError::Invariant(inner) => {
            error!(peer = %peer_id, error = %inner, "manifest invariant violated; abandoning round")
        }
        other => warn!(peer = %peer_id, error = %other, "round failed"),
    }
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mansync_core::DIGEST_SIZE;
    use mansync_store::MemoryDataSource;

    use crate::codec::{decode, encode};
    use crate::transport::{Inbox, MemoryNetwork, MemoryPeer};

    fn item(key: &str) -> Object {
        Object::builder()
            .attr("key", key)
            .date("mdat", 1_700_000_000)
            .build()
    }

    /// One side of a two-party test: engine, its inbox, and its handle
    /// for the other side.
    struct Side {
        engine: SyncEngine<MemoryDataSource>,
        inbox: Inbox,
        peer: MemoryPeer,
    }

    impl Side {
        fn store(&self) -> &MemoryDataSource {
            self.engine.source()
        }

        async fn digest(&self) -> Digest {
            self.store().current_manifest_digest().await.unwrap()
        }
    }

    async fn pair(config: EngineConfig) -> (Side, Side) {
        let network = MemoryNetwork::new();
        let e_id = PeerId::from_bytes([0xee; 32]);
        let p_id = PeerId::from_bytes([0x77; 32]);

        let e = Side {
            engine: SyncEngine::with_config(Arc::new(MemoryDataSource::new()), config.clone()),
            inbox: network.join(e_id).await,
            peer: network.peer(e_id, p_id),
        };
        let p = Side {
            engine: SyncEngine::with_config(Arc::new(MemoryDataSource::new()), config),
            inbox: network.join(p_id).await,
            peer: network.peer(p_id, e_id),
        };
        (e, p)
    }

    /// Deliver queued messages back and forth until both inboxes are empty.
    /// Returns the number of messages delivered.
    async fn pump(a: &mut Side, b: &mut Side) -> usize {
        let mut delivered = 0;
        loop {
            let mut progressed = false;
            while let Some(envelope) = a.inbox.try_recv() {
                a.engine.handle_message(&a.peer, &envelope.bytes).await.unwrap();
                delivered += 1;
                progressed = true;
            }
            while let Some(envelope) = b.inbox.try_recv() {
                b.engine.handle_message(&b.peer, &envelope.bytes).await.unwrap();
                delivered += 1;
                progressed = true;
            }
            if !progressed {
                return delivered;
            }
            assert!(delivered < 100, "reconciliation did not settle");
        }
    }

    fn next_message(side: &mut Side) -> Message {
        let envelope = side.inbox.try_recv().expect("expected a queued message");
        decode(&envelope.bytes).unwrap()
    }

    #[tokio::test]
    async fn test_convergence_scenario() {
        let (mut e, mut p) = pair(EngineConfig::default()).await;
        let o1 = item("o1");
        let o2 = item("o2");
        e.store().insert_local(o1.clone()).unwrap();
        e.store().insert_local(o2.clone()).unwrap();

        assert!(e.engine.sync_with_peer(&e.peer, false).await.unwrap());

        // E -> P: ManifestDigest(E)
        let msg = next_message(&mut p);
        assert_eq!(msg, Message::ManifestDigest(e.digest().await));
        p.engine.handle_message(&p.peer, &encode(&msg)).await.unwrap();

        // P -> E: Manifest(empty)
        let msg = next_message(&mut e);
        assert_eq!(msg, Message::Manifest(Manifest::empty()));
        e.engine.handle_message(&e.peer, &encode(&msg)).await.unwrap();

        // E -> P: delta with both objects, and E now assumes P holds them.
        assert_eq!(
            e.peer.last_known_manifest().await,
            Some(Manifest::from_digests([o1.digest(), o2.digest()]))
        );
        let msg = next_message(&mut p);
        match &msg {
            Message::ManifestDeltaAndObjects(delta) => {
                assert_eq!(delta.base_digest, Manifest::empty().digest());
                assert!(delta.removals.is_empty());
                assert_eq!(delta.additions.len(), 2);
                assert_eq!(delta.objects.len(), 2);
            }
            other => panic!("expected delta, got {}", other),
        }
        p.engine.handle_message(&p.peer, &encode(&msg)).await.unwrap();

        // P -> E: ManifestDigest(common)
        let msg = next_message(&mut e);
        assert_eq!(msg, Message::ManifestDigest(e.digest().await));
        assert!(!e.engine.handle_message(&e.peer, &encode(&msg)).await.unwrap());

        assert_eq!(e.digest().await, p.digest().await);
        assert!(p.store().contains(&o1.digest()).unwrap());
        assert!(p.store().contains(&o2.digest()).unwrap());
        assert_eq!(pump(&mut e, &mut p).await, 0);
    }

    #[tokio::test]
    async fn test_two_sided_convergence() {
        let (mut e, mut p) = pair(EngineConfig::default()).await;
        for i in 0..5 {
            e.store().insert_local(item(&format!("e{}", i))).unwrap();
            p.store().insert_local(item(&format!("p{}", i))).unwrap();
        }
        e.store().insert_local(item("shared")).unwrap();
        p.store().insert_local(item("shared")).unwrap();

        e.engine.sync_with_peer(&e.peer, false).await.unwrap();
        pump(&mut e, &mut p).await;

        assert_eq!(e.digest().await, p.digest().await);
        assert_eq!(e.store().len().unwrap(), 11);
    }

    #[tokio::test]
    async fn test_matching_digest_is_acknowledged_once() {
        let (e, _p) = pair(EngineConfig::default()).await;
        e.store().insert_local(item("a")).unwrap();
        let local = e.store().current_manifest().await.unwrap();
        let bytes = encode(&Message::ManifestDigest(local.digest()));

        // First time: we did not know the peer agreed, so we say so.
        assert!(e.engine.handle_message(&e.peer, &bytes).await.unwrap());
        assert_eq!(e.peer.last_known_manifest().await, Some(local));

        // Second time: idempotent, nothing to send.
        assert!(!e.engine.handle_message(&e.peer, &bytes).await.unwrap());
        assert_eq!(e.peer.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_digest_gets_full_manifest() {
        let (e, mut p) = pair(EngineConfig::default()).await;
        e.store().insert_local(item("a")).unwrap();

        let bytes = encode(&Message::ManifestDigest(Digest::from_bytes([9; DIGEST_SIZE])));
        assert!(e.engine.handle_message(&e.peer, &bytes).await.unwrap());

        let msg = next_message(&mut p);
        assert_eq!(msg, Message::Manifest(e.store().manifest().unwrap()));
        assert!(e.peer.last_known_manifest().await.is_none());
    }

    #[tokio::test]
    async fn test_sync_when_in_sync() {
        let (e, _p) = pair(EngineConfig::default()).await;
        e.store().insert_local(item("a")).unwrap();
        let local = e.store().manifest().unwrap();
        e.peer.set_last_known_manifest(Some(local)).await.unwrap();

        assert!(!e.engine.sync_with_peer(&e.peer, false).await.unwrap());
        assert!(e.engine.sync_with_peer(&e.peer, true).await.unwrap());
        assert_eq!(e.peer.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_sync_skipped_when_peer_cannot_send() {
        let (e, _p) = pair(EngineConfig::default()).await;
        e.peer.set_can_send(false);
        assert!(!e.engine.sync_with_peer(&e.peer, true).await.unwrap());
        assert_eq!(e.peer.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_reply_dropped_when_peer_cannot_send() {
        let (e, _p) = pair(EngineConfig::default()).await;
        e.store().insert_local(item("a")).unwrap();
        e.peer.set_can_send(false);

        let bytes = encode(&Message::Manifest(Manifest::empty()));
        assert!(!e.engine.handle_message(&e.peer, &bytes).await.unwrap());
        // The reply is dropped but what the peer told us is kept.
        assert_eq!(e.peer.last_known_manifest().await, Some(Manifest::empty()));
        assert_eq!(e.peer.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_manifest_recorded_when_delta_cannot_be_built() {
        let config = EngineConfig::default().with_max_build_attempts(1);
        let (e, _p) = pair(config).await;
        let a = item("a");
        e.store().insert_local(a.clone()).unwrap();
        e.store()
            .inject_corruption(&a.digest(), Bytes::from_static(&[0xff]))
            .unwrap();

        let peer_manifest = Manifest::from_digests([Digest::of(b"theirs")]);
        let bytes = encode(&Message::Manifest(peer_manifest.clone()));
        let err = e.engine.handle_message(&e.peer, &bytes).await.unwrap_err();
        assert!(matches!(err, SyncError::CorruptionRetriesExhausted { .. }));
        assert_eq!(e.peer.last_known_manifest().await, Some(peer_manifest));
        assert_eq!(e.peer.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_reply_to_manifest_restores_entry_state() {
        let (e, _p) = pair(EngineConfig::default()).await;
        e.store().insert_local(item("a")).unwrap();

        e.peer.fail_next_send();
        let bytes = encode(&Message::Manifest(Manifest::empty()));
        let err = e.engine.handle_message(&e.peer, &bytes).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert!(e.peer.last_known_manifest().await.is_none());
    }

    #[tokio::test]
    async fn test_zero_object_limit_still_ships_one() {
        let config = EngineConfig::default().with_max_objects_per_message(0);
        let (mut e, mut p) = pair(config).await;
        for i in 0..4 {
            e.store().insert_local(item(&format!("z{}", i))).unwrap();
        }

        let bytes = encode(&Message::Manifest(Manifest::empty()));
        assert!(e.engine.handle_message(&e.peer, &bytes).await.unwrap());
        match next_message(&mut p) {
            Message::ManifestDeltaAndObjects(delta) => assert_eq!(delta.objects.len(), 1),
            other => panic!("expected delta, got {}", other),
        }

        e.engine.sync_with_peer(&e.peer, true).await.unwrap();
        pump(&mut e, &mut p).await;
        assert_eq!(p.store().len().unwrap(), 4);
        assert_eq!(e.digest().await, p.digest().await);
    }

    #[tokio::test]
    async fn test_truncated_windows_advance() {
        let config = EngineConfig::default().with_max_objects_per_message(2);
        let (e, mut p) = pair(config).await;
        for i in 0..5 {
            e.store().insert_local(item(&format!("w{}", i))).unwrap();
        }
        let local = e.store().manifest().unwrap();

        // The peer keeps claiming to hold nothing; every reply must carry
        // the next window, wrapping around after the last digest.
        let bytes = encode(&Message::Manifest(Manifest::empty()));
        let mut shipped = Vec::new();
        for _ in 0..3 {
            e.engine.handle_message(&e.peer, &bytes).await.unwrap();
            match next_message(&mut p) {
                Message::ManifestDeltaAndObjects(delta) => shipped.push(delta.additions),
                other => panic!("expected delta, got {}", other),
            }
        }

        let digests = local.to_vec();
        assert_eq!(shipped[0], Manifest::from_digests(digests[0..2].iter().copied()));
        assert_eq!(shipped[1], Manifest::from_digests(digests[2..4].iter().copied()));
        assert_eq!(
            shipped[2],
            Manifest::from_digests([digests[4], digests[0]])
        );
    }

    #[tokio::test]
    async fn test_single_object_batches_settle_colliding_keys() {
        let config = EngineConfig::default().with_max_objects_per_message(1);
        let (mut e, mut p) = pair(config).await;
        let version = |key: &str, body: &str, mdat: Option<i64>| {
            let builder = Object::builder().attr("key", key).attr("body", body);
            match mdat {
                Some(secs) => builder.date("mdat", secs).build(),
                None => builder.build(),
            }
        };
        // Each side holds one winner and one loser.
        let a_wins = version("a", "p", Some(5));
        let b_wins = version("b", "e", Some(5));
        for key in ["c", "d", "f"] {
            e.store().insert_local(version(key, "e", Some(1))).unwrap();
        }
        e.store().insert_local(version("a", "e", None)).unwrap();
        e.store().insert_local(b_wins.clone()).unwrap();
        p.store().insert_local(a_wins.clone()).unwrap();
        p.store().insert_local(version("b", "p", None)).unwrap();

        e.engine.sync_with_peer(&e.peer, false).await.unwrap();
        pump(&mut e, &mut p).await;

        assert_eq!(e.digest().await, p.digest().await);
        assert_eq!(p.store().len().unwrap(), 5);
        assert!(p.store().contains(&a_wins.digest()).unwrap());
        assert!(p.store().contains(&b_wins.digest()).unwrap());
    }

    #[tokio::test]
    async fn test_window_stays_put_when_send_fails() {
        let config = EngineConfig::default().with_max_objects_per_message(1);
        let (e, mut p) = pair(config).await;
        for i in 0..3 {
            e.store().insert_local(item(&format!("s{}", i))).unwrap();
        }
        let first = e.store().manifest().unwrap().get(0).unwrap();
        let bytes = encode(&Message::Manifest(Manifest::empty()));

        e.peer.fail_next_send();
        assert!(e.engine.handle_message(&e.peer, &bytes).await.is_err());
        e.engine.handle_message(&e.peer, &bytes).await.unwrap();
        match next_message(&mut p) {
            Message::ManifestDeltaAndObjects(delta) => {
                assert_eq!(delta.additions, Manifest::from_digests([first]))
            }
            other => panic!("expected delta, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_undecodable_message_changes_nothing() {
        let (e, _p) = pair(EngineConfig::default()).await;
        let known = Manifest::from_digests([Digest::of(b"x")]);
        e.peer.set_last_known_manifest(Some(known.clone())).await.unwrap();

        let err = e.engine.handle_message(&e.peer, &[0x30, 0x03, 0x02]).await.unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
        assert_eq!(e.peer.last_known_manifest().await, Some(known));
        assert_eq!(e.peer.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_rolls_back() {
        let (e, _p) = pair(EngineConfig::default()).await;
        e.store().insert_local(item("a")).unwrap();
        let known = Manifest::empty();
        e.peer.set_last_known_manifest(Some(known.clone())).await.unwrap();

        e.peer.fail_next_send();
        let err = e.engine.sync_with_peer(&e.peer, false).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(e.peer.last_known_manifest().await, Some(known));

        // The next attempt goes through and commits.
        assert!(e.engine.sync_with_peer(&e.peer, false).await.unwrap());
        assert_eq!(
            e.peer.last_known_manifest().await,
            Some(e.store().manifest().unwrap())
        );
    }

    #[tokio::test]
    async fn test_duplicate_delta_is_harmless() {
        let (mut e, mut p) = pair(EngineConfig::default()).await;
        e.store().insert_local(item("a")).unwrap();
        e.store().insert_local(item("b")).unwrap();

        e.engine.sync_with_peer(&e.peer, false).await.unwrap();
        let digest_msg = next_message(&mut p);
        p.engine.handle_message(&p.peer, &encode(&digest_msg)).await.unwrap();
        let manifest_msg = next_message(&mut e);
        e.engine.handle_message(&e.peer, &encode(&manifest_msg)).await.unwrap();
        let delta = encode(&next_message(&mut p));

        p.engine.handle_message(&p.peer, &delta).await.unwrap();
        let first_reply = next_message(&mut e);
        assert_eq!(first_reply, Message::ManifestDigest(p.digest().await));

        // Same delta again: objects are duplicates, base no longer matches.
        let before = p.digest().await;
        p.engine.handle_message(&p.peer, &delta).await.unwrap();
        assert_eq!(p.digest().await, before);
        let second_reply = next_message(&mut e);
        assert_eq!(second_reply, Message::ManifestDigest(before));

        e.engine.handle_message(&e.peer, &encode(&first_reply)).await.unwrap();
        pump(&mut e, &mut p).await;
        assert_eq!(e.digest().await, p.digest().await);
    }

    #[tokio::test]
    async fn test_invalid_patch_is_an_invariant_error() {
        let (e, _p) = pair(EngineConfig::default()).await;
        e.store().insert_local(item("a")).unwrap();
        let local = e.store().manifest().unwrap();

        // Claims to add something we already hold.
        let delta = Message::ManifestDeltaAndObjects(ManifestDelta {
            base_digest: local.digest(),
            removals: Manifest::empty(),
            additions: local.clone(),
            objects: Vec::new(),
        });
        let err = e.engine.handle_message(&e.peer, &encode(&delta)).await.unwrap_err();
        assert!(matches!(err, SyncError::Invariant(_)));
        assert!(e.peer.last_known_manifest().await.is_none());
        assert_eq!(e.store().manifest().unwrap(), local);
    }

    #[tokio::test]
    async fn test_truncated_deltas_converge_over_rounds() {
        let config = EngineConfig::default().with_max_objects_per_message(3);
        let (mut e, mut p) = pair(config).await;
        for i in 0..10 {
            e.store().insert_local(item(&format!("k{}", i))).unwrap();
        }

        e.engine.sync_with_peer(&e.peer, false).await.unwrap();
        pump(&mut e, &mut p).await;

        assert_eq!(p.store().len().unwrap(), 10);
        assert_eq!(e.digest().await, p.digest().await);
    }

    #[tokio::test]
    async fn test_delta_respects_object_limit() {
        let config = EngineConfig::default().with_max_objects_per_message(2);
        let (e, _p) = pair(config).await;
        for i in 0..5 {
            e.store().insert_local(item(&format!("k{}", i))).unwrap();
        }
        let bytes = encode(&Message::Manifest(Manifest::empty()));
        e.engine.handle_message(&e.peer, &bytes).await.unwrap();

        let known = e.peer.last_known_manifest().await.unwrap();
        assert_eq!(known.len(), 2);
        let local = e.store().manifest().unwrap();
        assert!(known.digests().all(|d| local.contains(&d)));
    }

    #[tokio::test]
    async fn test_corrupted_object_is_skipped() {
        let (mut e, mut p) = pair(EngineConfig::default()).await;
        let good = item("good");
        let bad = item("bad");
        e.store().insert_local(good.clone()).unwrap();
        e.store().insert_local(bad.clone()).unwrap();
        e.store()
            .inject_corruption(&bad.digest(), Bytes::from_static(&[0xff]))
            .unwrap();

        e.engine.sync_with_peer(&e.peer, false).await.unwrap();
        pump(&mut e, &mut p).await;

        assert_eq!(e.digest().await, p.digest().await);
        assert!(p.store().contains(&good.digest()).unwrap());
        assert!(!e.store().contains(&bad.digest()).unwrap());
    }

    #[tokio::test]
    async fn test_corruption_retries_exhausted() {
        let config = EngineConfig::default().with_max_build_attempts(2);
        let (e, _p) = pair(config).await;
        for i in 0..3 {
            let obj = item(&format!("k{}", i));
            e.store().insert_local(obj.clone()).unwrap();
            e.store()
                .inject_corruption(&obj.digest(), Bytes::from_static(&[0xff]))
                .unwrap();
        }
        e.peer
            .set_last_known_manifest(Some(Manifest::empty()))
            .await
            .unwrap();

        let err = e.engine.sync_with_peer(&e.peer, false).await.unwrap_err();
        assert!(matches!(err, SyncError::CorruptionRetriesExhausted { attempts: 2 }));
        assert_eq!(e.peer.last_known_manifest().await, Some(Manifest::empty()));
        assert_eq!(e.peer.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_report_counts_outcomes() {
        let (e, _p) = pair(EngineConfig::default()).await;
        let old = Object::builder().attr("key", "x").date("mdat", 1).build();
        let new = Object::builder().attr("key", "x").date("mdat", 2).build();
        let undated = Object::builder().attr("key", "y").attr("v", 1i64).build();
        let undated_other = Object::builder().attr("key", "y").attr("v", 2i64).build();

        let report = e
            .engine
            .apply_objects(vec![
                old.clone(),
                old,
                new,
                undated,
                undated_other,
            ])
            .await
            .unwrap();

        assert_eq!(
            report,
            ApplyReport {
                inserted: 2,
                duplicates: 1,
                merged: 1,
                conflicts: 1,
            }
        );
        assert_eq!(report.total(), 5);
    }

    #[tokio::test]
    async fn test_merge_collision_converges() {
        let (mut e, mut p) = pair(EngineConfig::default()).await;
        let older = Object::builder().attr("key", "wifi").date("mdat", 100).build();
        let newer = Object::builder()
            .attr("key", "wifi")
            .attr("v_Data", "secret")
            .date("mdat", 200)
            .build();
        e.store().insert_local(older).unwrap();
        p.store().insert_local(newer.clone()).unwrap();

        e.engine.sync_with_peer(&e.peer, false).await.unwrap();
        pump(&mut e, &mut p).await;

        assert_eq!(e.digest().await, p.digest().await);
        assert_eq!(e.store().manifest().unwrap().to_vec(), vec![newer.digest()]);
    }

    #[tokio::test]
    async fn test_concurrent_peers_share_source() {
        let network = MemoryNetwork::new();
        let hub_id = PeerId::random();
        let source = Arc::new(MemoryDataSource::new());
        source.insert_local(item("a")).unwrap();
        let engine = Arc::new(SyncEngine::new(Arc::clone(&source)));

        let mut inboxes = Vec::new();
        let mut peers = Vec::new();
        for _ in 0..4 {
            let id = PeerId::random();
            inboxes.push(network.join(id).await);
            peers.push(Arc::new(network.peer(hub_id, id)));
        }

        let handles: Vec<_> = peers
            .iter()
            .map(|peer| {
                let engine = Arc::clone(&engine);
                let peer = Arc::clone(peer);
                tokio::spawn(async move { engine.sync_with_peer(peer.as_ref(), false).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap());
        }

        let expected = Message::ManifestDigest(source.current_manifest_digest().await.unwrap());
        for inbox in &mut inboxes {
            let envelope = inbox.try_recv().unwrap();
            assert_eq!(decode(&envelope.bytes).unwrap(), expected);
        }
    }

    /// A peer whose state store rejects every write.
    struct ReadOnlyPeer;

    #[async_trait::async_trait]
    impl Peer for ReadOnlyPeer {
        fn peer_id(&self) -> PeerId {
            PeerId::from_bytes([0x0f; 32])
        }

        async fn last_known_manifest(&self) -> Option<Manifest> {
            Some(Manifest::empty())
        }

        async fn set_last_known_manifest(&self, _manifest: Option<Manifest>) -> Result<()> {
            Err(SyncError::Transport("state store offline".into()))
        }

        fn can_send(&self) -> bool {
            true
        }

        async fn send(&self, _bytes: Bytes) -> Result<()> {
            panic!("nothing may be sent when the commit fails");
        }
    }

    #[tokio::test]
    async fn test_failed_commit_sends_nothing() {
        let engine = SyncEngine::new(Arc::new(MemoryDataSource::new()));
        engine.source().insert_local(item("a")).unwrap();

        let err = engine.sync_with_peer(&ReadOnlyPeer, false).await.unwrap_err();
        assert!(matches!(err, SyncError::PeerState(_)));
    }
}
