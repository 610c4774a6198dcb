//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mansync::{Inbox, MemoryDataSource, MemoryNetwork, NodeConfig, Object, PeerId, SyncNode};
use mansync_store::MergeOutcome;
use mansync_sync::{verify_group, ConvergenceResult};

/// Pump rounds after which a cluster is considered livelocked.
const MAX_SETTLE_ROUNDS: usize = 500;

/// An object with a `key` and a `mdat` in seconds.
pub fn item(key: &str, mdat: i64) -> Object {
    Object::builder().attr("key", key).date("mdat", mdat).build()
}

/// One version of the item at `key`: its payload is `value`, and `mdat`
/// is optional so collisions can involve undated versions.
pub fn version(key: &str, value: &str, mdat: Option<i64>) -> Object {
    let builder = Object::builder().attr("key", key).attr("value", value);
    match mdat {
        Some(secs) => builder.date("mdat", secs).build(),
        None => builder.build(),
    }
}

/// `count` distinct objects with keys `{prefix}-000`, `{prefix}-001`, ...
pub fn objects(prefix: &str, count: usize) -> Vec<Object> {
    (0..count)
        .map(|i| {
            Object::builder()
                .attr("key", format!("{prefix}-{i:03}"))
                .attr("payload", format!("value {i}"))
                .date("mdat", 1_700_000_000 + i as i64)
                .build()
        })
        .collect()
}

/// A memory data source already holding `objects`.
pub fn populated_source(objects: impl IntoIterator<Item = Object>) -> Arc<MemoryDataSource> {
    let source = MemoryDataSource::new();
    for object in objects {
        if let Err(e) = source.insert_local(object) {
            panic!("failed to populate source: {e}");
        }
    }
    Arc::new(source)
}

/// Scatter objects over `nodes` buckets, each object landing in at least one.
///
/// Deterministic for a given `seed`.
pub fn random_placement(objects: &[Object], nodes: usize, seed: u64) -> Vec<Vec<Object>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut buckets = vec![Vec::new(); nodes];
    if nodes == 0 {
        return buckets;
    }
    for object in objects {
        let home = rng.gen_range(0..nodes);
        for (i, bucket) in buckets.iter_mut().enumerate() {
            if i == home || rng.gen_bool(0.25) {
                bucket.push(object.clone());
            }
        }
    }
    buckets
}

/// A node and its inbox.
pub struct TestNode {
    pub node: SyncNode<MemoryDataSource>,
    pub inbox: Inbox,
}

/// A fully meshed group of nodes on one in-memory network.
pub struct TestCluster {
    pub network: Arc<MemoryNetwork>,
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// Create `size` empty nodes with the default configuration.
    pub async fn new(size: usize) -> Self {
        Self::with_config(size, NodeConfig::default()).await
    }

    /// Create `size` empty nodes sharing `config`.
    pub async fn with_config(size: usize, config: NodeConfig) -> Self {
        let network = MemoryNetwork::new();
        let ids: Vec<PeerId> = (0..size)
            .map(|i| {
                let mut seed = [0u8; 32];
                seed[..8].copy_from_slice(&(i as u64 + 1).to_be_bytes());
                PeerId::from_bytes(seed)
            })
            .collect();

        let mut nodes = Vec::with_capacity(size);
        for &id in &ids {
            let inbox = network.join(id).await;
            let node = SyncNode::new(id, Arc::new(MemoryDataSource::new()), config.clone());
            for &other in ids.iter().filter(|&&other| other != id) {
                node.add_peer(Arc::new(network.peer(id, other))).await;
            }
            nodes.push(TestNode { node, inbox });
        }

        Self { network, nodes }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the cluster has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node at `index`.
    pub fn node(&self, index: usize) -> &SyncNode<MemoryDataSource> {
        &self.nodes[index].node
    }

    /// The data source of the node at `index`.
    pub fn source(&self, index: usize) -> &MemoryDataSource {
        self.nodes[index].node.source()
    }

    /// Insert objects into one node without syncing.
    pub fn seed(&self, index: usize, objects: impl IntoIterator<Item = Object>) -> Vec<MergeOutcome> {
        objects
            .into_iter()
            .map(|object| match self.source(index).insert_local(object) {
                Ok(outcome) => outcome,
                Err(e) => panic!("failed to seed node {index}: {e}"),
            })
            .collect()
    }

    /// Start a round from every node and deliver until quiet.
    ///
    /// Returns the number of delivery rounds.
    pub async fn sync_and_settle(&mut self) -> usize {
        for member in &self.nodes {
            member.node.sync_all(false).await;
        }
        self.settle().await
    }

    /// Deliver queued messages until no node has anything to handle.
    ///
    /// # Panics
    ///
    /// If the cluster is still busy after a fixed number of rounds.
    pub async fn settle(&mut self) -> usize {
        let mut rounds = 0;
        loop {
            let mut handled = 0;
            for member in &mut self.nodes {
                handled += member.node.pump(&mut member.inbox).await.handled;
            }
            if handled == 0 {
                return rounds;
            }
            rounds += 1;
            assert!(rounds < MAX_SETTLE_ROUNDS, "cluster did not settle");
        }
    }

    /// Compare every node against the first.
    pub async fn convergence(&self) -> Vec<ConvergenceResult> {
        let sources: Vec<&MemoryDataSource> =
            self.nodes.iter().map(|m| m.node.source().as_ref()).collect();
        match verify_group(&sources).await {
            Ok(results) => results,
            Err(e) => panic!("failed to read manifests: {e}"),
        }
    }

    /// Whether every node holds the same manifest.
    pub async fn is_converged(&self) -> bool {
        self.convergence().await.iter().all(ConvergenceResult::is_converged)
    }
}
