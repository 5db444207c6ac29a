use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use strata_types::{Snapshot, SnapshotId, TemporalAnchor};
use tracing::{debug, warn};

use crate::backend::RecordBackend;
use crate::codec;
use crate::error::{TierError, TierResult};
use crate::ring;

/// One copy of a snapshot as written to a distribution node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaCopy {
    pub node_id: String,
    pub written_at: TemporalAnchor,
    pub snapshot: Snapshot,
}

/// An independent storage location receiving replica copies.
pub struct ReplicaNode {
    node_id: String,
    backend: Arc<dyn RecordBackend>,
    lock: Mutex<()>,
}

impl ReplicaNode {
    pub fn new(node_id: impl Into<String>, backend: Arc<dyn RecordBackend>) -> Self {
        Self {
            node_id: node_id.into(),
            backend,
            lock: Mutex::new(()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn backend(&self) -> &Arc<dyn RecordBackend> {
        &self.backend
    }

    fn write(&self, snapshot: &Snapshot, retention: usize) -> TierResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| TierError::LockPoisoned("replica node"))?;
        let copy = ReplicaCopy {
            node_id: self.node_id.clone(),
            written_at: TemporalAnchor::now(snapshot.created_at.node_id),
            snapshot: snapshot.clone(),
        };
        let key = snapshot.id.to_hex();
        self.backend.put(&key, &codec::encode(&copy)?)?;
        let (loaded, corrupt) = ring::load_all::<ReplicaCopy>(&*self.backend)?;
        ring::evict_oldest(
            &*self.backend,
            loaded,
            corrupt,
            retention,
            std::slice::from_ref(&key),
            |c: &ReplicaCopy| c.snapshot.created_at,
        )?;
        Ok(())
    }

    /// Every copy held by this node, newest snapshot first.
    pub fn copies(&self) -> TierResult<Vec<ReplicaCopy>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| TierError::LockPoisoned("replica node"))?;
        let (mut loaded, _corrupt) = ring::load_all::<ReplicaCopy>(&*self.backend)?;
        ring::sort_newest_first(&mut loaded, |c| c.snapshot.created_at);
        Ok(loaded.into_iter().map(|l| l.record).collect())
    }
}

/// Outcome of one node write within a replication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeFailure {
    pub node_id: String,
    pub reason: String,
}

/// How many replica copies were written.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationReport {
    pub requested: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<NodeFailure>,
}

impl ReplicationReport {
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn is_complete(&self) -> bool {
        self.succeeded.len() == self.requested
    }
}

/// Writes redundant snapshot copies to distinct storage locations.
///
/// Replication is best-effort: each node is its own failure domain, and a
/// failed node write is reported rather than propagated.
pub struct ReplicaDistributor {
    nodes: Vec<ReplicaNode>,
    retention: usize,
}

impl ReplicaDistributor {
    /// `retention` bounds the copies each node keeps (oldest dropped first).
    pub fn new(nodes: Vec<ReplicaNode>, retention: usize) -> Self {
        Self {
            nodes,
            retention: retention.max(1),
        }
    }

    pub fn nodes(&self) -> &[ReplicaNode] {
        &self.nodes
    }

    /// Write `replication_factor` copies of `snapshot` to distinct nodes.
    ///
    /// Node selection starts at an offset derived from the snapshot id so
    /// load spreads across nodes when the factor is below the node count.
    /// A factor above the node count is reported as failures for the
    /// missing copies.
    pub fn replicate(&self, snapshot: &Snapshot, replication_factor: usize) -> ReplicationReport {
        let mut report = ReplicationReport {
            requested: replication_factor,
            ..ReplicationReport::default()
        };
        if self.nodes.is_empty() {
            report.failed = (0..replication_factor)
                .map(|i| NodeFailure {
                    node_id: format!("<unassigned-{i}>"),
                    reason: "no replica nodes configured".into(),
                })
                .collect();
            return report;
        }

        let start = snapshot.id.as_bytes()[0] as usize % self.nodes.len();
        let targets = replication_factor.min(self.nodes.len());
        for offset in 0..targets {
            let node = &self.nodes[(start + offset) % self.nodes.len()];
            match node.write(snapshot, self.retention) {
                Ok(()) => {
                    debug!(node = %node.node_id, id = %snapshot.id.short_hex(), "replica written");
                    report.succeeded.push(node.node_id.clone());
                }
                Err(e) => {
                    warn!(node = %node.node_id, id = %snapshot.id.short_hex(), error = %e, "replica write failed");
                    report.failed.push(NodeFailure {
                        node_id: node.node_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        for i in targets..replication_factor {
            report.failed.push(NodeFailure {
                node_id: format!("<unassigned-{i}>"),
                reason: "no distinct node available".into(),
            });
        }
        report
    }

    /// Copies of `id` across all nodes. Unreadable nodes are skipped.
    pub fn find(&self, id: &SnapshotId) -> Vec<ReplicaCopy> {
        self.nodes
            .iter()
            .filter_map(|node| match node.copies() {
                Ok(copies) => Some(copies),
                Err(e) => {
                    warn!(node = %node.node_id, error = %e, "replica node unreadable");
                    None
                }
            })
            .flatten()
            .filter(|c| c.snapshot.id == *id)
            .collect()
    }

    /// Copy count per node, in node order. Unreadable nodes report `None`.
    pub fn copy_counts(&self) -> Vec<(String, Option<usize>)> {
        self.nodes
            .iter()
            .map(|node| (node.node_id.clone(), node.backend.count().ok()))
            .collect()
    }
}

impl std::fmt::Debug for ReplicaDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes: Vec<&str> = self.nodes.iter().map(|n| n.node_id.as_str()).collect();
        f.debug_struct("ReplicaDistributor")
            .field("nodes", &nodes)
            .field("retention", &self.retention)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use crate::testing::snapshot_at;

    fn distributor(n: usize, retention: usize) -> (Vec<Arc<InMemoryBackend>>, ReplicaDistributor) {
        let backends: Vec<_> = (0..n)
            .map(|i| Arc::new(InMemoryBackend::new(format!("node-{i}"))))
            .collect();
        let nodes = backends
            .iter()
            .enumerate()
            .map(|(i, b)| ReplicaNode::new(format!("node-{i}"), b.clone() as Arc<dyn RecordBackend>))
            .collect();
        (backends, ReplicaDistributor::new(nodes, retention))
    }

    #[test]
    fn writes_factor_copies_to_distinct_nodes() {
        let (_b, dist) = distributor(3, 10);
        let snap = snapshot_at("a", 10);
        let report = dist.replicate(&snap, 2);
        assert!(report.is_complete());
        assert_eq!(report.success_count(), 2);
        assert_ne!(report.succeeded[0], report.succeeded[1]);

        let copies = dist.find(&snap.id);
        assert_eq!(copies.len(), 2);
        assert!(copies.iter().all(|c| c.snapshot == snap));
    }

    #[test]
    fn partial_failure_is_reported_not_fatal() {
        let (backends, dist) = distributor(3, 10);
        backends[1].set_read_only(true);
        let report = dist.replicate(&snapshot_at("a", 10), 3);
        assert_eq!(report.success_count(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].node_id, "node-1");
        assert!(!report.is_complete());
    }

    #[test]
    fn factor_above_node_count_reports_shortfall() {
        let (_b, dist) = distributor(2, 10);
        let report = dist.replicate(&snapshot_at("a", 10), 4);
        assert_eq!(report.success_count(), 2);
        assert_eq!(report.failed.len(), 2);
    }

    #[test]
    fn no_nodes_means_every_copy_fails() {
        let dist = ReplicaDistributor::new(Vec::new(), 5);
        let report = dist.replicate(&snapshot_at("a", 10), 2);
        assert_eq!(report.success_count(), 0);
        assert_eq!(report.failed.len(), 2);
    }

    #[test]
    fn retention_bounds_each_node() {
        let (_b, dist) = distributor(1, 2);
        for t in [10, 20, 30] {
            dist.replicate(&snapshot_at(&format!("s{t}"), t), 1);
        }
        let counts = dist.copy_counts();
        assert_eq!(counts, vec![("node-0".to_string(), Some(2))]);
        let copies = dist.nodes()[0].copies().unwrap();
        assert_eq!(copies[0].snapshot.description, "s30");
        assert_eq!(copies[0].node_id, "node-0");
    }
}
