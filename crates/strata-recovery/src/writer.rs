use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use strata_tiers::{ReplicationReport, TierError};
use strata_types::{Lineage, Snapshot, SnapshotId, StateRef, Tier};
use tracing::{debug, error, info, warn};

use crate::encoder::SnapshotEncoder;
use crate::error::{StrataError, StrataResult};
use crate::tiers::TierSet;

/// Serializes every operation that writes snapshots or moves the active
/// pointer. Tier locks are only ever taken while holding the gate, one
/// tier at a time, so no two tiers' locks are held together.
#[derive(Debug, Default)]
pub struct WriteGate {
    lock: Mutex<()>,
}

/// Proof that the holder owns the [`WriteGate`].
#[derive(Debug)]
pub struct GateGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> GateGuard<'_> {
        // The gate guards ordering only; there is no data to leave torn.
        let guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        GateGuard { _guard: guard }
    }
}

/// A secondary tier write that did not succeed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TierFailure {
    pub tier: Tier,
    pub reason: String,
}

/// Everything that happened while writing one snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct CheckpointReceipt {
    pub snapshot: Snapshot,
    /// Snapshots the primary ring buffer dropped to make room.
    pub evicted: Vec<SnapshotId>,
    pub replication: ReplicationReport,
    pub hidden_id: Option<String>,
    pub ghost_id: Option<String>,
    pub tier_failures: Vec<TierFailure>,
}

impl CheckpointReceipt {
    pub fn id(&self) -> SnapshotId {
        self.snapshot.id
    }

    pub fn is_fully_replicated(&self) -> bool {
        self.tier_failures.is_empty()
    }
}

/// Running totals of failed secondary tier writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TierFailureCounts {
    pub replica: u64,
    pub hidden: u64,
    pub ghost: u64,
}

#[derive(Debug, Default)]
struct FailureCounters {
    replica: AtomicU64,
    hidden: AtomicU64,
    ghost: AtomicU64,
}

/// Encodes snapshots and fans them out across the tiers.
///
/// The primary write is the only one that can fail the operation. Replica,
/// vault and ghost writes are attempted regardless of each other; their
/// failures are logged, counted and reported on the receipt.
#[derive(Debug)]
pub struct CheckpointWriter {
    encoder: SnapshotEncoder,
    tiers: Arc<TierSet>,
    replication_factor: usize,
    failures: FailureCounters,
}

impl CheckpointWriter {
    pub fn new(encoder: SnapshotEncoder, tiers: Arc<TierSet>, replication_factor: usize) -> Self {
        Self {
            encoder,
            tiers,
            replication_factor,
            failures: FailureCounters::default(),
        }
    }

    pub fn encoder(&self) -> &SnapshotEncoder {
        &self.encoder
    }

    pub fn write(
        &self,
        gate: &GateGuard<'_>,
        description: &str,
        state_ref: StateRef,
        lineage: Option<Lineage>,
    ) -> StrataResult<CheckpointReceipt> {
        self.write_retaining(gate, description, state_ref, lineage, None)
    }

    /// Write a snapshot while keeping `retain` in the primary store ahead
    /// of newer entries, capacity permitting.
    ///
    /// Every tier is attempted even when the primary write fails; the
    /// primary failure is returned only after the other tiers have their
    /// copies.
    pub fn write_retaining(
        &self,
        _gate: &GateGuard<'_>,
        description: &str,
        state_ref: StateRef,
        lineage: Option<Lineage>,
        retain: Option<&SnapshotId>,
    ) -> StrataResult<CheckpointReceipt> {
        let snapshot = self.encoder.encode(description, state_ref, lineage);
        let primary = self.tiers.primary.put_retaining(&snapshot, retain);

        let mut tier_failures = Vec::new();

        let replication = if snapshot.tier_flags.replicated {
            self.tiers.replicas.replicate(&snapshot, self.replication_factor)
        } else {
            ReplicationReport::default()
        };
        if !replication.failed.is_empty() {
            self.failures
                .replica
                .fetch_add(replication.failed.len() as u64, Ordering::Relaxed);
            for failure in &replication.failed {
                tier_failures.push(TierFailure {
                    tier: Tier::Replica,
                    reason: format!("{}: {}", failure.node_id, failure.reason),
                });
            }
        }

        let hidden_id = match self.tiers.vault.stash(&snapshot) {
            Ok(hidden_id) => Some(hidden_id),
            Err(source) => {
                self.failures.hidden.fetch_add(1, Ordering::Relaxed);
                tier_failures.push(soft_failure(&snapshot, Tier::Hidden, source));
                None
            }
        };

        let ghost_id = match self.tiers.ghost.archive(&snapshot) {
            Ok(record) => Some(record.ghost_id),
            Err(source) => {
                self.failures.ghost.fetch_add(1, Ordering::Relaxed);
                tier_failures.push(soft_failure(&snapshot, Tier::Ghost, source));
                None
            }
        };

        let evicted = match primary {
            Ok(evicted) => evicted,
            Err(source) => {
                error!(
                    id = %snapshot.id.short_hex(),
                    error = %source,
                    hidden = hidden_id.is_some(),
                    ghost = ghost_id.is_some(),
                    replicas = replication.success_count(),
                    "primary write failed"
                );
                return Err(StrataError::PrimaryWrite(source));
            }
        };

        if !evicted.is_empty() {
            debug!(
                evicted = ?evicted.iter().map(SnapshotId::short_hex).collect::<Vec<_>>(),
                "primary ring evicted"
            );
        }
        info!(
            id = %snapshot.id.short_hex(),
            created_at = %snapshot.created_at,
            replicas = replication.success_count(),
            failures = tier_failures.len(),
            "snapshot written"
        );

        Ok(CheckpointReceipt {
            snapshot,
            evicted,
            replication,
            hidden_id,
            ghost_id,
            tier_failures,
        })
    }

    pub fn failure_counts(&self) -> TierFailureCounts {
        TierFailureCounts {
            replica: self.failures.replica.load(Ordering::Relaxed),
            hidden: self.failures.hidden.load(Ordering::Relaxed),
            ghost: self.failures.ghost.load(Ordering::Relaxed),
        }
    }
}

fn soft_failure(snapshot: &Snapshot, tier: Tier, source: TierError) -> TierFailure {
    let err = StrataError::TierWrite { tier, source };
    warn!(id = %snapshot.id.short_hex(), error = %err, code = err.code(), "tier write failed");
    TierFailure {
        tier,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::HybridLogicalClock;
    use crate::config::StrataConfig;
    use crate::tiers::TierBackends;
    use strata_crypto::SigningSecret;
    use strata_tiers::{InMemoryBackend, RecordBackend};

    struct Fixture {
        writer: CheckpointWriter,
        tiers: Arc<TierSet>,
        hidden: Arc<InMemoryBackend>,
        ghost: Arc<InMemoryBackend>,
        primary: Arc<InMemoryBackend>,
    }

    fn fixture() -> Fixture {
        let config = StrataConfig::default();
        let secret = SigningSecret::from_bytes([4; 32]);
        let primary = Arc::new(InMemoryBackend::new("primary"));
        let hidden = Arc::new(InMemoryBackend::new("hidden"));
        let ghost = Arc::new(InMemoryBackend::new("ghost"));
        let mut backends = TierBackends::in_memory(&config);
        backends.primary = primary.clone() as Arc<dyn RecordBackend>;
        backends.hidden = hidden.clone() as Arc<dyn RecordBackend>;
        backends.ghost = ghost.clone() as Arc<dyn RecordBackend>;
        let tiers = Arc::new(TierSet::assemble(&config, &secret, backends));
        let encoder = SnapshotEncoder::new(
            secret,
            HybridLogicalClock::new(0),
            tiers.flags(config.replication_factor),
        );
        Fixture {
            writer: CheckpointWriter::new(encoder, tiers.clone(), config.replication_factor),
            tiers,
            hidden,
            ghost,
            primary,
        }
    }

    #[test]
    fn writes_every_tier() {
        let f = fixture();
        let gate = WriteGate::new();
        let receipt = f
            .writer
            .write(&gate.acquire(), "first", StateRef::none(), None)
            .unwrap();
        assert!(receipt.is_fully_replicated());
        assert_eq!(receipt.replication.success_count(), 3);
        assert!(receipt.hidden_id.is_some());
        assert!(receipt.ghost_id.is_some());
        assert_eq!(f.tiers.primary.get(&receipt.id()).unwrap(), Some(receipt.snapshot.clone()));
        assert!(f.tiers.vault.find_by_original_id(&receipt.id()).unwrap().is_some());
        assert!(f.tiers.ghost.find(&receipt.id()).unwrap().is_some());
    }

    #[test]
    fn secondary_failures_are_counted_not_fatal() {
        let f = fixture();
        f.hidden.set_read_only(true);
        f.ghost.set_read_only(true);
        let gate = WriteGate::new();
        let receipt = f
            .writer
            .write(&gate.acquire(), "degraded", StateRef::none(), None)
            .unwrap();
        assert!(receipt.hidden_id.is_none());
        assert!(receipt.ghost_id.is_none());
        let tiers: Vec<Tier> = receipt.tier_failures.iter().map(|t| t.tier).collect();
        assert_eq!(tiers, vec![Tier::Hidden, Tier::Ghost]);
        assert_eq!(
            f.writer.failure_counts(),
            TierFailureCounts { replica: 0, hidden: 1, ghost: 1 }
        );
        assert!(f.tiers.primary.get(&receipt.id()).unwrap().is_some());
    }

    #[test]
    fn primary_failure_still_reaches_other_tiers() {
        let f = fixture();
        f.primary.set_read_only(true);
        let gate = WriteGate::new();
        let err = f
            .writer
            .write(&gate.acquire(), "nowhere", StateRef::none(), None)
            .unwrap_err();
        assert!(matches!(err, StrataError::PrimaryWrite(_)));
        assert_eq!(err.code(), "primary_write_error");
        assert_eq!(f.tiers.primary.count().unwrap(), 0);
        assert_eq!(f.tiers.vault.count().unwrap(), 1);
        assert_eq!(f.tiers.ghost.count().unwrap(), 1);
        assert!(f
            .tiers
            .replicas
            .copy_counts()
            .iter()
            .any(|(_, copies)| *copies == Some(1)));
    }

    #[test]
    fn retained_snapshot_survives_a_full_primary() {
        let f = fixture();
        let gate = WriteGate::new();
        let first = f
            .writer
            .write(&gate.acquire(), "first", StateRef::none(), None)
            .unwrap();
        for i in 1..f.tiers.primary.capacity() {
            f.writer
                .write(&gate.acquire(), &format!("c{i}"), StateRef::none(), None)
                .unwrap();
        }
        let receipt = f
            .writer
            .write_retaining(&gate.acquire(), "pinned", StateRef::none(), None, Some(&first.id()))
            .unwrap();
        assert_eq!(receipt.evicted.len(), 1);
        assert_ne!(receipt.evicted[0], first.id());
        assert!(f.tiers.primary.get(&first.id()).unwrap().is_some());
    }
}
