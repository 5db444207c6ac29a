use std::sync::Arc;

use serde::Serialize;
use strata_crypto::SigningSecret;
use strata_types::{Snapshot, SnapshotId, Tier};
use tracing::{debug, info, warn};

use crate::clock::HybridLogicalClock;
use crate::config::{load_or_create_secret, StrataConfig};
use crate::coordinator::{RollbackCoordinator, RollbackOutcome, RollbackTrigger};
use crate::detector::TamperDetector;
use crate::encoder::SnapshotEncoder;
use crate::error::{AttemptOutcome, StrataError, StrataResult};
use crate::state::StateSource;
use crate::status::{ActiveState, ReplicaStatus, StatusReport};
use crate::tiers::{TierBackends, TierSet};
use crate::verifier::IntegrityVerifier;
use crate::writer::{CheckpointReceipt, CheckpointWriter, WriteGate};

/// A snapshot as shown by [`CheckpointService::list_checkpoints`].
#[derive(Clone, Debug, Serialize)]
pub struct ListedCheckpoint {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    pub verified: bool,
    pub active: bool,
}

/// The state of one copy of a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CopyVerification {
    pub tier: Tier,
    /// Replica node or tier-local record id, when the tier has one.
    pub location: Option<String>,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Every copy of a snapshot across all tiers, each verified on its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub id: SnapshotId,
    pub copies: Vec<CopyVerification>,
}

impl VerificationReport {
    /// `true` if at least one copy can be restored.
    pub fn is_recoverable(&self) -> bool {
        self.copies
            .iter()
            .any(|c| c.outcome == AttemptOutcome::Verified)
    }

    pub fn outcome_for(&self, tier: Tier) -> Option<&AttemptOutcome> {
        self.copies.iter().find(|c| c.tier == tier).map(|c| &c.outcome)
    }
}

/// The checkpoint subsystem, constructed once and shared by reference.
///
/// Mutating operations (`create_checkpoint`, `rollback`, repairs, purges)
/// serialize on one write gate. Reads go straight to the tiers, which
/// each guard their own storage.
pub struct CheckpointService {
    config: StrataConfig,
    tiers: Arc<TierSet>,
    verifier: Arc<IntegrityVerifier>,
    writer: Arc<CheckpointWriter>,
    coordinator: Arc<RollbackCoordinator>,
    detector: TamperDetector,
    active: Arc<ActiveState>,
    gate: WriteGate,
    state: Arc<dyn StateSource>,
}

impl CheckpointService {
    /// Open directory-backed tiers at the locations in `config`, loading
    /// (or creating) the signing key.
    pub fn open(config: StrataConfig, state: Arc<dyn StateSource>) -> StrataResult<Self> {
        config.validate()?;
        let secret = load_or_create_secret(&config.key_path())?;
        let backends = TierBackends::open(&config)?;
        let active = ActiveState::persistent(config.active_path())?;
        Self::build(config, secret, backends, active, state)
    }

    /// A service whose tiers live in process memory.
    pub fn in_memory(
        config: StrataConfig,
        secret: SigningSecret,
        state: Arc<dyn StateSource>,
    ) -> StrataResult<Self> {
        let backends = TierBackends::in_memory(&config);
        Self::with_backends(config, secret, backends, state)
    }

    /// A service over caller-supplied backends. The active pointer is
    /// kept in memory only.
    pub fn with_backends(
        config: StrataConfig,
        secret: SigningSecret,
        backends: TierBackends,
        state: Arc<dyn StateSource>,
    ) -> StrataResult<Self> {
        Self::build(config, secret, backends, ActiveState::new(), state)
    }

    fn build(
        config: StrataConfig,
        secret: SigningSecret,
        backends: TierBackends,
        active: ActiveState,
        state: Arc<dyn StateSource>,
    ) -> StrataResult<Self> {
        config.validate()?;
        let tiers = Arc::new(TierSet::assemble(&config, &secret, backends));
        let trimmed = tiers.primary.evict_oldest_if_over_capacity()?;
        if !trimmed.is_empty() {
            info!(evicted = trimmed.len(), "primary store trimmed to configured capacity");
        }

        let clock = HybridLogicalClock::new(config.node_id);
        if let Some(newest) = tiers.primary.newest()? {
            clock.observe(&newest.created_at);
        }
        if let Some(newest) = tiers.vault.list_hidden()?.first() {
            clock.observe(&newest.snapshot.created_at);
        }

        let encoder = SnapshotEncoder::new(
            secret.clone(),
            clock,
            tiers.flags(config.replication_factor),
        );
        let verifier = Arc::new(IntegrityVerifier::new(secret, config.clock_skew_tolerance_ms));
        let writer = Arc::new(CheckpointWriter::new(
            encoder,
            tiers.clone(),
            config.replication_factor,
        ));
        let active = Arc::new(active);
        let coordinator = Arc::new(RollbackCoordinator::new(
            tiers.clone(),
            verifier.clone(),
            writer.clone(),
            active.clone(),
            state.clone(),
        ));
        let detector = TamperDetector::new(tiers.clone(), coordinator.clone());

        info!(
            data_dir = %config.data_dir.display(),
            primary_capacity = config.primary_capacity,
            hidden_capacity = config.hidden_capacity,
            replication_factor = config.replication_factor,
            "checkpoint service ready"
        );

        Ok(Self {
            config,
            tiers,
            verifier,
            writer,
            coordinator,
            detector,
            active,
            gate: WriteGate::new(),
            state,
        })
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn tiers(&self) -> &TierSet {
        &self.tiers
    }

    pub fn verifier(&self) -> &IntegrityVerifier {
        &self.verifier
    }

    pub fn detector(&self) -> &TamperDetector {
        &self.detector
    }

    /// Snapshot the current state and write it to every tier.
    ///
    /// Fails only if the primary store write fails.
    pub fn create_checkpoint(&self, description: &str) -> StrataResult<CheckpointReceipt> {
        let gate = self.gate.acquire();
        let receipt = self
            .writer
            .write(&gate, description, self.state.current(), None)?;
        self.verifier.verify(&receipt.snapshot)?;
        self.active
            .record_checkpoint(receipt.snapshot.id, receipt.snapshot.created_at, true);
        Ok(receipt)
    }

    /// Roll back to the snapshot with hex id `id`, or to the newest
    /// trustworthy snapshot.
    pub fn rollback(&self, id: Option<&str>) -> StrataResult<RollbackOutcome> {
        let target = id.map(parse_id).transpose()?;
        self.rollback_to(target)
    }

    pub fn rollback_to(&self, target: Option<SnapshotId>) -> StrataResult<RollbackOutcome> {
        let gate = self.gate.acquire();
        self.coordinator
            .rollback(&gate, target, RollbackTrigger::Requested)
    }

    pub fn status(&self) -> StrataResult<StatusReport> {
        Ok(StatusReport {
            primary_count: self.tiers.primary.count()?,
            primary_capacity: self.tiers.primary.capacity(),
            hidden_count: self.tiers.vault.count()?,
            hidden_capacity: self.tiers.vault.capacity(),
            ghost_count: self.tiers.ghost.count()?,
            active_id: self.active.active(),
            last_checkpoint_at: self.active.last_checkpoint_at(),
            last_rollback_at: self.active.last_rollback_at(),
            replica_copies: self
                .tiers
                .replicas
                .copy_counts()
                .into_iter()
                .map(|(node_id, copies)| ReplicaStatus { node_id, copies })
                .collect(),
            tier_write_failures: self.writer.failure_counts(),
        })
    }

    /// Up to `limit` primary store snapshots, newest first.
    ///
    /// An emptied primary store is recovered before listing.
    pub fn list_checkpoints(&self, limit: usize) -> StrataResult<Vec<ListedCheckpoint>> {
        self.recover_if_wiped()?;
        let active = self.active.active();
        Ok(self
            .tiers
            .primary
            .list(limit)?
            .into_iter()
            .map(|snapshot| ListedCheckpoint {
                verified: self.verifier.is_valid(&snapshot),
                active: active == Some(snapshot.id),
                snapshot,
            })
            .collect())
    }

    /// A verified copy of snapshot `id`.
    ///
    /// If the primary copy is missing or fails verification, the snapshot
    /// is recovered from a fallback tier and the primary store repaired.
    /// The active pointer does not move.
    pub fn get_checkpoint(&self, id: &str) -> StrataResult<Snapshot> {
        let id = parse_id(id)?;
        self.recover_if_wiped()?;
        if let Ok(Some(snapshot)) = self.tiers.primary.get(&id) {
            if self.verifier.is_valid(&snapshot) {
                return Ok(snapshot);
            }
        }
        let gate = self.gate.acquire();
        Ok(self.detector.recover_entry(&gate, id)?.snapshot)
    }

    /// Verify every copy of `id` without repairing anything.
    pub fn verify_checkpoint(&self, id: &str) -> StrataResult<VerificationReport> {
        let id = parse_id(id)?;
        let mut copies = Vec::new();

        let primary = self.tiers.primary.get(&id).map(|found| found.map(|s| (None, s)));
        copies.push(self.check_copies(Tier::Primary, primary.map(|o| o.into_iter().collect())));

        for copy in self.tiers.replicas.find(&id) {
            copies.push(CopyVerification {
                tier: Tier::Replica,
                location: Some(copy.node_id.clone()),
                outcome: self.outcome_of(&copy.snapshot),
            });
        }

        let hidden = self
            .tiers
            .vault
            .find_by_original_id(&id)
            .map(|found| found.map(|r| (Some(r.hidden_id), r.snapshot)).into_iter().collect());
        copies.push(self.check_copies(Tier::Hidden, hidden));

        let ghost = self.tiers.ghost.records().map(|records| {
            records
                .into_iter()
                .filter_map(|record| match self.tiers.ghost.decode(&record) {
                    Ok(snapshot) if snapshot.id == id => Some((Some(record.ghost_id), snapshot)),
                    _ => None,
                })
                .collect()
        });
        copies.push(self.check_copies(Tier::Ghost, ghost));

        debug!(id = %id.short_hex(), copies = copies.len(), "verified copies");
        Ok(VerificationReport { id, copies })
    }

    /// Remove ghost records: all of them, or only those for `id`.
    pub fn purge_ghosts(&self, id: Option<&str>) -> StrataResult<usize> {
        let target = id.map(parse_id).transpose()?;
        let _gate = self.gate.acquire();
        let removed = match target {
            Some(id) => self.tiers.ghost.purge_snapshot(&id)?,
            None => self.tiers.ghost.purge()?,
        };
        info!(removed, target = ?target.map(|t| t.short_hex()), "ghost archive purged");
        Ok(removed)
    }

    /// Run tamper recovery ahead of a read. If nothing verifies anywhere
    /// the read goes ahead against the empty primary store.
    fn recover_if_wiped(&self) -> StrataResult<()> {
        match self.detector.check_and_trigger(&self.gate) {
            Ok(_) => Ok(()),
            Err(StrataError::RecoveryExhausted { attempts, .. }) => {
                warn!(
                    event = "tamper_recovery",
                    attempts = attempts.len(),
                    "primary store is empty and no fallback copy verifies"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn outcome_of(&self, snapshot: &Snapshot) -> AttemptOutcome {
        match self.verifier.verify(snapshot) {
            Ok(()) => AttemptOutcome::Verified,
            Err(reason) => AttemptOutcome::Rejected { reason },
        }
    }

    fn check_copies(
        &self,
        tier: Tier,
        found: strata_tiers::TierResult<Vec<(Option<String>, Snapshot)>>,
    ) -> CopyVerification {
        match found {
            Err(e) => CopyVerification {
                tier,
                location: None,
                outcome: AttemptOutcome::Unreadable {
                    reason: e.to_string(),
                },
            },
            Ok(copies) if copies.is_empty() => CopyVerification {
                tier,
                location: None,
                outcome: AttemptOutcome::NotFound,
            },
            Ok(copies) => {
                // Report the best copy: a verified one if any exists.
                let mut checked: Vec<CopyVerification> = copies
                    .into_iter()
                    .map(|(location, snapshot)| CopyVerification {
                        tier,
                        location,
                        outcome: self.outcome_of(&snapshot),
                    })
                    .collect();
                let best = checked
                    .iter()
                    .position(|c| c.outcome == AttemptOutcome::Verified)
                    .unwrap_or(0);
                checked.swap_remove(best)
            }
        }
    }
}

impl std::fmt::Debug for CheckpointService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointService")
            .field("data_dir", &self.config.data_dir)
            .field("tiers", &self.tiers)
            .finish_non_exhaustive()
    }
}

/// Parse a 64-character hex snapshot id.
pub fn parse_id(id: &str) -> StrataResult<SnapshotId> {
    SnapshotId::from_hex(id.trim())
        .map_err(|e| StrataError::Validation(format!("invalid snapshot id {id:?}: {e}")))
}
