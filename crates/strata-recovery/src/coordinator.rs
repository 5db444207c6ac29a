use std::sync::Arc;

use serde::Serialize;
use strata_tiers::TierResult;
use strata_types::{Lineage, Snapshot, SnapshotId, TemporalAnchor, Tier};
use tracing::{debug, error, info, warn};

use crate::error::{AttemptOutcome, StrataError, StrataResult, TierAttempt};
use crate::state::StateSource;
use crate::status::ActiveState;
use crate::tiers::TierSet;
use crate::verifier::IntegrityVerifier;
use crate::writer::{CheckpointWriter, GateGuard};

/// Stages of one rollback call.
///
/// ```text
/// Normal -> VerifyingPrimary -> VerifyingHidden -> VerifyingGhost -> Exhausted
///                  \                  \                  \
///                   +------------------+------------------+--> Restoring -> Normal
/// ```
///
/// Each verifying stage runs at most once per call and stages only move
/// forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStage {
    Normal,
    VerifyingPrimary,
    VerifyingHidden,
    VerifyingGhost,
    Restoring,
    Exhausted,
}

impl RecoveryStage {
    /// The tier consulted in this stage.
    pub fn tier(self) -> Option<Tier> {
        match self {
            Self::VerifyingPrimary => Some(Tier::Primary),
            Self::VerifyingHidden => Some(Tier::Hidden),
            Self::VerifyingGhost => Some(Tier::Ghost),
            Self::Normal | Self::Restoring | Self::Exhausted => None,
        }
    }

    fn after_verifying(self, found: bool) -> Self {
        match (self, found) {
            (Self::Normal, _) => Self::VerifyingPrimary,
            (Self::VerifyingPrimary, false) => Self::VerifyingHidden,
            (Self::VerifyingHidden, false) => Self::VerifyingGhost,
            (Self::VerifyingGhost, false) => Self::Exhausted,
            (Self::VerifyingPrimary | Self::VerifyingHidden | Self::VerifyingGhost, true) => {
                Self::Restoring
            }
            (Self::Restoring, _) => Self::Normal,
            (Self::Exhausted, _) => Self::Exhausted,
        }
    }
}

/// Why a rollback ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTrigger {
    Requested,
    TamperDetected,
}

impl RollbackTrigger {
    fn event(self) -> &'static str {
        match self {
            Self::Requested => "rollback",
            Self::TamperDetected => "tamper_recovery",
        }
    }
}

/// A verified snapshot and the tier that supplied it.
#[derive(Clone, Debug, Serialize)]
pub struct Resolution {
    pub snapshot: Snapshot,
    pub source: Tier,
    pub attempts: Vec<TierAttempt>,
    /// Tiers that were rewritten with the recovered copy.
    pub repaired: Vec<Tier>,
}

/// Result of a successful rollback.
#[derive(Clone, Debug, Serialize)]
pub struct RollbackOutcome {
    pub restored: Snapshot,
    pub safety: Snapshot,
    pub source: Tier,
    pub trigger: RollbackTrigger,
    pub attempts: Vec<TierAttempt>,
    pub repaired: Vec<Tier>,
    pub completed_at: TemporalAnchor,
}

impl RollbackOutcome {
    pub fn restored_id(&self) -> SnapshotId {
        self.restored.id
    }

    pub fn safety_snapshot_id(&self) -> SnapshotId {
        self.safety.id
    }
}

/// Walks the fallback chain Primary, Hidden, Ghost and restores the first
/// trustworthy copy.
///
/// Every method takes a [`GateGuard`], so the whole multi-step walk, the
/// repair writes and the safety snapshot happen without any other snapshot
/// or rollback interleaving.
pub struct RollbackCoordinator {
    tiers: Arc<TierSet>,
    verifier: Arc<IntegrityVerifier>,
    writer: Arc<CheckpointWriter>,
    active: Arc<ActiveState>,
    state: Arc<dyn StateSource>,
}

impl RollbackCoordinator {
    pub fn new(
        tiers: Arc<TierSet>,
        verifier: Arc<IntegrityVerifier>,
        writer: Arc<CheckpointWriter>,
        active: Arc<ActiveState>,
        state: Arc<dyn StateSource>,
    ) -> Self {
        Self {
            tiers,
            verifier,
            writer,
            active,
            state,
        }
    }

    /// Restore to `target`, or to the newest trustworthy snapshot when
    /// `target` is `None`.
    ///
    /// A pre-rollback safety snapshot of the current state is written
    /// before the active pointer moves.
    pub fn rollback(
        &self,
        gate: &GateGuard<'_>,
        target: Option<SnapshotId>,
        trigger: RollbackTrigger,
    ) -> StrataResult<RollbackOutcome> {
        let mut resolution = self.resolve(gate, target)?;
        let restored = resolution.snapshot;
        let lineage = match resolution.source {
            Tier::Primary => Lineage::PreRollbackSafety {
                target: restored.id,
            },
            source => Lineage::Recovered {
                target: restored.id,
                source,
            },
        };
        let description = format!("pre-rollback safety for {}", restored.id.short_hex());
        let receipt = self.writer.write_retaining(
            gate,
            &description,
            self.state.current(),
            Some(lineage),
            Some(&restored.id),
        )?;
        if receipt.evicted.contains(&restored.id) {
            warn!(
                restored = %restored.id.short_hex(),
                capacity = self.tiers.primary.capacity(),
                "primary store too small to hold the restored snapshot beside its safety snapshot"
            );
            resolution.repaired.retain(|tier| *tier != Tier::Primary);
        }
        let safety = receipt.snapshot;
        self.active
            .record_checkpoint(safety.id, safety.created_at, false);

        let completed_at = self.writer.encoder().clock().now();
        self.active.record_rollback(restored.id, completed_at);

        let event = trigger.event();
        if trigger == RollbackTrigger::TamperDetected || resolution.source != Tier::Primary {
            warn!(
                event,
                restored = %restored.id.short_hex(),
                safety = %safety.id.short_hex(),
                source = %resolution.source,
                repaired = ?resolution.repaired,
                "restored from fallback tier"
            );
        } else {
            info!(
                event,
                restored = %restored.id.short_hex(),
                safety = %safety.id.short_hex(),
                "rollback complete"
            );
        }

        Ok(RollbackOutcome {
            restored,
            safety,
            source: resolution.source,
            trigger,
            attempts: resolution.attempts,
            repaired: resolution.repaired,
            completed_at,
        })
    }

    /// Find a verified copy of `target` (or the newest verified snapshot)
    /// and repair the tiers ahead of the one that supplied it.
    ///
    /// With a target, the first tier holding a verified copy wins. Without
    /// one, each tier is still consulted once, for anything newer than the
    /// best candidate so far, so the result is the newest snapshot that
    /// verifies anywhere.
    pub fn resolve(
        &self,
        _gate: &GateGuard<'_>,
        target: Option<SnapshotId>,
    ) -> StrataResult<Resolution> {
        let mut attempts = Vec::new();
        let mut best: Option<(Snapshot, Tier)> = None;
        let mut stage = RecoveryStage::Normal.after_verifying(false);

        while let Some(tier) = stage.tier() {
            debug!(?stage, target = ?target.map(|t| t.short_hex()), "recovery stage");
            let floor = best.as_ref().map(|(snapshot, _)| snapshot.created_at);
            if let Some(found) = self.search(tier, target, floor, &mut attempts) {
                best = Some((found, tier));
            }
            stage = if target.is_some() || stage == RecoveryStage::VerifyingGhost {
                stage.after_verifying(best.is_some())
            } else {
                stage.after_verifying(false)
            };
        }

        let Some((snapshot, source)) = best else {
            error!(
                stage = ?RecoveryStage::Exhausted,
                target = ?target.map(|t| t.short_hex()),
                attempts = attempts.len(),
                "recovery exhausted"
            );
            return Err(StrataError::RecoveryExhausted { target, attempts });
        };
        debug!(stage = ?RecoveryStage::Restoring, source = %source, id = %snapshot.id.short_hex(), "candidate verified");

        let repaired = self.repair(&snapshot, source);
        Ok(Resolution {
            snapshot,
            source,
            attempts,
            repaired,
        })
    }

    /// Copies held by `tier`, newest first, filtered to `target` if given.
    fn candidates(&self, tier: Tier, target: Option<SnapshotId>) -> TierResult<Vec<Snapshot>> {
        match (tier, target) {
            (Tier::Primary, Some(id)) => Ok(self.tiers.primary.get(&id)?.into_iter().collect()),
            (Tier::Primary, None) => self.tiers.primary.list(usize::MAX),
            (Tier::Hidden, Some(id)) => Ok(self
                .tiers
                .vault
                .find_by_original_id(&id)?
                .map(|record| record.snapshot)
                .into_iter()
                .collect()),
            (Tier::Hidden, None) => Ok(self
                .tiers
                .vault
                .list_hidden()?
                .into_iter()
                .map(|record| record.snapshot)
                .collect()),
            (Tier::Ghost, Some(id)) => Ok(self
                .tiers
                .ghost
                .scan()?
                .into_iter()
                .filter(|snapshot| snapshot.id == id)
                .collect()),
            (Tier::Ghost, None) => self.tiers.ghost.scan(),
            (Tier::Replica, _) => Ok(Vec::new()),
        }
    }

    /// Verify `tier`'s candidates newest-first, stopping at the first that
    /// passes or at the first no newer than `floor`.
    fn search(
        &self,
        tier: Tier,
        target: Option<SnapshotId>,
        floor: Option<TemporalAnchor>,
        attempts: &mut Vec<TierAttempt>,
    ) -> Option<Snapshot> {
        let candidates = match self.candidates(tier, target) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(tier = %tier, error = %e, "tier unreadable during recovery");
                attempts.push(TierAttempt {
                    tier,
                    snapshot: target,
                    outcome: AttemptOutcome::Unreadable {
                        reason: e.to_string(),
                    },
                });
                return None;
            }
        };
        if candidates.is_empty() {
            attempts.push(TierAttempt {
                tier,
                snapshot: target,
                outcome: AttemptOutcome::NotFound,
            });
            return None;
        }

        for candidate in candidates {
            if floor.is_some_and(|floor| candidate.created_at <= floor) {
                attempts.push(TierAttempt {
                    tier,
                    snapshot: None,
                    outcome: AttemptOutcome::NotNewer,
                });
                return None;
            }
            match self.verifier.verify(&candidate) {
                Ok(()) => {
                    attempts.push(TierAttempt {
                        tier,
                        snapshot: Some(candidate.id),
                        outcome: AttemptOutcome::Verified,
                    });
                    return Some(candidate);
                }
                Err(reason) => {
                    warn!(tier = %tier, id = %candidate.id.short_hex(), %reason, "rejected snapshot copy");
                    attempts.push(TierAttempt {
                        tier,
                        snapshot: Some(candidate.id),
                        outcome: AttemptOutcome::Rejected { reason },
                    });
                }
            }
        }
        None
    }

    /// Rewrite the recovered copy into the tiers consulted before `source`.
    /// Repair failures are logged; the recovered snapshot is still valid.
    fn repair(&self, snapshot: &Snapshot, source: Tier) -> Vec<Tier> {
        let mut repaired = Vec::new();
        if matches!(source, Tier::Hidden | Tier::Ghost) {
            match self.tiers.primary.put(snapshot) {
                Ok(_) => repaired.push(Tier::Primary),
                Err(e) => warn!(id = %snapshot.id.short_hex(), error = %e, "primary repair failed"),
            }
        }
        if source == Tier::Ghost {
            match self.tiers.vault.stash(snapshot) {
                Ok(_) => repaired.push(Tier::Hidden),
                Err(e) => warn!(id = %snapshot.id.short_hex(), error = %e, "hidden vault repair failed"),
            }
        }
        repaired
    }
}

impl std::fmt::Debug for RollbackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackCoordinator")
            .field("tiers", &self.tiers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_only_move_forward() {
        let mut stage = RecoveryStage::Normal.after_verifying(false);
        let mut visited = Vec::new();
        while let Some(tier) = stage.tier() {
            visited.push(tier);
            stage = stage.after_verifying(false);
        }
        assert_eq!(visited, vec![Tier::Primary, Tier::Hidden, Tier::Ghost]);
        assert_eq!(stage, RecoveryStage::Exhausted);
        assert_eq!(stage.after_verifying(true), RecoveryStage::Exhausted);
    }

    #[test]
    fn any_success_moves_to_restoring_then_normal() {
        for stage in [
            RecoveryStage::VerifyingPrimary,
            RecoveryStage::VerifyingHidden,
            RecoveryStage::VerifyingGhost,
        ] {
            let next = stage.after_verifying(true);
            assert_eq!(next, RecoveryStage::Restoring);
            assert_eq!(next.tier(), None);
            assert_eq!(next.after_verifying(false), RecoveryStage::Normal);
        }
    }

    #[test]
    fn triggers_log_distinct_events() {
        assert_eq!(RollbackTrigger::Requested.event(), "rollback");
        assert_eq!(RollbackTrigger::TamperDetected.event(), "tamper_recovery");
    }
}
