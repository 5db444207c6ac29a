use std::sync::Arc;

use strata_types::{SnapshotId, Tier};
use tracing::warn;

use crate::coordinator::{Resolution, RollbackCoordinator, RollbackOutcome, RollbackTrigger};
use crate::error::{AttemptOutcome, StrataError, StrataResult};
use crate::tiers::TierSet;
use crate::writer::{GateGuard, WriteGate};

/// Notices a wiped or tampered primary store and routes reads through
/// recovery instead of failing them.
pub struct TamperDetector {
    tiers: Arc<TierSet>,
    coordinator: Arc<RollbackCoordinator>,
}

impl TamperDetector {
    pub fn new(tiers: Arc<TierSet>, coordinator: Arc<RollbackCoordinator>) -> Self {
        Self { tiers, coordinator }
    }

    /// `true` when the primary store has nothing readable but a fallback
    /// tier still holds snapshots.
    pub fn primary_missing(&self) -> StrataResult<bool> {
        if !self.tiers.primary.list(1)?.is_empty() {
            return Ok(false);
        }
        Ok(self.tiers.vault.count()? > 0 || self.tiers.ghost.count()? > 0)
    }

    /// Run a proactive `rollback(None)` if the primary store is missing.
    ///
    /// Takes the gate itself; must not be called while holding it.
    pub fn check_and_trigger(&self, gate: &WriteGate) -> StrataResult<Option<RollbackOutcome>> {
        if !self.primary_missing()? {
            return Ok(None);
        }
        let guard = gate.acquire();
        // Another caller may have recovered while we waited for the gate.
        if !self.primary_missing()? {
            return Ok(None);
        }
        warn!(
            event = "tamper_recovery",
            primary = %self.tiers.primary.backend().location(),
            "primary store is empty while fallback tiers hold snapshots"
        );
        self.coordinator
            .rollback(&guard, None, RollbackTrigger::TamperDetected)
            .map(Some)
    }

    /// Recover a single snapshot whose primary copy is missing or fails
    /// verification. Repairs the primary store but does not roll back.
    ///
    /// Returns [`StrataError::NotFound`] when no tier has ever held `id`.
    pub fn recover_entry(&self, gate: &GateGuard<'_>, id: SnapshotId) -> StrataResult<Resolution> {
        match self.coordinator.resolve(gate, Some(id)) {
            Ok(resolution) => {
                if resolution.source != Tier::Primary {
                    warn!(
                        event = "tamper_recovery",
                        id = %id.short_hex(),
                        source = %resolution.source,
                        repaired = ?resolution.repaired,
                        "recovered snapshot from fallback tier"
                    );
                }
                Ok(resolution)
            }
            Err(StrataError::RecoveryExhausted { attempts, .. })
                if attempts
                    .iter()
                    .all(|a| a.outcome == AttemptOutcome::NotFound) =>
            {
                Err(StrataError::NotFound(id))
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for TamperDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TamperDetector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrataConfig;
    use crate::testing::{harness, tamper_primary};
    use strata_tiers::RecordBackend;

    #[test]
    fn healthy_primary_is_left_alone() {
        let h = harness(StrataConfig::default());
        h.service.create_checkpoint("a").unwrap();
        let gate = WriteGate::new();
        assert!(!h.service.detector().primary_missing().unwrap());
        assert!(h.service.detector().check_and_trigger(&gate).unwrap().is_none());
    }

    #[test]
    fn empty_everywhere_is_not_tampering() {
        let h = harness(StrataConfig::default());
        assert!(!h.service.detector().primary_missing().unwrap());
    }

    #[test]
    fn wiped_primary_triggers_recovery() {
        let h = harness(StrataConfig::default());
        let a = h.service.create_checkpoint("a").unwrap();
        h.primary.clear().unwrap();
        assert!(h.service.detector().primary_missing().unwrap());

        let gate = WriteGate::new();
        let outcome = h.service.detector().check_and_trigger(&gate).unwrap().unwrap();
        assert_eq!(outcome.trigger, RollbackTrigger::TamperDetected);
        assert_eq!(outcome.restored_id(), a.id());
        assert!(!h.service.detector().primary_missing().unwrap());
    }

    #[test]
    fn only_ghosts_left_still_recovers() {
        let h = harness(StrataConfig::default());
        let a = h.service.create_checkpoint("a").unwrap();
        h.primary.clear().unwrap();
        h.hidden.clear().unwrap();

        let gate = WriteGate::new();
        let outcome = h.service.detector().check_and_trigger(&gate).unwrap().unwrap();
        assert_eq!(outcome.source, Tier::Ghost);
        assert_eq!(outcome.restored_id(), a.id());
        assert_eq!(outcome.repaired, vec![Tier::Primary, Tier::Hidden]);
    }

    #[test]
    fn recover_entry_repairs_single_snapshot() {
        let h = harness(StrataConfig::default());
        let a = h.service.create_checkpoint("a").unwrap();
        tamper_primary(&h, &a.id());

        let gate = WriteGate::new();
        let resolution = h
            .service
            .detector()
            .recover_entry(&gate.acquire(), a.id())
            .unwrap();
        assert_eq!(resolution.source, Tier::Hidden);
        assert_eq!(resolution.snapshot, a.snapshot);
    }

    #[test]
    fn recover_entry_for_unknown_id_is_not_found() {
        let h = harness(StrataConfig::default());
        let gate = WriteGate::new();
        let missing = SnapshotId::from_hash([9; 32]);
        assert!(matches!(
            h.service.detector().recover_entry(&gate.acquire(), missing),
            Err(StrataError::NotFound(id)) if id == missing
        ));
    }
}
