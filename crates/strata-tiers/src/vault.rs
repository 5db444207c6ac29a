use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use strata_types::{Snapshot, SnapshotId, TemporalAnchor};
use tracing::debug;

use crate::backend::RecordBackend;
use crate::codec;
use crate::error::{TierError, TierResult};
use crate::ring;

/// A snapshot copy held by the hidden vault under its own identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenRecord {
    /// Vault-local identifier, unrelated to the snapshot id.
    pub hidden_id: String,
    pub stashed_at: TemporalAnchor,
    pub snapshot: Snapshot,
}

/// Second, separately addressed copy of each snapshot.
///
/// The vault lives in its own storage location and files records under
/// random `hv-<uuid>` identifiers, so wiping the primary store (or knowing
/// its ids) does not reach the vault. It holds at most M records and evicts
/// oldest-first by snapshot `created_at`, independently of the primary store.
pub struct HiddenVault {
    backend: Arc<dyn RecordBackend>,
    capacity: usize,
    lock: RwLock<()>,
}

impl HiddenVault {
    pub fn new(backend: Arc<dyn RecordBackend>, capacity: usize) -> Self {
        Self {
            backend,
            capacity: capacity.max(1),
            lock: RwLock::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn backend(&self) -> &Arc<dyn RecordBackend> {
        &self.backend
    }

    /// Store a copy of `snapshot`, returning its vault identifier.
    ///
    /// Any older vault copies of the same snapshot id are superseded, so a
    /// repaired entry replaces a tampered one instead of sitting beside it.
    pub fn stash(&self, snapshot: &Snapshot) -> TierResult<String> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| TierError::LockPoisoned("hidden vault"))?;

        let hidden_id = format!("hv-{}", uuid::Uuid::now_v7().simple());
        let record = HiddenRecord {
            hidden_id: hidden_id.clone(),
            stashed_at: TemporalAnchor::now(snapshot.created_at.node_id),
            snapshot: snapshot.clone(),
        };
        self.backend.put(&hidden_id, &codec::encode(&record)?)?;

        let (loaded, corrupt) = ring::load_all::<HiddenRecord>(&*self.backend)?;
        for stale in loaded
            .iter()
            .filter(|l| l.record.snapshot.id == snapshot.id && l.key != hidden_id)
        {
            self.backend.remove(&stale.key)?;
            debug!(hidden_id = %stale.key, "superseded vault copy");
        }
        let loaded = loaded
            .into_iter()
            .filter(|l| l.record.snapshot.id != snapshot.id || l.key == hidden_id)
            .collect();

        let evicted = ring::evict_oldest(
            &*self.backend,
            loaded,
            corrupt,
            self.capacity,
            std::slice::from_ref(&hidden_id),
            |r: &HiddenRecord| r.snapshot.created_at,
        )?;
        debug!(
            %hidden_id,
            id = %snapshot.id.short_hex(),
            evicted = evicted.len(),
            "vault stash"
        );
        Ok(hidden_id)
    }

    /// Every vault record, newest snapshot first.
    ///
    /// Only the recovery path and diagnostics read this; ordinary listing
    /// goes through the primary store.
    pub fn list_hidden(&self) -> TierResult<Vec<HiddenRecord>> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| TierError::LockPoisoned("hidden vault"))?;
        let (mut loaded, _corrupt) = ring::load_all::<HiddenRecord>(&*self.backend)?;
        ring::sort_newest_first(&mut loaded, |r| r.snapshot.created_at);
        Ok(loaded.into_iter().map(|l| l.record).collect())
    }

    /// The vault copy of the snapshot with the given original id.
    pub fn find_by_original_id(&self, id: &SnapshotId) -> TierResult<Option<HiddenRecord>> {
        Ok(self
            .list_hidden()?
            .into_iter()
            .find(|r| r.snapshot.id == *id))
    }

    pub fn count(&self) -> TierResult<usize> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| TierError::LockPoisoned("hidden vault"))?;
        self.backend.count()
    }
}

impl std::fmt::Debug for HiddenVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HiddenVault")
            .field("location", &self.backend.location())
            .field("capacity", &self.capacity)
            .finish()
    }
}
