use std::sync::{Arc, RwLock};

use strata_types::{Snapshot, SnapshotId};
use tracing::{debug, warn};

use crate::backend::RecordBackend;
use crate::codec;
use crate::error::{TierError, TierResult};
use crate::ring;

/// Bounded ring buffer of the N most recent snapshots.
///
/// This is the canonical lookup path. Records are keyed by the snapshot id's
/// hex form. Inserting beyond capacity evicts the oldest by `created_at`.
pub struct PrimaryStore {
    backend: Arc<dyn RecordBackend>,
    capacity: usize,
    lock: RwLock<()>,
}

impl PrimaryStore {
    /// Create a store over `backend` holding at most `capacity` snapshots.
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

    /// The underlying storage location.
    pub fn backend(&self) -> &Arc<dyn RecordBackend> {
        &self.backend
    }

    /// Record a snapshot, evicting the oldest other entries if over capacity.
    ///
    /// The snapshot just written always survives its own put, even when it
    /// is older than everything else in the store. Atomic: on error the
    /// store is left exactly as it was. Returns the ids evicted to make
    /// room. Re-putting an existing id replaces that record.
    pub fn put(&self, snapshot: &Snapshot) -> TierResult<Vec<SnapshotId>> {
        self.put_retaining(snapshot, None)
    }

    /// Like [`put`](Self::put), but `retain` is also kept ahead of newer
    /// entries while capacity allows. With capacity 1 only the new
    /// snapshot fits and `retain` is evicted.
    pub fn put_retaining(
        &self,
        snapshot: &Snapshot,
        retain: Option<&SnapshotId>,
    ) -> TierResult<Vec<SnapshotId>> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| TierError::LockPoisoned("primary store"))?;

        let key = snapshot.id.to_hex();
        let previous = self.backend.get(&key)?;
        let bytes = codec::encode(snapshot)?;
        self.backend.put(&key, &bytes)?;

        let mut keep = vec![key.clone()];
        keep.extend(retain.map(SnapshotId::to_hex));
        match self.evict_locked(&keep) {
            Ok(evicted) => {
                debug!(id = %snapshot.id.short_hex(), evicted = evicted.len(), "primary put");
                Ok(evicted)
            }
            Err(e) => {
                let undo = match previous {
                    Some(raw) => self.backend.put(&key, &raw),
                    None => self.backend.remove(&key).map(|_| ()),
                };
                if let Err(undo_err) = undo {
                    warn!(%key, error = %undo_err, "failed to undo primary put");
                }
                Err(e)
            }
        }
    }

    /// Look up a snapshot by id.
    ///
    /// Returns `Err` if the stored record is undecodable or filed under the
    /// wrong id.
    pub fn get(&self, id: &SnapshotId) -> TierResult<Option<Snapshot>> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| TierError::LockPoisoned("primary store"))?;
        let key = id.to_hex();
        let Some(raw) = self.backend.get(&key)? else {
            return Ok(None);
        };
        let snapshot: Snapshot = codec::decode(&key, &raw)?;
        if snapshot.id != *id {
            return Err(TierError::Corrupt {
                key,
                reason: format!("record carries id {}", snapshot.id.short_hex()),
            });
        }
        Ok(Some(snapshot))
    }

    /// Up to `limit` snapshots, newest first. Undecodable records are skipped.
    pub fn list(&self, limit: usize) -> TierResult<Vec<Snapshot>> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| TierError::LockPoisoned("primary store"))?;
        let (mut loaded, _corrupt) = ring::load_all::<Snapshot>(&*self.backend)?;
        ring::sort_newest_first(&mut loaded, |s| s.created_at);
        Ok(loaded
            .into_iter()
            .take(limit)
            .map(|l| l.record)
            .collect())
    }

    /// The newest snapshot, if any.
    pub fn newest(&self) -> TierResult<Option<Snapshot>> {
        Ok(self.list(1)?.into_iter().next())
    }

    /// Number of records currently stored.
    pub fn count(&self) -> TierResult<usize> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| TierError::LockPoisoned("primary store"))?;
        self.backend.count()
    }

    /// Evict the oldest snapshots while the store holds more than capacity.
    pub fn evict_oldest_if_over_capacity(&self) -> TierResult<Vec<SnapshotId>> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| TierError::LockPoisoned("primary store"))?;
        self.evict_locked(&[])
    }

    fn evict_locked(&self, keep: &[String]) -> TierResult<Vec<SnapshotId>> {
        let (loaded, corrupt) = ring::load_all::<Snapshot>(&*self.backend)?;
        let evicted = ring::evict_oldest(
            &*self.backend,
            loaded,
            corrupt,
            self.capacity,
            keep,
            |s| s.created_at,
        )?;
        for victim in &evicted {
            debug!(id = %victim.record.id.short_hex(), "primary evicted");
        }
        Ok(evicted.into_iter().map(|l| l.record.id).collect())
    }
}

impl std::fmt::Debug for PrimaryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryStore")
            .field("location", &self.backend.location())
            .field("capacity", &self.capacity)
            .finish()
    }
}
