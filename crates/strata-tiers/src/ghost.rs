use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use strata_crypto::{MacPurpose, SigningSecret};
use strata_types::{Snapshot, SnapshotId, TemporalAnchor};
use tracing::{debug, warn};

use crate::backend::RecordBackend;
use crate::error::{TierError, TierResult};

/// Envelope format version.
const GHOST_FORMAT: u8 = 1;

/// zstd level for ghost blobs.
const COMPRESSION_LEVEL: i32 = 3;

/// A self-contained encoded snapshot copy.
///
/// `blob` is `base64(zstd(bincode(envelope)))`, where the envelope carries
/// the full snapshot and its own recovery signature. Nothing outside the
/// blob (and the process secret) is needed to decode it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GhostRecord {
    /// Random identifier, unrelated to the snapshot id.
    pub ghost_id: String,
    pub blob: String,
}

#[derive(Serialize, Deserialize)]
struct GhostEnvelope {
    format: u8,
    archived_at: TemporalAnchor,
    snapshot: Snapshot,
    recovery_signature: [u8; 32],
}

/// Append-only archive of self-describing snapshot blobs.
///
/// Records are filed under random 128-bit identifiers and are never listed
/// through ordinary APIs. The only destruction is an explicit purge.
pub struct GhostArchive {
    backend: Arc<dyn RecordBackend>,
    secret: SigningSecret,
    lock: RwLock<()>,
}

impl GhostArchive {
    pub fn new(backend: Arc<dyn RecordBackend>, secret: SigningSecret) -> Self {
        Self {
            backend,
            secret,
            lock: RwLock::new(()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn RecordBackend> {
        &self.backend
    }

    /// Encode and store a new ghost record for `snapshot`.
    pub fn archive(&self, snapshot: &Snapshot) -> TierResult<GhostRecord> {
        let record = encode_record(&self.secret, snapshot)?;
        let _guard = self
            .lock
            .write()
            .map_err(|_| TierError::LockPoisoned("ghost archive"))?;
        self.backend.put(&record.ghost_id, record.blob.as_bytes())?;
        debug!(ghost_id = %record.ghost_id, id = %snapshot.id.short_hex(), "ghost archived");
        Ok(record)
    }

    /// Decode a ghost record back into its snapshot.
    pub fn decode(&self, record: &GhostRecord) -> TierResult<Snapshot> {
        decode_record(&self.secret, record)
    }

    /// Every stored ghost record, in key order.
    pub fn records(&self) -> TierResult<Vec<GhostRecord>> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| TierError::LockPoisoned("ghost archive"))?;
        let mut records = Vec::new();
        for key in self.backend.keys()? {
            let Some(bytes) = self.backend.get(&key)? else {
                continue;
            };
            match String::from_utf8(bytes) {
                Ok(blob) => records.push(GhostRecord { ghost_id: key, blob }),
                Err(_) => warn!(ghost_id = %key, "ghost record is not valid text; skipping"),
            }
        }
        Ok(records)
    }

    /// Decode every record, newest snapshot first. Undecodable records and
    /// records failing their recovery signature are skipped.
    pub fn scan(&self) -> TierResult<Vec<Snapshot>> {
        let mut decoded: Vec<Snapshot> = self
            .records()?
            .iter()
            .filter_map(|record| match self.decode(record) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(ghost_id = %record.ghost_id, error = %e, "skipping undecodable ghost record");
                    None
                }
            })
            .collect();
        decoded.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(decoded)
    }

    /// The newest decodable copy of snapshot `id`.
    pub fn find(&self, id: &SnapshotId) -> TierResult<Option<Snapshot>> {
        Ok(self.scan()?.into_iter().find(|s| s.id == *id))
    }

    pub fn count(&self) -> TierResult<usize> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| TierError::LockPoisoned("ghost archive"))?;
        self.backend.count()
    }

    /// Remove every ghost record.
    pub fn purge(&self) -> TierResult<usize> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| TierError::LockPoisoned("ghost archive"))?;
        let removed = self.backend.clear()?;
        debug!(removed, "ghost archive purged");
        Ok(removed)
    }

    /// Remove every ghost record that decodes to snapshot `id`.
    pub fn purge_snapshot(&self, id: &SnapshotId) -> TierResult<usize> {
        let records = self.records()?;
        let _guard = self
            .lock
            .write()
            .map_err(|_| TierError::LockPoisoned("ghost archive"))?;
        let mut removed = 0;
        for record in records {
            if matches!(self.decode(&record), Ok(s) if s.id == *id)
                && self.backend.remove(&record.ghost_id)?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for GhostArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhostArchive")
            .field("location", &self.backend.location())
            .finish()
    }
}

fn random_ghost_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn snapshot_bytes(snapshot: &Snapshot) -> TierResult<Vec<u8>> {
    bincode::serialize(snapshot).map_err(|e| TierError::Serialization(e.to_string()))
}

/// Build a ghost record for `snapshot` under a fresh random id.
pub fn encode_record(secret: &SigningSecret, snapshot: &Snapshot) -> TierResult<GhostRecord> {
    let recovery_signature = secret.mac(MacPurpose::GhostRecovery, &snapshot_bytes(snapshot)?);
    let envelope = GhostEnvelope {
        format: GHOST_FORMAT,
        archived_at: TemporalAnchor::now(snapshot.created_at.node_id),
        snapshot: snapshot.clone(),
        recovery_signature,
    };
    let raw = bincode::serialize(&envelope).map_err(|e| TierError::Serialization(e.to_string()))?;
    let compressed = zstd::encode_all(raw.as_slice(), COMPRESSION_LEVEL)?;
    Ok(GhostRecord {
        ghost_id: random_ghost_id(),
        blob: STANDARD.encode(compressed),
    })
}

/// Decode a ghost record and check its recovery signature.
pub fn decode_record(secret: &SigningSecret, record: &GhostRecord) -> TierResult<Snapshot> {
    let corrupt = |reason: String| TierError::Corrupt {
        key: record.ghost_id.clone(),
        reason,
    };
    let compressed = STANDARD
        .decode(record.blob.trim())
        .map_err(|e| corrupt(format!("base64: {e}")))?;
    let raw = zstd::decode_all(compressed.as_slice()).map_err(|e| corrupt(format!("zstd: {e}")))?;
    let envelope: GhostEnvelope =
        bincode::deserialize(&raw).map_err(|e| corrupt(format!("envelope: {e}")))?;
    if envelope.format != GHOST_FORMAT {
        return Err(corrupt(format!("unsupported format {}", envelope.format)));
    }
    let message = snapshot_bytes(&envelope.snapshot)?;
    if !secret.verify_mac(MacPurpose::GhostRecovery, &message, &envelope.recovery_signature) {
        return Err(TierError::RecoverySignature(record.ghost_id.clone()));
    }
    Ok(envelope.snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use crate::testing::{secret, snapshot_at};

    fn archive() -> GhostArchive {
        GhostArchive::new(Arc::new(InMemoryBackend::new("ghost")), secret())
    }

    #[test]
    fn archive_and_decode() {
        let archive = archive();
        let snap = snapshot_at("a", 10);
        let record = archive.archive(&snap).unwrap();
        assert_eq!(record.ghost_id.len(), 32);
        assert!(!record.ghost_id.contains(&snap.id.to_hex()));
        assert_eq!(archive.decode(&record).unwrap(), snap);
    }

    #[test]
    fn decode_needs_nothing_but_the_blob_and_secret() {
        let snap = snapshot_at("standalone", 10);
        let record = encode_record(&secret(), &snap).unwrap();
        assert_eq!(decode_record(&secret(), &record).unwrap(), snap);
    }

    #[test]
    fn archiving_twice_appends() {
        let archive = archive();
        let snap = snapshot_at("a", 10);
        let r1 = archive.archive(&snap).unwrap();
        let r2 = archive.archive(&snap).unwrap();
        assert_ne!(r1.ghost_id, r2.ghost_id);
        assert_eq!(archive.count().unwrap(), 2);
    }

    #[test]
    fn wrong_secret_fails_recovery_signature() {
        let record = encode_record(&secret(), &snapshot_at("a", 10)).unwrap();
        let other = SigningSecret::from_bytes([9; 32]);
        assert!(matches!(
            decode_record(&other, &record),
            Err(TierError::RecoverySignature(_))
        ));
    }

    #[test]
    fn garbled_blob_is_corrupt() {
        let mut record = encode_record(&secret(), &snapshot_at("a", 10)).unwrap();
        record.blob = "!!not base64!!".into();
        assert!(matches!(
            decode_record(&secret(), &record),
            Err(TierError::Corrupt { .. })
        ));
    }

    #[test]
    fn scan_skips_bad_records_and_orders_newest_first() {
        let archive = archive();
        archive.archive(&snapshot_at("old", 10)).unwrap();
        archive.archive(&snapshot_at("new", 20)).unwrap();
        archive.backend().put("deadbeef", b"junk").unwrap();
        let scanned = archive.scan().unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].description, "new");
    }

    #[test]
    fn find_and_purge_snapshot() {
        let archive = archive();
        let keep = snapshot_at("keep", 10);
        let drop = snapshot_at("drop", 20);
        archive.archive(&keep).unwrap();
        archive.archive(&drop).unwrap();
        archive.archive(&drop).unwrap();
        assert_eq!(archive.find(&drop.id).unwrap(), Some(drop.clone()));
        assert_eq!(archive.purge_snapshot(&drop.id).unwrap(), 2);
        assert!(archive.find(&drop.id).unwrap().is_none());
        assert_eq!(archive.purge().unwrap(), 1);
        assert_eq!(archive.count().unwrap(), 0);
    }
}
