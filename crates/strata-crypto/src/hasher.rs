use strata_types::{Snapshot, SnapshotId};

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so snapshot ids can never collide with hashes computed for
/// any other purpose over the same bytes.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for snapshot id derivation.
    pub const SNAPSHOT: Self = Self {
        domain: "strata-snapshot-v1",
    };
    /// Hasher for caller state digests.
    pub const STATE: Self = Self {
        domain: "strata-state-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        *hasher.finalize().as_bytes()
    }

    /// Hash a serializable value as JSON with domain separation.
    pub fn hash_json<T: serde::Serialize>(&self, value: &T) -> Result<[u8; 32], HasherError> {
        let data =
            serde_json::to_vec(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }

    /// Derive a snapshot id from canonical content bytes.
    pub fn snapshot_id(content: &[u8]) -> SnapshotId {
        SnapshotId::from_hash(Self::SNAPSHOT.hash(content))
    }

    /// Returns `true` if the snapshot's id still matches its content.
    pub fn id_matches(snapshot: &Snapshot) -> bool {
        Self::snapshot_id(&snapshot.own_content_bytes()) == snapshot.id
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}
