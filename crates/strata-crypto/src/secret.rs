use rand::RngCore;
use strata_types::{Snapshot, SnapshotId, SnapshotSignature, TemporalAnchor};

/// What a MAC is being computed for. Each purpose uses its own sub-key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacPurpose {
    /// Snapshot authenticity signature over `(id, description, created_at)`.
    SnapshotSignature,
    /// Ghost-record recovery signature over the encoded snapshot.
    GhostRecovery,
}

impl MacPurpose {
    fn context(&self) -> &'static str {
        match self {
            Self::SnapshotSignature => "strata 2024-01 snapshot signature",
            Self::GhostRecovery => "strata 2024-01 ghost recovery signature",
        }
    }
}

/// Process-held 32-byte secret for keyed BLAKE3 signatures.
///
/// Sub-keys are derived per [`MacPurpose`] with `blake3::derive_key`, so a
/// ghost recovery signature can never be replayed as a snapshot signature.
#[derive(Clone)]
pub struct SigningSecret {
    signature_key: [u8; 32],
    ghost_key: [u8; 32],
    master: [u8; 32],
}

impl SigningSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    /// Create from a raw 32-byte secret.
    pub fn from_bytes(master: [u8; 32]) -> Self {
        Self {
            signature_key: blake3::derive_key(MacPurpose::SnapshotSignature.context(), &master),
            ghost_key: blake3::derive_key(MacPurpose::GhostRecovery.context(), &master),
            master,
        }
    }

    /// Parse a 64-character hex secret (surrounding whitespace ignored).
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|e| KeyError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| KeyError::InvalidLength(b.len()))?;
        Ok(Self::from_bytes(arr))
    }

    /// Hex form of the master secret, for persisting to a key file.
    pub fn to_hex(&self) -> String {
        hex::encode(self.master)
    }

    /// Keyed MAC over `message` for the given purpose.
    pub fn mac(&self, purpose: MacPurpose, message: &[u8]) -> [u8; 32] {
        let key = match purpose {
            MacPurpose::SnapshotSignature => &self.signature_key,
            MacPurpose::GhostRecovery => &self.ghost_key,
        };
        *blake3::keyed_hash(key, message).as_bytes()
    }

    /// Constant-time check of a MAC.
    pub fn verify_mac(&self, purpose: MacPurpose, message: &[u8], tag: &[u8; 32]) -> bool {
        let key = match purpose {
            MacPurpose::SnapshotSignature => &self.signature_key,
            MacPurpose::GhostRecovery => &self.ghost_key,
        };
        // blake3::Hash equality is constant-time.
        blake3::keyed_hash(key, message) == blake3::Hash::from(*tag)
    }

    /// Sign the canonical `(id, description, created_at)` message.
    pub fn sign_snapshot(
        &self,
        id: &SnapshotId,
        description: &str,
        created_at: &TemporalAnchor,
    ) -> SnapshotSignature {
        let message = Snapshot::signing_message(id, description, created_at);
        SnapshotSignature::from_bytes(self.mac(MacPurpose::SnapshotSignature, &message))
    }

    /// Returns `true` if the snapshot's stored signature is authentic.
    pub fn verify_snapshot(&self, snapshot: &Snapshot) -> bool {
        self.verify_mac(
            MacPurpose::SnapshotSignature,
            &snapshot.own_signing_message(),
            snapshot.signature.as_bytes(),
        )
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningSecret(<redacted>)")
    }
}

/// Errors from key handling.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid key hex: {0}")]
    InvalidHex(String),
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> SnapshotId {
        SnapshotId::from_hash([7; 32])
    }

    #[test]
    fn sign_and_verify_message() {
        let secret = SigningSecret::generate();
        let tag = secret.mac(MacPurpose::SnapshotSignature, b"hello");
        assert!(secret.verify_mac(MacPurpose::SnapshotSignature, b"hello", &tag));
        assert!(!secret.verify_mac(MacPurpose::SnapshotSignature, b"hellp", &tag));
    }

    #[test]
    fn purposes_use_distinct_keys() {
        let secret = SigningSecret::from_bytes([1; 32]);
        let sig = secret.mac(MacPurpose::SnapshotSignature, b"m");
        let ghost = secret.mac(MacPurpose::GhostRecovery, b"m");
        assert_ne!(sig, ghost);
        assert!(!secret.verify_mac(MacPurpose::GhostRecovery, b"m", &sig));
    }

    #[test]
    fn verify_fails_with_wrong_secret() {
        let at = TemporalAnchor::new(5, 0, 0);
        let sig = SigningSecret::from_bytes([1; 32]).sign_snapshot(&id(), "d", &at);
        let other = SigningSecret::from_bytes([2; 32]);
        let message = Snapshot::signing_message(&id(), "d", &at);
        assert!(!other.verify_mac(MacPurpose::SnapshotSignature, &message, sig.as_bytes()));
    }

    #[test]
    fn signature_covers_description_and_time() {
        let secret = SigningSecret::generate();
        let at = TemporalAnchor::new(5, 0, 0);
        let base = secret.sign_snapshot(&id(), "d", &at);
        assert_ne!(base, secret.sign_snapshot(&id(), "e", &at));
        assert_ne!(base, secret.sign_snapshot(&id(), "d", &TemporalAnchor::new(5, 1, 0)));
        assert_ne!(
            base,
            secret.sign_snapshot(&SnapshotId::from_hash([8; 32]), "d", &at)
        );
    }

    #[test]
    fn hex_roundtrip() {
        let secret = SigningSecret::generate();
        let restored = SigningSecret::from_hex(&format!("{}\n", secret.to_hex())).unwrap();
        let at = TemporalAnchor::new(1, 0, 0);
        assert_eq!(
            secret.sign_snapshot(&id(), "x", &at),
            restored.sign_snapshot(&id(), "x", &at)
        );
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(matches!(
            SigningSecret::from_hex("nothex"),
            Err(KeyError::InvalidHex(_))
        ));
        assert_eq!(
            SigningSecret::from_hex("abcd").unwrap_err(),
            KeyError::InvalidLength(2)
        );
    }

    #[test]
    fn debug_redacts_secret() {
        let secret = SigningSecret::generate();
        let debug = format!("{secret:?}");
        assert!(debug.contains("redacted"));
        assert!(!debug.contains(&secret.to_hex()));
    }
}
