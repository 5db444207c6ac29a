use strata_crypto::{ContentHasher, SigningSecret};
use strata_types::temporal::wall_clock_ms;
use strata_types::Snapshot;

use crate::error::IntegrityError;

/// Decides whether a stored snapshot copy can be trusted.
///
/// Checks run in order and the first failure is reported:
/// 1. the id is not null
/// 2. the signature matches `(id, description, created_at)`
/// 3. the id matches the content hash (catches edits to fields the
///    signature does not cover, such as the state reference)
/// 4. `created_at` is not further in the future than the skew tolerance
#[derive(Debug)]
pub struct IntegrityVerifier {
    secret: SigningSecret,
    skew_tolerance_ms: u64,
}

impl IntegrityVerifier {
    pub fn new(secret: SigningSecret, skew_tolerance_ms: u64) -> Self {
        Self {
            secret,
            skew_tolerance_ms,
        }
    }

    pub fn verify(&self, snapshot: &Snapshot) -> Result<(), IntegrityError> {
        self.verify_at(snapshot, wall_clock_ms())
    }

    /// Verify against an explicit "now", in milliseconds since the epoch.
    pub fn verify_at(&self, snapshot: &Snapshot, now_ms: u64) -> Result<(), IntegrityError> {
        let id = snapshot.id;
        if id.is_null() {
            return Err(IntegrityError::EmptyId);
        }
        if !self.secret.verify_snapshot(snapshot) {
            return Err(IntegrityError::SignatureMismatch { id });
        }
        if !ContentHasher::id_matches(snapshot) {
            return Err(IntegrityError::IdMismatch { id });
        }
        let created_ms = snapshot.created_at.physical_ms;
        if created_ms > now_ms.saturating_add(self.skew_tolerance_ms) {
            return Err(IntegrityError::FutureTimestamp {
                id,
                created_ms,
                now_ms,
                tolerance_ms: self.skew_tolerance_ms,
            });
        }
        Ok(())
    }

    pub fn is_valid(&self, snapshot: &Snapshot) -> bool {
        self.verify(snapshot).is_ok()
    }
}
