//! Fixtures shared by the tier unit tests.

use strata_crypto::{ContentHasher, SigningSecret};
use strata_types::{Snapshot, StateRef, TemporalAnchor, TierFlags};

pub(crate) fn secret() -> SigningSecret {
    SigningSecret::from_bytes([42; 32])
}

/// A correctly signed snapshot created at `ms`.
pub(crate) fn snapshot_at(description: &str, ms: u64) -> Snapshot {
    let created_at = TemporalAnchor::new(ms, 0, 0);
    let state_ref = StateRef::new(format!("state-{ms}"));
    let id = ContentHasher::snapshot_id(&Snapshot::content_bytes(
        description,
        &state_ref,
        &created_at,
        None,
    ));
    Snapshot {
        id,
        created_at,
        description: description.to_string(),
        state_ref,
        signature: secret().sign_snapshot(&id, description, &created_at),
        tier_flags: TierFlags::ALL,
        lineage: None,
    }
}
