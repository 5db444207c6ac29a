use strata_crypto::{ContentHasher, SigningSecret};
use strata_types::{Lineage, Snapshot, StateRef, TierFlags};

use crate::clock::HybridLogicalClock;

/// Descriptions longer than this many characters are truncated.
pub const MAX_DESCRIPTION_CHARS: usize = 512;

/// Trim surrounding whitespace and cap the length at a char boundary.
pub fn normalize_description(description: &str) -> String {
    let trimmed = description.trim();
    match trimmed.char_indices().nth(MAX_DESCRIPTION_CHARS) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}

/// Produces signed, content-addressed snapshots.
///
/// The id is the content hash of description, state reference, creation
/// time and lineage. The signature is a keyed MAC over id, description and
/// creation time, so a copy that was edited anywhere fails verification.
#[derive(Debug)]
pub struct SnapshotEncoder {
    secret: SigningSecret,
    clock: HybridLogicalClock,
    tier_flags: TierFlags,
}

impl SnapshotEncoder {
    pub fn new(secret: SigningSecret, clock: HybridLogicalClock, tier_flags: TierFlags) -> Self {
        Self {
            secret,
            clock,
            tier_flags,
        }
    }

    pub fn clock(&self) -> &HybridLogicalClock {
        &self.clock
    }

    pub fn encode(
        &self,
        description: &str,
        state_ref: StateRef,
        lineage: Option<Lineage>,
    ) -> Snapshot {
        let description = normalize_description(description);
        let created_at = self.clock.now();
        let id = ContentHasher::snapshot_id(&Snapshot::content_bytes(
            &description,
            &state_ref,
            &created_at,
            lineage.as_ref(),
        ));
        let signature = self.secret.sign_snapshot(&id, &description, &created_at);
        Snapshot {
            id,
            created_at,
            description,
            state_ref,
            signature,
            tier_flags: self.tier_flags,
            lineage,
        }
    }
}
