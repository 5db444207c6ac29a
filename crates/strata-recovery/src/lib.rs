//! Checkpoint, rollback and tamper recovery for Strata.
//!
//! [`CheckpointService`] is the single entry point. It is constructed once
//! with a [`StrataConfig`] and a signing key, and shared by reference with
//! every caller (including the [`CheckpointScheduler`]).
//!
//! # Write Path
//!
//! `create_checkpoint` encodes a signed snapshot and writes it to the
//! primary store, the replica nodes, the hidden vault and the ghost
//! archive. Only the primary write can fail the call.
//!
//! # Recovery Path
//!
//! `rollback` walks Primary, Hidden, Ghost in that order, verifying each
//! candidate with the [`IntegrityVerifier`], repairing earlier tiers from
//! whichever tier supplied the data, and writing a pre-rollback safety
//! snapshot before moving the active pointer. The [`TamperDetector`] runs
//! the same path proactively when reads find the primary store emptied.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod encoder;
pub mod error;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod status;
pub mod tiers;
pub mod verifier;
pub mod writer;

#[cfg(test)]
mod testing;

pub use clock::HybridLogicalClock;
pub use config::{load_or_create_secret, ReplicaNodeConfig, StrataConfig};
pub use coordinator::{
    RecoveryStage, Resolution, RollbackCoordinator, RollbackOutcome, RollbackTrigger,
};
pub use detector::TamperDetector;
pub use encoder::{normalize_description, SnapshotEncoder, MAX_DESCRIPTION_CHARS};
pub use error::{AttemptOutcome, IntegrityError, StrataError, StrataResult, TierAttempt};
pub use scheduler::{CheckpointScheduler, SCHEDULED_DESCRIPTION};
pub use service::{
    parse_id, CheckpointService, CopyVerification, ListedCheckpoint, VerificationReport,
};
pub use state::{digest_bytes, digest_ref, NoState, StateSource, StaticState, DIGEST_PREFIX};
pub use status::{ActiveState, ReplicaStatus, StatusReport};
pub use tiers::{TierBackends, TierSet};
pub use verifier::IntegrityVerifier;
pub use writer::{CheckpointReceipt, CheckpointWriter, GateGuard, TierFailure, TierFailureCounts, WriteGate};

pub use strata_crypto::SigningSecret;
pub use strata_types::{Lineage, Snapshot, SnapshotId, StateRef, TemporalAnchor, Tier};
