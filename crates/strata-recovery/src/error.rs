use std::fmt;

use serde::Serialize;
use strata_crypto::KeyError;
use strata_tiers::TierError;
use strata_types::{SnapshotId, Tier};
use thiserror::Error;

/// A snapshot failed one of the integrity checks.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum IntegrityError {
    #[error("snapshot id is empty")]
    EmptyId,

    #[error("snapshot {id} does not match its content hash")]
    IdMismatch { id: SnapshotId },

    #[error("signature mismatch for snapshot {id}")]
    SignatureMismatch { id: SnapshotId },

    #[error(
        "snapshot {id} created at {created_ms}ms is ahead of now ({now_ms}ms) \
         beyond the {tolerance_ms}ms skew tolerance"
    )]
    FutureTimestamp {
        id: SnapshotId,
        created_ms: u64,
        now_ms: u64,
        tolerance_ms: u64,
    },
}

/// What happened when one tier was consulted during recovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// A copy was found and passed every check.
    Verified,
    /// The tier holds no copy of the requested snapshot.
    NotFound,
    /// The tier's copies are all older than a candidate already chosen.
    NotNewer,
    /// A copy was found and rejected.
    Rejected { reason: IntegrityError },
    /// The tier could not be read.
    Unreadable { reason: String },
}

/// One step of a recovery walk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TierAttempt {
    pub tier: Tier,
    pub snapshot: Option<SnapshotId>,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl fmt::Display for TierAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tier)?;
        if let Some(id) = &self.snapshot {
            write!(f, "[{}]", id.short_hex())?;
        }
        match &self.outcome {
            AttemptOutcome::Verified => write!(f, ": verified"),
            AttemptOutcome::NotFound => write!(f, ": not found"),
            AttemptOutcome::NotNewer => write!(f, ": nothing newer"),
            AttemptOutcome::Rejected { reason } => write!(f, ": {reason}"),
            AttemptOutcome::Unreadable { reason } => write!(f, ": unreadable ({reason})"),
        }
    }
}

fn describe_target(target: &Option<SnapshotId>) -> String {
    match target {
        Some(id) => id.to_hex(),
        None => "latest".into(),
    }
}

fn describe_attempts(attempts: &[TierAttempt]) -> String {
    if attempts.is_empty() {
        return "no tiers consulted".into();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("snapshot not found: {0}")]
    NotFound(SnapshotId),

    #[error(
        "recovery exhausted for {}: {}",
        describe_target(.target),
        describe_attempts(.attempts)
    )]
    RecoveryExhausted {
        target: Option<SnapshotId>,
        attempts: Vec<TierAttempt>,
    },

    #[error("primary store write failed: {0}")]
    PrimaryWrite(#[source] TierError),

    #[error("{tier} tier write failed: {source}")]
    TierWrite {
        tier: Tier,
        #[source]
        source: TierError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] TierError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Stable machine-readable code for callers that dispatch on errors.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Integrity(_) => "integrity_error",
            Self::NotFound(_) => "not_found",
            Self::RecoveryExhausted { .. } => "recovery_exhausted",
            Self::PrimaryWrite(_) => "primary_write_error",
            Self::TierWrite { .. } => "tier_write_error",
            Self::Storage(_) => "storage_error",
            Self::Config(_) => "config_error",
            Self::Key(_) => "key_error",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

pub type StrataResult<T> = Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_message_lists_every_attempt() {
        let id = SnapshotId::from_hash([7; 32]);
        let err = StrataError::RecoveryExhausted {
            target: Some(id),
            attempts: vec![
                TierAttempt {
                    tier: Tier::Primary,
                    snapshot: Some(id),
                    outcome: AttemptOutcome::Rejected {
                        reason: IntegrityError::SignatureMismatch { id },
                    },
                },
                TierAttempt {
                    tier: Tier::Hidden,
                    snapshot: None,
                    outcome: AttemptOutcome::NotFound,
                },
                TierAttempt {
                    tier: Tier::Ghost,
                    snapshot: None,
                    outcome: AttemptOutcome::Unreadable {
                        reason: "read-only".into(),
                    },
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains(&id.to_hex()));
        assert!(message.contains("primary"));
        assert!(message.contains("signature mismatch"));
        assert!(message.contains("hidden: not found"));
        assert!(message.contains("ghost: unreadable (read-only)"));
        assert_eq!(err.code(), "recovery_exhausted");
    }

    #[test]
    fn attempts_serialize_flat() {
        let attempt = TierAttempt {
            tier: Tier::Hidden,
            snapshot: None,
            outcome: AttemptOutcome::Verified,
        };
        let json = serde_json::to_value(&attempt).unwrap();
        assert_eq!(json["tier"], "hidden");
        assert_eq!(json["result"], "verified");
    }
}
