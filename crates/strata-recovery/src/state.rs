//! Application state capture.
//!
//! A snapshot does not hold application state itself; it records a
//! [`StateRef`] naming wherever the application keeps it. A [`StateSource`]
//! supplies that reference each time a checkpoint is written.

use std::sync::RwLock;

use serde::Serialize;
use strata_crypto::ContentHasher;
use strata_types::StateRef;

use crate::error::{StrataError, StrataResult};

/// Prefix on references produced by [`digest_bytes`] and [`digest_ref`].
pub const DIGEST_PREFIX: &str = "blake3:";

/// Supplies the state reference recorded in new snapshots.
pub trait StateSource: Send + Sync {
    fn current(&self) -> StateRef;
}

/// Records an empty state reference.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoState;

impl StateSource for NoState {
    fn current(&self) -> StateRef {
        StateRef::none()
    }
}

/// A state reference set by the embedding application.
#[derive(Debug, Default)]
pub struct StaticState {
    current: RwLock<StateRef>,
}

impl StaticState {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(StateRef::new(reference)),
        }
    }

    /// Replace the reference used by later snapshots.
    pub fn set(&self, reference: impl Into<String>) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = StateRef::new(reference);
    }
}

impl StateSource for StaticState {
    fn current(&self) -> StateRef {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl<F> StateSource for F
where
    F: Fn() -> StateRef + Send + Sync,
{
    fn current(&self) -> StateRef {
        self()
    }
}

/// A content-addressed reference to raw state bytes.
pub fn digest_bytes(bytes: &[u8]) -> StateRef {
    StateRef::new(format!(
        "{DIGEST_PREFIX}{}",
        hex::encode(ContentHasher::STATE.hash(bytes))
    ))
}

/// A content-addressed reference to a serializable state value.
pub fn digest_ref<T: Serialize>(value: &T) -> StrataResult<StateRef> {
    let digest = ContentHasher::STATE
        .hash_json(value)
        .map_err(|e| StrataError::Internal(format!("state digest: {e}")))?;
    Ok(StateRef::new(format!("{DIGEST_PREFIX}{}", hex::encode(digest))))
}
