use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use strata_types::{SnapshotId, TemporalAnchor};
use tracing::{debug, warn};

use crate::error::StrataResult;
use crate::writer::TierFailureCounts;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ActiveInner {
    active: Option<SnapshotId>,
    last_checkpoint_at: Option<TemporalAnchor>,
    last_rollback_at: Option<TemporalAnchor>,
}

/// The active snapshot pointer and the times of the last write and rollback.
///
/// Only set with snapshots that verified at the moment of setting. A
/// persistent instance rewrites its file after every change so separate
/// processes sharing a data directory see the same pointer.
#[derive(Debug, Default)]
pub struct ActiveState {
    inner: RwLock<ActiveInner>,
    path: Option<PathBuf>,
}

impl ActiveState {
    /// State held in process memory only.
    pub fn new() -> Self {
        Self::default()
    }

    /// State loaded from, and saved to, the JSON file at `path`.
    ///
    /// A missing file starts empty. An unreadable one is logged and
    /// replaced on the next change.
    pub fn persistent(path: impl Into<PathBuf>) -> StrataResult<Self> {
        let path = path.into();
        let inner = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "active state file unreadable; starting empty");
                ActiveInner::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ActiveInner::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            inner: RwLock::new(inner),
            path: Some(path),
        })
    }

    /// A snapshot was written (user checkpoint, scheduled, or safety).
    pub fn record_checkpoint(&self, id: SnapshotId, created_at: TemporalAnchor, make_active: bool) {
        let mut inner = self.write();
        inner.last_checkpoint_at = Some(created_at);
        if make_active {
            inner.active = Some(id);
        }
        self.save(&inner);
    }

    pub fn record_rollback(&self, restored: SnapshotId, at: TemporalAnchor) {
        let mut inner = self.write();
        inner.active = Some(restored);
        inner.last_rollback_at = Some(at);
        self.save(&inner);
    }

    pub fn active(&self) -> Option<SnapshotId> {
        self.read().active
    }

    pub fn last_checkpoint_at(&self) -> Option<TemporalAnchor> {
        self.read().last_checkpoint_at
    }

    pub fn last_rollback_at(&self) -> Option<TemporalAnchor> {
        self.read().last_rollback_at
    }

    fn read(&self) -> ActiveInner {
        *self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ActiveInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The in-memory pointer stays authoritative if the file write fails.
    fn save(&self, inner: &ActiveInner) {
        let Some(path) = &self.path else {
            return;
        };
        match write_atomic(path, inner) {
            Ok(()) => debug!(path = %path.display(), "active state saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to save active state"),
        }
    }
}

fn write_atomic(path: &Path, inner: &ActiveInner) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let bytes = serde_json::to_vec_pretty(inner)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Copies held by one replica node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplicaStatus {
    pub node_id: String,
    /// `None` when the node could not be read.
    pub copies: Option<usize>,
}

/// Point-in-time summary of the checkpoint subsystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub primary_count: usize,
    pub primary_capacity: usize,
    pub hidden_count: usize,
    pub hidden_capacity: usize,
    pub ghost_count: usize,
    pub active_id: Option<SnapshotId>,
    pub last_checkpoint_at: Option<TemporalAnchor>,
    pub last_rollback_at: Option<TemporalAnchor>,
    pub replica_copies: Vec<ReplicaStatus>,
    pub tier_write_failures: TierFailureCounts,
}
