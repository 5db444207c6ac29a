use std::sync::Arc;

use strata_crypto::SigningSecret;
use strata_tiers::{
    FsBackend, GhostArchive, HiddenVault, InMemoryBackend, PrimaryStore, RecordBackend,
    ReplicaDistributor, ReplicaNode,
};
use strata_types::TierFlags;
use tracing::debug;

use crate::config::StrataConfig;
use crate::error::StrataResult;

/// Storage behind each tier, before the tiers are assembled.
pub struct TierBackends {
    pub primary: Arc<dyn RecordBackend>,
    pub hidden: Arc<dyn RecordBackend>,
    pub ghost: Arc<dyn RecordBackend>,
    pub replicas: Vec<(String, Arc<dyn RecordBackend>)>,
}

impl TierBackends {
    /// Directory-backed storage at the locations named by `config`.
    pub fn open(config: &StrataConfig) -> StrataResult<Self> {
        let replicas = config
            .resolved_replica_nodes()
            .into_iter()
            .map(|node| {
                let backend: Arc<dyn RecordBackend> = Arc::new(FsBackend::open(&node.path, "rep")?);
                Ok((node.node_id, backend))
            })
            .collect::<StrataResult<Vec<_>>>()?;
        Ok(Self {
            primary: Arc::new(FsBackend::open(config.primary_path(), "snap")?),
            hidden: Arc::new(FsBackend::open(config.hidden_path(), "hv")?),
            ghost: Arc::new(FsBackend::open(config.ghost_path(), "ghost")?),
            replicas,
        })
    }

    /// Process-local storage shaped like `config`.
    pub fn in_memory(config: &StrataConfig) -> Self {
        Self {
            primary: Arc::new(InMemoryBackend::new("primary")),
            hidden: Arc::new(InMemoryBackend::new("hidden")),
            ghost: Arc::new(InMemoryBackend::new("ghost")),
            replicas: config
                .resolved_replica_nodes()
                .into_iter()
                .map(|node| {
                    let backend: Arc<dyn RecordBackend> =
                        Arc::new(InMemoryBackend::new(node.node_id.clone()));
                    (node.node_id, backend)
                })
                .collect(),
        }
    }
}

/// The four storage tiers, each with its own storage and lock.
#[derive(Debug)]
pub struct TierSet {
    pub primary: PrimaryStore,
    pub replicas: ReplicaDistributor,
    pub vault: HiddenVault,
    pub ghost: GhostArchive,
}

impl TierSet {
    pub fn assemble(config: &StrataConfig, secret: &SigningSecret, backends: TierBackends) -> Self {
        let nodes = backends
            .replicas
            .into_iter()
            .map(|(node_id, backend)| ReplicaNode::new(node_id, backend))
            .collect();
        let tiers = Self {
            primary: PrimaryStore::new(backends.primary, config.primary_capacity),
            replicas: ReplicaDistributor::new(nodes, config.replica_retention()),
            vault: HiddenVault::new(backends.hidden, config.hidden_capacity),
            ghost: GhostArchive::new(backends.ghost, secret.clone()),
        };
        debug!(
            primary = %tiers.primary.backend().location(),
            hidden = %tiers.vault.backend().location(),
            ghost = %tiers.ghost.backend().location(),
            replicas = tiers.replicas.nodes().len(),
            "tiers assembled"
        );
        tiers
    }

    /// Which secondary tiers new snapshots are written to.
    pub fn flags(&self, replication_factor: usize) -> TierFlags {
        TierFlags {
            replicated: replication_factor > 0 && !self.replicas.nodes().is_empty(),
            hidden: true,
            ghost: true,
        }
    }
}

impl std::fmt::Debug for TierBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierBackends")
            .field("primary", &self.primary.location())
            .field("hidden", &self.hidden.location())
            .field("ghost", &self.ghost.location())
            .field("replicas", &self.replicas.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_every_location() {
        let dir = tempfile::tempdir().unwrap();
        let config = StrataConfig::with_data_dir(dir.path());
        let backends = TierBackends::open(&config).unwrap();
        assert_eq!(backends.replicas.len(), 3);
        assert!(config.primary_path().is_dir());
        assert!(config.hidden_path().is_dir());
        assert!(config.ghost_path().is_dir());
        assert!(dir.path().join("replicas").join("node-0").is_dir());
    }

    #[test]
    fn assemble_applies_capacities() {
        let mut config = StrataConfig::default();
        config.primary_capacity = 4;
        config.hidden_capacity = 8;
        let secret = SigningSecret::from_bytes([1; 32]);
        let tiers = TierSet::assemble(&config, &secret, TierBackends::in_memory(&config));
        assert_eq!(tiers.primary.capacity(), 4);
        assert_eq!(tiers.vault.capacity(), 8);
        assert_eq!(tiers.flags(3), TierFlags::ALL);
        assert!(!tiers.flags(0).replicated);
    }
}
