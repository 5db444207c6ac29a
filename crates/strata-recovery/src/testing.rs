//! Fixtures shared by the recovery unit tests.

use std::sync::Arc;

use strata_crypto::SigningSecret;
use strata_tiers::{codec, HiddenRecord, InMemoryBackend, RecordBackend};
use strata_types::{Snapshot, SnapshotId, SnapshotSignature};

use crate::config::StrataConfig;
use crate::service::CheckpointService;
use crate::state::StaticState;
use crate::tiers::TierBackends;

pub(crate) const KEY: [u8; 32] = [21; 32];

/// A service over in-memory tiers, with handles on every backend.
pub(crate) struct Harness {
    pub service: CheckpointService,
    pub state: Arc<StaticState>,
    pub primary: Arc<InMemoryBackend>,
    pub hidden: Arc<InMemoryBackend>,
    pub ghost: Arc<InMemoryBackend>,
    pub replicas: Vec<Arc<InMemoryBackend>>,
}

pub(crate) fn harness(config: StrataConfig) -> Harness {
    let primary = Arc::new(InMemoryBackend::new("primary"));
    let hidden = Arc::new(InMemoryBackend::new("hidden"));
    let ghost = Arc::new(InMemoryBackend::new("ghost"));
    let replicas: Vec<_> = config
        .resolved_replica_nodes()
        .iter()
        .map(|node| Arc::new(InMemoryBackend::new(node.node_id.clone())))
        .collect();
    let backends = TierBackends {
        primary: primary.clone(),
        hidden: hidden.clone(),
        ghost: ghost.clone(),
        replicas: config
            .resolved_replica_nodes()
            .into_iter()
            .zip(&replicas)
            .map(|(node, backend)| (node.node_id, backend.clone() as Arc<dyn RecordBackend>))
            .collect(),
    };
    let state = Arc::new(StaticState::new("app-state@0"));
    let service = CheckpointService::with_backends(
        config,
        SigningSecret::from_bytes(KEY),
        backends,
        state.clone(),
    )
    .unwrap();
    Harness {
        service,
        state,
        primary,
        hidden,
        ghost,
        replicas,
    }
}

pub(crate) fn config_with_capacity(primary: usize, hidden: usize) -> StrataConfig {
    let mut config = StrataConfig::default();
    config.primary_capacity = primary;
    config.hidden_capacity = hidden;
    config
}

fn forge(snapshot: &Snapshot) -> Snapshot {
    let mut forged = snapshot.clone();
    forged.signature = SnapshotSignature::from_bytes([0xAB; 32]);
    forged
}

/// Overwrite the primary store's copy of `id` with a forged signature.
pub(crate) fn tamper_primary(h: &Harness, id: &SnapshotId) {
    let key = id.to_hex();
    let raw = h.primary.get(&key).unwrap().expect("primary copy");
    let snapshot: Snapshot = codec::decode(&key, &raw).unwrap();
    h.primary.put(&key, &codec::encode(&forge(&snapshot)).unwrap()).unwrap();
}

/// Overwrite the hidden vault's copy of `id` with a forged signature.
pub(crate) fn tamper_hidden(h: &Harness, id: &SnapshotId) {
    for key in h.hidden.keys().unwrap() {
        let raw = h.hidden.get(&key).unwrap().unwrap();
        let mut record: HiddenRecord = codec::decode(&key, &raw).unwrap();
        if record.snapshot.id == *id {
            record.snapshot = forge(&record.snapshot);
            h.hidden.put(&key, &codec::encode(&record).unwrap()).unwrap();
        }
    }
}
