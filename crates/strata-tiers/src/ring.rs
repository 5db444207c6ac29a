//! Oldest-first eviction shared by the bounded tiers.

use serde::de::DeserializeOwned;
use strata_types::TemporalAnchor;
use tracing::warn;

use crate::backend::RecordBackend;
use crate::codec;
use crate::error::{TierError, TierResult};

/// A decoded record together with its key and raw bytes.
pub(crate) struct Loaded<T> {
    pub key: String,
    pub raw: Vec<u8>,
    pub record: T,
}

/// Read and decode every record in a backend.
///
/// Records that fail framing or decoding are returned separately by key so
/// callers can discard them; they are never surfaced as valid records.
pub(crate) fn load_all<T: DeserializeOwned>(
    backend: &dyn RecordBackend,
) -> TierResult<(Vec<Loaded<T>>, Vec<String>)> {
    let mut loaded = Vec::new();
    let mut corrupt = Vec::new();
    for key in backend.keys()? {
        // Removed between keys() and get() by an external actor.
        let Some(raw) = backend.get(&key)? else {
            continue;
        };
        match codec::decode::<T>(&key, &raw) {
            Ok(record) => loaded.push(Loaded { key, raw, record }),
            Err(e) => {
                warn!(location = %backend.location(), %key, error = %e, "skipping undecodable record");
                corrupt.push(key);
            }
        }
    }
    Ok((loaded, corrupt))
}

/// Sort newest-first by `anchor`.
pub(crate) fn sort_newest_first<T>(records: &mut [Loaded<T>], anchor: impl Fn(&T) -> TemporalAnchor) {
    records.sort_by(|a, b| anchor(&b.record).cmp(&anchor(&a.record)));
}

/// Remove the oldest records beyond `capacity`, plus every corrupt record.
///
/// Keys in `keep_first` survive ahead of everything else, in the order
/// given, for as long as capacity allows; the rest are kept newest-first.
///
/// Returns the evicted records. If any removal fails, records already
/// removed in this pass are written back before the error is returned, so
/// the backend is left in its prior state.
pub(crate) fn evict_oldest<T>(
    backend: &dyn RecordBackend,
    mut records: Vec<Loaded<T>>,
    corrupt: Vec<String>,
    capacity: usize,
    keep_first: &[String],
    anchor: impl Fn(&T) -> TemporalAnchor,
) -> TierResult<Vec<Loaded<T>>> {
    let rank = |key: &str| {
        keep_first
            .iter()
            .position(|k| k == key)
            .unwrap_or(keep_first.len())
    };
    records.sort_by(|a, b| {
        rank(&a.key)
            .cmp(&rank(&b.key))
            .then_with(|| anchor(&b.record).cmp(&anchor(&a.record)))
    });
    let victims = if records.len() > capacity {
        records.split_off(capacity)
    } else {
        Vec::new()
    };

    let mut removed: Vec<(String, Vec<u8>)> = Vec::new();
    let mut failure: Option<TierError> = None;

    for key in &corrupt {
        match backend.get(key).and_then(|raw| {
            backend.remove(key)?;
            Ok(raw)
        }) {
            Ok(Some(raw)) => removed.push((key.clone(), raw)),
            Ok(None) => {}
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    if failure.is_none() {
        for victim in &victims {
            match backend.remove(&victim.key) {
                Ok(_) => removed.push((victim.key.clone(), victim.raw.clone())),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
    }

    if let Some(e) = failure {
        for (key, raw) in removed {
            if let Err(restore) = backend.put(&key, &raw) {
                warn!(%key, error = %restore, "failed to restore record after aborted eviction");
            }
        }
        return Err(e);
    }
    Ok(victims)
}
