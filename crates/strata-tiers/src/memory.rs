use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::backend::{validate_key, RecordBackend};
use crate::error::{TierError, TierResult};

/// In-memory, BTreeMap-based record storage.
///
/// Intended for tests and embedding. Values are cloned on read/write. The
/// backend can be switched read-only to simulate a failing storage location.
pub struct InMemoryBackend {
    name: String,
    records: RwLock<BTreeMap<String, Vec<u8>>>,
    read_only: AtomicBool,
}

impl InMemoryBackend {
    /// Create a new empty backend. `name` is reported as its location.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(BTreeMap::new()),
            read_only: AtomicBool::new(false),
        }
    }

    /// Make subsequent writes and removals fail with [`TierError::ReadOnly`].
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn check_writable(&self) -> TierResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            Err(TierError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl RecordBackend for InMemoryBackend {
    fn put(&self, key: &str, bytes: &[u8]) -> TierResult<()> {
        validate_key(key)?;
        self.check_writable()?;
        let mut map = self
            .records
            .write()
            .map_err(|_| TierError::LockPoisoned("memory backend"))?;
        map.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> TierResult<Option<Vec<u8>>> {
        validate_key(key)?;
        let map = self
            .records
            .read()
            .map_err(|_| TierError::LockPoisoned("memory backend"))?;
        Ok(map.get(key).cloned())
    }

    fn remove(&self, key: &str) -> TierResult<bool> {
        validate_key(key)?;
        self.check_writable()?;
        let mut map = self
            .records
            .write()
            .map_err(|_| TierError::LockPoisoned("memory backend"))?;
        Ok(map.remove(key).is_some())
    }

    fn keys(&self) -> TierResult<Vec<String>> {
        let map = self
            .records
            .read()
            .map_err(|_| TierError::LockPoisoned("memory backend"))?;
        Ok(map.keys().cloned().collect())
    }

    fn location(&self) -> String {
        format!("memory:{}", self.name)
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.count().unwrap_or(0);
        f.debug_struct("InMemoryBackend")
            .field("name", &self.name)
            .field("record_count", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_read() {
        let backend = InMemoryBackend::new("t");
        backend.put("k1", b"hello").unwrap();
        assert_eq!(backend.get("k1").unwrap(), Some(b"hello".to_vec()));
        assert!(backend.get("k2").unwrap().is_none());
    }

    #[test]
    fn keys_are_sorted() {
        let backend = InMemoryBackend::default();
        backend.put("c", b"3").unwrap();
        backend.put("a", b"1").unwrap();
        backend.put("b", b"2").unwrap();
        assert_eq!(backend.keys().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn read_only_rejects_writes_but_allows_reads() {
        let backend = InMemoryBackend::default();
        backend.put("a", b"1").unwrap();
        backend.set_read_only(true);
        assert!(matches!(backend.put("b", b"2"), Err(TierError::ReadOnly)));
        assert!(matches!(backend.remove("a"), Err(TierError::ReadOnly)));
        assert_eq!(backend.get("a").unwrap(), Some(b"1".to_vec()));
        backend.set_read_only(false);
        backend.put("b", b"2").unwrap();
        assert_eq!(backend.count().unwrap(), 2);
    }

    #[test]
    fn concurrent_reads_are_safe() {
        use std::sync::Arc;
        use std::thread;

        let backend = Arc::new(InMemoryBackend::default());
        backend.put("shared", b"data").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                thread::spawn(move || {
                    assert_eq!(backend.get("shared").unwrap(), Some(b"data".to_vec()));
                })
            })
            .collect();

        for h in handles {
            h.join().expect("thread should not panic");
        }
    }

    #[test]
    fn debug_format() {
        let backend = InMemoryBackend::new("primary");
        backend.put("x", b"1").unwrap();
        let debug = format!("{backend:?}");
        assert!(debug.contains("InMemoryBackend"));
        assert!(debug.contains("record_count"));
    }
}
