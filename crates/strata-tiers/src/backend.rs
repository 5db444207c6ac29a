use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{TierError, TierResult};

/// Byte-level key/value storage behind a tier.
///
/// All implementations must satisfy these invariants:
/// - `put` is atomic: a concurrent or later `get` observes either the old
///   value or the complete new value, never a partial write.
/// - Keys are restricted to `[A-Za-z0-9_-]` so they map to plain file names.
/// - `keys` reflects the current contents of the location, including
///   external deletions made outside this process.
/// - All I/O errors are propagated, never silently ignored.
pub trait RecordBackend: Send + Sync {
    /// Write (or replace) the value stored under `key`.
    fn put(&self, key: &str, bytes: &[u8]) -> TierResult<()>;

    /// Read the value under `key`. Returns `Ok(None)` if absent.
    fn get(&self, key: &str) -> TierResult<Option<Vec<u8>>>;

    /// Remove `key`. Returns `true` if it existed.
    fn remove(&self, key: &str) -> TierResult<bool>;

    /// All keys currently stored, sorted.
    fn keys(&self) -> TierResult<Vec<String>>;

    /// Human-readable location, for logs and status output.
    fn location(&self) -> String;

    /// Number of stored values.
    fn count(&self) -> TierResult<usize> {
        Ok(self.keys()?.len())
    }

    /// Remove every stored value, returning how many were removed.
    fn clear(&self) -> TierResult<usize> {
        let mut removed = 0;
        for key in self.keys()? {
            if self.remove(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Reject keys that could escape the storage root.
pub fn validate_key(key: &str) -> TierResult<()> {
    let ok = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(TierError::InvalidKey(key.to_string()))
    }
}

/// Directory-backed storage: one file per key, `<root>/<key>.<extension>`.
///
/// Writes go to a temporary file in the same directory which is synced and
/// then renamed over the target, so readers never see a torn record.
#[derive(Debug)]
pub struct FsBackend {
    root: PathBuf,
    extension: &'static str,
}

impl FsBackend {
    /// Open (or create) a storage directory.
    pub fn open(root: impl Into<PathBuf>, extension: &'static str) -> TierResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        if !root.is_dir() {
            return Err(TierError::Unavailable(root));
        }
        Ok(Self { root, extension })
    }

    /// The storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{}", self.extension))
    }
}

impl RecordBackend for FsBackend {
    fn put(&self, key: &str, bytes: &[u8]) -> TierResult<()> {
        validate_key(key)?;
        // The directory may have been removed externally since open().
        fs::create_dir_all(&self.root)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        let path = self.path_for(key);
        tmp.persist(&path).map_err(|e| TierError::Io(e.error))?;
        debug!(path = %path.display(), len = bytes.len(), "record written");
        Ok(())
    }

    fn get(&self, key: &str) -> TierResult<Option<Vec<u8>>> {
        validate_key(key)?;
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, key: &str) -> TierResult<bool> {
        validate_key(key)?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> TierResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_key(stem).is_ok() {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}
