use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_crypto::SigningSecret;
use tracing::info;

use crate::error::{StrataError, StrataResult};

/// One replica distribution location.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaNodeConfig {
    pub node_id: String,
    pub path: PathBuf,
}

/// Configuration for a checkpoint service.
///
/// Every field has a default, so an empty TOML document is a valid config
/// rooted at `./strata-data`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub data_dir: PathBuf,
    /// N: snapshots kept by the primary ring buffer.
    pub primary_capacity: usize,
    /// M: snapshots kept by the hidden vault. Must be at least N.
    pub hidden_capacity: usize,
    pub replication_factor: usize,
    /// Explicit replica locations. When empty, `replication_factor` nodes
    /// are placed under `<data_dir>/replicas/`.
    pub replica_nodes: Vec<ReplicaNodeConfig>,
    /// Copies each replica node keeps. Defaults to `hidden_capacity`.
    pub replica_retention: Option<usize>,
    pub primary_dir: Option<PathBuf>,
    pub hidden_dir: Option<PathBuf>,
    pub ghost_dir: Option<PathBuf>,
    /// Seconds between scheduled checkpoints; 0 disables the scheduler.
    pub checkpoint_interval_secs: u64,
    /// How far into the future a snapshot timestamp may sit and still verify.
    pub clock_skew_tolerance_ms: u64,
    /// Hex-encoded 32-byte signing key. Created on first open if absent.
    pub key_file: Option<PathBuf>,
    pub node_id: u16,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("strata-data"),
            primary_capacity: 10,
            hidden_capacity: 20,
            replication_factor: 3,
            replica_nodes: Vec::new(),
            replica_retention: None,
            primary_dir: None,
            hidden_dir: None,
            ghost_dir: None,
            checkpoint_interval_secs: 300,
            clock_skew_tolerance_ms: 5_000,
            key_file: None,
            node_id: 0,
        }
    }
}

impl StrataConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> StrataResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| StrataError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> StrataResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            StrataError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> StrataResult<String> {
        toml::to_string_pretty(self).map_err(|e| StrataError::Config(e.to_string()))
    }

    pub fn validate(&self) -> StrataResult<()> {
        if self.primary_capacity == 0 {
            return Err(StrataError::Config("primary_capacity must be at least 1".into()));
        }
        if self.hidden_capacity < self.primary_capacity {
            return Err(StrataError::Config(format!(
                "hidden_capacity ({}) must be at least primary_capacity ({})",
                self.hidden_capacity, self.primary_capacity
            )));
        }
        if self.replica_retention == Some(0) {
            return Err(StrataError::Config("replica_retention must be at least 1".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for node in &self.replica_nodes {
            if node.node_id.trim().is_empty() {
                return Err(StrataError::Config("replica node_id must not be empty".into()));
            }
            if !seen.insert(node.node_id.as_str()) {
                return Err(StrataError::Config(format!(
                    "duplicate replica node_id {:?}",
                    node.node_id
                )));
            }
        }
        Ok(())
    }

    pub fn primary_path(&self) -> PathBuf {
        self.primary_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("primary"))
    }

    pub fn hidden_path(&self) -> PathBuf {
        self.hidden_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join(".vault"))
    }

    pub fn ghost_path(&self) -> PathBuf {
        self.ghost_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join(".ghost"))
    }

    /// Where the active pointer is kept between runs.
    pub fn active_path(&self) -> PathBuf {
        self.data_dir.join("active.json")
    }

    pub fn key_path(&self) -> PathBuf {
        self.key_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("strata.key"))
    }

    /// Replica locations, explicit or derived.
    pub fn resolved_replica_nodes(&self) -> Vec<ReplicaNodeConfig> {
        if !self.replica_nodes.is_empty() {
            return self.replica_nodes.clone();
        }
        (0..self.replication_factor)
            .map(|i| ReplicaNodeConfig {
                node_id: format!("node-{i}"),
                path: self.data_dir.join("replicas").join(format!("node-{i}")),
            })
            .collect()
    }

    pub fn replica_retention(&self) -> usize {
        self.replica_retention.unwrap_or(self.hidden_capacity)
    }

    /// `None` when scheduled checkpoints are disabled.
    pub fn checkpoint_interval(&self) -> Option<Duration> {
        (self.checkpoint_interval_secs > 0)
            .then(|| Duration::from_secs(self.checkpoint_interval_secs))
    }
}

/// Read the signing key at `path`, generating and persisting a fresh one
/// if the file does not exist.
pub fn load_or_create_secret(path: &Path) -> StrataResult<SigningSecret> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(SigningSecret::from_hex(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let secret = SigningSecret::generate();
            let mut file = key_file_options().open(path)?;
            file.write_all(secret.to_hex().as_bytes())?;
            file.sync_all()?;
            info!(path = %path.display(), "generated new signing key");
            Ok(secret)
        }
        Err(e) => Err(e.into()),
    }
}

/// Never replaces an existing file; on unix the key is owner-only from
/// the moment it is created.
fn key_file_options() -> fs::OpenOptions {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StrataConfig::default();
        assert_eq!(c.primary_capacity, 10);
        assert_eq!(c.hidden_capacity, 20);
        assert_eq!(c.replication_factor, 3);
        assert_eq!(c.checkpoint_interval(), Some(Duration::from_secs(300)));
        assert_eq!(c.replica_retention(), 20);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(StrataConfig::from_toml_str("").unwrap(), StrataConfig::default());
    }

    #[test]
    fn parses_partial_toml() {
        let c = StrataConfig::from_toml_str(
            r#"
            data_dir = "/var/lib/strata"
            primary_capacity = 3
            hidden_capacity = 6
            checkpoint_interval_secs = 0

            [[replica_nodes]]
            node_id = "east"
            path = "/mnt/east"
            "#,
        )
        .unwrap();
        assert_eq!(c.primary_path(), PathBuf::from("/var/lib/strata/primary"));
        assert_eq!(c.hidden_path(), PathBuf::from("/var/lib/strata/.vault"));
        assert_eq!(c.checkpoint_interval(), None);
        let nodes = c.resolved_replica_nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id, "east");
    }

    #[test]
    fn derived_replica_nodes_follow_factor() {
        let c = StrataConfig::with_data_dir("/d");
        let nodes = c.resolved_replica_nodes();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[2].path, PathBuf::from("/d/replicas/node-2"));
    }

    #[test]
    fn hidden_capacity_below_primary_is_rejected() {
        let err = StrataConfig::from_toml_str("primary_capacity = 5\nhidden_capacity = 4").unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
    }

    #[test]
    fn duplicate_replica_ids_are_rejected() {
        let mut c = StrataConfig::default();
        c.replica_nodes = vec![
            ReplicaNodeConfig { node_id: "a".into(), path: "/a".into() },
            ReplicaNodeConfig { node_id: "a".into(), path: "/b".into() },
        ];
        assert!(c.validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let c = StrataConfig::with_data_dir("/srv/strata");
        let text = c.to_toml_string().unwrap();
        assert_eq!(StrataConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn key_file_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("strata.key");
        let first = load_or_create_secret(&path).unwrap();
        let second = load_or_create_secret(&path).unwrap();
        assert_eq!(first.to_hex(), second.to_hex());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.key");
        load_or_create_secret(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn malformed_key_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.key");
        fs::write(&path, "zz").unwrap();
        assert!(matches!(load_or_create_secret(&path), Err(StrataError::Key(_))));
    }
}
