//! Storage tiers for Strata.
//!
//! Each tier holds copies of snapshots with different visibility and
//! durability properties. Tiers are independent failure domains: each one
//! owns its storage location and its own lock, and no tier operation ever
//! takes another tier's lock.
//!
//! # Tiers
//!
//! - [`PrimaryStore`] -- bounded ring buffer, the canonical lookup path
//! - [`ReplicaDistributor`] -- best-effort copies across distribution nodes
//! - [`HiddenVault`] -- separately addressed copies, bounded independently
//! - [`GhostArchive`] -- self-contained encoded blobs under random names
//!
//! # Storage Backends
//!
//! All tiers sit on the [`RecordBackend`] trait:
//!
//! - [`FsBackend`] -- one file per record, atomic rename on write
//! - [`InMemoryBackend`] -- `BTreeMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Snapshots are immutable; tiers only add, replace wholesale, or remove.
//! 2. Tiers never verify signatures -- that is the recovery engine's job.
//!    Undecodable records are skipped, never returned.
//! 3. Destruction in one tier never implies destruction in another.
//! 4. All I/O errors are propagated to the caller.

pub mod backend;
pub mod codec;
pub mod error;
pub mod ghost;
pub mod memory;
pub mod primary;
pub mod replica;
mod ring;
pub mod vault;

#[cfg(test)]
mod testing;

pub use backend::{FsBackend, RecordBackend};
pub use error::{TierError, TierResult};
pub use ghost::{GhostArchive, GhostRecord};
pub use memory::InMemoryBackend;
pub use primary::PrimaryStore;
pub use replica::{NodeFailure, ReplicaCopy, ReplicaDistributor, ReplicaNode, ReplicationReport};
pub use vault::{HiddenRecord, HiddenVault};
