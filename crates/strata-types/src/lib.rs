//! Foundation types for Strata.
//!
//! This crate provides the identity, temporal, and record types shared by the
//! storage tiers and the recovery engine. Every other Strata crate depends on
//! `strata-types`.
//!
//! # Key Types
//!
//! - [`SnapshotId`] -- Content-derived snapshot identifier (BLAKE3 hash)
//! - [`TemporalAnchor`] -- Monotonic hybrid timestamp used for `created_at`
//! - [`Snapshot`] -- Immutable, signed record of process state
//! - [`SnapshotSignature`] -- Keyed authenticity tag carried by a snapshot
//! - [`Tier`] / [`TierFlags`] -- Storage tiers and which copies exist
//! - [`Lineage`] -- Back-reference for safety and recovered snapshots

pub mod error;
pub mod id;
pub mod snapshot;
pub mod temporal;

pub use error::TypeError;
pub use id::SnapshotId;
pub use snapshot::{Lineage, Snapshot, SnapshotSignature, StateRef, Tier, TierFlags};
pub use temporal::TemporalAnchor;
