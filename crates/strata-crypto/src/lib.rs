//! Cryptographic primitives for Strata.
//!
//! Provides domain-separated BLAKE3 content hashing for snapshot id
//! derivation and a keyed BLAKE3 MAC ([`SigningSecret`]) for snapshot
//! authenticity signatures and ghost-record recovery signatures.
//!
//! All crypto operations wrap established libraries -- no custom cryptography.

pub mod hasher;
pub mod secret;

pub use hasher::{ContentHasher, HasherError};
pub use secret::{KeyError, MacPurpose, SigningSecret};
