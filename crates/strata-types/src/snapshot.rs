use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::SnapshotId;
use crate::temporal::TemporalAnchor;

/// One of the independent storage locations holding snapshot copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Bounded ring buffer; the canonical lookup path.
    Primary,
    /// Redundant copies spread across distribution nodes.
    Replica,
    /// Separately addressed copies excluded from ordinary listing.
    Hidden,
    /// Self-describing encoded copies under unguessable names.
    Ghost,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Replica => "replica",
            Self::Hidden => "hidden",
            Self::Ghost => "ghost",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "replica" => Ok(Self::Replica),
            "hidden" => Ok(Self::Hidden),
            "ghost" => Ok(Self::Ghost),
            other => Err(TypeError::UnknownTier(other.to_string())),
        }
    }
}

/// Which secondary copies are written for a snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TierFlags {
    pub replicated: bool,
    pub hidden: bool,
    pub ghost: bool,
}

impl TierFlags {
    /// All secondary tiers enabled.
    pub const ALL: Self = Self {
        replicated: true,
        hidden: true,
        ghost: true,
    };

    /// Returns `true` if a copy in `tier` is expected. Primary is always expected.
    pub fn contains(&self, tier: Tier) -> bool {
        match tier {
            Tier::Primary => true,
            Tier::Replica => self.replicated,
            Tier::Hidden => self.hidden,
            Tier::Ghost => self.ghost,
        }
    }
}

/// Back-reference recording why a snapshot was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lineage {
    /// Taken immediately before rolling back to `target`, which was
    /// served by the primary store.
    PreRollbackSafety { target: SnapshotId },
    /// Taken immediately before rolling back to `target`, which had to be
    /// recovered from a fallback tier.
    Recovered { target: SnapshotId, source: Tier },
}

impl Lineage {
    /// The snapshot the rollback restored to.
    pub fn target(&self) -> SnapshotId {
        match self {
            Self::PreRollbackSafety { target } | Self::Recovered { target, .. } => *target,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::PreRollbackSafety { target } => {
                out.push(1);
                out.extend_from_slice(target.as_bytes());
            }
            Self::Recovered { target, source } => {
                out.push(2);
                out.extend_from_slice(target.as_bytes());
                out.extend_from_slice(source.as_str().as_bytes());
            }
        }
    }
}

/// Opaque reference to the caller's state at snapshot time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateRef(String);

impl StateRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The empty reference, used when no state source is attached.
    pub fn none() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Keyed authenticity tag over `(id, description, created_at)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotSignature(#[serde(with = "hex_bytes")] [u8; 32]);

impl SnapshotSignature {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SnapshotSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotSignature({}...)", hex::encode(&self.0[..8]))
    }
}

/// An immutable, timestamped, signed record of process state.
///
/// Snapshots are never updated in place. Safety and recovered snapshots are
/// new records whose [`Lineage`] points at the rollback target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub created_at: TemporalAnchor,
    pub description: String,
    pub state_ref: StateRef,
    pub signature: SnapshotSignature,
    pub tier_flags: TierFlags,
    pub lineage: Option<Lineage>,
}

impl Snapshot {
    /// Canonical content bytes from which the id is derived.
    ///
    /// Every variable-length field is length-prefixed so distinct inputs can
    /// never produce the same byte string.
    pub fn content_bytes(
        description: &str,
        state_ref: &StateRef,
        created_at: &TemporalAnchor,
        lineage: Option<&Lineage>,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + description.len() + state_ref.as_str().len());
        out.extend_from_slice(&created_at.to_bytes());
        push_prefixed(&mut out, description.as_bytes());
        push_prefixed(&mut out, state_ref.as_str().as_bytes());
        match lineage {
            Some(lineage) => lineage.encode_into(&mut out),
            None => out.push(0),
        }
        out
    }

    /// Canonical message covered by the signature.
    pub fn signing_message(
        id: &SnapshotId,
        description: &str,
        created_at: &TemporalAnchor,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + TemporalAnchor::ENCODED_LEN + 8 + description.len());
        out.extend_from_slice(id.as_bytes());
        out.extend_from_slice(&created_at.to_bytes());
        push_prefixed(&mut out, description.as_bytes());
        out
    }

    /// Content bytes of this snapshot (see [`Self::content_bytes`]).
    pub fn own_content_bytes(&self) -> Vec<u8> {
        Self::content_bytes(
            &self.description,
            &self.state_ref,
            &self.created_at,
            self.lineage.as_ref(),
        )
    }

    /// Signing message of this snapshot (see [`Self::signing_message`]).
    pub fn own_signing_message(&self) -> Vec<u8> {
        Self::signing_message(&self.id, &self.description, &self.created_at)
    }

    /// Returns `true` if this snapshot was taken as part of a rollback.
    pub fn is_safety(&self) -> bool {
        self.lineage.is_some()
    }
}

fn push_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    out.extend_from_slice(bytes);
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32-byte signature"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot {
            id: SnapshotId::from_hash([9; 32]),
            created_at: TemporalAnchor::new(1_000, 0, 1),
            description: "init".into(),
            state_ref: StateRef::new("engine@42"),
            signature: SnapshotSignature::from_bytes([4; 32]),
            tier_flags: TierFlags::ALL,
            lineage: None,
        }
    }

    #[test]
    fn content_bytes_distinguish_field_boundaries() {
        let at = TemporalAnchor::new(1, 0, 0);
        let a = Snapshot::content_bytes("ab", &StateRef::new("c"), &at, None);
        let b = Snapshot::content_bytes("a", &StateRef::new("bc"), &at, None);
        assert_ne!(a, b);
    }

    #[test]
    fn content_bytes_include_lineage() {
        let at = TemporalAnchor::new(1, 0, 0);
        let target = SnapshotId::from_hash([3; 32]);
        let plain = Snapshot::content_bytes("x", &StateRef::none(), &at, None);
        let safety = Snapshot::content_bytes(
            "x",
            &StateRef::none(),
            &at,
            Some(&Lineage::PreRollbackSafety { target }),
        );
        let recovered = Snapshot::content_bytes(
            "x",
            &StateRef::none(),
            &at,
            Some(&Lineage::Recovered {
                target,
                source: Tier::Hidden,
            }),
        );
        assert_ne!(plain, safety);
        assert_ne!(safety, recovered);
    }

    #[test]
    fn signing_message_ignores_flags() {
        let mut snap = sample();
        let before = snap.own_signing_message();
        snap.tier_flags = TierFlags::default();
        assert_eq!(before, snap.own_signing_message());
    }

    #[test]
    fn tier_roundtrip_through_str() {
        for tier in [Tier::Primary, Tier::Replica, Tier::Hidden, Tier::Ghost] {
            assert_eq!(tier.as_str().parse::<Tier>().unwrap(), tier);
        }
        assert!("vault".parse::<Tier>().is_err());
    }

    #[test]
    fn flags_always_contain_primary() {
        assert!(TierFlags::default().contains(Tier::Primary));
        assert!(!TierFlags::default().contains(Tier::Ghost));
        assert!(TierFlags::ALL.contains(Tier::Replica));
    }

    #[test]
    fn lineage_target() {
        let target = SnapshotId::from_hash([5; 32]);
        let lineage = Lineage::Recovered {
            target,
            source: Tier::Ghost,
        };
        assert_eq!(lineage.target(), target);
    }

    #[test]
    fn json_roundtrip() {
        let mut snap = sample();
        snap.lineage = Some(Lineage::PreRollbackSafety {
            target: SnapshotId::from_hash([8; 32]),
        });
        let json = serde_json::to_string(&snap).unwrap();
        let parsed: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, parsed);
        assert!(parsed.is_safety());
    }
}
