use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Hybrid timestamp used for snapshot creation times.
///
/// Combines a wall-clock millisecond component with a logical counter so
/// that successive snapshots taken within the same millisecond still order
/// strictly. The node identifier breaks ties between processes sharing a
/// storage location.
///
/// Ordering: `physical_ms` → `logical` → `node_id` (total order).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemporalAnchor {
    /// Wall-clock milliseconds since UNIX epoch.
    pub physical_ms: u64,
    /// Logical counter for anchors issued in the same millisecond.
    pub logical: u32,
    /// Node identifier to break ties between writers.
    pub node_id: u16,
}

impl TemporalAnchor {
    /// Encoded length of [`Self::to_bytes`].
    pub const ENCODED_LEN: usize = 14;

    /// Create a new anchor with explicit values.
    pub fn new(physical_ms: u64, logical: u32, node_id: u16) -> Self {
        Self {
            physical_ms,
            logical,
            node_id,
        }
    }

    /// Create an anchor for the current wall-clock time.
    pub fn now(node_id: u16) -> Self {
        Self::new(wall_clock_ms(), 0, node_id)
    }

    /// Fixed-width big-endian encoding used in canonical hashing.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..8].copy_from_slice(&self.physical_ms.to_be_bytes());
        out[8..12].copy_from_slice(&self.logical.to_be_bytes());
        out[12..].copy_from_slice(&self.node_id.to_be_bytes());
        out
    }
}

/// Current wall-clock time in milliseconds since UNIX epoch.
pub fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl PartialOrd for TemporalAnchor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TemporalAnchor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.physical_ms
            .cmp(&other.physical_ms)
            .then(self.logical.cmp(&other.logical))
            .then(self.node_id.cmp(&other.node_id))
    }
}

impl fmt::Debug for TemporalAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TemporalAnchor({}ms.{}.n{})",
            self.physical_ms, self.logical, self.node_id
        )
    }
}

impl fmt::Display for TemporalAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.n{}", self.physical_ms, self.logical, self.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_physical_first() {
        let a = TemporalAnchor::new(100, 5, 1);
        let b = TemporalAnchor::new(200, 0, 0);
        assert!(a < b);
    }

    #[test]
    fn ordering_logical_second() {
        let a = TemporalAnchor::new(100, 1, 9);
        let b = TemporalAnchor::new(100, 2, 0);
        assert!(a < b);
    }

    #[test]
    fn now_produces_reasonable_timestamp() {
        let anchor = TemporalAnchor::now(3);
        // After 2020-01-01.
        assert!(anchor.physical_ms > 1_577_836_800_000);
        assert_eq!(anchor.node_id, 3);
    }

    #[test]
    fn byte_encoding_preserves_order() {
        let a = TemporalAnchor::new(100, 7, 1);
        let b = TemporalAnchor::new(101, 0, 0);
        assert!(a.to_bytes() < b.to_bytes());
    }

    proptest::proptest! {
        #[test]
        fn byte_order_matches_anchor_order(
            a in (0u64..1u64 << 48, proptest::prelude::any::<u32>(), proptest::prelude::any::<u16>()),
            b in (0u64..1u64 << 48, proptest::prelude::any::<u32>(), proptest::prelude::any::<u16>()),
        ) {
            let a = TemporalAnchor::new(a.0, a.1, a.2);
            let b = TemporalAnchor::new(b.0, b.1, b.2);
            proptest::prop_assert_eq!(a.cmp(&b), a.to_bytes().cmp(&b.to_bytes()));
        }
    }

    #[test]
    fn display_format() {
        let anchor = TemporalAnchor::new(1000, 5, 3);
        assert_eq!(format!("{anchor}"), "1000.5.n3");
    }
}
