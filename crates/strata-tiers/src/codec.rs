//! Framed record encoding shared by the primary, replica and hidden tiers.
//!
//! On-disk format:
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized record)]
//! ```
//!
//! The CRC catches torn and bit-rotted files. It is not an authenticity
//! check: a deliberately edited record re-framed with a fresh CRC decodes
//! fine and must still pass signature verification upstream.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{TierError, TierResult};

/// Header size: 4 bytes length + 4 bytes CRC.
pub const HEADER_SIZE: usize = 8;

/// Serialize and frame a record.
pub fn encode<T: Serialize>(record: &T) -> TierResult<Vec<u8>> {
    let payload =
        bincode::serialize(record).map_err(|e| TierError::Serialization(e.to_string()))?;
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Check framing and CRC, then deserialize a record.
///
/// `key` is only used for error reporting.
pub fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> TierResult<T> {
    if bytes.len() < HEADER_SIZE {
        return Err(TierError::Corrupt {
            key: key.to_string(),
            reason: format!("record shorter than header ({} bytes)", bytes.len()),
        });
    }
    let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let expected = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != length {
        return Err(TierError::Corrupt {
            key: key.to_string(),
            reason: format!("length field {length} but payload is {} bytes", payload.len()),
        });
    }
    let actual = crc32fast::hash(payload);
    if actual != expected {
        return Err(TierError::CrcMismatch {
            key: key.to_string(),
            expected,
            actual,
        });
    }
    bincode::deserialize(payload).map_err(|e| TierError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
