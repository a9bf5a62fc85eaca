//! Snapshot payloads - Versioned, length-prefixed binary state
//!
//! Every sub-state of the engine is encoded on its own under a stable key.
//! Frame layout:
//!
//! ```text
//! [version: u32 BE][body length: u32 BE][MessagePack body]
//! ```
//!
//! Bodies only contain vectors sorted by party, never maps, so equal states
//! encode to equal bytes on every node.

pub mod payload;

use sha2::{Digest, Sha256};

use crate::core::{Error, Result};
pub use payload::Payload;

/// Current frame version
pub const SNAPSHOT_VERSION: u32 = 1;

const NAMESPACE: &str = "liquidity.v2";
const HEADER_LEN: usize = 8;

/// Logical sub-states, in key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StateKind {
    Provisions,
    PendingProvisions,
    Performances,
    Supplied,
    Scores,
    Parameters,
}

impl StateKind {
    pub const ALL: [StateKind; 6] = [
        StateKind::Provisions,
        StateKind::PendingProvisions,
        StateKind::Performances,
        StateKind::Supplied,
        StateKind::Scores,
        StateKind::Parameters,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Provisions => "provisions",
            StateKind::PendingProvisions => "pending_provisions",
            StateKind::Performances => "performances",
            StateKind::Supplied => "supplied",
            StateKind::Scores => "scores",
            StateKind::Parameters => "parameters",
        }
    }

    pub fn key(&self, market_id: &str) -> String {
        format!("{NAMESPACE}.{}.{market_id}", self.as_str())
    }

    /// Resolve a key produced by `key` for the given market.
    pub fn from_key(key: &str, market_id: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.key(market_id) == key)
            .ok_or_else(|| Error::UnknownSnapshotKey(key.to_string()))
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Every key of one market, in fixed order.
pub fn keys(market_id: &str) -> Vec<String> {
    StateKind::ALL.iter().map(|k| k.key(market_id)).collect()
}

pub fn encode(payload: &Payload) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec_named(payload)?;
    let len = u32::try_from(body.len())
        .map_err(|_| Error::SnapshotEncode(format!("body too large: {} bytes", body.len())))?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&SNAPSHOT_VERSION.to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Check the frame header, then decode the body.
pub fn decode(data: &[u8]) -> Result<Payload> {
    if data.len() < HEADER_LEN {
        return Err(Error::SnapshotDecode(format!("truncated header: {} bytes", data.len())));
    }
    let (header, body) = data.split_at(HEADER_LEN);
    let version = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

    if version != SNAPSHOT_VERSION {
        return Err(Error::SnapshotVersion { found: version, expected: SNAPSHOT_VERSION });
    }
    if body.len() != len {
        return Err(Error::SnapshotDecode(format!("body length {} does not match header {len}", body.len())));
    }
    Ok(rmp_serde::from_slice(body)?)
}

/// Hex SHA-256 of an encoded payload.
pub fn hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use payload::ScoresState;
    use crate::core::PartyId;
    use rust_decimal::Decimal;

    fn scores() -> Payload {
        Payload::Scores(ScoresState {
            market_id: "m".into(),
            running_average_counter: 3,
            scores: vec![(PartyId::from("a"), Decimal::new(25, 2)), (PartyId::from("b"), Decimal::new(75, 2))],
        })
    }

    #[test]
    fn test_keys_are_fixed_and_resolvable() {
        let keys = keys("eth-perp");
        assert_eq!(keys[0], "liquidity.v2.provisions.eth-perp");
        assert_eq!(keys[5], "liquidity.v2.parameters.eth-perp");
        for (k, kind) in keys.iter().zip(StateKind::ALL) {
            assert_eq!(StateKind::from_key(k, "eth-perp").unwrap(), kind);
        }
        assert!(matches!(
            StateKind::from_key("liquidity.v2.scores.other", "eth-perp"),
            Err(Error::UnknownSnapshotKey(_))
        ));
    }

    #[test]
    fn test_frame_header() {
        let data = encode(&scores()).unwrap();
        assert_eq!(&data[..4], &SNAPSHOT_VERSION.to_be_bytes());
        let len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        assert_eq!(len, data.len() - 8);
        assert_eq!(decode(&data).unwrap(), scores());
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        let mut data = encode(&scores()).unwrap();
        assert!(matches!(decode(&data[..5]), Err(Error::SnapshotDecode(_))));
        assert!(matches!(decode(&data[..data.len() - 1]), Err(Error::SnapshotDecode(_))));

        data[3] = 9;
        assert_eq!(decode(&data), Err(Error::SnapshotVersion { found: 9, expected: SNAPSHOT_VERSION }));
    }

    #[test]
    fn test_hash_is_stable() {
        let a = encode(&scores()).unwrap();
        let b = encode(&scores()).unwrap();
        assert_eq!(hash(&a), hash(&b));
        assert_eq!(hash(&a).len(), 64);
    }
}
