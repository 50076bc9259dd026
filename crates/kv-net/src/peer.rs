//! Peer identity and addressing

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Unique peer identifier, the signer's raw Ed25519 public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Build a peer id from a signer's public key.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        Self(*public_key)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// A known peer's addressing and liveness information.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer identifier
    pub id: PeerId,
    /// Network addresses this peer is reachable at
    pub addrs: Vec<SocketAddr>,
    /// Last time a message was received from this peer (unix millis)
    pub last_seen: u64,
}

impl PeerInfo {
    /// Create peer info for a key with no addresses recorded yet.
    pub fn new(public_key: [u8; 32], addrs: Vec<SocketAddr>) -> Self {
        Self {
            id: PeerId::from_public_key(&public_key),
            addrs,
            last_seen: 0,
        }
    }

    /// Mark this peer as seen at `now_ms`.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_seen = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_display_is_short_hex() {
        let id = PeerId::from_public_key(&[0xab; 32]);
        assert_eq!(id.to_string(), "ab".repeat(8));
    }

    #[test]
    fn touch_updates_last_seen() {
        let mut info = PeerInfo::new([1u8; 32], vec![]);
        assert_eq!(info.last_seen, 0);
        info.touch(12345);
        assert_eq!(info.last_seen, 12345);
    }
}
