//! Identifiers and records exchanged between participants.

use std::{
    fmt::{self, Debug, Display},
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Counter for generating unique query IDs within a process
static QUERY_COUNTER: AtomicU64 = AtomicU64::new(1);

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

/// Opaque peer identity.
///
/// 32 bytes, compared with the XOR metric by Kademlia-style DHTs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Size of the identity in bytes.
    pub const LEN: usize = 32;

    /// Generate a fresh random identity.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Create an identity from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw identity bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// XOR distance between this identity and a key.
    pub fn distance(&self, key: &[u8; 32]) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ key[i];
        }
        out
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0[..6])
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId(")?;
        write_hex(f, &self.0[..6])?;
        write!(f, ")")
    }
}

/// Network-reachable locator of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
    /// Identity of the peer.
    pub id: PeerId,
    /// Addresses the peer listens on.
    pub addrs: Vec<SocketAddr>,
}

impl PeerAddr {
    /// Create a locator with a single listen address.
    pub fn new(id: PeerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addrs: vec![addr],
        }
    }

    /// First listen address, if any.
    pub fn primary_addr(&self) -> Option<SocketAddr> {
        self.addrs.first().copied()
    }
}

impl Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}: [", self.id)?;
        for (i, addr) in self.addrs.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", addr)?;
        }
        write!(f, "]}}")
    }
}

/// Content-derived identifier: the SHA-256 digest of a message.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentId([u8; 32]);

impl ContentId {
    /// Hash a message into a content identifier.
    pub fn from_message(message: &[u8]) -> Self {
        Self(Sha256::digest(message).into())
    }

    /// Raw digest bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0[..8])
    }
}

impl Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId(")?;
        write_hex(f, &self.0[..8])?;
        write!(f, ")")
    }
}

/// 1-based join order assigned by the synchronization service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rank(u64);

impl Rank {
    /// The rank of the tree root.
    pub const ROOT: Rank = Rank(1);

    /// Create a rank from a sequence number.
    ///
    /// Returns `None` for 0; sequence numbers are 1-based.
    pub const fn new(seq: u64) -> Option<Self> {
        if seq == 0 {
            None
        } else {
            Some(Self(seq))
        }
    }

    /// Sequence number of this rank.
    #[inline]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Whether this participant is the designated root.
    #[inline]
    pub const fn is_root(&self) -> bool {
        self.0 == 1
    }

    /// Number of participants that must finish joining before this one.
    #[inline]
    pub const fn predecessors(&self) -> u64 {
        self.0 - 1
    }
}

impl Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one in-flight DHT query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(u64);

impl QueryId {
    /// Allocate a process-unique query ID.
    pub fn next() -> Self {
        Self(QUERY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Address of the rank-1 participant, published once on the node info topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootAnnouncement {
    /// Locator of the root.
    pub addr: PeerAddr,
}

/// One participant's published content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentItem {
    /// Identifier of the item.
    pub id: ContentId,
}

/// Progress report of one step of an in-flight lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupEvent {
    /// Key being looked up.
    pub key: ContentId,
    /// Query this event belongs to.
    pub query_id: QueryId,
    /// Response details; `None` for request/start notifications.
    pub response: Option<LookupResponse>,
}

/// Peers learned about and queried during one lookup step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResponse {
    /// Peer that produced this step.
    pub source: PeerId,
    /// Peer whose answer caused this step.
    pub cause: PeerId,
    /// Peers learned about because `cause` reported them.
    pub heard: Vec<PeerId>,
    /// Peers actually queried.
    pub queried: Vec<PeerId>,
}

/// Entry key inside a per-lookup hop map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HopKey {
    /// Hop distance to a discovered peer.
    Peer(PeerId),
    /// Hop distance of the peer that satisfied the lookup.
    Provider,
}

impl From<PeerId> for HopKey {
    fn from(peer: PeerId) -> Self {
        HopKey::Peer(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_is_deterministic() {
        let a = ContentId::from_message(b"Hello from node");
        let b = ContentId::from_message(b"Hello from node");
        let c = ContentId::from_message(b"Hello from other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string().len(), 16);
    }

    #[test]
    fn test_rank() {
        assert!(Rank::new(0).is_none());
        let root = Rank::new(1).unwrap();
        assert!(root.is_root());
        assert_eq!(root, Rank::ROOT);
        let third = Rank::new(3).unwrap();
        assert!(!third.is_root());
        assert_eq!(third.predecessors(), 2);
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let id = PeerId::random();
        assert_eq!(id.distance(id.as_bytes()), [0u8; 32]);
    }

    #[test]
    fn test_peer_addr_json() {
        let addr = PeerAddr::new(PeerId::random(), "10.1.0.2:4001".parse().unwrap());
        let json = serde_json::to_string(&RootAnnouncement { addr: addr.clone() }).unwrap();
        let back: RootAnnouncement = serde_json::from_str(&json).unwrap();
        assert_eq!(back.addr, addr);
        assert_eq!(addr.primary_addr(), Some("10.1.0.2:4001".parse().unwrap()));
    }

    #[test]
    fn test_query_ids_are_unique() {
        assert_ne!(QueryId::next(), QueryId::next());
    }
}
