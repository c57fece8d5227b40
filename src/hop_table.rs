//! Per-lookup hop distances shared between the event aggregator and the
//! discovery driver.

use std::collections::{hash_map::Entry, HashMap};

use parking_lot::RwLock;

use crate::types::{ContentId, HopKey, PeerId};

/// Hop distances recorded per lookup key.
///
/// One reader/writer lock guards the whole table. The aggregator takes the
/// write side for every event, the driver takes the read side once per
/// lookup; contention is bounded by lookup fan-out.
///
/// Peer entries are first-writer-wins: once a peer has a hop count under a
/// key it keeps it until the key is reset by
/// [`begin_lookup`](Self::begin_lookup). The provider entry is overwritten by
/// every terminal response.
///
/// Only [`begin_lookup`](Self::begin_lookup) and the direct `record_*`
/// methods create keys. [`update_tracked`](Self::update_tracked) never does.
#[derive(Debug, Default)]
pub struct HopTable {
    inner: RwLock<HashMap<ContentId, HashMap<HopKey, u32>>>,
}

impl HopTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the entries of `key` before a new lookup for it starts.
    pub fn begin_lookup(&self, key: ContentId) {
        self.inner.write().insert(key, HashMap::new());
    }

    /// Whether a lookup for `key` has been started.
    pub fn is_tracked(&self, key: &ContentId) -> bool {
        self.inner.read().contains_key(key)
    }

    /// Run `f` against the entries of `key` while holding the write lock,
    /// only if the key is tracked.
    pub fn update_tracked<R>(
        &self,
        key: &ContentId,
        f: impl FnOnce(&mut KeyEntries<'_>) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.write();
        let entries = inner.get_mut(key)?;
        Some(f(&mut KeyEntries { entries }))
    }

    /// Run `f` against the entries of `key` while holding the write lock.
    ///
    /// Lets a caller apply several dependent reads and writes (one lookup
    /// event) atomically without exposing the underlying map.
    pub fn update<R>(&self, key: ContentId, f: impl FnOnce(&mut KeyEntries<'_>) -> R) -> R {
        let mut inner = self.inner.write();
        let mut entries = KeyEntries {
            entries: inner.entry(key).or_default(),
        };
        f(&mut entries)
    }

    /// Record the hop count of `peer` under `key` unless one is already
    /// recorded.
    ///
    /// Returns `true` if the entry was written.
    pub fn record_once(&self, key: ContentId, peer: impl Into<HopKey>, hops: u32) -> bool {
        self.update(key, |entries| entries.record_once(peer, hops))
    }

    /// Set the hop count of the peer that satisfied the lookup for `key`,
    /// returning the previous value.
    pub fn record_provider(&self, key: ContentId, hops: u32) -> Option<u32> {
        self.update(key, |entries| entries.set(HopKey::Provider, hops))
    }

    /// Hop count recorded for `peer` under `key`.
    pub fn get(&self, key: &ContentId, peer: impl Into<HopKey>) -> Option<u32> {
        self.inner.read().get(key)?.get(&peer.into()).copied()
    }

    /// Hop count of the provider found for `key`, if one was recorded.
    ///
    /// `None` also covers providers answered from the local record store,
    /// which produce no lookup events.
    pub fn provider_hops(&self, key: &ContentId) -> Option<u32> {
        self.get(key, HopKey::Provider)
    }

    /// Number of peers (excluding the provider entry) recorded under `key`.
    pub fn peers_recorded(&self, key: &ContentId) -> usize {
        self.inner
            .read()
            .get(key)
            .map(|entries| {
                entries
                    .keys()
                    .filter(|k| matches!(k, HopKey::Peer(_)))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Copy of the peer entries recorded under `key`.
    pub fn snapshot(&self, key: &ContentId) -> HashMap<PeerId, u32> {
        self.inner
            .read()
            .get(key)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(k, hops)| match k {
                        HopKey::Peer(peer) => Some((*peer, *hops)),
                        HopKey::Provider => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Entries of one lookup key, borrowed under the table's write lock.
#[derive(Debug)]
pub struct KeyEntries<'a> {
    entries: &'a mut HashMap<HopKey, u32>,
}

impl KeyEntries<'_> {
    /// Hop count recorded for `peer`.
    pub fn get(&self, peer: impl Into<HopKey>) -> Option<u32> {
        self.entries.get(&peer.into()).copied()
    }

    /// Record the hop count of `peer` unless one is already recorded.
    pub fn record_once(&mut self, peer: impl Into<HopKey>, hops: u32) -> bool {
        match self.entries.entry(peer.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(hops);
                true
            }
        }
    }

    /// Set the hop count of `peer`, returning the previous value.
    pub fn set(&mut self, peer: impl Into<HopKey>, hops: u32) -> Option<u32> {
        self.entries.insert(peer.into(), hops)
    }
}
