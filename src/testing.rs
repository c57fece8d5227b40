//! In-process collaborators for running whole experiments locally.
//!
//! [`SimNetwork`] is a shared registry of simulated Kademlia peers. Each
//! [`SimDht`] handle is one participant: it keeps a routing table of at most
//! `k` entries, stores provider records, and runs iterative lookups that
//! report their progress as [`LookupEvent`]s.
//!
//! ## Fault Injection
//!
//! - **Connection Refusal**: Dials fail with a configurable probability
//! - **Provide Failure**: Announcements fail with a configurable probability
//! - **Latency Injection**: Every simulated RPC is delayed by a base latency
//!   plus random jitter
//!
//! ## Example
//!
//! ```ignore
//! use kad_lookup_harness::{HarnessConfig, testing::{run_local_experiment, SimConfig, SimNetwork}};
//!
//! let network = SimNetwork::new(SimConfig::new().with_latency(Duration::from_millis(2)));
//! let outcomes = run_local_experiment(&HarnessConfig::local(8, 4), &network).await;
//! ```

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    ops::ControlFlow,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use rand::Rng;

use crate::{
    config::HarnessConfig,
    controller::{Experiment, RunOutcome},
    dht::{DhtNode, NoopNetwork},
    error::{Error, Result},
    report::TracingSink,
    sync::MemorySyncService,
    types::{ContentId, LookupEvent, LookupResponse, PeerAddr, PeerId, QueryId},
};

/// Configuration of a simulated network.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Maximum number of peers in a routing table.
    ///
    /// Default: 20
    pub k: usize,

    /// Number of closest peers a provider record is stored on.
    ///
    /// Default: 20
    pub replication: usize,

    /// Probability of a dial being refused (0.0 to 1.0).
    pub connect_failure_rate: f64,

    /// Probability of an announcement failing (0.0 to 1.0).
    pub provide_failure_rate: f64,

    /// Latency added to every simulated RPC.
    pub base_latency: Duration,

    /// Random jitter added to latency (0 to this value).
    pub latency_jitter: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            k: 20,
            replication: 20,
            connect_failure_rate: 0.0,
            provide_failure_rate: 0.0,
            base_latency: Duration::ZERO,
            latency_jitter: Duration::ZERO,
        }
    }
}

impl SimConfig {
    /// Create a configuration with defaults (no faults).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the routing table capacity.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    /// Set the provider record replication factor.
    pub fn with_replication(mut self, replication: usize) -> Self {
        self.replication = replication.max(1);
        self
    }

    /// Set the connection refusal rate (0.0 to 1.0).
    pub fn with_connect_failure_rate(mut self, rate: f64) -> Self {
        self.connect_failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the provide failure rate (0.0 to 1.0).
    pub fn with_provide_failure_rate(mut self, rate: f64) -> Self {
        self.provide_failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the base RPC latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.base_latency = latency;
        self
    }

    /// Set the latency jitter (random additional delay).
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.latency_jitter = jitter;
        self
    }

    fn roll(rate: f64) -> bool {
        rate > 0.0 && rand::rng().random::<f64>() < rate
    }

    /// Check if a dial should be refused.
    pub fn should_refuse_connect(&self) -> bool {
        Self::roll(self.connect_failure_rate)
    }

    /// Check if an announcement should fail.
    pub fn should_fail_provide(&self) -> bool {
        Self::roll(self.provide_failure_rate)
    }

    /// Get the latency to apply to one RPC (base + random jitter).
    pub fn get_latency(&self) -> Duration {
        let jitter = if self.latency_jitter > Duration::ZERO {
            let jitter_ms = rand::rng().random_range(0..=self.latency_jitter.as_millis() as u64);
            Duration::from_millis(jitter_ms)
        } else {
            Duration::ZERO
        };
        self.base_latency + jitter
    }
}

/// Counters of a simulated network.
#[derive(Debug, Default)]
pub struct SimStats {
    /// Dials attempted.
    pub connects_total: AtomicU64,
    /// Dials refused.
    pub connects_refused: AtomicU64,
    /// Announcements attempted.
    pub provides_total: AtomicU64,
    /// Provider lookups started.
    pub lookups_total: AtomicU64,
    /// Lookups answered from the local record store.
    pub lookups_local: AtomicU64,
    /// Lookup events emitted.
    pub events_emitted: AtomicU64,
}

impl SimStats {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of stats.
    pub fn snapshot(&self) -> SimStatsSnapshot {
        SimStatsSnapshot {
            connects_total: self.connects_total.load(Ordering::Relaxed),
            connects_refused: self.connects_refused.load(Ordering::Relaxed),
            provides_total: self.provides_total.load(Ordering::Relaxed),
            lookups_total: self.lookups_total.load(Ordering::Relaxed),
            lookups_local: self.lookups_local.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of simulated network statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimStatsSnapshot {
    /// Dials attempted.
    pub connects_total: u64,
    /// Dials refused.
    pub connects_refused: u64,
    /// Announcements attempted.
    pub provides_total: u64,
    /// Provider lookups started.
    pub lookups_total: u64,
    /// Lookups answered from the local record store.
    pub lookups_local: u64,
    /// Lookup events emitted.
    pub events_emitted: u64,
}

#[derive(Debug)]
struct SimPeer {
    addr: PeerAddr,
    routing: RwLock<Vec<PeerId>>,
    records: RwLock<HashMap<ContentId, Vec<PeerAddr>>>,
    subscribers: Mutex<Vec<async_channel::Sender<LookupEvent>>>,
}

impl SimPeer {
    fn new(addr: PeerAddr) -> Self {
        Self {
            addr,
            routing: RwLock::new(Vec::new()),
            records: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn id(&self) -> PeerId {
        self.addr.id
    }

    /// Add `peer` to the routing table, keeping the `k` entries closest to
    /// our own identity.
    fn insert(&self, peer: PeerId, k: usize) {
        if peer == self.id() {
            return;
        }
        let mut table = self.routing.write();
        if table.contains(&peer) {
            return;
        }
        table.push(peer);
        if table.len() > k {
            let own = *self.id().as_bytes();
            table.sort_by_key(|p| p.distance(&own));
            table.truncate(k);
        }
    }

    fn closest(&self, target: &[u8; 32], n: usize) -> Vec<PeerId> {
        let mut peers = self.routing.read().clone();
        peers.sort_by_key(|p| p.distance(target));
        peers.truncate(n);
        peers
    }

    fn providers(&self, key: &ContentId) -> Vec<PeerAddr> {
        self.records.read().get(key).cloned().unwrap_or_default()
    }

    fn add_provider(&self, key: ContentId, provider: PeerAddr) {
        let mut records = self.records.write();
        let providers = records.entry(key).or_default();
        if !providers.contains(&provider) {
            providers.push(provider);
        }
    }
}

#[derive(Debug)]
struct NetworkInner {
    config: SimConfig,
    peers: RwLock<HashMap<PeerId, Arc<SimPeer>>>,
    dials: Mutex<Vec<(PeerId, PeerId)>>,
    stats: SimStats,
    next_host: AtomicU64,
}

/// Shared registry of simulated peers.
#[derive(Debug, Clone)]
pub struct SimNetwork {
    inner: Arc<NetworkInner>,
}

impl SimNetwork {
    /// Create an empty network.
    pub fn new(config: SimConfig) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                config,
                peers: RwLock::new(HashMap::new()),
                dials: Mutex::new(Vec::new()),
                stats: SimStats::default(),
                next_host: AtomicU64::new(1),
            }),
        }
    }

    /// The network configuration.
    pub fn config(&self) -> &SimConfig {
        &self.inner.config
    }

    /// Create a node with a fresh identity and register it.
    pub fn spawn_node(&self) -> SimDht {
        let host = self.inner.next_host.fetch_add(1, Ordering::Relaxed);
        let socket = SocketAddr::from(([10, 0, (host >> 8) as u8, (host & 0xff) as u8], 4001));
        let peer = Arc::new(SimPeer::new(PeerAddr::new(PeerId::random(), socket)));
        self.inner.peers.write().insert(peer.id(), peer.clone());
        SimDht {
            network: self.clone(),
            peer,
        }
    }

    /// Number of registered nodes.
    pub fn peer_count(&self) -> usize {
        self.inner.peers.read().len()
    }

    /// Every dial attempted so far as `(dialer, target)`, in order.
    pub fn dial_log(&self) -> Vec<(PeerId, PeerId)> {
        self.inner.dials.lock().clone()
    }

    /// Current statistics.
    pub fn stats(&self) -> SimStatsSnapshot {
        self.inner.stats.snapshot()
    }

    fn peer(&self, id: &PeerId) -> Option<Arc<SimPeer>> {
        self.inner.peers.read().get(id).cloned()
    }

    async fn rpc_delay(&self) {
        let latency = self.inner.config.get_latency();
        if latency > Duration::ZERO {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Handle to one simulated node.
#[derive(Debug, Clone)]
pub struct SimDht {
    network: SimNetwork,
    peer: Arc<SimPeer>,
}

impl SimDht {
    /// The network this node belongs to.
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    /// Identities in this node's routing table.
    pub fn routing_table(&self) -> Vec<PeerId> {
        self.peer.routing.read().clone()
    }

    fn emit(&self, event: LookupEvent) {
        let mut subscribers = self.peer.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            let _ = tx.try_send(event.clone());
        }
        SimStats::incr(&self.network.inner.stats.events_emitted);
    }

    fn step(
        &self,
        key: ContentId,
        query_id: QueryId,
        cause: PeerId,
        heard: Vec<PeerId>,
        queried: Vec<PeerId>,
    ) -> LookupEvent {
        LookupEvent {
            key,
            query_id,
            response: Some(LookupResponse {
                source: self.peer.id(),
                cause,
                heard,
                queried,
            }),
        }
    }

    /// Query the known peers closest to `target`, closest first, until the
    /// `k` closest known peers have all answered or `visit` breaks.
    ///
    /// Returns the `k` closest peers known when the walk ended.
    async fn walk<F>(&self, target: [u8; 32], mut visit: F) -> Vec<PeerId>
    where
        F: FnMut(&SimPeer, &[PeerId]) -> ControlFlow<()> + Send,
    {
        let k = self.network.inner.config.k;
        let me = self.peer.id();
        let mut candidates = self.peer.closest(&target, k);
        let mut queried = HashSet::new();

        loop {
            let next = candidates
                .iter()
                .take(k)
                .find(|p| !queried.contains(*p))
                .copied();
            let Some(next) = next else {
                break;
            };
            queried.insert(next);
            let Some(remote) = self.network.peer(&next) else {
                continue;
            };

            self.network.rpc_delay().await;
            remote.insert(me, k);
            self.peer.insert(next, k);

            let returned: Vec<PeerId> = remote
                .closest(&target, k)
                .into_iter()
                .filter(|p| *p != me)
                .collect();
            if visit(remote.as_ref(), returned.as_slice()).is_break() {
                break;
            }

            for peer in returned {
                if !candidates.contains(&peer) {
                    candidates.push(peer);
                }
            }
            candidates.sort_by_key(|p| p.distance(&target));
        }

        candidates.truncate(k);
        candidates
    }

    async fn run_lookup(self, key: ContentId, limit: usize, tx: async_channel::Sender<PeerAddr>) {
        let stats = &self.network.inner.stats;
        SimStats::incr(&stats.lookups_total);

        let local = self.peer.providers(&key);
        if !local.is_empty() {
            SimStats::incr(&stats.lookups_local);
            deliver(&tx, local, limit).await;
            return;
        }

        let me = self.peer.id();
        let query_id = QueryId::next();
        let target = *key.as_bytes();
        self.emit(LookupEvent {
            key,
            query_id,
            response: None,
        });
        let seeds = self.peer.closest(&target, self.network.inner.config.k);
        self.emit(self.step(key, query_id, me, seeds, Vec::new()));

        let mut found = Vec::new();
        self.walk(target, |remote, returned| {
            let providers = remote.providers(&key);
            if providers.is_empty() {
                // A responder that points nowhere is not a provider.
                let queried = if returned.is_empty() {
                    Vec::new()
                } else {
                    vec![remote.id()]
                };
                self.emit(self.step(key, query_id, remote.id(), returned.to_vec(), queried));
                ControlFlow::Continue(())
            } else {
                self.emit(self.step(key, query_id, remote.id(), Vec::new(), vec![remote.id()]));
                found = providers;
                ControlFlow::Break(())
            }
        })
        .await;

        if found.is_empty() {
            tracing::debug!(key = %key, query = %query_id, "lookup exhausted without a provider");
        }
        deliver(&tx, found, limit).await;
    }
}

async fn deliver(tx: &async_channel::Sender<PeerAddr>, providers: Vec<PeerAddr>, limit: usize) {
    for provider in providers.into_iter().take(limit) {
        if tx.send(provider).await.is_err() {
            break;
        }
    }
}

impl DhtNode for SimDht {
    fn local_addr(&self) -> PeerAddr {
        self.peer.addr.clone()
    }

    async fn connect(&self, addr: &PeerAddr) -> Result<()> {
        let socket = addr
            .primary_addr()
            .ok_or_else(|| Error::Setup(format!("{} has no listen address", addr)))?;
        let inner = &self.network.inner;
        SimStats::incr(&inner.stats.connects_total);
        inner.dials.lock().push((self.peer.id(), addr.id));
        self.network.rpc_delay().await;

        let Some(remote) = self.network.peer(&addr.id) else {
            return Err(Error::Connect {
                addr: socket,
                reason: "no route to host".into(),
            });
        };
        if inner.config.should_refuse_connect() {
            SimStats::incr(&inner.stats.connects_refused);
            return Err(Error::Connect {
                addr: socket,
                reason: "connection refused".into(),
            });
        }

        let k = inner.config.k;
        self.peer.insert(remote.id(), k);
        remote.insert(self.peer.id(), k);

        // Refresh: look up our own identity to learn nearby peers.
        self.walk(*self.peer.id().as_bytes(), |_, _| ControlFlow::Continue(()))
            .await;
        tracing::trace!(local = %self.peer.id(), remote = %remote.id(), "connected");
        Ok(())
    }

    async fn provide(&self, key: &ContentId, announce: bool) -> Result<()> {
        let inner = &self.network.inner;
        SimStats::incr(&inner.stats.provides_total);
        if inner.config.should_fail_provide() {
            return Err(Error::Provide {
                key: *key,
                reason: "failed to find any peer in table".into(),
            });
        }

        let local = self.local_addr();
        self.peer.add_provider(*key, local.clone());
        if !announce {
            return Ok(());
        }

        let closest = self
            .walk(*key.as_bytes(), |_, _| ControlFlow::Continue(()))
            .await;
        for id in closest.iter().take(inner.config.replication) {
            if let Some(peer) = self.network.peer(id) {
                peer.add_provider(*key, local.clone());
            }
        }
        Ok(())
    }

    fn find_providers(&self, key: &ContentId, limit: usize) -> async_channel::Receiver<PeerAddr> {
        let (tx, rx) = async_channel::bounded(limit.max(1));
        tokio::spawn(self.clone().run_lookup(*key, limit, tx));
        rx
    }

    fn register_lookup_events(&self) -> async_channel::Receiver<LookupEvent> {
        let (tx, rx) = async_channel::unbounded();
        self.peer.subscribers.lock().push(tx);
        rx
    }

    fn routing_table_size(&self) -> usize {
        self.peer.routing.read().len()
    }
}

/// Run one experiment with `config.total_nodes` participants sharing an
/// in-memory synchronization service and `network`.
///
/// Returns one outcome per participant, in spawn order.
pub async fn run_local_experiment(
    config: &HarnessConfig,
    network: &SimNetwork,
) -> Vec<Result<RunOutcome>> {
    let service = MemorySyncService::new();
    let tasks = (0..config.total_nodes).map(|i| {
        let experiment = Experiment::new(
            config.clone(),
            service.client(),
            network.spawn_node(),
            NoopNetwork,
        )
        .with_rng_seed(i as u64);
        tokio::spawn(async move { experiment.run(&TracingSink).await })
    });

    futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| {
            joined
                .map_err(|e| Error::Setup(format!("participant task failed: {}", e)))
                .and_then(|outcome| outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{aggregator::LookupEventAggregator, hop_table::HopTable};

    fn drain(events: &async_channel::Receiver<LookupEvent>) -> Vec<LookupEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_sim_config_builders() {
        let config = SimConfig::new()
            .with_k(0)
            .with_connect_failure_rate(2.0)
            .with_latency(Duration::from_millis(5));
        assert_eq!(config.k, 1);
        assert_eq!(config.connect_failure_rate, 1.0);
        assert!(config.should_refuse_connect());
        assert!(!config.should_fail_provide());
        assert_eq!(config.get_latency(), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_routing_table_is_capped() {
        let network = SimNetwork::new(SimConfig::new().with_k(2));
        let node = network.spawn_node();
        for _ in 0..4 {
            let other = network.spawn_node();
            node.connect(&other.local_addr()).await.unwrap();
        }
        assert_eq!(node.routing_table_size(), 2);
        assert_eq!(network.peer_count(), 5);
    }

    #[tokio::test]
    async fn test_refused_connect() {
        let network = SimNetwork::new(SimConfig::new().with_connect_failure_rate(1.0));
        let a = network.spawn_node();
        let b = network.spawn_node();

        let err = b.connect(&a.local_addr()).await.unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
        assert!(!err.is_fatal());
        assert_eq!(b.routing_table_size(), 0);
        assert_eq!(network.stats().connects_refused, 1);
        assert_eq!(network.dial_log(), vec![(b.local_addr().id, a.local_addr().id)]);
    }

    #[tokio::test]
    async fn test_lookup_events_reconstruct_hops() {
        let network = SimNetwork::new(SimConfig::new());
        let a = network.spawn_node();
        let b = network.spawn_node();
        let c = network.spawn_node();
        b.connect(&a.local_addr()).await.unwrap();
        c.connect(&b.local_addr()).await.unwrap();
        // Drop whatever c learned while refreshing so the only path to `a`
        // goes through `b`.
        c.peer.routing.write().retain(|p| *p == b.local_addr().id);

        let key = ContentId::from_message(b"held by a");
        a.provide(&key, false).await.unwrap();

        let events = c.register_lookup_events();
        let providers = c.find_providers(&key, 1);
        let provider = providers.recv().await.unwrap();
        assert_eq!(provider, a.local_addr());
        assert!(providers.recv().await.is_err());

        let table = Arc::new(HopTable::new());
        table.begin_lookup(key);
        let aggregator = LookupEventAggregator::new(table.clone(), c.local_addr().id);
        let events = drain(&events);
        assert!(events.iter().any(|e| e.response.is_none()));
        for event in &events {
            aggregator.apply(event);
        }

        assert_eq!(table.get(&key, b.local_addr().id), Some(1));
        assert_eq!(table.get(&key, a.local_addr().id), Some(2));
        assert_eq!(table.provider_hops(&key), Some(2));
    }

    #[tokio::test]
    async fn test_local_record_answers_without_events() {
        let network = SimNetwork::new(SimConfig::new());
        let a = network.spawn_node();
        let key = ContentId::from_message(b"mine");
        a.provide(&key, true).await.unwrap();

        let events = a.register_lookup_events();
        let provider = a.find_providers(&key, 1).recv().await.unwrap();
        assert_eq!(provider, a.local_addr());
        assert!(drain(&events).is_empty());
        assert_eq!(network.stats().lookups_local, 1);
    }

    #[tokio::test]
    async fn test_lookup_without_peers_closes_empty() {
        let network = SimNetwork::new(SimConfig::new());
        let a = network.spawn_node();
        let providers = a.find_providers(&ContentId::from_message(b"nowhere"), 1);
        assert!(providers.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_provide_replicates_to_closest() {
        let network = SimNetwork::new(SimConfig::new().with_replication(1));
        let a = network.spawn_node();
        let b = network.spawn_node();
        b.connect(&a.local_addr()).await.unwrap();

        let key = ContentId::from_message(b"replicated");
        b.provide(&key, true).await.unwrap();
        assert_eq!(a.peer.providers(&key), vec![b.local_addr()]);
    }
}
