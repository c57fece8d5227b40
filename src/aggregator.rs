//! Lookup-event aggregation and hop-distance reconstruction.
//!
//! Every lookup event is an edge `cause → heard peer` in an implicit
//! discovery graph rooted at the local node (distance 0). The aggregator
//! assigns each heard peer the distance of its cause plus one, keeping the
//! first value it sees:
//!
//! ```text
//!   event {cause: self, heard: [A, B]}   →  A = 1, B = 1
//!   event {cause: A,    heard: [C]}      →  C = 2
//!   event {cause: C,    heard: [], queried: [C]}
//!                                        →  provider = hops(C) = 2
//! ```
//!
//! First arrival stands in for breadth-first order. Concurrent queries can
//! deliver events out of true distance order, so recorded hop counts are a
//! best-effort measurement rather than exact shortest paths.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::task::JoinHandle;

use crate::{
    hop_table::HopTable,
    types::{HopKey, LookupEvent, PeerId},
};

/// Outcome of applying one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    /// Heard peers that received a hop count.
    pub peers_recorded: usize,
    /// Heard peers skipped because they were already recorded.
    pub peers_skipped: usize,
    /// Hop count recorded for the provider, if this event identified it.
    pub provider_hops: Option<u32>,
}

/// Counters kept by a running aggregator.
#[derive(Debug, Default)]
pub struct AggregatorStats {
    /// Events received.
    pub events_total: AtomicU64,
    /// Events without a response, or for a key with no lookup in progress.
    pub events_ignored: AtomicU64,
    /// Peer hop counts recorded.
    pub peers_recorded: AtomicU64,
    /// Provider hop counts recorded.
    pub providers_recorded: AtomicU64,
}

impl AggregatorStats {
    fn record(&self, applied: &Applied) {
        self.peers_recorded
            .fetch_add(applied.peers_recorded as u64, Ordering::Relaxed);
        if applied.provider_hops.is_some() {
            self.providers_recorded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get a snapshot of the counters.
    pub fn snapshot(&self) -> AggregatorStatsSnapshot {
        AggregatorStatsSnapshot {
            events_total: self.events_total.load(Ordering::Relaxed),
            events_ignored: self.events_ignored.load(Ordering::Relaxed),
            peers_recorded: self.peers_recorded.load(Ordering::Relaxed),
            providers_recorded: self.providers_recorded.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of aggregator counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStatsSnapshot {
    /// Events received.
    pub events_total: u64,
    /// Events without a response, or for a key with no lookup in progress.
    pub events_ignored: u64,
    /// Peer hop counts recorded.
    pub peers_recorded: u64,
    /// Provider hop counts recorded.
    pub providers_recorded: u64,
}

/// Turns lookup events into hop counts in a shared [`HopTable`].
#[derive(Debug, Clone)]
pub struct LookupEventAggregator {
    table: Arc<HopTable>,
    local: PeerId,
    stats: Arc<AggregatorStats>,
}

impl LookupEventAggregator {
    /// Create an aggregator for lookups issued by `local`.
    pub fn new(table: Arc<HopTable>, local: PeerId) -> Self {
        Self {
            table,
            local,
            stats: Arc::new(AggregatorStats::default()),
        }
    }

    /// The table this aggregator writes to.
    pub fn table(&self) -> &Arc<HopTable> {
        &self.table
    }

    /// Apply one event to the table.
    ///
    /// The whole event is applied under a single write lock. A cause that is
    /// the local node, or that has no hop count yet, is treated as the
    /// distance-0 origin. Events for a key without a
    /// [`begin_lookup`](HopTable::begin_lookup) are dropped.
    pub fn apply(&self, event: &LookupEvent) -> Applied {
        let Some(response) = &event.response else {
            return Applied::default();
        };

        let applied = self.table.update_tracked(&event.key, |entries| {
            let mut applied = Applied::default();
            let cause_hops = if response.cause == self.local {
                0
            } else {
                entries.get(response.cause).unwrap_or(0)
            };

            for peer in &response.heard {
                if entries.get(*peer).is_some() {
                    applied.peers_skipped += 1;
                    continue;
                }
                entries.record_once(*peer, cause_hops + 1);
                applied.peers_recorded += 1;
            }

            // The cause answered without pointing anywhere else: it is the
            // provider. The latest terminal response wins.
            if !response.queried.is_empty() && response.heard.is_empty() {
                entries.set(HopKey::Provider, cause_hops);
                applied.provider_hops = entries.get(HopKey::Provider);
            }

            applied
        });
        applied.unwrap_or_default()
    }

    /// Consume `events` on a background task until the stream closes or
    /// the returned handle is shut down or dropped.
    pub fn spawn(self, events: async_channel::Receiver<LookupEvent>) -> AggregatorHandle {
        let (stop_tx, stop_rx) = async_channel::bounded::<()>(1);
        let stats = self.stats.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.recv() => break,
                    event = events.recv() => {
                        let Ok(event) = event else {
                            tracing::debug!("lookup event stream closed");
                            break;
                        };
                        self.handle_event(&event);
                    }
                }
            }
        });

        AggregatorHandle {
            task,
            stop_tx,
            stats,
        }
    }

    fn handle_event(&self, event: &LookupEvent) {
        self.stats.events_total.fetch_add(1, Ordering::Relaxed);
        if event.response.is_none() || !self.table.is_tracked(&event.key) {
            self.stats.events_ignored.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let applied = self.apply(event);
        self.stats.record(&applied);
        tracing::trace!(
            key = %event.key,
            query = %event.query_id,
            recorded = applied.peers_recorded,
            skipped = applied.peers_skipped,
            provider_hops = ?applied.provider_hops,
            "applied lookup event"
        );
    }
}

/// Handle to a running aggregator task.
#[derive(Debug)]
pub struct AggregatorHandle {
    task: JoinHandle<()>,
    stop_tx: async_channel::Sender<()>,
    stats: Arc<AggregatorStats>,
}

impl AggregatorHandle {
    /// Current counters.
    pub fn stats(&self) -> AggregatorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) -> AggregatorStatsSnapshot {
        let _ = self.stop_tx.try_send(());
        if let Err(e) = self.task.await {
            tracing::warn!("lookup event aggregator task failed: {}", e);
        }
        self.stats.snapshot()
    }
}
