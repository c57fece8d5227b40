//! Experiment controller.
//!
//! Sequences one participant through the phases of a run. Every arrow below
//! crosses a barrier that all `total_nodes` participants must reach:
//!
//! ```text
//! network init ─▶ libp2p-init-completed (rank) ─▶ root announcement
//!   ─▶ sequential join ─▶ dht-bootstrap-completed
//!   ─▶ publish + discover (unsynchronized) ─▶ experiment-completed
//! ```

use std::{fmt, sync::Arc};

use crate::{
    aggregator::LookupEventAggregator,
    bootstrap,
    config::HarnessConfig,
    dht::{DhtNode, NetworkClient},
    driver::DiscoveryDriver,
    error::Result,
    hop_table::HopTable,
    join::SequentialJoin,
    report::{ExperimentReport, PointSink},
    sync::{State, SyncClient, Topic},
    types::RootAnnouncement,
};

/// Phase of a running experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentPhase {
    /// Waiting for the emulated network.
    NetworkInit,
    /// Waiting for every participant to come up; assigns ranks.
    RankAssignment,
    /// Distributing the root's address.
    RootAnnouncement,
    /// Joining the root in rank order.
    Join,
    /// Waiting for every participant to finish joining.
    DhtBootstrap,
    /// Announcing and collecting content items.
    Publication,
    /// Running provider lookups.
    Discovery,
    /// Waiting for every participant to finish.
    Completion,
}

impl fmt::Display for ExperimentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExperimentPhase::NetworkInit => "network-init",
            ExperimentPhase::RankAssignment => "rank-assignment",
            ExperimentPhase::RootAnnouncement => "root-announcement",
            ExperimentPhase::Join => "join",
            ExperimentPhase::DhtBootstrap => "dht-bootstrap",
            ExperimentPhase::Publication => "publication",
            ExperimentPhase::Discovery => "discovery",
            ExperimentPhase::Completion => "completion",
        };
        f.write_str(name)
    }
}

/// How a participant's run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// All phases ran.
    Completed(ExperimentReport),
    /// The network-emulation sidecar was unavailable; nothing ran.
    Skipped,
}

impl RunOutcome {
    /// The report, if the run completed.
    pub fn report(&self) -> Option<&ExperimentReport> {
        match self {
            RunOutcome::Completed(report) => Some(report),
            RunOutcome::Skipped => None,
        }
    }
}

/// One participant of an experiment.
pub struct Experiment<S, D, N> {
    config: HarnessConfig,
    sync: S,
    dht: D,
    network: N,
    rng_seed: Option<u64>,
}

impl<S, D, N> Experiment<S, D, N>
where
    S: SyncClient,
    D: DhtNode,
    N: NetworkClient,
{
    /// Create a participant from its collaborators.
    pub fn new(config: HarnessConfig, sync: S, dht: D, network: N) -> Self {
        Self {
            config,
            sync,
            dht,
            network,
            rng_seed: None,
        }
    }

    /// Use a fixed seed for lookup item selection (builder pattern).
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// The participant's configuration.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The participant's DHT node.
    pub fn dht(&self) -> &D {
        &self.dht
    }

    fn state(name: &str) -> State {
        State::new(name)
    }

    fn enter(phase: ExperimentPhase) {
        tracing::debug!(phase = %phase, "entering phase");
    }

    /// Run every phase and emit the final points to `sink`.
    ///
    /// Setup, provide and synchronization failures abort the run; connect
    /// failures and lookup misses are folded into the report.
    pub async fn run<P: PointSink + ?Sized>(&self, sink: &P) -> Result<RunOutcome> {
        self.config.validate()?;
        if !self.config.sidecar {
            tracing::warn!("network sidecar is not available, abandoning run");
            return Ok(RunOutcome::Skipped);
        }

        let total = self.config.total_nodes;
        let states = &self.config.states;

        Self::enter(ExperimentPhase::NetworkInit);
        self.network.wait_network_initialized().await?;
        let local = self.dht.local_addr();
        tracing::info!(addr = %local, "libp2p initialization complete");

        Self::enter(ExperimentPhase::RankAssignment);
        let rank =
            bootstrap::assign_rank(&self.sync, &Self::state(&states.libp2p_initialized), total)
                .await?;

        Self::enter(ExperimentPhase::RootAnnouncement);
        let topic: Topic<RootAnnouncement> = Topic::new(self.config.topics.node_info.clone());
        let root = bootstrap::announce_root(&self.sync, &topic, rank, &local).await?;

        Self::enter(ExperimentPhase::Join);
        let join_state = Self::state(&states.node_bootstrap_completed);
        let joined = SequentialJoin::new(&self.sync, &self.dht, &join_state)
            .with_settle_delay(self.config.join_settle_delay)
            .run(rank, &root)
            .await?;

        Self::enter(ExperimentPhase::DhtBootstrap);
        self.sync
            .signal_and_wait(&Self::state(&states.dht_bootstrap_completed), total as u64)
            .await?;
        tokio::time::sleep(self.config.publish_delay).await;

        let table = Arc::new(HopTable::new());
        let aggregator = LookupEventAggregator::new(table.clone(), local.id)
            .spawn(self.dht.register_lookup_events());

        let mut driver = DiscoveryDriver::new(&self.sync, &self.dht, table, &self.config);
        if let Some(seed) = self.rng_seed {
            driver = driver.with_rng_seed(seed);
        }

        Self::enter(ExperimentPhase::Publication);
        let items = match driver.publish().await {
            Ok(items) => items,
            Err(e) => {
                aggregator.shutdown().await;
                return Err(e);
            }
        };

        Self::enter(ExperimentPhase::Discovery);
        let lookups = driver.discover(&items).await;

        let report = ExperimentReport {
            peer: local.id,
            rank,
            connected_to_root: joined.connected,
            routing_table_size: self.dht.routing_table_size(),
            lookups,
        };
        report.record_to(sink);

        Self::enter(ExperimentPhase::Completion);
        let completed = self
            .sync
            .signal_and_wait(&Self::state(&states.experiment_completed), total as u64)
            .await;
        let events = aggregator.shutdown().await;
        #[cfg(feature = "metrics")]
        crate::metrics::record_lookup_events(events.events_total);
        completed?;

        tracing::info!(
            rank = %rank,
            found = report.lookups.records_found,
            missed = report.lookups.records_missed,
            events = events.events_total,
            "ending test case"
        );
        Ok(RunOutcome::Completed(report))
    }
}

impl<S, D, N> fmt::Debug for Experiment<S, D, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("config", &self.config)
            .field("rng_seed", &self.rng_seed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dht::NoopNetwork,
        report::MemorySink,
        sync::MemorySyncService,
        testing::{SimConfig, SimNetwork},
    };

    #[tokio::test]
    async fn test_without_sidecar_run_is_skipped() {
        let service = MemorySyncService::new();
        let network = SimNetwork::new(SimConfig::default());
        let config = HarnessConfig::local(3, 1).with_sidecar(false);
        let experiment = Experiment::new(config, service.client(), network.spawn_node(), NoopNetwork);

        let sink = MemorySink::new();
        let outcome = experiment.run(&sink).await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped);
        assert!(outcome.report().is_none());
        assert!(sink.points().is_empty());
        assert_eq!(service.signalled("libp2p-init-completed"), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let service = MemorySyncService::new();
        let network = SimNetwork::new(SimConfig::default());
        let config = HarnessConfig::local(0, 1);
        let experiment = Experiment::new(config, service.client(), network.spawn_node(), NoopNetwork);

        assert!(experiment.run(&MemorySink::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_single_participant_finds_own_record() {
        let service = MemorySyncService::new();
        let network = SimNetwork::new(SimConfig::default());
        let config = HarnessConfig::local(1, 2);
        let experiment = Experiment::new(config, service.client(), network.spawn_node(), NoopNetwork)
            .with_rng_seed(1);

        let sink = MemorySink::new();
        let outcome = experiment.run(&sink).await.unwrap();
        let report = outcome.report().unwrap();

        assert!(report.rank.is_root());
        assert!(!report.connected_to_root);
        assert_eq!(report.lookups.records_found, 2);
        // Answered from the local store: no hops observed.
        assert_eq!(report.mean_hops_to_provider(), Some(0.0));
        assert_eq!(sink.get("records-found"), Some(2.0));
        assert_eq!(service.signalled("experiment-completed"), 1);
    }
}
