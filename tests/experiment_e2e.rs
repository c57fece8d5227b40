//! End-to-End (E2E) tests running whole experiments in-process.
//!
//! Every participant runs the full phase sequence on its own task, sharing a
//! `MemorySyncService` and a simulated Kademlia network.
//!
//! # Test Scenarios
//!
//! 1. **Healthy Run**: every participant completes, finds every record it
//!    looks up and reports a bounded mean hop count.
//! 2. **Join Order**: dials to the root happen strictly in rank order.
//! 3. **Unreachable Root**: connect failures degrade the run without
//!    aborting it.
//! 4. **Provide Failure**: announcement failures abort every participant.
//! 5. **No Sidecar**: the run is abandoned successfully with no statistics.

use std::{collections::HashMap, time::Duration};

use kad_lookup_harness::{
    testing::{run_local_experiment, SimConfig, SimNetwork},
    Error, ExperimentReport, HarnessConfig, PeerId, Result, RunOutcome,
};

const RUN_TIMEOUT: Duration = Duration::from_secs(20);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn run(config: &HarnessConfig, network: &SimNetwork) -> Vec<Result<RunOutcome>> {
    tokio::time::timeout(RUN_TIMEOUT, run_local_experiment(config, network))
        .await
        .expect("experiment did not finish in time")
}

fn reports(outcomes: Vec<Result<RunOutcome>>) -> Vec<ExperimentReport> {
    outcomes
        .into_iter()
        .map(|outcome| match outcome {
            Ok(RunOutcome::Completed(report)) => report,
            other => panic!("expected a completed run, got {:?}", other),
        })
        .collect()
}

#[tokio::test]
async fn test_healthy_run_finds_every_record() {
    init_tracing();
    let network = SimNetwork::new(SimConfig::new().with_replication(1));
    let config = HarnessConfig::local(4, 3);

    let reports = reports(run(&config, &network).await);
    assert_eq!(reports.len(), 4);

    let mut ranks: Vec<_> = reports.iter().map(|r| r.rank.get()).collect();
    ranks.sort_unstable();
    assert_eq!(ranks, vec![1, 2, 3, 4]);

    for report in &reports {
        assert_eq!(report.lookups.records_found, 3);
        assert_eq!(report.lookups.records_missed, 0);
        assert_eq!(report.connected_to_root, !report.rank.is_root());
        assert!(report.routing_table_size >= 1);

        let mean = report.mean_hops_to_provider().unwrap();
        assert!((0.0..=3.0).contains(&mean), "mean hops {} out of range", mean);
        assert!(report.points().iter().any(|(name, _)| *name == "hops-to-provider"));
    }
}

#[tokio::test]
async fn test_root_is_dialed_in_rank_order() {
    init_tracing();
    let network = SimNetwork::new(SimConfig::new().with_jitter(Duration::from_millis(3)));
    let config = HarnessConfig::local(5, 1);

    let reports = reports(run(&config, &network).await);
    let rank_of: HashMap<PeerId, u64> = reports.iter().map(|r| (r.peer, r.rank.get())).collect();
    let root = reports
        .iter()
        .find(|r| r.rank.is_root())
        .map(|r| r.peer)
        .unwrap();

    let order: Vec<u64> = network
        .dial_log()
        .into_iter()
        .filter(|(_, target)| *target == root)
        .map(|(dialer, _)| rank_of[&dialer])
        .collect();
    assert_eq!(order, vec![2, 3, 4, 5]);
}

#[tokio::test]
async fn test_larger_run_with_latency() {
    init_tracing();
    let network = SimNetwork::new(
        SimConfig::new()
            .with_replication(2)
            .with_latency(Duration::from_millis(1))
            .with_jitter(Duration::from_millis(2)),
    );
    let config = HarnessConfig::local(8, 4);

    let reports = reports(run(&config, &network).await);
    for report in &reports {
        assert_eq!(report.lookups.records_found, 4);
        assert!(report.mean_hops_to_provider().unwrap() <= 7.0);
    }
    assert_eq!(network.stats().lookups_total, 8 * 4);
}

#[tokio::test]
async fn test_unreachable_root_degrades_run() {
    init_tracing();
    let network = SimNetwork::new(SimConfig::new().with_connect_failure_rate(1.0));
    // Enough draws that every participant picks another participant's key.
    let config = HarnessConfig::local(3, 40);

    let reports = reports(run(&config, &network).await);
    assert_eq!(reports.len(), 3);
    assert_eq!(network.stats().connects_refused, 2);

    let mut found_total = 0u64;
    let mut lookups_total = 0u64;
    for report in &reports {
        assert!(!report.connected_to_root);
        assert_eq!(report.routing_table_size, 0);

        // Only the participant's own record is reachable. Every hit is local
        // and the first other key misses and ends the phase.
        let lookups = &report.lookups;
        assert_eq!(lookups.records_missed, 1);
        assert!(lookups.records_found < config.items_to_find as u64);
        assert_eq!(lookups.lookups_with_hops, 0);
        found_total += lookups.records_found;
        lookups_total += lookups.records_found + lookups.records_missed;

        let has_hops_point = report.points().iter().any(|(name, _)| *name == "hops-to-provider");
        if lookups.records_found == 0 {
            assert_eq!(report.mean_hops_to_provider(), None);
            assert!(!has_hops_point);
        } else {
            assert_eq!(report.mean_hops_to_provider(), Some(0.0));
            assert!(has_hops_point);
        }
    }

    let stats = network.stats();
    assert_eq!(stats.lookups_total, lookups_total);
    assert_eq!(stats.lookups_local, found_total);
}

#[tokio::test]
async fn test_provide_failure_aborts_every_participant() {
    init_tracing();
    let network = SimNetwork::new(SimConfig::new().with_provide_failure_rate(1.0));
    let config = HarnessConfig::local(3, 1);

    for outcome in run(&config, &network).await {
        let err = outcome.unwrap_err();
        assert!(matches!(err, Error::Provide { .. }));
        assert!(err.is_fatal());
    }
}

#[tokio::test]
async fn test_missing_sidecar_skips_run() {
    init_tracing();
    let network = SimNetwork::new(SimConfig::new());
    let config = HarnessConfig::local(3, 1).with_sidecar(false);

    for outcome in run(&config, &network).await {
        assert_eq!(outcome.unwrap(), RunOutcome::Skipped);
    }
    assert_eq!(network.stats().connects_total, 0);
    assert_eq!(network.stats().lookups_total, 0);
}
