//! Metrics export of experiment data points.
//!
//! ## Available Metrics
//!
//! ### Gauges
//! - `kad_harness_routing_table_size` - Peers in the routing table at the end of the run
//! - `kad_harness_records_found` - Provider lookups that succeeded
//! - `kad_harness_hops_to_provider` - Mean hop count to the provider
//!
//! ### Counters
//! - `kad_harness_lookup_events_total` - Lookup events consumed by the aggregator

use metrics::{counter, describe_counter, describe_gauge, gauge};

use crate::report::{PointSink, HOPS_TO_PROVIDER, RECORDS_FOUND, ROUTING_TABLE_SIZE};

const PREFIX: &str = "kad_harness_";

/// Initialize metric descriptions.
///
/// Call this once at startup to register all metric descriptions.
pub fn init_metrics() {
    describe_gauge!(
        "kad_harness_routing_table_size",
        "Number of peers in the routing table at the end of the run"
    );
    describe_gauge!(
        "kad_harness_records_found",
        "Number of provider lookups that yielded a provider"
    );
    describe_gauge!(
        "kad_harness_hops_to_provider",
        "Mean hop count from the querying node to the provider"
    );
    describe_counter!(
        "kad_harness_lookup_events_total",
        "Total number of lookup events consumed by the aggregator"
    );
}

fn metric_name(point: &str) -> String {
    format!("{}{}", PREFIX, point.replace('-', "_"))
}

/// Record consumed lookup events.
#[inline]
pub fn record_lookup_events(count: u64) {
    counter!("kad_harness_lookup_events_total").increment(count);
}

/// Sink exporting data points as `metrics` gauges labelled with the
/// participant's rank.
#[derive(Debug, Clone)]
pub struct MetricsSink {
    rank: String,
}

impl MetricsSink {
    /// Create a sink for the participant with `rank`.
    pub fn new(rank: impl ToString) -> Self {
        Self {
            rank: rank.to_string(),
        }
    }
}

impl PointSink for MetricsSink {
    fn record_point(&self, name: &str, value: f64) {
        match name {
            ROUTING_TABLE_SIZE | RECORDS_FOUND | HOPS_TO_PROVIDER => {
                gauge!(metric_name(name), "rank" => self.rank.clone()).set(value);
            }
            other => tracing::debug!(point = other, "no metric registered for point"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert_eq!(
            metric_name(ROUTING_TABLE_SIZE),
            "kad_harness_routing_table_size"
        );
        assert_eq!(metric_name(HOPS_TO_PROVIDER), "kad_harness_hops_to_provider");
    }

    #[test]
    fn test_record_without_recorder() {
        init_metrics();
        let sink = MetricsSink::new(3);
        sink.record_point(RECORDS_FOUND, 2.0);
        sink.record_point("unknown", 1.0);
        record_lookup_events(5);
    }
}
