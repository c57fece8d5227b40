//! Per-participant results and the measurement sink they are emitted to.
//!
//! ## Data Points
//!
//! - `routing-table-size` - Peers in the routing table at the end of the run
//! - `records-found` - Provider lookups that succeeded
//! - `hops-to-provider` - Mean hop count to the provider; omitted when no
//!   record was found, since the mean is undefined

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    driver::LookupStats,
    types::{PeerId, Rank},
};

/// Name of the routing table size point.
pub const ROUTING_TABLE_SIZE: &str = "routing-table-size";
/// Name of the records found point.
pub const RECORDS_FOUND: &str = "records-found";
/// Name of the mean hops point.
pub const HOPS_TO_PROVIDER: &str = "hops-to-provider";

/// Final statistics of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    /// Identity of the participant.
    pub peer: PeerId,
    /// Rank of the participant.
    pub rank: Rank,
    /// Whether the participant connected to the root during its join.
    pub connected_to_root: bool,
    /// Routing table size after the lookups.
    pub routing_table_size: usize,
    /// Lookup counters.
    pub lookups: LookupStats,
}

impl ExperimentReport {
    /// Mean hop count to the provider, `None` if nothing was found.
    pub fn mean_hops_to_provider(&self) -> Option<f64> {
        self.lookups.mean_hops()
    }

    /// The named scalar points of this report.
    pub fn points(&self) -> Vec<(&'static str, f64)> {
        let mut points = vec![
            (ROUTING_TABLE_SIZE, self.routing_table_size as f64),
            (RECORDS_FOUND, self.lookups.records_found as f64),
        ];
        if let Some(mean) = self.mean_hops_to_provider() {
            points.push((HOPS_TO_PROVIDER, mean));
        }
        points
    }

    /// Emit every point to `sink`.
    pub fn record_to<P: PointSink + ?Sized>(&self, sink: &P) {
        for (name, value) in self.points() {
            sink.record_point(name, value);
        }
        if self.mean_hops_to_provider().is_none() {
            tracing::warn!(rank = %self.rank, "no records found, {} is undefined", HOPS_TO_PROVIDER);
        }
    }
}

/// Destination of named scalar measurements.
#[auto_impl::auto_impl(&, Box, Arc)]
pub trait PointSink: Send + Sync {
    /// Record one data point.
    fn record_point(&self, name: &str, value: f64);
}

/// Sink that logs every point through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl PointSink for TracingSink {
    fn record_point(&self, name: &str, value: f64) {
        tracing::info!(point = name, value, "recorded point");
    }
}

/// Sink that keeps every point in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    points: Mutex<Vec<(String, f64)>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded points, in recording order.
    pub fn points(&self) -> Vec<(String, f64)> {
        self.points.lock().clone()
    }

    /// Last value recorded under `name`.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.points
            .lock()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

impl PointSink for MemorySink {
    fn record_point(&self, name: &str, value: f64) {
        self.points.lock().push((name.to_string(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(found: u64, hops: u64) -> ExperimentReport {
        ExperimentReport {
            peer: PeerId::random(),
            rank: Rank::new(2).unwrap(),
            connected_to_root: true,
            routing_table_size: 3,
            lookups: LookupStats {
                records_found: found,
                hops_to_provider: hops,
                lookups_with_hops: found,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_points_with_records() {
        let sink = MemorySink::new();
        report(2, 3).record_to(&sink);

        assert_eq!(sink.get(ROUTING_TABLE_SIZE), Some(3.0));
        assert_eq!(sink.get(RECORDS_FOUND), Some(2.0));
        assert_eq!(sink.get(HOPS_TO_PROVIDER), Some(1.5));
    }

    #[test]
    fn test_undefined_mean_is_not_emitted() {
        let sink = MemorySink::new();
        report(0, 0).record_to(&sink);

        assert_eq!(sink.points().len(), 2);
        assert_eq!(sink.get(RECORDS_FOUND), Some(0.0));
        assert_eq!(sink.get(HOPS_TO_PROVIDER), None);
    }
}
