//! # kad-lookup-harness
//!
//! Barrier-synchronized multi-node harness measuring provider lookups in a
//! Kademlia-style DHT.
//!
//! Every participant of a run executes the same program. Participants
//! coordinate only through a synchronization service (barriers plus
//! broadcast topics) and drive their own DHT node through a fixed sequence
//! of phases. At the end each reports how many records it found and the mean
//! number of hops its lookups took to reach a provider.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Experiment                              │
//! │        (phase sequencing, report, measurement sink)              │
//! ├──────────────┬──────────────┬──────────────┬────────────────────┤
//! │  bootstrap   │     join     │    driver    │     aggregator     │
//! │ (rank, root) │ (rank order) │ (provide,    │ (lookup events →   │
//! │              │              │  lookups)    │  HopTable)         │
//! ├──────────────┴──────────────┴──────────────┴────────────────────┤
//! │         SyncClient          │      DhtNode      │ NetworkClient │
//! └─────────────────────────────┴───────────────────┴───────────────┘
//! ```
//!
//! ## Hop Counting
//!
//! The DHT reports each step of a lookup as a [`LookupEvent`]: the peers
//! (`heard`) a responder (`cause`) pointed the querying node to. The
//! [`LookupEventAggregator`] turns those edges into hop distances from the
//! querying node, and records the distance of the responder that answered
//! without pointing anywhere else as the provider's distance.
//!
//! ## Example
//!
//! ```ignore
//! use kad_lookup_harness::{
//!     Experiment, HarnessConfig, NoopNetwork, RunOutcome, TracingSink,
//! };
//!
//! let config = HarnessConfig::new().with_total_nodes(16).with_items_to_find(8);
//! let experiment = Experiment::new(config, sync_client, my_dht_node, NoopNetwork);
//!
//! match experiment.run(&TracingSink).await? {
//!     RunOutcome::Completed(report) => println!("found {}", report.lookups.records_found),
//!     RunOutcome::Skipped => {}
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

mod aggregator;
mod bootstrap;
mod config;
mod controller;
mod dht;
mod driver;
mod error;
mod hop_table;
mod join;
mod report;
mod types;

pub mod sync;
pub mod testing;

#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub mod metrics;

// Re-export aggregation types
pub use aggregator::{
    AggregatorHandle, AggregatorStats, AggregatorStatsSnapshot, Applied, LookupEventAggregator,
};
pub use hop_table::{HopTable, KeyEntries};

// Re-export bootstrap protocol
pub use bootstrap::{announce_root, assign_rank};
pub use join::{JoinOutcome, JoinPhase, SequentialJoin};

// Re-export config types
pub use config::{HarnessConfig, StateNames, TopicNames};

// Re-export controller types
pub use controller::{Experiment, ExperimentPhase, RunOutcome};

// Re-export collaborator seams
pub use dht::{DhtNode, NetworkClient, NoopNetwork};
pub use sync::{MemorySyncClient, MemorySyncService, State, Subscription, SyncClient, Topic};

// Re-export discovery driver
pub use driver::{content_item_for, DiscoveryDriver, LookupStats};

// Re-export error types
pub use error::{Error, Result};

// Re-export report types
pub use report::{
    ExperimentReport, MemorySink, PointSink, TracingSink, HOPS_TO_PROVIDER, RECORDS_FOUND,
    ROUTING_TABLE_SIZE,
};

// Re-export identifiers and records
pub use types::{
    ContentId, ContentItem, HopKey, LookupEvent, LookupResponse, PeerAddr, PeerId, QueryId, Rank,
    RootAnnouncement,
};
