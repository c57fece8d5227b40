//! Configuration for a lookup experiment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration options for one experiment run.
///
/// The same configuration must be handed to every participant; barrier
/// targets are derived from `total_nodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Number of participants in the run.
    ///
    /// Every barrier waits for this many signals and every participant
    /// collects exactly this many content items.
    ///
    /// Default: 1
    pub total_nodes: usize,

    /// Number of randomized provider lookups each participant performs.
    ///
    /// The first miss stops the remaining lookups.
    ///
    /// Default: 1
    pub items_to_find: usize,

    /// Maximum number of providers requested per lookup.
    ///
    /// Only the first result is awaited.
    ///
    /// Default: 1
    pub provider_limit: usize,

    /// Pause after a successful connection to the root, before signalling
    /// that the join finished.
    ///
    /// Gives the DHT time to exchange routing-table entries with the root.
    ///
    /// Default: 3s
    #[serde(with = "delay_serde")]
    pub join_settle_delay: Duration,

    /// Pause after the DHT bootstrap barrier, before records are published.
    ///
    /// Default: 2s
    #[serde(with = "delay_serde")]
    pub publish_delay: Duration,

    /// Fixed settling delay after a provider was found, before the hop
    /// table is read.
    ///
    /// Lookup events may arrive after the provider result; this delay is a
    /// best-effort wait for them, not a guarantee.
    ///
    /// Default: 1s
    #[serde(with = "delay_serde")]
    pub lookup_settle_delay: Duration,

    /// Whether the network-emulation sidecar is available.
    ///
    /// Without it the run is abandoned successfully with no statistics.
    ///
    /// Default: true
    pub sidecar: bool,

    /// Prefix of the participant-specific message hashed into its content
    /// identifier.
    ///
    /// Default: "Hello from"
    pub message_prefix: String,

    /// Named barrier states.
    #[serde(default)]
    pub states: StateNames,

    /// Broadcast topic names.
    #[serde(default)]
    pub topics: TopicNames,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            total_nodes: 1,
            items_to_find: 1,
            provider_limit: 1,
            join_settle_delay: Duration::from_secs(3),
            publish_delay: Duration::from_secs(2),
            lookup_settle_delay: Duration::from_secs(1),
            sidecar: true,
            message_prefix: "Hello from".to_string(),
            states: StateNames::default(),
            topics: TopicNames::default(),
        }
    }
}

impl HarnessConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for in-process runs.
    ///
    /// Same phases as the default, with millisecond delays since the
    /// simulated DHT answers synchronously.
    pub fn local(total_nodes: usize, items_to_find: usize) -> Self {
        Self {
            total_nodes,
            items_to_find,
            join_settle_delay: Duration::from_millis(5),
            publish_delay: Duration::from_millis(5),
            lookup_settle_delay: Duration::from_millis(10),
            ..Self::default()
        }
    }

    /// Set the number of participants (builder pattern).
    pub const fn with_total_nodes(mut self, total_nodes: usize) -> Self {
        self.total_nodes = total_nodes;
        self
    }

    /// Set the number of lookups per participant (builder pattern).
    pub const fn with_items_to_find(mut self, items: usize) -> Self {
        self.items_to_find = items;
        self
    }

    /// Set the provider limit per lookup (builder pattern).
    pub const fn with_provider_limit(mut self, limit: usize) -> Self {
        self.provider_limit = limit;
        self
    }

    /// Set the post-connect settling delay (builder pattern).
    pub const fn with_join_settle_delay(mut self, delay: Duration) -> Self {
        self.join_settle_delay = delay;
        self
    }

    /// Set the pre-publication delay (builder pattern).
    pub const fn with_publish_delay(mut self, delay: Duration) -> Self {
        self.publish_delay = delay;
        self
    }

    /// Set the post-lookup settling delay (builder pattern).
    pub const fn with_lookup_settle_delay(mut self, delay: Duration) -> Self {
        self.lookup_settle_delay = delay;
        self
    }

    /// Mark the network-emulation sidecar as (un)available (builder pattern).
    pub const fn with_sidecar(mut self, sidecar: bool) -> Self {
        self.sidecar = sidecar;
        self
    }

    /// Set the content message prefix (builder pattern).
    pub fn with_message_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.message_prefix = prefix.into();
        self
    }

    /// Check the configuration for values no run can complete with.
    pub fn validate(&self) -> Result<()> {
        if self.total_nodes == 0 {
            return Err(Error::Config("total_nodes must be at least 1".into()));
        }
        if self.provider_limit == 0 {
            return Err(Error::Config("provider_limit must be at least 1".into()));
        }
        self.states.validate()
    }
}

/// Names of the barrier states that sequence an experiment.
///
/// The per-node join signal and the all-nodes DHT bootstrap barrier use
/// distinct names so the two milestones never count each other's signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateNames {
    /// Every participant finished building its identity and DHT node.
    pub libp2p_initialized: String,
    /// Signalled once per participant as it finishes its sequential join.
    pub node_bootstrap_completed: String,
    /// All participants finished joining.
    pub dht_bootstrap_completed: String,
    /// All participants finished their lookups.
    pub experiment_completed: String,
}

impl Default for StateNames {
    fn default() -> Self {
        Self {
            libp2p_initialized: "libp2p-init-completed".to_string(),
            node_bootstrap_completed: "node-bootstrap-completed".to_string(),
            dht_bootstrap_completed: "dht-bootstrap-completed".to_string(),
            experiment_completed: "experiment-completed".to_string(),
        }
    }
}

impl StateNames {
    fn validate(&self) -> Result<()> {
        let names = [
            &self.libp2p_initialized,
            &self.node_bootstrap_completed,
            &self.dht_bootstrap_completed,
            &self.experiment_completed,
        ];
        for (i, a) in names.iter().enumerate() {
            if a.is_empty() {
                return Err(Error::Config("state names must not be empty".into()));
            }
            if names[i + 1..].contains(a) {
                return Err(Error::Config(format!("state name `{}` is reused", a)));
            }
        }
        Ok(())
    }
}

/// Names of the broadcast topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicNames {
    /// Carries the single root announcement.
    pub node_info: String,
    /// Carries every participant's content item.
    pub item_info: String,
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            node_info: "nodeinfo".to_string(),
            item_info: "iteminfo".to_string(),
        }
    }
}

/// Delays as `"<n>s"` or `"<n>ms"` strings in human-readable formats, plain
/// milliseconds otherwise.
mod delay_serde {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if !serializer.is_human_readable() {
            return serializer.serialize_u64(millis);
        }
        if millis % 1000 == 0 {
            serializer.collect_str(&format_args!("{}s", millis / 1000))
        } else {
            serializer.collect_str(&format_args!("{}ms", millis))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        if !deserializer.is_human_readable() {
            return u64::deserialize(deserializer).map(Duration::from_millis);
        }
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(D::Error::custom)
    }

    pub(super) fn parse(text: &str) -> Result<Duration, String> {
        let (value, to_delay): (&str, fn(u64) -> Duration) =
            if let Some(value) = text.strip_suffix("ms") {
                (value, Duration::from_millis)
            } else if let Some(value) = text.strip_suffix('s') {
                (value, Duration::from_secs)
            } else {
                return Err(format!("delay {:?} needs a unit (s or ms)", text));
            };
        value
            .trim()
            .parse::<u64>()
            .map(to_delay)
            .map_err(|e| format!("invalid delay {:?}: {}", text, e))
    }
}
