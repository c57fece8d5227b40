//! Record publication and randomized provider discovery.

use std::sync::Arc;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    config::HarnessConfig,
    dht::DhtNode,
    error::{Error, Result},
    hop_table::HopTable,
    sync::{SyncClient, Topic},
    types::{ContentId, ContentItem, PeerAddr},
};

/// Build the content item a participant announces.
///
/// The identifier is the hash of `"<prefix> <locator>"`, unique per
/// participant because the locator embeds its identity.
pub fn content_item_for(prefix: &str, local: &PeerAddr) -> ContentItem {
    let message = format!("{} {}", prefix, local);
    ContentItem {
        id: ContentId::from_message(message.as_bytes()),
    }
}

/// Counters of one participant's lookup phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupStats {
    /// Lookups that yielded a provider.
    pub records_found: u64,
    /// Lookups that closed without a provider (at most 1, the first miss
    /// stops the phase).
    pub records_missed: u64,
    /// Sum of provider hop counts over successful lookups.
    pub hops_to_provider: u64,
    /// Successful lookups whose provider hop count was observed.
    ///
    /// Providers answered from the local record store produce no lookup
    /// events and contribute 0 hops.
    pub lookups_with_hops: u64,
}

impl LookupStats {
    /// Mean hop count to the provider over all successful lookups.
    ///
    /// `None` when nothing was found: the mean is undefined, not 0.
    pub fn mean_hops(&self) -> Option<f64> {
        if self.records_found == 0 {
            return None;
        }
        Some(self.hops_to_provider as f64 / self.records_found as f64)
    }

    /// Whether the phase stopped early on a miss.
    pub fn stopped_on_miss(&self) -> bool {
        self.records_missed > 0
    }
}

/// Drives the publication and discovery phases for one participant.
pub struct DiscoveryDriver<'a, S, D> {
    sync: &'a S,
    dht: &'a D,
    table: Arc<HopTable>,
    config: &'a HarnessConfig,
    rng: StdRng,
}

impl<'a, S, D> DiscoveryDriver<'a, S, D>
where
    S: SyncClient,
    D: DhtNode,
{
    /// Create a driver reading provider hops from `table`.
    pub fn new(sync: &'a S, dht: &'a D, table: Arc<HopTable>, config: &'a HarnessConfig) -> Self {
        Self {
            sync,
            dht,
            table,
            config,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Use a fixed seed for item selection (builder pattern).
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Announce this participant's item, broadcast it, and collect every
    /// participant's item.
    ///
    /// Blocks until exactly `total_nodes` items have arrived. A provide
    /// failure is fatal and returned immediately.
    pub async fn publish(&self) -> Result<Vec<ContentItem>> {
        let local = self.dht.local_addr();
        let item = content_item_for(&self.config.message_prefix, &local);

        self.dht
            .provide(&item.id, true)
            .await
            .map_err(|e| match e {
                Error::Provide { .. } => e,
                other => Error::Provide {
                    key: item.id,
                    reason: other.to_string(),
                },
            })?;
        tracing::debug!(key = %item.id, "announced as provider");

        let topic: Topic<ContentItem> = Topic::new(self.config.topics.item_info.clone());
        topic.publish(self.sync, &item).await?;
        let mut items = topic.subscribe(self.sync).await?;
        let items = items.take(self.config.total_nodes).await?;

        tracing::debug!(items = items.len(), "collected content items");
        Ok(items)
    }

    /// Run `items_to_find` randomized provider lookups over `items`.
    ///
    /// The first lookup that closes without a provider is counted as a miss
    /// and ends the phase.
    pub async fn discover(&mut self, items: &[ContentItem]) -> LookupStats {
        let mut stats = LookupStats::default();
        if items.is_empty() {
            return stats;
        }

        for attempt in 0..self.config.items_to_find {
            let key = items[self.rng.random_range(0..items.len())].id;
            self.table.begin_lookup(key);

            let providers = self.dht.find_providers(&key, self.config.provider_limit);
            match providers.recv().await {
                Ok(provider) => {
                    stats.records_found += 1;
                    // Lookup events can trail the result; give them a chance
                    // to land before reading the table.
                    tokio::time::sleep(self.config.lookup_settle_delay).await;
                    let hops = self.table.provider_hops(&key);
                    if let Some(hops) = hops {
                        stats.hops_to_provider += u64::from(hops);
                        stats.lookups_with_hops += 1;
                    }
                    tracing::debug!(
                        attempt,
                        key = %key,
                        provider = %provider.id,
                        hops = ?hops,
                        "found provider"
                    );
                }
                Err(_) => {
                    stats.records_missed += 1;
                    tracing::warn!(attempt, "{}, stopping lookups", Error::LookupMiss { key });
                    break;
                }
            }
        }

        stats
    }
}

impl<S, D> std::fmt::Debug for DiscoveryDriver<'_, S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryDriver")
            .field("items_to_find", &self.config.items_to_find)
            .field("provider_limit", &self.config.provider_limit)
            .finish()
    }
}
