//! Seams to the peer-to-peer stack and the network-emulation layer.
//!
//! The DHT is a black box to the harness: routing, RPCs and record storage
//! happen behind [`DhtNode`]. The harness only needs to connect, announce,
//! look up providers and observe lookup progress.
//!
//! # Example Implementation
//!
//! ```ignore
//! use kad_lookup_harness::{DhtNode, PeerAddr, ContentId, LookupEvent, Result};
//!
//! struct MyKad {
//!     // swarm handle, event fan-out, ...
//! }
//!
//! impl DhtNode for MyKad {
//!     fn local_addr(&self) -> PeerAddr { /* ... */ }
//!
//!     async fn connect(&self, addr: &PeerAddr) -> Result<()> {
//!         // dial and wait for the connection to be established
//!     }
//!     // ...
//! }
//! ```

use std::future::Future;

use crate::{
    error::Result,
    types::{ContentId, LookupEvent, PeerAddr},
};

/// One participant's DHT node.
///
/// Identity and listen addresses are fixed when the node is built; a
/// construction failure is an [`Error::Setup`](crate::Error::Setup) and never
/// reaches this trait.
#[auto_impl::auto_impl(&, Box, Arc)]
pub trait DhtNode: Send + Sync {
    /// Identity and listen addresses of this node.
    fn local_addr(&self) -> PeerAddr;

    /// Establish a direct connection to `addr`.
    ///
    /// Fails with [`Error::Connect`](crate::Error::Connect) if the peer is
    /// unreachable.
    fn connect(&self, addr: &PeerAddr) -> impl Future<Output = Result<()>> + Send;

    /// Announce this node as a provider of `key`.
    ///
    /// When `announce` is false the record is only stored locally. Fails with
    /// [`Error::Provide`](crate::Error::Provide).
    fn provide(&self, key: &ContentId, announce: bool) -> impl Future<Output = Result<()>> + Send;

    /// Start a provider lookup for `key`, returning at most `limit`
    /// providers.
    ///
    /// The receiver closes when the lookup ends; it may close without
    /// yielding anything.
    fn find_providers(&self, key: &ContentId, limit: usize) -> async_channel::Receiver<PeerAddr>;

    /// Subscribe to progress events of every lookup this node runs.
    fn register_lookup_events(&self) -> async_channel::Receiver<LookupEvent>;

    /// Current number of peers in the routing table.
    fn routing_table_size(&self) -> usize;
}

/// Client of the network-emulation (traffic shaping) layer.
#[auto_impl::auto_impl(&, Box, Arc)]
pub trait NetworkClient: Send + Sync {
    /// Resolve once the emulated network is configured for this
    /// participant.
    fn wait_network_initialized(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Network client for runs without traffic shaping.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNetwork;

impl NetworkClient for NoopNetwork {
    async fn wait_network_initialized(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_network() {
        NoopNetwork.wait_network_initialized().await.unwrap();
        let boxed: Box<NoopNetwork> = Box::new(NoopNetwork);
        boxed.wait_network_initialized().await.unwrap();
    }
}
