//! Synchronization client trait and typed topic helpers.

use std::{fmt, future::Future, marker::PhantomData};

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

/// A named milestone tracked by the synchronization service.
///
/// Signalling a state never carries a payload; the service only counts how
/// many participants have entered it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct State(String);

impl State {
    /// Create a state handle.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name of the state.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client of a barrier/broadcast synchronization service.
///
/// Sequence numbers returned by [`signal_entry`](SyncClient::signal_entry)
/// and [`publish`](SyncClient::publish_raw) are 1-based and globally unique
/// per state or topic for the lifetime of a run.
///
/// Payloads are opaque bytes here; use [`Topic`] for typed access.
#[auto_impl::auto_impl(&, Arc)]
pub trait SyncClient: Send + Sync {
    /// Signal entry into `state`, returning the order in which this
    /// participant signalled.
    fn signal_entry(&self, state: &State) -> impl Future<Output = Result<u64>> + Send;

    /// Resolve once at least `target` participants have signalled `state`.
    fn barrier(&self, state: &State, target: u64) -> impl Future<Output = Result<()>> + Send;

    /// Signal entry into `state`, then wait until `target` participants
    /// have signalled it.
    fn signal_and_wait(
        &self,
        state: &State,
        target: u64,
    ) -> impl Future<Output = Result<u64>> + Send {
        async move {
            let seq = self.signal_entry(state).await?;
            self.barrier(state, target).await?;
            Ok(seq)
        }
    }

    /// Append a payload to a topic, returning its sequence number.
    fn publish_raw(&self, topic: &str, payload: Bytes) -> impl Future<Output = Result<u64>> + Send;

    /// Subscribe to a topic.
    ///
    /// The returned receiver yields every payload ever published on the
    /// topic, in publication order, starting with those published before
    /// the subscription.
    fn subscribe_raw(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<async_channel::Receiver<Bytes>>> + Send;
}

/// A typed broadcast topic.
///
/// Values are JSON-encoded on the wire.
pub struct Topic<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Topic<T> {
    /// Create a topic handle.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// Name of the topic.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Topic").field(&self.name).finish()
    }
}

impl<T> Topic<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Publish a value on this topic.
    pub async fn publish<S: SyncClient>(&self, client: &S, value: &T) -> Result<u64> {
        let payload = Bytes::from(serde_json::to_vec(value)?);
        client.publish_raw(&self.name, payload).await
    }

    /// Subscribe to this topic as a lazy sequence of values.
    pub async fn subscribe<S: SyncClient>(&self, client: &S) -> Result<Subscription<T>> {
        let rx = client.subscribe_raw(&self.name).await?;
        Ok(Subscription {
            topic: self.name.clone(),
            rx,
            _marker: PhantomData,
        })
    }
}

/// Lazy sequence of values received on a topic.
pub struct Subscription<T> {
    topic: String,
    rx: async_channel::Receiver<Bytes>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Subscription<T> {
    /// Wait for the next value.
    ///
    /// Fails with [`Error::Sync`] once the service closes the topic.
    pub async fn next(&mut self) -> Result<T> {
        let payload = self
            .rx
            .recv()
            .await
            .map_err(|_| Error::Sync(format!("subscription to `{}` closed", self.topic)))?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Wait until exactly `n` values have arrived and return them in
    /// arrival order.
    pub async fn take(&mut self, n: usize) -> Result<Vec<T>> {
        let mut values = Vec::with_capacity(n);
        while values.len() < n {
            values.push(self.next().await?);
        }
        Ok(values)
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("pending", &self.rx.len())
            .finish()
    }
}
