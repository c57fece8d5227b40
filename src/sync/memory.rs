//! In-process synchronization service.
//!
//! Shared by every participant of a run that lives inside one process.
//! State counters are `tokio::sync::watch` channels so barrier waiters wake
//! as soon as their target is reached; topics keep their full history so
//! late subscribers still observe every value.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::client::{State, SyncClient};
use crate::error::{Error, Result};

/// In-memory barrier/broadcast service.
///
/// Cloning is cheap; every clone refers to the same service.
#[derive(Clone, Default)]
pub struct MemorySyncService {
    inner: Arc<Mutex<ServiceInner>>,
}

#[derive(Default)]
struct ServiceInner {
    /// State name -> number of participants that signalled it
    states: HashMap<String, watch::Sender<u64>>,
    /// Topic name -> published payloads and live subscribers
    topics: HashMap<String, TopicLog>,
    closed: bool,
}

#[derive(Default)]
struct TopicLog {
    history: Vec<Bytes>,
    subscribers: Vec<async_channel::Sender<Bytes>>,
}

impl ServiceInner {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Sync("sync service closed".into()));
        }
        Ok(())
    }

    fn state(&mut self, name: &str) -> &watch::Sender<u64> {
        self.states
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(0).0)
    }
}

impl MemorySyncService {
    /// Create an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client bound to this service.
    pub fn client(&self) -> MemorySyncClient {
        MemorySyncClient {
            service: self.clone(),
        }
    }

    /// Number of participants that signalled `state` so far.
    pub fn signalled(&self, state: &str) -> u64 {
        self.inner
            .lock()
            .states
            .get(state)
            .map(|tx| *tx.borrow())
            .unwrap_or(0)
    }

    /// Number of values published on `topic` so far.
    pub fn published(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .topics
            .get(topic)
            .map(|log| log.history.len())
            .unwrap_or(0)
    }

    /// Shut the service down.
    ///
    /// Pending barrier waits fail, subscriptions close after draining what
    /// they already received, and later calls fail with [`Error::Sync`].
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.states.clear();
        inner.topics.clear();
        tracing::debug!("memory sync service closed");
    }
}

impl std::fmt::Debug for MemorySyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemorySyncService")
            .field("states", &inner.states.len())
            .field("topics", &inner.topics.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

/// One participant's handle on a [`MemorySyncService`].
#[derive(Debug, Clone)]
pub struct MemorySyncClient {
    service: MemorySyncService,
}

impl MemorySyncClient {
    /// The service this client is bound to.
    pub fn service(&self) -> &MemorySyncService {
        &self.service
    }
}

impl SyncClient for MemorySyncClient {
    async fn signal_entry(&self, state: &State) -> Result<u64> {
        let mut inner = self.service.inner.lock();
        inner.check_open()?;
        let tx = inner.state(state.name());
        let mut seq = 0;
        tx.send_modify(|count| {
            *count += 1;
            seq = *count;
        });
        tracing::trace!(state = %state, seq, "signalled entry");
        Ok(seq)
    }

    async fn barrier(&self, state: &State, target: u64) -> Result<()> {
        let mut rx = {
            let mut inner = self.service.inner.lock();
            inner.check_open()?;
            inner.state(state.name()).subscribe()
        };
        rx.wait_for(|count| *count >= target)
            .await
            .map_err(|_| Error::Sync(format!("barrier on `{}` abandoned", state)))?;
        Ok(())
    }

    async fn publish_raw(&self, topic: &str, payload: Bytes) -> Result<u64> {
        let mut inner = self.service.inner.lock();
        inner.check_open()?;
        let log = inner.topics.entry(topic.to_string()).or_default();
        log.history.push(payload.clone());
        // Unbounded channels never report full; only dropped subscriptions fail.
        log.subscribers
            .retain(|tx| tx.try_send(payload.clone()).is_ok());
        Ok(log.history.len() as u64)
    }

    async fn subscribe_raw(&self, topic: &str) -> Result<async_channel::Receiver<Bytes>> {
        let mut inner = self.service.inner.lock();
        inner.check_open()?;
        let log = inner.topics.entry(topic.to_string()).or_default();
        let (tx, rx) = async_channel::unbounded();
        for payload in &log.history {
            tx.try_send(payload.clone())
                .map_err(|e| Error::Channel(e.to_string()))?;
        }
        log.subscribers.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Topic;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_entry_is_sequential() {
        let service = MemorySyncService::new();
        let state = State::new("ready");
        let a = service.client();
        let b = service.client();

        assert_eq!(a.signal_entry(&state).await.unwrap(), 1);
        assert_eq!(b.signal_entry(&state).await.unwrap(), 2);
        assert_eq!(service.signalled("ready"), 2);
        assert_eq!(service.signalled("other"), 0);
    }

    #[tokio::test]
    async fn test_barrier_waits_for_target() {
        let service = MemorySyncService::new();
        let state = State::new("ready");
        let waiter = service.client();

        let pending = tokio::time::timeout(Duration::from_millis(20), waiter.barrier(&state, 2));
        assert!(pending.await.is_err(), "barrier must not resolve early");

        service.client().signal_entry(&state).await.unwrap();
        let task = {
            let state = state.clone();
            tokio::spawn(async move { waiter.barrier(&state, 2).await })
        };
        service.client().signal_entry(&state).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("barrier resolved")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_barrier_already_satisfied() {
        let service = MemorySyncService::new();
        let state = State::new("done");
        let client = service.client();
        client.signal_entry(&state).await.unwrap();
        client.barrier(&state, 1).await.unwrap();
        // A target of zero never blocks.
        client.barrier(&State::new("untouched"), 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_replays_history() {
        let service = MemorySyncService::new();
        let topic: Topic<u32> = Topic::new("numbers");
        let publisher = service.client();

        topic.publish(&publisher, &7).await.unwrap();
        topic.publish(&publisher, &8).await.unwrap();

        let mut sub = topic.subscribe(&service.client()).await.unwrap();
        topic.publish(&publisher, &9).await.unwrap();

        assert_eq!(sub.take(3).await.unwrap(), vec![7, 8, 9]);
        assert_eq!(service.published("numbers"), 3);
    }

    #[tokio::test]
    async fn test_close_fails_pending_barrier() {
        let service = MemorySyncService::new();
        let client = service.client();
        let task = tokio::spawn(async move { client.barrier(&State::new("never"), 5).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        service.close();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("barrier woke up")
            .unwrap();
        assert!(matches!(result, Err(Error::Sync(_))));
        assert!(service.client().signal_entry(&State::new("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_close_ends_subscription() {
        let service = MemorySyncService::new();
        let topic: Topic<String> = Topic::new("words");
        let mut sub = topic.subscribe(&service.client()).await.unwrap();
        service.close();
        assert!(matches!(sub.next().await, Err(Error::Sync(_))));
    }
}
