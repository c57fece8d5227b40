//! Rank assignment and root election.
//!
//! Every participant signals the initialization state and waits for all
//! others; the order of its signal is its rank. Rank 1 is the root of the
//! join tree and publishes its address, which is the only value ever
//! published on the node info topic.

use crate::{
    error::{Error, Result},
    sync::{State, SyncClient, Topic},
    types::{PeerAddr, Rank, RootAnnouncement},
};

/// Signal `state` and wait for `total` participants; returns this
/// participant's rank.
pub async fn assign_rank<S: SyncClient>(sync: &S, state: &State, total: usize) -> Result<Rank> {
    let seq = sync.signal_and_wait(state, total as u64).await?;
    let rank = Rank::new(seq)
        .ok_or_else(|| Error::Sync(format!("invalid sequence number {} for `{}`", seq, state)))?;
    tracing::info!(rank = %rank, total, "rank assigned");
    Ok(rank)
}

/// Publish the root's address if `rank` is the root, then wait for the
/// announcement.
///
/// Every participant, the root included, receives the announcement through
/// the topic; the first value received is authoritative.
pub async fn announce_root<S: SyncClient>(
    sync: &S,
    topic: &Topic<RootAnnouncement>,
    rank: Rank,
    local: &PeerAddr,
) -> Result<RootAnnouncement> {
    if rank.is_root() {
        topic
            .publish(
                sync,
                &RootAnnouncement {
                    addr: local.clone(),
                },
            )
            .await?;
        tracing::info!(addr = %local, "published root announcement");
    }

    let announcement = topic.subscribe(sync).await?.next().await?;
    tracing::debug!(root = %announcement.addr, "received root announcement");
    Ok(announcement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sync::MemorySyncService, types::PeerId};
    use std::time::Duration;

    #[tokio::test]
    async fn test_ranks_are_a_permutation() {
        let service = MemorySyncService::new();
        let state = State::new("libp2p-init-completed");
        let total = 5;

        let tasks: Vec<_> = (0..total)
            .map(|_| {
                let client = service.client();
                let state = state.clone();
                tokio::spawn(async move { assign_rank(&client, &state, total).await })
            })
            .collect();

        let mut ranks = Vec::new();
        for task in tasks {
            let rank = tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            ranks.push(rank.get());
        }
        ranks.sort_unstable();
        assert_eq!(ranks, (1..=total as u64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_everyone_receives_the_same_root() {
        let service = MemorySyncService::new();
        let topic: Topic<RootAnnouncement> = Topic::new("nodeinfo");
        let addrs: Vec<_> = (0..3)
            .map(|i| PeerAddr::new(PeerId::random(), format!("10.0.0.{}:4001", i + 1).parse().unwrap()))
            .collect();

        // Non-roots subscribe before the root publishes.
        let mut waiters = Vec::new();
        for (i, addr) in addrs.iter().enumerate().skip(1) {
            let client = service.client();
            let topic = topic.clone();
            let addr = addr.clone();
            let rank = Rank::new(i as u64 + 1).unwrap();
            waiters.push(tokio::spawn(async move {
                announce_root(&client, &topic, rank, &addr).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;

        let root = announce_root(&service.client(), &topic, Rank::ROOT, &addrs[0])
            .await
            .unwrap();
        assert_eq!(root.addr, addrs[0]);

        for waiter in waiters {
            let received = waiter.await.unwrap().unwrap();
            assert_eq!(received, root);
        }
        assert_eq!(service.published("nodeinfo"), 1);
    }
}
