//! Sequential tree bootstrap.
//!
//! Participants join one at a time, ordered by rank, each connecting to the
//! root only after its predecessor signalled completion. A single join
//! order against a single root yields the same initial topology on every
//! run.
//!
//! ```text
//! rank 1 (root):  SignalDone ─────────────────────────────▶ Joined
//! rank r > 1:     WaitingForPredecessor ─(r-1 signalled)─▶ Connecting
//!                 Connecting ─(ok | ConnectError)─▶ SignalDone ─▶ Joined
//! ```

use std::{fmt, time::Duration};

use crate::{
    dht::DhtNode,
    error::{Error, Result},
    sync::{State, SyncClient},
    types::{Rank, RootAnnouncement},
};

/// Phase of a participant's join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    /// Waiting for the participant ranked just before us.
    WaitingForPredecessor,
    /// Connecting to the root.
    Connecting,
    /// Signalling that our join finished.
    SignalDone,
    /// Done; the next rank may proceed.
    Joined,
}

impl fmt::Display for JoinPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinPhase::WaitingForPredecessor => "waiting-for-predecessor",
            JoinPhase::Connecting => "connecting",
            JoinPhase::SignalDone => "signal-done",
            JoinPhase::Joined => "joined",
        };
        f.write_str(name)
    }
}

/// Result of a participant's join.
#[derive(Debug)]
pub struct JoinOutcome {
    /// Rank of the participant.
    pub rank: Rank,
    /// Whether a connection to the root was established.
    ///
    /// Always `false` for the root itself.
    pub connected: bool,
    /// Connection failure, if any. Never fatal.
    pub error: Option<Error>,
}

impl JoinOutcome {
    /// Whether the join degraded because the root was unreachable.
    pub fn degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Joins one participant to the root in rank order.
pub struct SequentialJoin<'a, S, D> {
    sync: &'a S,
    dht: &'a D,
    state: &'a State,
    settle_delay: Duration,
    phase: JoinPhase,
}

impl<'a, S, D> SequentialJoin<'a, S, D>
where
    S: SyncClient,
    D: DhtNode,
{
    /// Create a join driver signalling `state` when done.
    pub fn new(sync: &'a S, dht: &'a D, state: &'a State) -> Self {
        Self {
            sync,
            dht,
            state,
            settle_delay: Duration::ZERO,
            phase: JoinPhase::WaitingForPredecessor,
        }
    }

    /// Pause after a successful connection before signalling (builder
    /// pattern).
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Current phase.
    pub fn phase(&self) -> JoinPhase {
        self.phase
    }

    fn enter(&mut self, rank: Rank, phase: JoinPhase) {
        tracing::debug!(rank = %rank, from = %self.phase, to = %phase, "join phase");
        self.phase = phase;
    }

    /// Run the join for `rank`.
    ///
    /// Only synchronization failures are returned as errors; a connect
    /// failure is logged and reported in the outcome.
    pub async fn run(&mut self, rank: Rank, root: &RootAnnouncement) -> Result<JoinOutcome> {
        if rank.is_root() {
            self.enter(rank, JoinPhase::SignalDone);
            self.sync.signal_entry(self.state).await?;
            self.enter(rank, JoinPhase::Joined);
            return Ok(JoinOutcome {
                rank,
                connected: false,
                error: None,
            });
        }

        self.enter(rank, JoinPhase::WaitingForPredecessor);
        self.sync.barrier(self.state, rank.predecessors()).await?;

        self.enter(rank, JoinPhase::Connecting);
        tracing::info!(rank = %rank, root = %root.addr, "bootstrapping from root");
        let error = match self.dht.connect(&root.addr).await {
            Ok(()) => {
                tokio::time::sleep(self.settle_delay).await;
                None
            }
            Err(e) => {
                tracing::warn!(rank = %rank, "failed to bootstrap from root: {}", e);
                Some(e)
            }
        };

        self.enter(rank, JoinPhase::SignalDone);
        self.sync.signal_entry(self.state).await?;
        self.enter(rank, JoinPhase::Joined);

        Ok(JoinOutcome {
            rank,
            connected: error.is_none(),
            error,
        })
    }
}

impl<S, D> fmt::Debug for SequentialJoin<'_, S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialJoin")
            .field("state", self.state)
            .field("settle_delay", &self.settle_delay)
            .field("phase", &self.phase)
            .finish()
    }
}
