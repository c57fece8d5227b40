//! Barrier and broadcast synchronization.
//!
//! Participants of a run are independent processes (or tasks) that only
//! coordinate through a synchronization service:
//!
//! ```text
//! participant ──signal_entry(state)──▶ ┌──────────────────┐
//!             ◀──barrier(state, n)──── │ sync service     │
//!             ──publish(topic, v)────▶ │  state counters  │
//!             ◀──subscribe(topic)───── │  topic history   │
//!                                      └──────────────────┘
//! ```
//!
//! [`SyncClient`] is the seam to the service; [`MemorySyncService`] is an
//! in-process implementation for runs whose participants share a runtime.

mod client;
mod memory;

pub use client::{State, Subscription, SyncClient, Topic};
pub use memory::{MemorySyncClient, MemorySyncService};
