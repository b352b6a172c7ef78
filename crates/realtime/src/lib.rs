//! Realtime change distribution and client-side reconciliation.
//!
//! The record store publishes an [`ItemChange`](stockroom_inventory::ItemChange)
//! after every committed write. This crate carries those events to connected
//! clients (the [`feed`] pub/sub layer) and merges them into each client's
//! local projection (the [`reconciler`] session state machine) without
//! duplicating or losing state.

pub mod feed;
pub mod reconciler;

pub use feed::{ChangeFeed, InMemoryChangeFeed, Subscription};
pub use reconciler::{AppliedChange, ClientSession, ReconcileError, SessionState, SnapshotSource};
