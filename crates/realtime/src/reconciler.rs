//! Per-client reconciliation session.
//!
//! Each connected client owns one [`ClientSession`] per organization. The
//! session is an explicit state machine:
//!
//! ```text
//! Disconnected -> Subscribing -> Synced -> (change applied <-> Synced) -> Disconnected
//! ```
//!
//! Entering `Subscribing`, the session subscribes to the feed **first** and
//! then takes a full snapshot, so no committed change can fall between the
//! two. Events already reflected by the snapshot are discarded by the
//! per-item version guard. A disconnect (including one mid-snapshot)
//! discards the projection entirely; reconnection re-snapshots rather than
//! resuming a gapless stream. At-least-once delivery plus idempotent
//! replacement is the correctness strategy.

use std::collections::HashMap;
use std::sync::mpsc::TryRecvError;

use thiserror::Error;

use stockroom_core::{DomainResult, ItemId, OrgId};
use stockroom_inventory::{InventoryItem, ItemChange};

use crate::feed::{ChangeFeed, Subscription};

/// Source of full projection snapshots (implemented by the record store).
pub trait SnapshotSource {
    fn snapshot(&self, org_id: OrgId) -> DomainResult<Vec<InventoryItem>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Subscribing,
    Synced,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Change events are only accepted while the session is synced.
    #[error("session is not synced")]
    NotSynced,

    /// An event for a different organization reached this session.
    #[error("organization mismatch: expected {expected}, found {found}")]
    OrgMismatch { expected: OrgId, found: OrgId },

    /// Snapshot fetch failed while subscribing; the session is back to
    /// `Disconnected` and may retry.
    #[error("snapshot failed: {0}")]
    Snapshot(String),
}

/// The outcome of applying one change event to the projection.
///
/// `previous` is the projection's view of the item before this change (not
/// the store's pre-image), which is what downstream reactions compare
/// against: it reflects exactly what this client had reconciled so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedChange {
    /// The event advanced the projection.
    Fresh {
        item_id: ItemId,
        previous: Option<InventoryItem>,
        current: Option<InventoryItem>,
    },
    /// The event was at or below the item's reconciled version and was
    /// discarded. A no-op by design, not an error.
    Stale { item_id: ItemId },
}

/// One client's reconciled view of an organization's inventory.
pub struct ClientSession {
    org_id: OrgId,
    state: SessionState,
    projection: HashMap<ItemId, InventoryItem>,
    /// Last applied version per item. Retains tombstones for removed items
    /// so a reordered stale update cannot resurrect them.
    versions: HashMap<ItemId, u64>,
    subscription: Option<Subscription<ItemChange>>,
}

impl ClientSession {
    pub fn new(org_id: OrgId) -> Self {
        Self {
            org_id,
            state: SessionState::Disconnected,
            projection: HashMap::new(),
            versions: HashMap::new(),
            subscription: None,
        }
    }

    pub fn org_id(&self) -> OrgId {
        self.org_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn get(&self, item_id: &ItemId) -> Option<&InventoryItem> {
        self.projection.get(item_id)
    }

    pub fn list(&self) -> Vec<&InventoryItem> {
        self.projection.values().collect()
    }

    pub fn len(&self) -> usize {
        self.projection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projection.is_empty()
    }

    /// Subscribe and snapshot, entering `Synced`.
    ///
    /// Any state from a previous connection is discarded first. If the
    /// snapshot fails the session ends up `Disconnected` with nothing
    /// retained, ready for a retry.
    pub fn connect<F, S>(&mut self, feed: &F, source: &S) -> Result<(), ReconcileError>
    where
        F: ChangeFeed<ItemChange>,
        S: SnapshotSource,
    {
        self.disconnect();
        self.state = SessionState::Subscribing;

        // Subscribe before snapshotting: a change committed between the two
        // is buffered in the subscription and later dropped by the version
        // guard if the snapshot already reflects it.
        let subscription = feed.subscribe();

        let items = match source.snapshot(self.org_id) {
            Ok(items) => items,
            Err(e) => {
                self.disconnect();
                return Err(ReconcileError::Snapshot(e.to_string()));
            }
        };

        for item in items {
            self.versions.insert(item.id(), item.version());
            self.projection.insert(item.id(), item);
        }

        self.subscription = Some(subscription);
        self.state = SessionState::Synced;
        tracing::debug!(org_id = %self.org_id, items = self.projection.len(), "session synced");
        Ok(())
    }

    /// Drop the subscription and all reconciled state.
    pub fn disconnect(&mut self) {
        self.subscription = None;
        self.projection.clear();
        self.versions.clear();
        self.state = SessionState::Disconnected;
    }

    /// Apply one change event to the projection.
    ///
    /// Idempotent replacement keyed by item id: the post-image replaces the
    /// record wholesale, guarded by the per-item monotonic version. Applying
    /// the same event twice, or a reordered older event, leaves the
    /// projection exactly as if it had been applied once in order.
    pub fn apply(&mut self, change: &ItemChange) -> Result<AppliedChange, ReconcileError> {
        if self.state != SessionState::Synced {
            return Err(ReconcileError::NotSynced);
        }
        if change.org_id != self.org_id {
            return Err(ReconcileError::OrgMismatch {
                expected: self.org_id,
                found: change.org_id,
            });
        }

        let last = self.versions.get(&change.item_id).copied().unwrap_or(0);
        if change.version <= last {
            tracing::trace!(
                item_id = %change.item_id,
                version = change.version,
                last,
                "stale change discarded"
            );
            return Ok(AppliedChange::Stale {
                item_id: change.item_id,
            });
        }

        let previous = self.projection.get(&change.item_id).cloned();
        match &change.current {
            Some(item) => {
                self.projection.insert(change.item_id, item.clone());
            }
            None => {
                self.projection.remove(&change.item_id);
            }
        }
        self.versions.insert(change.item_id, change.version);

        Ok(AppliedChange::Fresh {
            item_id: change.item_id,
            previous,
            current: change.current.clone(),
        })
    }

    /// Drain buffered events from the subscription, applying each.
    ///
    /// Non-blocking; returns the changes that advanced the projection so the
    /// caller can drive downstream reactions (e.g. replenishment) per item.
    /// A closed feed channel is treated as a disconnect.
    pub fn pump(&mut self) -> Result<Vec<AppliedChange>, ReconcileError> {
        if self.state != SessionState::Synced {
            return Err(ReconcileError::NotSynced);
        }

        let mut applied = Vec::new();
        loop {
            let next = match &self.subscription {
                Some(sub) => sub.try_recv(),
                None => break,
            };
            match next {
                Ok(change) => {
                    // The feed broadcasts every organization; this session
                    // only reconciles its own.
                    if change.org_id != self.org_id {
                        continue;
                    }
                    match self.apply(&change)? {
                        fresh @ AppliedChange::Fresh { .. } => applied.push(fresh),
                        AppliedChange::Stale { .. } => {}
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::warn!(org_id = %self.org_id, "change feed closed, disconnecting");
                    self.disconnect();
                    break;
                }
            }
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockroom_core::ActorId;
    use stockroom_inventory::{
        InventoryItem, ItemChange, MovementDelta, MovementKind, NewItem,
    };

    use crate::feed::InMemoryChangeFeed;

    struct FixedSnapshot(Vec<InventoryItem>);

    impl SnapshotSource for FixedSnapshot {
        fn snapshot(&self, _org_id: OrgId) -> DomainResult<Vec<InventoryItem>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSnapshot;

    impl SnapshotSource for FailingSnapshot {
        fn snapshot(&self, _org_id: OrgId) -> DomainResult<Vec<InventoryItem>> {
            Err(stockroom_core::DomainError::conflict("backend unavailable"))
        }
    }

    fn test_item(org_id: OrgId) -> InventoryItem {
        InventoryItem::create(NewItem {
            org_id,
            item_id: ItemId::new(),
            sku: "SKU-001".to_string(),
            name: "Widget".to_string(),
            occurred_at: Utc::now(),
        })
        .unwrap()
    }

    fn bumped(item: &InventoryItem, times: u64) -> InventoryItem {
        let mut current = item.clone();
        for _ in 0..times {
            let (next, _) = current
                .apply_movement(&MovementDelta {
                    kind: MovementKind::Add,
                    amount: 1,
                    bucket: None,
                    reason: "bump".to_string(),
                    actor_id: ActorId::new(),
                    occurred_at: Utc::now(),
                })
                .unwrap();
            current = next;
        }
        current
    }

    fn synced_session(org_id: OrgId, snapshot: Vec<InventoryItem>) -> ClientSession {
        let feed: InMemoryChangeFeed<ItemChange> = InMemoryChangeFeed::new();
        let mut session = ClientSession::new(org_id);
        session.connect(&feed, &FixedSnapshot(snapshot)).unwrap();
        session
    }

    #[test]
    fn applying_the_same_event_twice_is_idempotent() {
        let org_id = OrgId::new();
        let item = test_item(org_id);
        let mut session = synced_session(org_id, vec![]);

        let change = ItemChange::created(item.clone(), Utc::now());
        assert!(matches!(
            session.apply(&change).unwrap(),
            AppliedChange::Fresh { .. }
        ));
        let after_first: Vec<_> = session.list().into_iter().cloned().collect();

        assert!(matches!(
            session.apply(&change).unwrap(),
            AppliedChange::Stale { .. }
        ));
        let after_second: Vec<_> = session.list().into_iter().cloned().collect();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn later_versioned_state_wins_over_a_reordered_stale_event() {
        let org_id = OrgId::new();
        let item = test_item(org_id);
        let newer = bumped(&item, 2);
        let older = bumped(&item, 1);
        let mut session = synced_session(org_id, vec![]);

        session
            .apply(&ItemChange::updated(item.clone(), newer.clone(), Utc::now()))
            .unwrap();
        // The earlier-versioned event arrives after the later one.
        let outcome = session
            .apply(&ItemChange::updated(item, older, Utc::now()))
            .unwrap();

        assert!(matches!(outcome, AppliedChange::Stale { .. }));
        assert_eq!(session.get(&newer.id()).unwrap().version(), newer.version());
    }

    #[test]
    fn events_already_reflected_by_the_snapshot_are_dropped() {
        let org_id = OrgId::new();
        let item = bumped(&test_item(org_id), 3);
        let mut session = synced_session(org_id, vec![item.clone()]);

        // A pre-snapshot change for the same item replays at-least-once.
        let outcome = session
            .apply(&ItemChange::created(
                InventoryItem::create(NewItem {
                    org_id,
                    item_id: item.id(),
                    sku: item.sku().to_string(),
                    name: item.name().to_string(),
                    occurred_at: Utc::now(),
                })
                .unwrap(),
                Utc::now(),
            ))
            .unwrap();

        assert!(matches!(outcome, AppliedChange::Stale { .. }));
        assert_eq!(session.get(&item.id()).unwrap().version(), item.version());
    }

    #[test]
    fn removal_leaves_a_tombstone_floor() {
        let org_id = OrgId::new();
        let item = test_item(org_id);
        let updated = bumped(&item, 1);
        let mut session = synced_session(org_id, vec![item.clone()]);

        session
            .apply(&ItemChange::removed(updated.clone(), Utc::now()))
            .unwrap();
        assert!(session.get(&item.id()).is_none());

        // The update that preceded the removal arrives late; it must not
        // resurrect the record.
        let outcome = session
            .apply(&ItemChange::updated(item.clone(), updated, Utc::now()))
            .unwrap();
        assert!(matches!(outcome, AppliedChange::Stale { .. }));
        assert!(session.get(&item.id()).is_none());
    }

    #[test]
    fn cross_item_events_apply_in_any_order_to_the_same_end_state() {
        let org_id = OrgId::new();
        let a = test_item(org_id);
        let b = test_item(org_id);
        let change_a = ItemChange::created(a.clone(), Utc::now());
        let change_b = ItemChange::created(b.clone(), Utc::now());

        let mut forward = synced_session(org_id, vec![]);
        forward.apply(&change_a).unwrap();
        forward.apply(&change_b).unwrap();

        let mut reversed = synced_session(org_id, vec![]);
        reversed.apply(&change_b).unwrap();
        reversed.apply(&change_a).unwrap();

        assert_eq!(forward.get(&a.id()), reversed.get(&a.id()));
        assert_eq!(forward.get(&b.id()), reversed.get(&b.id()));
        assert_eq!(forward.len(), reversed.len());
    }

    #[test]
    fn events_are_rejected_unless_synced() {
        let org_id = OrgId::new();
        let mut session = ClientSession::new(org_id);
        let change = ItemChange::created(test_item(org_id), Utc::now());
        assert_eq!(session.apply(&change), Err(ReconcileError::NotSynced));
    }

    #[test]
    fn cross_org_events_are_rejected() {
        let org_id = OrgId::new();
        let mut session = synced_session(org_id, vec![]);
        let foreign = ItemChange::created(test_item(OrgId::new()), Utc::now());
        assert!(matches!(
            session.apply(&foreign),
            Err(ReconcileError::OrgMismatch { .. })
        ));
    }

    #[test]
    fn failed_snapshot_leaves_the_session_disconnected_and_empty() {
        let org_id = OrgId::new();
        let feed: InMemoryChangeFeed<ItemChange> = InMemoryChangeFeed::new();
        let mut session = ClientSession::new(org_id);

        let err = session.connect(&feed, &FailingSnapshot).unwrap_err();
        assert!(matches!(err, ReconcileError::Snapshot(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.is_empty());

        // A retry against a healthy source succeeds from scratch.
        session.connect(&feed, &FixedSnapshot(vec![])).unwrap();
        assert_eq!(session.state(), SessionState::Synced);
    }

    #[test]
    fn disconnect_discards_the_projection_and_reconnect_resnapshots() {
        let org_id = OrgId::new();
        let item = test_item(org_id);
        let feed: InMemoryChangeFeed<ItemChange> = InMemoryChangeFeed::new();
        let mut session = ClientSession::new(org_id);
        session
            .connect(&feed, &FixedSnapshot(vec![item.clone()]))
            .unwrap();
        assert_eq!(session.len(), 1);

        session.disconnect();
        assert!(session.is_empty());
        assert_eq!(session.state(), SessionState::Disconnected);

        let newer = bumped(&item, 2);
        session
            .connect(&feed, &FixedSnapshot(vec![newer.clone()]))
            .unwrap();
        assert_eq!(session.get(&item.id()).unwrap().version(), newer.version());
    }

    #[test]
    fn pump_ignores_other_organizations_events() {
        let org_id = OrgId::new();
        let feed: InMemoryChangeFeed<ItemChange> = InMemoryChangeFeed::new();
        let mut session = ClientSession::new(org_id);
        session.connect(&feed, &FixedSnapshot(vec![])).unwrap();

        let foreign = test_item(OrgId::new());
        let ours = test_item(org_id);
        feed.publish(ItemChange::created(foreign.clone(), Utc::now()))
            .unwrap();
        feed.publish(ItemChange::created(ours.clone(), Utc::now()))
            .unwrap();

        let applied = session.pump().unwrap();
        assert_eq!(applied.len(), 1);
        assert!(session.get(&foreign.id()).is_none());
        assert!(session.get(&ours.id()).is_some());
    }

    #[test]
    fn pump_drains_published_changes_in_commit_order() {
        let org_id = OrgId::new();
        let item = test_item(org_id);
        let feed: InMemoryChangeFeed<ItemChange> = InMemoryChangeFeed::new();
        let mut session = ClientSession::new(org_id);
        session.connect(&feed, &FixedSnapshot(vec![])).unwrap();

        let v2 = bumped(&item, 1);
        feed.publish(ItemChange::created(item.clone(), Utc::now()))
            .unwrap();
        feed.publish(ItemChange::updated(item.clone(), v2.clone(), Utc::now()))
            .unwrap();

        let applied = session.pump().unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(session.get(&item.id()).unwrap().version(), v2.version());

        // Nothing buffered: a second pump is a no-op.
        assert!(session.pump().unwrap().is_empty());
    }
}
