//! In-memory record store for tests/dev.
//!
//! The items map plays the role of the relational system of record: each
//! mutation reads a snapshot, runs the pure domain transition outside any
//! lock, then commits under the write lock with an expected-version check.
//! The ledger append happens inside the same critical section as the item
//! write (the transaction boundary); the change event is published only
//! after that section ends.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use stockroom_core::{
    ActorId, DomainError, DomainResult, ExpectedVersion, ItemId, LocationId, OrgId,
};
use stockroom_inventory::{
    InventoryItem, ItemChange, ItemUpdate, MovementDelta, NewItem, StockMovement,
};
use stockroom_location::{Location, LocationParts};
use stockroom_realtime::{ChangeFeed, SnapshotSource};

use crate::error::StoreError;
use crate::ledger::MovementLedger;
use crate::record_store::RecordStore;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct ItemKey {
    org_id: OrgId,
    item_id: ItemId,
}

pub struct InMemoryRecordStore<L, F> {
    items: RwLock<HashMap<ItemKey, InventoryItem>>,
    locations: RwLock<HashMap<(OrgId, String), Location>>,
    ledger: L,
    feed: F,
}

impl<L, F> InMemoryRecordStore<L, F>
where
    L: MovementLedger,
    F: ChangeFeed<ItemChange>,
{
    pub fn new(ledger: L, feed: F) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            locations: RwLock::new(HashMap::new()),
            ledger,
            feed,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("lock poisoned".to_string())
    }

    fn publish(&self, change: ItemChange) -> Result<(), StoreError> {
        self.feed
            .publish(change)
            .map_err(|e| StoreError::Publish(format!("{e:?}")))
    }

    /// Read-compute-commit with one internal retry on a lost race.
    fn mutate(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        op: &dyn Fn(&InventoryItem) -> Result<(InventoryItem, Option<StockMovement>), StoreError>,
    ) -> Result<(InventoryItem, Option<StockMovement>), StoreError> {
        match self.try_mutate(org_id, item_id, op) {
            Err(e) if e.is_conflict() => {
                tracing::warn!(%org_id, %item_id, "write lost a race, retrying once");
                self.try_mutate(org_id, item_id, op)
            }
            other => other,
        }
    }

    fn try_mutate(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        op: &dyn Fn(&InventoryItem) -> Result<(InventoryItem, Option<StockMovement>), StoreError>,
    ) -> Result<(InventoryItem, Option<StockMovement>), StoreError> {
        let previous = self.get_item(org_id, item_id)?;
        let expected = ExpectedVersion::Exact(previous.version());

        // Pure domain transition, outside any lock.
        let (updated, movement) = op(&previous)?;

        self.commit(org_id, item_id, expected, &updated, movement.as_ref())?;

        self.publish(ItemChange::updated(
            previous,
            updated.clone(),
            updated.last_updated(),
        ))?;
        Ok((updated, movement))
    }

    /// The transaction boundary: expected-version check, ledger append, and
    /// item replacement all succeed under one write lock or nothing does.
    fn commit(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        expected: ExpectedVersion,
        updated: &InventoryItem,
        movement: Option<&StockMovement>,
    ) -> Result<(), StoreError> {
        let key = ItemKey { org_id, item_id };
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        let stored = items.get_mut(&key).ok_or(DomainError::NotFound)?;

        expected.check(stored.version()).map_err(StoreError::from)?;

        if let Some(m) = movement {
            self.ledger.append(m)?;
        }
        *stored = updated.clone();
        Ok(())
    }
}

impl<L, F> RecordStore for InMemoryRecordStore<L, F>
where
    L: MovementLedger,
    F: ChangeFeed<ItemChange>,
{
    fn create_item(&self, new: NewItem) -> Result<InventoryItem, StoreError> {
        let item = InventoryItem::create(new)?;

        {
            let mut items = self.items.write().map_err(|_| Self::poisoned())?;
            let duplicate = items
                .values()
                .any(|existing| existing.org_id() == item.org_id() && existing.sku() == item.sku());
            if duplicate {
                return Err(StoreError::DuplicateSku(item.sku().to_string()));
            }
            items.insert(
                ItemKey {
                    org_id: item.org_id(),
                    item_id: item.id(),
                },
                item.clone(),
            );
        }

        tracing::info!(org_id = %item.org_id(), item_id = %item.id(), sku = item.sku(), "item created");
        self.publish(ItemChange::created(item.clone(), item.last_updated()))?;
        Ok(item)
    }

    fn update_item(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        update: &ItemUpdate,
        occurred_at: DateTime<Utc>,
    ) -> Result<InventoryItem, StoreError> {
        let (item, _) = self.mutate(org_id, item_id, &|current| {
            Ok((current.apply_update(update, occurred_at)?, None))
        })?;
        Ok(item)
    }

    fn apply_movement(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        delta: &MovementDelta,
    ) -> Result<(InventoryItem, StockMovement), StoreError> {
        let (item, movement) = self.mutate(org_id, item_id, &|current| {
            let (updated, movement) = current.apply_movement(delta)?;
            Ok((updated, Some(movement)))
        })?;

        // mutate() only returns None when the op produced none; this op
        // always produces a movement.
        let movement = movement.ok_or_else(|| {
            StoreError::Backend("movement missing after quantity commit".to_string())
        })?;
        tracing::info!(
            %org_id,
            %item_id,
            amount = delta.amount,
            old = movement.old_quantity,
            new = movement.new_quantity,
            "movement applied"
        );
        Ok((item, movement))
    }

    fn adjust_commitments(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        committed_delta: i64,
        incoming_delta: i64,
        occurred_at: DateTime<Utc>,
    ) -> Result<InventoryItem, StoreError> {
        let (item, _) = self.mutate(org_id, item_id, &|current| {
            Ok((
                current.adjust_commitments(committed_delta, incoming_delta, occurred_at)?,
                None,
            ))
        })?;
        Ok(item)
    }

    fn receive_draft(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        amount: i64,
        actor_id: ActorId,
        occurred_at: DateTime<Utc>,
    ) -> Result<(InventoryItem, StockMovement), StoreError> {
        let (item, movement) = self.mutate(org_id, item_id, &|current| {
            let (updated, movement) =
                current.receive(amount, "purchase order receipt", actor_id, occurred_at)?;
            Ok((updated, Some(movement)))
        })?;
        let movement = movement.ok_or_else(|| {
            StoreError::Backend("movement missing after receive commit".to_string())
        })?;
        Ok((item, movement))
    }

    fn delete_item(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let removed = {
            let mut items = self.items.write().map_err(|_| Self::poisoned())?;
            items
                .remove(&ItemKey { org_id, item_id })
                .ok_or(DomainError::NotFound)?
        };

        self.publish(ItemChange::removed(removed, occurred_at))
    }

    fn get_item(&self, org_id: OrgId, item_id: ItemId) -> Result<InventoryItem, StoreError> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        items
            .get(&ItemKey { org_id, item_id })
            .cloned()
            .ok_or_else(|| DomainError::NotFound.into())
    }

    fn list_items(&self, org_id: OrgId) -> Result<Vec<InventoryItem>, StoreError> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        let mut listed: Vec<InventoryItem> = items
            .values()
            .filter(|item| item.org_id() == org_id)
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.sku().cmp(b.sku()));
        Ok(listed)
    }

    fn upsert_location(
        &self,
        org_id: OrgId,
        parts: LocationParts,
        name: Option<String>,
        color: Option<String>,
    ) -> Result<Location, StoreError> {
        let canonical = parts.build();
        let mut locations = self.locations.write().map_err(|_| Self::poisoned())?;

        let record = match locations.get(&(org_id, canonical.clone())) {
            Some(existing) => {
                // Same five parts resolve to the same record; refresh the
                // display fields if new ones were provided.
                Location::new(
                    existing.id(),
                    org_id,
                    parts,
                    name.or_else(|| existing.name().map(String::from)),
                    color.or_else(|| existing.color().map(String::from)),
                )
            }
            None => Location::new(LocationId::new(), org_id, parts, name, color),
        };

        locations.insert((org_id, canonical), record.clone());
        Ok(record)
    }

    fn list_locations(&self, org_id: OrgId) -> Result<Vec<Location>, StoreError> {
        let locations = self.locations.read().map_err(|_| Self::poisoned())?;
        let mut listed: Vec<Location> = locations
            .values()
            .filter(|l| l.org_id() == org_id)
            .cloned()
            .collect();
        listed.sort_by_key(|l| l.canonical());
        Ok(listed)
    }

    fn list_movements(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        self.ledger.list_by_item(org_id, item_id, since)
    }
}

impl<L, F> SnapshotSource for InMemoryRecordStore<L, F>
where
    L: MovementLedger,
    F: ChangeFeed<ItemChange>,
{
    fn snapshot(&self, org_id: OrgId) -> DomainResult<Vec<InventoryItem>> {
        self.list_items(org_id)
            .map_err(|e| DomainError::conflict(format!("snapshot failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_inventory::{Bucket, MovementKind};
    use stockroom_realtime::InMemoryChangeFeed;

    use crate::ledger::InMemoryMovementLedger;

    type TestStore = InMemoryRecordStore<InMemoryMovementLedger, InMemoryChangeFeed<ItemChange>>;

    fn test_store() -> TestStore {
        InMemoryRecordStore::new(InMemoryMovementLedger::new(), InMemoryChangeFeed::new())
    }

    fn create_widget(store: &TestStore, org_id: OrgId) -> InventoryItem {
        store
            .create_item(NewItem {
                org_id,
                item_id: ItemId::new(),
                sku: "SKU-001".to_string(),
                name: "Widget".to_string(),
                occurred_at: Utc::now(),
            })
            .unwrap()
    }

    fn add(amount: i64) -> MovementDelta {
        MovementDelta {
            kind: MovementKind::Add,
            amount,
            bucket: Some(Bucket::PickingBin),
            reason: "receive".to_string(),
            actor_id: ActorId::new(),
            occurred_at: Utc::now(),
        }
    }

    fn subtract(amount: i64) -> MovementDelta {
        MovementDelta {
            kind: MovementKind::Subtract,
            amount,
            bucket: None,
            reason: "pick".to_string(),
            actor_id: ActorId::new(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn movement_updates_item_and_ledger_together() {
        let store = test_store();
        let org_id = OrgId::new();
        let item = create_widget(&store, org_id);

        let (updated, movement) = store.apply_movement(org_id, item.id(), &add(5)).unwrap();
        assert_eq!(updated.quantity(), 5);
        assert_eq!(movement.old_quantity, 0);
        assert_eq!(movement.new_quantity, 5);

        let ledger = store.list_movements(org_id, item.id(), None).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].id, movement.id);
        assert_eq!(
            store.get_item(org_id, item.id()).unwrap().version(),
            updated.version()
        );
    }

    #[test]
    fn rejected_movement_leaves_item_and_ledger_unchanged() {
        let store = test_store();
        let org_id = OrgId::new();
        let item = create_widget(&store, org_id);
        store.apply_movement(org_id, item.id(), &add(5)).unwrap();
        let before = store.get_item(org_id, item.id()).unwrap();

        let err = store
            .apply_movement(org_id, item.id(), &subtract(10))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::InsufficientStock { .. })
        ));

        assert_eq!(store.get_item(org_id, item.id()).unwrap(), before);
        assert_eq!(store.list_movements(org_id, item.id(), None).unwrap().len(), 1);
    }

    #[test]
    fn change_events_are_published_after_commit_with_post_image() {
        let store = test_store();
        let org_id = OrgId::new();
        let subscription = store.feed().subscribe();

        let item = create_widget(&store, org_id);
        let (updated, _) = store.apply_movement(org_id, item.id(), &add(5)).unwrap();

        let created = subscription.try_recv().unwrap();
        assert_eq!(created.version, item.version());

        let changed = subscription.try_recv().unwrap();
        assert_eq!(changed.version, updated.version());
        assert_eq!(changed.current.as_ref().unwrap().quantity(), 5);
        // The store had already committed when the event was published.
        assert_eq!(
            store.get_item(org_id, item.id()).unwrap().version(),
            changed.version
        );
    }

    #[test]
    fn rejected_movement_publishes_no_event() {
        let store = test_store();
        let org_id = OrgId::new();
        let item = create_widget(&store, org_id);
        let subscription = store.feed().subscribe();

        let _ = store.apply_movement(org_id, item.id(), &subtract(1));
        assert!(subscription.try_recv().is_err());
    }

    #[test]
    fn update_item_writes_no_ledger_entry() {
        let store = test_store();
        let org_id = OrgId::new();
        let item = create_widget(&store, org_id);

        store
            .update_item(
                org_id,
                item.id(),
                &ItemUpdate {
                    reorder_level: Some(10),
                    ..ItemUpdate::default()
                },
                Utc::now(),
            )
            .unwrap();

        assert!(store.list_movements(org_id, item.id(), None).unwrap().is_empty());
        assert_eq!(store.get_item(org_id, item.id()).unwrap().reorder_level(), 10);
    }

    #[test]
    fn stale_commit_is_a_conflict() {
        let store = test_store();
        let org_id = OrgId::new();
        let item = create_widget(&store, org_id);

        // A competing writer advances the record between our read and commit.
        let stale = store.get_item(org_id, item.id()).unwrap();
        store.apply_movement(org_id, item.id(), &add(1)).unwrap();

        let (updated, _) = stale.apply_movement(&add(2)).unwrap();
        let err = store
            .commit(
                org_id,
                item.id(),
                ExpectedVersion::Exact(stale.version()),
                &updated,
                None,
            )
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn lost_race_is_retried_against_the_fresh_read() {
        let store = test_store();
        let org_id = OrgId::new();
        let item = create_widget(&store, org_id);
        store.apply_movement(org_id, item.id(), &add(5)).unwrap();

        // Sequential writers never conflict twice; both land.
        store.apply_movement(org_id, item.id(), &subtract(2)).unwrap();
        let current = store.get_item(org_id, item.id()).unwrap();
        assert_eq!(current.quantity(), 3);
        assert_eq!(store.list_movements(org_id, item.id(), None).unwrap().len(), 2);
    }

    #[test]
    fn duplicate_sku_within_an_org_is_rejected() {
        let store = test_store();
        let org_id = OrgId::new();
        create_widget(&store, org_id);

        let err = store
            .create_item(NewItem {
                org_id,
                item_id: ItemId::new(),
                sku: "SKU-001".to_string(),
                name: "Widget clone".to_string(),
                occurred_at: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSku(_)));

        // The same SKU in another org is fine.
        assert!(create_widget(&store, OrgId::new()).quantity() == 0);
    }

    #[test]
    fn upsert_location_dedupes_on_canonical_string() {
        let store = test_store();
        let org_id = OrgId::new();
        let parts = LocationParts::new("A", "01", "01", "1", "A").unwrap();

        let first = store
            .upsert_location(org_id, parts.clone(), Some("Front".to_string()), None)
            .unwrap();
        let second = store
            .upsert_location(org_id, parts, None, Some("blue".to_string()))
            .unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(second.name(), Some("Front"));
        assert_eq!(second.color(), Some("blue"));
        assert_eq!(store.list_locations(org_id).unwrap().len(), 1);
    }

    #[test]
    fn delete_emits_removed_and_forgets_the_item() {
        let store = test_store();
        let org_id = OrgId::new();
        let item = create_widget(&store, org_id);
        let subscription = store.feed().subscribe();

        store.delete_item(org_id, item.id(), Utc::now()).unwrap();

        let change = subscription.try_recv().unwrap();
        assert!(change.current.is_none());
        assert_eq!(change.version, item.version() + 1);
        assert!(matches!(
            store.get_item(org_id, item.id()).unwrap_err(),
            StoreError::Domain(DomainError::NotFound)
        ));
    }

    #[test]
    fn receive_draft_consumes_incoming_in_the_same_commit() {
        let store = test_store();
        let org_id = OrgId::new();
        let item = create_widget(&store, org_id);
        store
            .adjust_commitments(org_id, item.id(), 0, 20, Utc::now())
            .unwrap();

        let subscription = store.feed().subscribe();
        let (updated, movement) = store
            .receive_draft(org_id, item.id(), 20, ActorId::new(), Utc::now())
            .unwrap();

        assert_eq!(updated.quantity(), 20);
        assert_eq!(updated.incoming_stock(), 0);
        movement.verify().unwrap();

        // One change event: incoming fell and quantity rose together.
        let change = subscription.try_recv().unwrap();
        let current = change.current.unwrap();
        assert_eq!(current.quantity(), 20);
        assert_eq!(current.incoming_stock(), 0);
        assert!(subscription.try_recv().is_err());
    }

    #[test]
    fn snapshot_scopes_to_the_organization() {
        let store = test_store();
        let org_a = OrgId::new();
        let org_b = OrgId::new();
        create_widget(&store, org_a);
        create_widget(&store, org_b);

        let snapshot = store.snapshot(org_a).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].org_id(), org_a);
    }
}
