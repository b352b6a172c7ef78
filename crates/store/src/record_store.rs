//! The inventory record store contract.
//!
//! The store is the single writer of record for items and locations. Every
//! quantity-changing write appends exactly one ledger entry in the same
//! transaction and publishes a change event strictly after commit. No other
//! component may compute or persist quantity/status.

use chrono::{DateTime, Utc};

use stockroom_core::{ActorId, ItemId, OrgId};
use stockroom_inventory::{InventoryItem, ItemUpdate, MovementDelta, NewItem, StockMovement};
use stockroom_location::{Location, LocationParts};

use crate::error::StoreError;

pub trait RecordStore: Send + Sync {
    /// Create an item with zero quantities. Fails with [`StoreError::DuplicateSku`]
    /// if the SKU is already used within the organization.
    fn create_item(&self, new: NewItem) -> Result<InventoryItem, StoreError>;

    /// Update non-quantity fields. Bumps `last_updated`/`version`, writes no
    /// ledger entry.
    fn update_item(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        update: &ItemUpdate,
        occurred_at: DateTime<Utc>,
    ) -> Result<InventoryItem, StoreError>;

    /// Apply a quantity change and append the ledger entry that explains it,
    /// atomically. The returned movement brackets the change exactly.
    ///
    /// A lost write race is retried once internally against a fresh read;
    /// a second loss surfaces as a conflict.
    fn apply_movement(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        delta: &MovementDelta,
    ) -> Result<(InventoryItem, StockMovement), StoreError>;

    /// Adjust order-book commitments (no ledger entry; quantity unchanged).
    fn adjust_commitments(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        committed_delta: i64,
        incoming_delta: i64,
        occurred_at: DateTime<Utc>,
    ) -> Result<InventoryItem, StoreError>;

    /// Receive goods against an open purchase order: one Add movement plus
    /// the matching `incoming_stock` decrement in a single commit.
    fn receive_draft(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        amount: i64,
        actor_id: ActorId,
        occurred_at: DateTime<Utc>,
    ) -> Result<(InventoryItem, StockMovement), StoreError>;

    fn delete_item(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    fn get_item(&self, org_id: OrgId, item_id: ItemId) -> Result<InventoryItem, StoreError>;

    /// Snapshot of all items in the organization (the subscription's
    /// re-sync source).
    fn list_items(&self, org_id: OrgId) -> Result<Vec<InventoryItem>, StoreError>;

    /// Insert-or-update a location keyed by the canonical string of its
    /// parts: two inserts with the same parts resolve to one record.
    fn upsert_location(
        &self,
        org_id: OrgId,
        parts: LocationParts,
        name: Option<String>,
        color: Option<String>,
    ) -> Result<Location, StoreError>;

    fn list_locations(&self, org_id: OrgId) -> Result<Vec<Location>, StoreError>;

    /// Ledger query: movements for an item, newest first.
    fn list_movements(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StockMovement>, StoreError>;
}
