use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, ItemId, OrgId, VendorId};
use stockroom_location::LocationParts;

use crate::movement::{Bucket, MovementDelta, MovementKind, StockMovement};

/// Derived stock health, never persisted independently of the quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
}

/// Payload for creating an inventory item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub org_id: OrgId,
    pub item_id: ItemId,
    pub sku: String,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Patch for the non-quantity fields of an item.
///
/// `None` fields are left untouched. Quantity buckets are deliberately
/// absent: every quantity change goes through [`InventoryItem::apply_movement`]
/// so it is bracketed by a ledger entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub name: Option<String>,
    pub reorder_level: Option<i64>,
    pub picking_reorder_level: Option<i64>,
    pub unit_cost: Option<u64>,
    pub retail_price: Option<u64>,
    pub location: Option<LocationParts>,
    pub picking_bin_location: Option<LocationParts>,
    pub vendor_id: Option<VendorId>,
    pub auto_reorder_enabled: Option<bool>,
    pub auto_reorder_quantity: Option<i64>,
}

/// Canonical inventory record for one SKU in one organization.
///
/// The record tracks the split between stock staged for picking and bulk
/// overstock. Total quantity and status are recomputed from the split on
/// every read; no write path may set them directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    id: ItemId,
    org_id: OrgId,
    sku: String,
    name: String,

    picking_bin_quantity: i64,
    overstock_quantity: i64,

    reorder_level: i64,
    picking_reorder_level: i64,

    committed_stock: i64,
    incoming_stock: i64,

    /// Smallest-currency-unit prices (cents).
    unit_cost: u64,
    retail_price: u64,

    location: Option<LocationParts>,
    picking_bin_location: Option<LocationParts>,

    vendor_id: Option<VendorId>,
    auto_reorder_enabled: bool,
    auto_reorder_quantity: i64,

    last_updated: DateTime<Utc>,

    /// Monotonically increasing per mutation; drives optimistic concurrency
    /// in the store and the staleness guard in client reconciliation.
    version: u64,
}

impl InventoryItem {
    pub fn create(new: NewItem) -> DomainResult<Self> {
        if new.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if new.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(Self {
            id: new.item_id,
            org_id: new.org_id,
            sku: new.sku,
            name: new.name,
            picking_bin_quantity: 0,
            overstock_quantity: 0,
            reorder_level: 0,
            picking_reorder_level: 0,
            committed_stock: 0,
            incoming_stock: 0,
            unit_cost: 0,
            retail_price: 0,
            location: None,
            picking_bin_location: None,
            vendor_id: None,
            auto_reorder_enabled: false,
            auto_reorder_quantity: 0,
            last_updated: new.occurred_at,
            version: 1,
        })
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn org_id(&self) -> OrgId {
        self.org_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn picking_bin_quantity(&self) -> i64 {
        self.picking_bin_quantity
    }

    pub fn overstock_quantity(&self) -> i64 {
        self.overstock_quantity
    }

    /// Total quantity, recomputed from the split on every call.
    pub fn quantity(&self) -> i64 {
        self.picking_bin_quantity + self.overstock_quantity
    }

    /// Derived stock health.
    ///
    /// `OutOfStock` iff the total quantity is zero; `LowStock` iff it is
    /// positive but at or below the reorder level.
    pub fn status(&self) -> StockStatus {
        let quantity = self.quantity();
        if quantity == 0 {
            StockStatus::OutOfStock
        } else if quantity <= self.reorder_level {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }

    pub fn reorder_level(&self) -> i64 {
        self.reorder_level
    }

    pub fn picking_reorder_level(&self) -> i64 {
        self.picking_reorder_level
    }

    pub fn committed_stock(&self) -> i64 {
        self.committed_stock
    }

    pub fn incoming_stock(&self) -> i64 {
        self.incoming_stock
    }

    pub fn unit_cost(&self) -> u64 {
        self.unit_cost
    }

    pub fn retail_price(&self) -> u64 {
        self.retail_price
    }

    pub fn location(&self) -> Option<&LocationParts> {
        self.location.as_ref()
    }

    pub fn picking_bin_location(&self) -> Option<&LocationParts> {
        self.picking_bin_location.as_ref()
    }

    pub fn vendor_id(&self) -> Option<VendorId> {
        self.vendor_id
    }

    pub fn auto_reorder_enabled(&self) -> bool {
        self.auto_reorder_enabled
    }

    pub fn auto_reorder_quantity(&self) -> i64 {
        self.auto_reorder_quantity
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Accept a quantity change, returning the updated record and the ledger
    /// entry that explains it.
    ///
    /// This is pure decision logic: the caller (the record store) is
    /// responsible for committing both results atomically. On any error the
    /// current record is untouched and no movement exists.
    pub fn apply_movement(&self, delta: &MovementDelta) -> DomainResult<(Self, StockMovement)> {
        if delta.amount <= 0 {
            return Err(DomainError::validation("movement amount must be positive"));
        }
        if delta.reason.trim().is_empty() {
            return Err(DomainError::validation("movement reason cannot be empty"));
        }

        let (picking_delta, overstock_delta) = match delta.kind {
            MovementKind::Add => match delta.bucket {
                Some(Bucket::PickingBin) => (delta.amount, 0),
                // Received goods land in bulk storage unless directed otherwise.
                Some(Bucket::Overstock) | None => (0, delta.amount),
            },
            MovementKind::Subtract => self.drain(delta.amount, delta.bucket)?,
        };

        let mut updated = self.clone();
        updated.picking_bin_quantity += picking_delta;
        updated.overstock_quantity += overstock_delta;
        updated.last_updated = delta.occurred_at;
        updated.version += 1;

        let movement = StockMovement {
            id: stockroom_core::MovementId::new(),
            org_id: self.org_id,
            item_id: self.id,
            kind: delta.kind,
            amount: delta.amount,
            old_quantity: self.quantity(),
            new_quantity: updated.quantity(),
            reason: delta.reason.clone(),
            actor_id: delta.actor_id,
            occurred_at: delta.occurred_at,
        };

        Ok((updated, movement))
    }

    /// Work out how a subtraction is split across the two buckets.
    ///
    /// Without an explicit bucket the picking bin drains first and overstock
    /// covers the remainder. Neither bucket may go negative.
    fn drain(&self, amount: i64, bucket: Option<Bucket>) -> DomainResult<(i64, i64)> {
        match bucket {
            Some(Bucket::PickingBin) => {
                if amount > self.picking_bin_quantity {
                    return Err(DomainError::insufficient_stock(
                        amount,
                        self.picking_bin_quantity,
                    ));
                }
                Ok((-amount, 0))
            }
            Some(Bucket::Overstock) => {
                if amount > self.overstock_quantity {
                    return Err(DomainError::insufficient_stock(
                        amount,
                        self.overstock_quantity,
                    ));
                }
                Ok((0, -amount))
            }
            None => {
                if amount > self.quantity() {
                    return Err(DomainError::insufficient_stock(amount, self.quantity()));
                }
                let from_picking = amount.min(self.picking_bin_quantity);
                let from_overstock = amount - from_picking;
                Ok((-from_picking, -from_overstock))
            }
        }
    }

    /// Apply a non-quantity update. Bumps `last_updated` and `version` but
    /// never writes a ledger entry.
    pub fn apply_update(
        &self,
        update: &ItemUpdate,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("name cannot be empty"));
            }
        }
        for (label, value) in [
            ("reorder_level", update.reorder_level),
            ("picking_reorder_level", update.picking_reorder_level),
            ("auto_reorder_quantity", update.auto_reorder_quantity),
        ] {
            if let Some(v) = value {
                if v < 0 {
                    return Err(DomainError::validation(format!(
                        "{label} cannot be negative"
                    )));
                }
            }
        }

        let mut updated = self.clone();
        if let Some(name) = &update.name {
            updated.name = name.clone();
        }
        if let Some(v) = update.reorder_level {
            updated.reorder_level = v;
        }
        if let Some(v) = update.picking_reorder_level {
            updated.picking_reorder_level = v;
        }
        if let Some(v) = update.unit_cost {
            updated.unit_cost = v;
        }
        if let Some(v) = update.retail_price {
            updated.retail_price = v;
        }
        if let Some(v) = &update.location {
            updated.location = Some(v.clone());
        }
        if let Some(v) = &update.picking_bin_location {
            updated.picking_bin_location = Some(v.clone());
        }
        if let Some(v) = update.vendor_id {
            updated.vendor_id = Some(v);
        }
        if let Some(v) = update.auto_reorder_enabled {
            updated.auto_reorder_enabled = v;
        }
        if let Some(v) = update.auto_reorder_quantity {
            updated.auto_reorder_quantity = v;
        }
        updated.last_updated = occurred_at;
        updated.version += 1;

        Ok(updated)
    }

    /// Adjust order-book commitments (stock promised to sales orders,
    /// stock expected from open purchase orders). No ledger entry: the
    /// physical quantity is unchanged.
    pub fn adjust_commitments(
        &self,
        committed_delta: i64,
        incoming_delta: i64,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let committed = self.committed_stock + committed_delta;
        let incoming = self.incoming_stock + incoming_delta;
        if committed < 0 {
            return Err(DomainError::invariant("committed stock cannot go negative"));
        }
        if incoming < 0 {
            return Err(DomainError::invariant("incoming stock cannot go negative"));
        }

        let mut updated = self.clone();
        updated.committed_stock = committed;
        updated.incoming_stock = incoming;
        updated.last_updated = occurred_at;
        updated.version += 1;
        Ok(updated)
    }

    /// Receive goods against an open purchase order: credit overstock and
    /// consume the incoming commitment in one transition, so downstream
    /// observers see a single change where quantity rose and incoming fell.
    ///
    /// Over-receipts (more units than were expected) clear the commitment
    /// to zero rather than failing; the goods are physically on the dock.
    pub fn receive(
        &self,
        amount: i64,
        reason: impl Into<String>,
        actor_id: stockroom_core::ActorId,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<(Self, StockMovement)> {
        let delta = MovementDelta {
            kind: MovementKind::Add,
            amount,
            bucket: Some(Bucket::Overstock),
            reason: reason.into(),
            actor_id,
            occurred_at,
        };
        let (mut updated, movement) = self.apply_movement(&delta)?;
        updated.incoming_stock = (updated.incoming_stock - amount).max(0);
        Ok((updated, movement))
    }
}
