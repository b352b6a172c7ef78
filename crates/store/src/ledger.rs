//! Append-only stock-movement ledger.
//!
//! The ledger is the sole source of truth for *why* a quantity is what it
//! is: replaying an item's movements from any checkpoint must reconstruct
//! its quantity history. Entries are immutable; there is no update or
//! delete. Only the record store appends, and it does so in the same
//! transaction as the item write.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use stockroom_core::{ItemId, MovementId, OrgId};
use stockroom_inventory::StockMovement;

use crate::error::StoreError;

/// Append-only, organization-scoped movement log.
pub trait MovementLedger: Send + Sync {
    /// Append one movement. The entry must already satisfy the bracketing
    /// law (`StockMovement::verify`); implementations reject entries that
    /// do not.
    fn append(&self, movement: &StockMovement) -> Result<MovementId, StoreError>;

    /// Movements for one item, newest first, optionally bounded to entries
    /// at or after `since`. Re-querying returns a consistent prefix plus any
    /// new entries (restartable).
    fn list_by_item(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StockMovement>, StoreError>;
}

impl<L> MovementLedger for Arc<L>
where
    L: MovementLedger + ?Sized,
{
    fn append(&self, movement: &StockMovement) -> Result<MovementId, StoreError> {
        (**self).append(movement)
    }

    fn list_by_item(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).list_by_item(org_id, item_id, since)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    org_id: OrgId,
    item_id: ItemId,
}

/// In-memory ledger for tests/dev. Entries are held in append order per
/// item stream and reversed on query.
#[derive(Debug, Default)]
pub struct InMemoryMovementLedger {
    streams: RwLock<HashMap<StreamKey, Vec<StockMovement>>>,
}

impl InMemoryMovementLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MovementLedger for InMemoryMovementLedger {
    fn append(&self, movement: &StockMovement) -> Result<MovementId, StoreError> {
        movement.verify()?;

        let mut streams = self
            .streams
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        let key = StreamKey {
            org_id: movement.org_id,
            item_id: movement.item_id,
        };
        streams.entry(key).or_default().push(movement.clone());

        Ok(movement.id)
    }

    fn list_by_item(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        let key = StreamKey { org_id, item_id };
        let mut movements: Vec<StockMovement> = streams
            .get(&key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|m| since.map_or(true, |s| m.occurred_at >= s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        movements.reverse();
        Ok(movements)
    }
}
