//! Stock movements: the append-only explanation of every quantity change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{ActorId, DomainError, DomainResult, ItemId, MovementId, OrgId};

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Add,
    Subtract,
}

/// Which quantity bucket a movement targets.
///
/// When absent on a [`MovementDelta`], subtractions drain the picking bin
/// first and spill the remainder into overstock; additions credit overstock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    PickingBin,
    Overstock,
}

/// A requested quantity change, before the item has accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDelta {
    pub kind: MovementKind,
    /// Units moved; must be strictly positive.
    pub amount: i64,
    pub bucket: Option<Bucket>,
    pub reason: String,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Immutable ledger entry bracketing one quantity change.
///
/// `old_quantity` and `new_quantity` snapshot the item's **total** quantity
/// around the movement, so replaying entries for an item from any checkpoint
/// reconstructs its quantity history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub org_id: OrgId,
    pub item_id: ItemId,
    pub kind: MovementKind,
    pub amount: i64,
    pub old_quantity: i64,
    pub new_quantity: i64,
    pub reason: String,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovement {
    /// Check the bracketing law: `new = old + amount` for adds,
    /// `new = old - amount` for subtracts, with a positive amount.
    pub fn verify(&self) -> DomainResult<()> {
        if self.amount <= 0 {
            return Err(DomainError::invariant("movement amount must be positive"));
        }
        let expected = match self.kind {
            MovementKind::Add => self.old_quantity + self.amount,
            MovementKind::Subtract => self.old_quantity - self.amount,
        };
        if self.new_quantity != expected {
            return Err(DomainError::invariant(format!(
                "movement snapshots do not bracket the change (old={}, amount={}, new={})",
                self.old_quantity, self.amount, self.new_quantity
            )));
        }
        Ok(())
    }
}
