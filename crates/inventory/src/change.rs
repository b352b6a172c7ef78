//! Change events fanned out to client projections.
//!
//! Every event carries the full post-image of the item rather than a delta,
//! so applying it is an idempotent replacement: the same event applied twice,
//! or events for different items applied in any order, converge to the same
//! projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{ItemId, OrgId};

use crate::item::InventoryItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Removed,
}

/// One observed transition of an inventory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChange {
    pub org_id: OrgId,
    pub item_id: ItemId,
    pub kind: ChangeKind,
    /// Version of the post-image (for removals, one past the last stored
    /// version). Per-item monotonic; the reconciler's staleness guard.
    pub version: u64,
    pub previous: Option<InventoryItem>,
    pub current: Option<InventoryItem>,
    pub occurred_at: DateTime<Utc>,
}

impl ItemChange {
    pub fn created(item: InventoryItem, occurred_at: DateTime<Utc>) -> Self {
        Self {
            org_id: item.org_id(),
            item_id: item.id(),
            kind: ChangeKind::Created,
            version: item.version(),
            previous: None,
            current: Some(item),
            occurred_at,
        }
    }

    pub fn updated(
        previous: InventoryItem,
        current: InventoryItem,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            org_id: current.org_id(),
            item_id: current.id(),
            kind: ChangeKind::Updated,
            version: current.version(),
            previous: Some(previous),
            current: Some(current),
            occurred_at,
        }
    }

    pub fn removed(previous: InventoryItem, occurred_at: DateTime<Utc>) -> Self {
        Self {
            org_id: previous.org_id(),
            item_id: previous.id(),
            kind: ChangeKind::Removed,
            version: previous.version() + 1,
            previous: Some(previous),
            current: None,
            occurred_at,
        }
    }
}
