//! Postgres-backed record store.
//!
//! Persists items, movements, and locations in PostgreSQL, enforcing the
//! single-writer-per-item model with row locks plus an expected-version
//! guard, and the ledger/item atomicity with one transaction per mutation.
//!
//! Storage shape follows the JSONB-payload convention: key and query
//! columns are extracted (`org_id`, `item_id`, `sku`, `version`,
//! `occurred_at`, `canonical`), the full record travels as JSONB. The
//! schema keeps two constraints the code relies on:
//!
//! - `UNIQUE (org_id, sku)` on `inventory_items` → [`StoreError::DuplicateSku`]
//! - `UNIQUE (org_id, canonical)` on `storage_locations` → upsert key
//!
//! ## Error mapping
//!
//! | PostgreSQL error | StoreError |
//! |------------------|------------|
//! | `23505` on the sku constraint | `DuplicateSku` |
//! | `23505` elsewhere, `40001` | `Domain(Conflict)` (retried once) |
//! | anything else | `Backend` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use stockroom_core::{ActorId, DomainError, DomainResult, ItemId, LocationId, OrgId};
use stockroom_inventory::{
    InventoryItem, ItemChange, ItemUpdate, MovementDelta, NewItem, StockMovement,
};
use stockroom_location::{Location, LocationParts};
use stockroom_realtime::{ChangeFeed, SnapshotSource};

use crate::error::StoreError;
use crate::record_store::RecordStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS inventory_items (
    org_id UUID NOT NULL,
    item_id UUID NOT NULL,
    sku TEXT NOT NULL,
    version BIGINT NOT NULL,
    record JSONB NOT NULL,
    last_updated TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (org_id, item_id),
    CONSTRAINT inventory_items_org_sku_key UNIQUE (org_id, sku)
);

CREATE TABLE IF NOT EXISTS stock_movements (
    movement_id UUID PRIMARY KEY,
    org_id UUID NOT NULL,
    item_id UUID NOT NULL,
    occurred_at TIMESTAMPTZ NOT NULL,
    entry JSONB NOT NULL
);

CREATE INDEX IF NOT EXISTS stock_movements_by_item
    ON stock_movements (org_id, item_id, occurred_at DESC);

CREATE TABLE IF NOT EXISTS storage_locations (
    location_id UUID PRIMARY KEY,
    org_id UUID NOT NULL,
    canonical TEXT NOT NULL,
    record JSONB NOT NULL,
    CONSTRAINT storage_locations_org_canonical_key UNIQUE (org_id, canonical)
);
"#;

/// Postgres-backed implementation of [`RecordStore`].
///
/// Change events are published to the injected feed strictly after the
/// transaction commits. All async methods are inherent; the sync
/// [`RecordStore`] impl bridges onto the ambient tokio runtime.
pub struct PostgresRecordStore<F> {
    pool: Arc<PgPool>,
    feed: F,
}

impl<F> PostgresRecordStore<F>
where
    F: ChangeFeed<ItemChange>,
{
    pub fn new(pool: PgPool, feed: F) -> Self {
        Self {
            pool: Arc::new(pool),
            feed,
        }
    }

    /// Create the tables and indexes this store relies on (idempotent).
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(map_sqlx)?;
        }
        Ok(())
    }

    fn publish(&self, change: ItemChange) -> Result<(), StoreError> {
        self.feed
            .publish(change)
            .map_err(|e| StoreError::Publish(format!("{e:?}")))
    }

    pub async fn create_item_async(&self, new: NewItem) -> Result<InventoryItem, StoreError> {
        let item = InventoryItem::create(new)?;
        let record = to_json(&item)?;

        sqlx::query(
            "INSERT INTO inventory_items (org_id, item_id, sku, version, record, last_updated) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(*item.org_id().as_uuid())
        .bind(*item.id().as_uuid())
        .bind(item.sku())
        .bind(item.version() as i64)
        .bind(&record)
        .bind(item.last_updated())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_insert_item(e, item.sku()))?;

        tracing::info!(org_id = %item.org_id(), item_id = %item.id(), sku = item.sku(), "item created");
        self.publish(ItemChange::created(item.clone(), item.last_updated()))?;
        Ok(item)
    }

    pub async fn get_item_async(
        &self,
        org_id: OrgId,
        item_id: ItemId,
    ) -> Result<InventoryItem, StoreError> {
        let row = sqlx::query(
            "SELECT record FROM inventory_items WHERE org_id = $1 AND item_id = $2",
        )
        .bind(*org_id.as_uuid())
        .bind(*item_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx)?;

        match row {
            Some(row) => item_from_row(&row),
            None => Err(DomainError::NotFound.into()),
        }
    }

    pub async fn list_items_async(&self, org_id: OrgId) -> Result<Vec<InventoryItem>, StoreError> {
        let rows = sqlx::query(
            "SELECT record FROM inventory_items WHERE org_id = $1 ORDER BY sku",
        )
        .bind(*org_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(item_from_row).collect()
    }

    /// Read-compute-commit under a row lock, with one internal retry on a
    /// lost race (the lock makes races rare; the retry covers serialization
    /// failures and guards against buggy backends).
    async fn mutate(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        op: &dyn Fn(&InventoryItem) -> Result<(InventoryItem, Option<StockMovement>), StoreError>,
    ) -> Result<(InventoryItem, Option<StockMovement>), StoreError> {
        match self.try_mutate(org_id, item_id, op).await {
            Err(e) if e.is_conflict() => {
                tracing::warn!(%org_id, %item_id, "write lost a race, retrying once");
                self.try_mutate(org_id, item_id, op).await
            }
            other => other,
        }
    }

    async fn try_mutate(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        op: &dyn Fn(&InventoryItem) -> Result<(InventoryItem, Option<StockMovement>), StoreError>,
    ) -> Result<(InventoryItem, Option<StockMovement>), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let previous = load_item_for_update(&mut tx, org_id, item_id).await?;
        let (updated, movement) = op(&previous)?;

        let result = sqlx::query(
            "UPDATE inventory_items \
             SET version = $1, record = $2, last_updated = $3 \
             WHERE org_id = $4 AND item_id = $5 AND version = $6",
        )
        .bind(updated.version() as i64)
        .bind(to_json(&updated)?)
        .bind(updated.last_updated())
        .bind(*org_id.as_uuid())
        .bind(*item_id.as_uuid())
        .bind(previous.version() as i64)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::conflict(format!(
                "item {item_id} moved past version {}",
                previous.version()
            ))
            .into());
        }

        if let Some(movement) = &movement {
            movement.verify()?;
            sqlx::query(
                "INSERT INTO stock_movements (movement_id, org_id, item_id, occurred_at, entry) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(*movement.id.as_uuid())
            .bind(*movement.org_id.as_uuid())
            .bind(*movement.item_id.as_uuid())
            .bind(movement.occurred_at)
            .bind(to_json(movement)?)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;

        self.publish(ItemChange::updated(
            previous,
            updated.clone(),
            updated.last_updated(),
        ))?;
        Ok((updated, movement))
    }

    pub async fn apply_movement_async(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        delta: &MovementDelta,
    ) -> Result<(InventoryItem, StockMovement), StoreError> {
        let (item, movement) = self
            .mutate(org_id, item_id, &|current| {
                let (updated, movement) = current.apply_movement(delta)?;
                Ok((updated, Some(movement)))
            })
            .await?;
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

    pub async fn update_item_async(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        update: &ItemUpdate,
        occurred_at: DateTime<Utc>,
    ) -> Result<InventoryItem, StoreError> {
        let (item, _) = self
            .mutate(org_id, item_id, &|current| {
                Ok((current.apply_update(update, occurred_at)?, None))
            })
            .await?;
        Ok(item)
    }

    pub async fn adjust_commitments_async(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        committed_delta: i64,
        incoming_delta: i64,
        occurred_at: DateTime<Utc>,
    ) -> Result<InventoryItem, StoreError> {
        let (item, _) = self
            .mutate(org_id, item_id, &|current| {
                Ok((
                    current.adjust_commitments(committed_delta, incoming_delta, occurred_at)?,
                    None,
                ))
            })
            .await?;
        Ok(item)
    }

    pub async fn receive_draft_async(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        amount: i64,
        actor_id: ActorId,
        occurred_at: DateTime<Utc>,
    ) -> Result<(InventoryItem, StockMovement), StoreError> {
        let (item, movement) = self
            .mutate(org_id, item_id, &|current| {
                let (updated, movement) =
                    current.receive(amount, "purchase order receipt", actor_id, occurred_at)?;
                Ok((updated, Some(movement)))
            })
            .await?;
        let movement = movement.ok_or_else(|| {
            StoreError::Backend("movement missing after receive commit".to_string())
        })?;
        Ok((item, movement))
    }

    pub async fn delete_item_async(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let removed = load_item_for_update(&mut tx, org_id, item_id).await?;

        sqlx::query("DELETE FROM inventory_items WHERE org_id = $1 AND item_id = $2")
            .bind(*org_id.as_uuid())
            .bind(*item_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        self.publish(ItemChange::removed(removed, occurred_at))
    }

    pub async fn upsert_location_async(
        &self,
        org_id: OrgId,
        parts: LocationParts,
        name: Option<String>,
        color: Option<String>,
    ) -> Result<Location, StoreError> {
        let canonical = parts.build();
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let existing = sqlx::query(
            "SELECT record FROM storage_locations \
             WHERE org_id = $1 AND canonical = $2 FOR UPDATE",
        )
        .bind(*org_id.as_uuid())
        .bind(&canonical)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let record = match existing {
            Some(row) => {
                let current: Location = from_json(row.try_get("record").map_err(map_sqlx)?)?;
                Location::new(
                    current.id(),
                    org_id,
                    parts,
                    name.or_else(|| current.name().map(String::from)),
                    color.or_else(|| current.color().map(String::from)),
                )
            }
            None => Location::new(LocationId::new(), org_id, parts, name, color),
        };

        sqlx::query(
            "INSERT INTO storage_locations (location_id, org_id, canonical, record) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT ON CONSTRAINT storage_locations_org_canonical_key \
             DO UPDATE SET record = EXCLUDED.record",
        )
        .bind(*record.id().as_uuid())
        .bind(*org_id.as_uuid())
        .bind(&canonical)
        .bind(to_json(&record)?)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(record)
    }

    pub async fn list_locations_async(&self, org_id: OrgId) -> Result<Vec<Location>, StoreError> {
        let rows = sqlx::query(
            "SELECT record FROM storage_locations WHERE org_id = $1 ORDER BY canonical",
        )
        .bind(*org_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| from_json(row.try_get("record").map_err(map_sqlx)?))
            .collect()
    }

    pub async fn list_movements_async(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query(
            "SELECT entry FROM stock_movements \
             WHERE org_id = $1 AND item_id = $2 \
               AND ($3::timestamptz IS NULL OR occurred_at >= $3) \
             ORDER BY occurred_at DESC",
        )
        .bind(*org_id.as_uuid())
        .bind(*item_id.as_uuid())
        .bind(since)
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| from_json(row.try_get("entry").map_err(map_sqlx)?))
            .collect()
    }

    /// Bridge a sync trait call onto the ambient tokio runtime.
    fn block_on<T>(
        &self,
        future: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| StoreError::Backend("no tokio runtime available".to_string()))?;
        handle.block_on(future)
    }
}

impl<F> RecordStore for PostgresRecordStore<F>
where
    F: ChangeFeed<ItemChange>,
{
    fn create_item(&self, new: NewItem) -> Result<InventoryItem, StoreError> {
        self.block_on(self.create_item_async(new))
    }

    fn update_item(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        update: &ItemUpdate,
        occurred_at: DateTime<Utc>,
    ) -> Result<InventoryItem, StoreError> {
        self.block_on(self.update_item_async(org_id, item_id, update, occurred_at))
    }

    fn apply_movement(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        delta: &MovementDelta,
    ) -> Result<(InventoryItem, StockMovement), StoreError> {
        self.block_on(self.apply_movement_async(org_id, item_id, delta))
    }

    fn adjust_commitments(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        committed_delta: i64,
        incoming_delta: i64,
        occurred_at: DateTime<Utc>,
    ) -> Result<InventoryItem, StoreError> {
        self.block_on(self.adjust_commitments_async(
            org_id,
            item_id,
            committed_delta,
            incoming_delta,
            occurred_at,
        ))
    }

    fn receive_draft(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        amount: i64,
        actor_id: ActorId,
        occurred_at: DateTime<Utc>,
    ) -> Result<(InventoryItem, StockMovement), StoreError> {
        self.block_on(self.receive_draft_async(org_id, item_id, amount, actor_id, occurred_at))
    }

    fn delete_item(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.block_on(self.delete_item_async(org_id, item_id, occurred_at))
    }

    fn get_item(&self, org_id: OrgId, item_id: ItemId) -> Result<InventoryItem, StoreError> {
        self.block_on(self.get_item_async(org_id, item_id))
    }

    fn list_items(&self, org_id: OrgId) -> Result<Vec<InventoryItem>, StoreError> {
        self.block_on(self.list_items_async(org_id))
    }

    fn upsert_location(
        &self,
        org_id: OrgId,
        parts: LocationParts,
        name: Option<String>,
        color: Option<String>,
    ) -> Result<Location, StoreError> {
        self.block_on(self.upsert_location_async(org_id, parts, name, color))
    }

    fn list_locations(&self, org_id: OrgId) -> Result<Vec<Location>, StoreError> {
        self.block_on(self.list_locations_async(org_id))
    }

    fn list_movements(
        &self,
        org_id: OrgId,
        item_id: ItemId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        self.block_on(self.list_movements_async(org_id, item_id, since))
    }
}

impl<F> SnapshotSource for PostgresRecordStore<F>
where
    F: ChangeFeed<ItemChange>,
{
    fn snapshot(&self, org_id: OrgId) -> DomainResult<Vec<InventoryItem>> {
        self.list_items(org_id)
            .map_err(|e| DomainError::conflict(format!("snapshot failed: {e}")))
    }
}

async fn load_item_for_update(
    tx: &mut Transaction<'_, Postgres>,
    org_id: OrgId,
    item_id: ItemId,
) -> Result<InventoryItem, StoreError> {
    let row = sqlx::query(
        "SELECT record FROM inventory_items \
         WHERE org_id = $1 AND item_id = $2 FOR UPDATE",
    )
    .bind(*org_id.as_uuid())
    .bind(*item_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_sqlx)?;

    match row {
        Some(row) => item_from_row(&row),
        None => Err(DomainError::NotFound.into()),
    }
}

fn item_from_row(row: &PgRow) -> Result<InventoryItem, StoreError> {
    from_json(row.try_get("record").map_err(map_sqlx)?)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<JsonValue, StoreError> {
    serde_json::to_value(value)
        .map_err(|e| StoreError::Backend(format!("record serialization failed: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(value: JsonValue) -> Result<T, StoreError> {
    serde_json::from_value(value)
        .map_err(|e| StoreError::Backend(format!("record deserialization failed: {e}")))
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        let code = db.code().map(|c| c.to_string()).unwrap_or_default();
        if code == "23505" || code == "40001" {
            return DomainError::conflict(db.to_string()).into();
        }
    }
    StoreError::Backend(e.to_string())
}

fn map_insert_item(e: sqlx::Error, sku: &str) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if db.constraint() == Some("inventory_items_org_sku_key") {
            return StoreError::DuplicateSku(sku.to_string());
        }
    }
    map_sqlx(e)
}
