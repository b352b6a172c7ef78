//! Contracts for the external collaborators the engine talks to.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockroom_core::{DraftId, ItemId, OrgId, VendorId};

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The order subsystem refused the draft.
    #[error("draft rejected: {0}")]
    Rejected(String),

    /// The order subsystem could not be reached; the caller may retry.
    #[error("order subsystem unavailable: {0}")]
    Unavailable(String),
}

/// The order subsystem's inbound surface.
pub trait OrderGateway: Send + Sync {
    fn create_purchase_draft(
        &self,
        org_id: OrgId,
        vendor_id: VendorId,
        item_id: ItemId,
        quantity: i64,
        unit_cost: u64,
    ) -> Result<DraftId, GatewayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockAlertKind {
    LowStock,
    OutOfStock,
    ReplenishmentCreated,
}

/// Outbound notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    pub org_id: OrgId,
    pub item_id: ItemId,
    pub kind: StockAlertKind,
    pub message: String,
}

/// The notification subsystem's inbound surface. Delivery is best-effort;
/// the engine never blocks stock decisions on it.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, alert: StockAlert);
}

/// Draft as recorded by the in-memory gateway (tests/dev).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftRecord {
    pub draft_id: DraftId,
    pub org_id: OrgId,
    pub vendor_id: VendorId,
    pub item_id: ItemId,
    pub quantity: i64,
    pub unit_cost: u64,
}

/// In-memory order gateway for tests/dev. `fail_next` makes the next call
/// fail with `Unavailable`, for exercising the retry-after-crash path.
#[derive(Debug, Default)]
pub struct InMemoryOrderGateway {
    drafts: Mutex<Vec<DraftRecord>>,
    fail_next: AtomicBool,
}

impl InMemoryOrderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn drafts(&self) -> Vec<DraftRecord> {
        self.drafts.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl OrderGateway for InMemoryOrderGateway {
    fn create_purchase_draft(
        &self,
        org_id: OrgId,
        vendor_id: VendorId,
        item_id: ItemId,
        quantity: i64,
        unit_cost: u64,
    ) -> Result<DraftId, GatewayError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("injected failure".to_string()));
        }

        let record = DraftRecord {
            draft_id: DraftId::new(),
            org_id,
            vendor_id,
            item_id,
            quantity,
            unit_cost,
        };
        let draft_id = record.draft_id;
        self.drafts
            .lock()
            .map_err(|_| GatewayError::Unavailable("lock poisoned".to_string()))?
            .push(record);
        Ok(draft_id)
    }
}

/// In-memory notification sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    alerts: Mutex<Vec<StockAlert>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<StockAlert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn notify(&self, alert: StockAlert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert);
        }
    }
}
