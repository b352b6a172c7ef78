//! The replenishment decision engine.

use thiserror::Error;

use stockroom_core::{DomainError, DraftId, OrgId};
use stockroom_inventory::{InventoryItem, StockStatus};
use stockroom_realtime::AppliedChange;

use crate::episode::{EpisodeStore, ReplenishmentEpisode};
use crate::gateway::{NotificationSink, OrderGateway, StockAlert, StockAlertKind};

#[derive(Debug, Error)]
pub enum ReplenishError {
    /// Deterministic domain failure (`VendorMissing` propagates to the
    /// operator; the episode is not opened so the item is re-evaluated).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Draft emission failed after the episode was opened; the emission is
    /// retried on the next evaluation, never duplicated.
    #[error("draft emission failed: {0}")]
    Gateway(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AutoReorderDisabled,
    StockHealthy,
    NoReorderQuantity,
}

/// What the engine decided for one item evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    /// An episode is already open with its draft emitted; the dedup gate.
    EpisodeOpen,
    DraftCreated { draft_id: DraftId, quantity: i64 },
}

/// Everything that happened while reacting to one reconciled change.
#[derive(Debug, Default)]
pub struct Reaction {
    pub alert: Option<StockAlertKind>,
    pub episode_closed: bool,
    pub outcome: Option<Outcome>,
}

/// Evaluates reconciled state changes against each item's reorder policy.
///
/// The engine never mutates inventory records; it only reads them and
/// writes episode guards and purchase drafts. Items are evaluated
/// independently: no joint snapshot across items is ever assumed.
pub struct ReplenishmentEngine<G, N, E> {
    gateway: G,
    notifier: N,
    episodes: E,
}

impl<G, N, E> ReplenishmentEngine<G, N, E>
where
    G: OrderGateway,
    N: NotificationSink,
    E: EpisodeStore,
{
    pub fn new(gateway: G, notifier: N, episodes: E) -> Self {
        Self {
            gateway,
            notifier,
            episodes,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn episodes(&self) -> &E {
        &self.episodes
    }

    /// React to one reconciled change: emit status alerts, close the
    /// episode if this change is the awaited receive, then re-evaluate the
    /// reorder rule for the item.
    pub fn observe(&self, change: &AppliedChange) -> Result<Reaction, ReplenishError> {
        match change {
            AppliedChange::Stale { .. } => Ok(Reaction::default()),
            AppliedChange::Fresh {
                item_id,
                previous,
                current: None,
            } => {
                // Item removed; any open episode is moot.
                let episode_closed = previous
                    .as_ref()
                    .map(|p| self.episodes.close(p.org_id(), *item_id).is_some())
                    .unwrap_or(false);
                Ok(Reaction {
                    episode_closed,
                    ..Reaction::default()
                })
            }
            AppliedChange::Fresh {
                previous,
                current: Some(current),
                ..
            } => {
                let alert = self.status_alert(previous.as_ref(), current);
                let episode_closed = self.close_on_receive(previous.as_ref(), current);
                let outcome = self.evaluate(current)?;
                Ok(Reaction {
                    alert,
                    episode_closed,
                    outcome: Some(outcome),
                })
            }
        }
    }

    /// Evaluate the reorder rule for one item.
    ///
    /// Trigger iff auto-reorder is enabled, the quantity is at or below the
    /// reorder level, and no episode is open. The episode is opened
    /// *before* the draft is emitted: a crash between the two leaves an
    /// open episode without a draft id, which retries emission on the next
    /// evaluation.
    pub fn evaluate(&self, item: &InventoryItem) -> Result<Outcome, ReplenishError> {
        if !item.auto_reorder_enabled() {
            return Ok(Outcome::Skipped(SkipReason::AutoReorderDisabled));
        }
        if item.quantity() > item.reorder_level() {
            return Ok(Outcome::Skipped(SkipReason::StockHealthy));
        }

        if let Some(episode) = self.episodes.get(item.org_id(), item.id()) {
            if episode.draft_id.is_some() {
                return Ok(Outcome::EpisodeOpen);
            }
            // Opened but never emitted (interrupted earlier); retry.
            return self.emit_draft(item);
        }

        if item.vendor_id().is_none() {
            tracing::warn!(
                org_id = %item.org_id(),
                item_id = %item.id(),
                sku = item.sku(),
                "auto-reorder triggered but no vendor is assigned"
            );
            self.notifier.notify(StockAlert {
                org_id: item.org_id(),
                item_id: item.id(),
                kind: depletion_kind(item.status()),
                message: format!(
                    "auto-reorder for '{}' skipped: no vendor assigned",
                    item.sku()
                ),
            });
            return Err(DomainError::VendorMissing.into());
        }
        if item.auto_reorder_quantity() <= 0 {
            tracing::warn!(
                org_id = %item.org_id(),
                item_id = %item.id(),
                "auto-reorder enabled with no reorder quantity"
            );
            return Ok(Outcome::Skipped(SkipReason::NoReorderQuantity));
        }

        self.episodes.open(
            item.org_id(),
            ReplenishmentEpisode {
                item_id: item.id(),
                opened_at: item.last_updated(),
                draft_id: None,
                deficit_at_open: item.quantity(),
            },
        );
        self.emit_draft(item)
    }

    /// Explicit cancellation from the order subsystem: closes the episode
    /// carrying the draft so the next evaluation may reorder.
    pub fn handle_draft_cancelled(&self, org_id: OrgId, draft_id: DraftId) -> bool {
        match self.episodes.find_by_draft(org_id, draft_id) {
            Some(item_id) => {
                let closed = self.episodes.close(org_id, item_id).is_some();
                if closed {
                    tracing::info!(%org_id, %item_id, %draft_id, "episode closed by cancellation");
                }
                closed
            }
            None => false,
        }
    }

    fn emit_draft(&self, item: &InventoryItem) -> Result<Outcome, ReplenishError> {
        let vendor_id = item.vendor_id().ok_or(DomainError::VendorMissing)?;
        let quantity = item.auto_reorder_quantity();

        let draft_id = self
            .gateway
            .create_purchase_draft(item.org_id(), vendor_id, item.id(), quantity, item.unit_cost())
            .map_err(|e| ReplenishError::Gateway(e.to_string()))?;

        self.episodes
            .record_draft(item.org_id(), item.id(), draft_id);
        self.notifier.notify(StockAlert {
            org_id: item.org_id(),
            item_id: item.id(),
            kind: StockAlertKind::ReplenishmentCreated,
            message: format!("purchase draft for {quantity} x '{}' created", item.sku()),
        });
        tracing::info!(
            org_id = %item.org_id(),
            item_id = %item.id(),
            %draft_id,
            quantity,
            "purchase draft emitted"
        );
        Ok(Outcome::DraftCreated { draft_id, quantity })
    }

    /// An episode closes when the awaited goods arrive: incoming stock
    /// fell while the quantity rose in the same reconciled transition.
    fn close_on_receive(
        &self,
        previous: Option<&InventoryItem>,
        current: &InventoryItem,
    ) -> bool {
        let Some(previous) = previous else {
            return false;
        };
        let received = current.incoming_stock() < previous.incoming_stock()
            && current.quantity() > previous.quantity();
        if !received {
            return false;
        }
        match self.episodes.close(current.org_id(), current.id()) {
            Some(_) => {
                tracing::info!(
                    org_id = %current.org_id(),
                    item_id = %current.id(),
                    "episode closed by receipt"
                );
                true
            }
            None => false,
        }
    }

    /// Alert when an item enters a worse (non-InStock) status than the one
    /// this client had reconciled before.
    fn status_alert(
        &self,
        previous: Option<&InventoryItem>,
        current: &InventoryItem,
    ) -> Option<StockAlertKind> {
        let previous_status = previous?.status();
        let current_status = current.status();
        if current_status == previous_status || current_status == StockStatus::InStock {
            return None;
        }

        let kind = depletion_kind(current_status);
        self.notifier.notify(StockAlert {
            org_id: current.org_id(),
            item_id: current.id(),
            kind,
            message: match kind {
                StockAlertKind::OutOfStock => format!("'{}' is out of stock", current.sku()),
                _ => format!(
                    "'{}' is low on stock ({} left)",
                    current.sku(),
                    current.quantity()
                ),
            },
        });
        Some(kind)
    }
}

fn depletion_kind(status: StockStatus) -> StockAlertKind {
    match status {
        StockStatus::OutOfStock => StockAlertKind::OutOfStock,
        _ => StockAlertKind::LowStock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockroom_core::{ActorId, ItemId, VendorId};
    use stockroom_inventory::{
        Bucket, InventoryItem, ItemUpdate, MovementDelta, MovementKind, NewItem,
    };

    use crate::episode::InMemoryEpisodeStore;
    use crate::gateway::{InMemoryNotificationSink, InMemoryOrderGateway};

    type TestEngine =
        ReplenishmentEngine<InMemoryOrderGateway, InMemoryNotificationSink, InMemoryEpisodeStore>;

    fn test_engine() -> TestEngine {
        ReplenishmentEngine::new(
            InMemoryOrderGateway::new(),
            InMemoryNotificationSink::new(),
            InMemoryEpisodeStore::new(),
        )
    }

    /// Item with quantity 0, reorder level 5, auto-reorder 20 units,
    /// vendor assigned, unit cost 150.
    fn depleted_item(org_id: OrgId) -> InventoryItem {
        InventoryItem::create(NewItem {
            org_id,
            item_id: ItemId::new(),
            sku: "SKU-001".to_string(),
            name: "Widget".to_string(),
            occurred_at: Utc::now(),
        })
        .unwrap()
        .apply_update(
            &ItemUpdate {
                reorder_level: Some(5),
                unit_cost: Some(150),
                vendor_id: Some(VendorId::new()),
                auto_reorder_enabled: Some(true),
                auto_reorder_quantity: Some(20),
                ..ItemUpdate::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn with_stock(item: &InventoryItem, amount: i64) -> InventoryItem {
        item.apply_movement(&MovementDelta {
            kind: MovementKind::Add,
            amount,
            bucket: Some(Bucket::Overstock),
            reason: "stock".to_string(),
            actor_id: ActorId::new(),
            occurred_at: Utc::now(),
        })
        .unwrap()
        .0
    }

    #[test]
    fn sustained_depletion_yields_exactly_one_draft() {
        let engine = test_engine();
        let item = depleted_item(OrgId::new());

        let first = engine.evaluate(&item).unwrap();
        match first {
            Outcome::DraftCreated { quantity, .. } => assert_eq!(quantity, 20),
            other => panic!("expected DraftCreated, got {other:?}"),
        }

        // The same depletion is observed again before the episode closes.
        assert_eq!(engine.evaluate(&item).unwrap(), Outcome::EpisodeOpen);
        assert_eq!(engine.evaluate(&item).unwrap(), Outcome::EpisodeOpen);
        assert_eq!(engine.gateway.drafts().len(), 1);
        assert_eq!(engine.gateway.drafts()[0].unit_cost, 150);
    }

    #[test]
    fn disabled_or_healthy_items_are_skipped() {
        let engine = test_engine();
        let org_id = OrgId::new();

        let disabled = depleted_item(org_id)
            .apply_update(
                &ItemUpdate {
                    auto_reorder_enabled: Some(false),
                    ..ItemUpdate::default()
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(
            engine.evaluate(&disabled).unwrap(),
            Outcome::Skipped(SkipReason::AutoReorderDisabled)
        );

        let healthy = with_stock(&depleted_item(org_id), 50);
        assert_eq!(
            engine.evaluate(&healthy).unwrap(),
            Outcome::Skipped(SkipReason::StockHealthy)
        );
        assert!(engine.gateway.drafts().is_empty());
    }

    #[test]
    fn missing_vendor_is_reported_and_leaves_no_episode() {
        let engine = test_engine();
        let org_id = OrgId::new();
        let item = InventoryItem::create(NewItem {
            org_id,
            item_id: ItemId::new(),
            sku: "SKU-002".to_string(),
            name: "Gadget".to_string(),
            occurred_at: Utc::now(),
        })
        .unwrap()
        .apply_update(
            &ItemUpdate {
                reorder_level: Some(5),
                auto_reorder_enabled: Some(true),
                auto_reorder_quantity: Some(10),
                ..ItemUpdate::default()
            },
            Utc::now(),
        )
        .unwrap();

        let err = engine.evaluate(&item).unwrap_err();
        assert!(matches!(
            err,
            ReplenishError::Domain(DomainError::VendorMissing)
        ));
        assert!(engine.episodes.get(org_id, item.id()).is_none());
        assert_eq!(engine.notifier.alerts().len(), 1);

        // Once a vendor is assigned the next evaluation reorders.
        let with_vendor = item
            .apply_update(
                &ItemUpdate {
                    vendor_id: Some(VendorId::new()),
                    ..ItemUpdate::default()
                },
                Utc::now(),
            )
            .unwrap();
        assert!(matches!(
            engine.evaluate(&with_vendor).unwrap(),
            Outcome::DraftCreated { .. }
        ));
    }

    #[test]
    fn interrupted_emission_is_retried_not_duplicated() {
        let engine = test_engine();
        let item = depleted_item(OrgId::new());

        engine.gateway.fail_next();
        let err = engine.evaluate(&item).unwrap_err();
        assert!(matches!(err, ReplenishError::Gateway(_)));

        // Episode is open with no draft recorded: the guard survives the
        // interruption.
        let episode = engine.episodes.get(item.org_id(), item.id()).unwrap();
        assert!(episode.draft_id.is_none());

        // Next evaluation retries the emission exactly once.
        assert!(matches!(
            engine.evaluate(&item).unwrap(),
            Outcome::DraftCreated { .. }
        ));
        assert_eq!(engine.evaluate(&item).unwrap(), Outcome::EpisodeOpen);
        assert_eq!(engine.gateway.drafts().len(), 1);
    }

    #[test]
    fn receipt_closes_the_episode_and_a_new_depletion_reorders() {
        let engine = test_engine();
        let item = depleted_item(OrgId::new());

        engine.evaluate(&item).unwrap();
        assert!(engine.episodes.get(item.org_id(), item.id()).is_some());

        // The awaited receive: incoming fell while quantity rose.
        let expecting = item.adjust_commitments(0, 20, Utc::now()).unwrap();
        let (received, _) = expecting
            .receive(20, "po receipt", ActorId::new(), Utc::now())
            .unwrap();
        let reaction = engine
            .observe(&AppliedChange::Fresh {
                item_id: item.id(),
                previous: Some(expecting),
                current: Some(received.clone()),
            })
            .unwrap();
        assert!(reaction.episode_closed);
        assert_eq!(reaction.outcome, Some(Outcome::Skipped(SkipReason::StockHealthy)));

        // A fresh depletion episode produces a second draft.
        let depleted_again = received
            .apply_movement(&MovementDelta {
                kind: MovementKind::Subtract,
                amount: 20,
                bucket: None,
                reason: "picked".to_string(),
                actor_id: ActorId::new(),
                occurred_at: Utc::now(),
            })
            .unwrap()
            .0;
        assert!(matches!(
            engine.evaluate(&depleted_again).unwrap(),
            Outcome::DraftCreated { .. }
        ));
        assert_eq!(engine.gateway.drafts().len(), 2);
    }

    #[test]
    fn cancellation_reopens_eligibility() {
        let engine = test_engine();
        let item = depleted_item(OrgId::new());

        let draft_id = match engine.evaluate(&item).unwrap() {
            Outcome::DraftCreated { draft_id, .. } => draft_id,
            other => panic!("expected DraftCreated, got {other:?}"),
        };

        assert!(engine.handle_draft_cancelled(item.org_id(), draft_id));
        assert!(engine.episodes.get(item.org_id(), item.id()).is_none());

        // Unknown drafts are a no-op.
        assert!(!engine.handle_draft_cancelled(item.org_id(), DraftId::new()));

        assert!(matches!(
            engine.evaluate(&item).unwrap(),
            Outcome::DraftCreated { .. }
        ));
    }

    #[test]
    fn zero_reorder_quantity_is_skipped_without_an_episode() {
        let engine = test_engine();
        let item = depleted_item(OrgId::new())
            .apply_update(
                &ItemUpdate {
                    auto_reorder_quantity: Some(0),
                    ..ItemUpdate::default()
                },
                Utc::now(),
            )
            .unwrap();

        assert_eq!(
            engine.evaluate(&item).unwrap(),
            Outcome::Skipped(SkipReason::NoReorderQuantity)
        );
        assert!(engine.episodes.get(item.org_id(), item.id()).is_none());
    }

    #[test]
    fn entering_a_depleted_status_raises_one_alert() {
        let engine = test_engine();
        let healthy = with_stock(&depleted_item(OrgId::new()), 50);
        let (low, _) = healthy
            .apply_movement(&MovementDelta {
                kind: MovementKind::Subtract,
                amount: 46,
                bucket: None,
                reason: "picked".to_string(),
                actor_id: ActorId::new(),
                occurred_at: Utc::now(),
            })
            .unwrap();

        let reaction = engine
            .observe(&AppliedChange::Fresh {
                item_id: healthy.id(),
                previous: Some(healthy.clone()),
                current: Some(low.clone()),
            })
            .unwrap();
        assert_eq!(reaction.alert, Some(StockAlertKind::LowStock));

        // Staying in the same status raises no further alert.
        let (still_low, _) = low
            .apply_movement(&MovementDelta {
                kind: MovementKind::Subtract,
                amount: 1,
                bucket: None,
                reason: "picked".to_string(),
                actor_id: ActorId::new(),
                occurred_at: Utc::now(),
            })
            .unwrap();
        let reaction = engine
            .observe(&AppliedChange::Fresh {
                item_id: low.id(),
                previous: Some(low),
                current: Some(still_low),
            })
            .unwrap();
        assert_eq!(reaction.alert, None);
    }

    #[test]
    fn removal_discards_any_open_episode() {
        let engine = test_engine();
        let item = depleted_item(OrgId::new());
        engine.evaluate(&item).unwrap();

        let reaction = engine
            .observe(&AppliedChange::Fresh {
                item_id: item.id(),
                previous: Some(item.clone()),
                current: None,
            })
            .unwrap();
        assert!(reaction.episode_closed);
        assert!(engine.episodes.get(item.org_id(), item.id()).is_none());
    }
}
