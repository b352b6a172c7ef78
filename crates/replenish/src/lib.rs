//! Auto-replenishment decision engine.
//!
//! Reacts to every reconciled inventory change and emits **at most one**
//! purchase draft per depletion episode. The open-episode guard (not the
//! instantaneous quantity comparison) is the sole gate against duplicate
//! drafts: the same depletion is observed many times before the episode
//! closes, and the quantity check alone would re-fire on each observation.

pub mod engine;
pub mod episode;
pub mod gateway;

pub use engine::{Outcome, Reaction, ReplenishError, ReplenishmentEngine, SkipReason};
pub use episode::{EpisodeStore, InMemoryEpisodeStore, ReplenishmentEpisode};
pub use gateway::{
    DraftRecord, InMemoryNotificationSink, InMemoryOrderGateway, NotificationSink, OrderGateway,
    StockAlert, StockAlertKind,
};
