//! Replenishment episode guards.
//!
//! An episode marks that the current depletion of an item has already been
//! answered with a purchase draft (or is about to be: the episode is opened
//! *before* the draft is emitted, so a crash between the two retries the
//! emission instead of skipping or duplicating it).

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{DraftId, ItemId, OrgId};

/// One open depletion episode for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplenishmentEpisode {
    pub item_id: ItemId,
    pub opened_at: DateTime<Utc>,
    /// None until the draft has been durably emitted to the order
    /// subsystem; the engine retries emission while this is unset.
    pub draft_id: Option<DraftId>,
    /// Total quantity observed when the episode opened.
    pub deficit_at_open: i64,
}

/// Storage for open episodes, keyed by organization + item.
///
/// The engine is the only writer. A durable backend can replace the
/// in-memory map without touching engine logic.
pub trait EpisodeStore: Send + Sync {
    fn get(&self, org_id: OrgId, item_id: ItemId) -> Option<ReplenishmentEpisode>;

    /// Open an episode for the item. A second open for the same item while
    /// one is outstanding is a caller bug; implementations overwrite.
    fn open(&self, org_id: OrgId, episode: ReplenishmentEpisode);

    /// Record the emitted draft id on the item's open episode, if any.
    fn record_draft(&self, org_id: OrgId, item_id: ItemId, draft_id: DraftId);

    /// Close the item's episode. Returns the closed episode, if one was open.
    fn close(&self, org_id: OrgId, item_id: ItemId) -> Option<ReplenishmentEpisode>;

    /// Find the item whose open episode carries this draft (for
    /// cancellation signals, which only name the draft).
    fn find_by_draft(&self, org_id: OrgId, draft_id: DraftId) -> Option<ItemId>;
}

/// In-memory episode store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryEpisodeStore {
    episodes: RwLock<HashMap<(OrgId, ItemId), ReplenishmentEpisode>>,
}

impl InMemoryEpisodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EpisodeStore for InMemoryEpisodeStore {
    fn get(&self, org_id: OrgId, item_id: ItemId) -> Option<ReplenishmentEpisode> {
        self.episodes
            .read()
            .ok()?
            .get(&(org_id, item_id))
            .cloned()
    }

    fn open(&self, org_id: OrgId, episode: ReplenishmentEpisode) {
        if let Ok(mut episodes) = self.episodes.write() {
            episodes.insert((org_id, episode.item_id), episode);
        }
    }

    fn record_draft(&self, org_id: OrgId, item_id: ItemId, draft_id: DraftId) {
        if let Ok(mut episodes) = self.episodes.write() {
            if let Some(episode) = episodes.get_mut(&(org_id, item_id)) {
                episode.draft_id = Some(draft_id);
            }
        }
    }

    fn close(&self, org_id: OrgId, item_id: ItemId) -> Option<ReplenishmentEpisode> {
        self.episodes.write().ok()?.remove(&(org_id, item_id))
    }

    fn find_by_draft(&self, org_id: OrgId, draft_id: DraftId) -> Option<ItemId> {
        let episodes = self.episodes.read().ok()?;
        episodes
            .iter()
            .find(|((org, _), ep)| *org == org_id && ep.draft_id == Some(draft_id))
            .map(|((_, item_id), _)| *item_id)
    }
}
