//! Quest Engine
//!
//! The per-player state machine: Locked -> Unlocked -> Accepted -> Completed
//! -> Claimed. Unlocks are recomputed from the chain relation on demand;
//! accept/claim are explicit player actions; completion is a side effect of
//! progress contributions. Every transition is written through to the store
//! before the call returns. A failed write is logged and the in-memory state
//! remains authoritative for the rest of the process lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::error;

use super::catalog::QuestCatalog;
use super::definition::{QuestDef, QuestId};
use super::state::{PlayerProgress, ProgressRecord, QuestStage};
use crate::db::Database;

pub struct QuestEngine {
    catalog: Arc<QuestCatalog>,
    db: Arc<Database>,
    players: RwLock<HashMap<String, PlayerProgress>>,
}

/// Unlock relation, evaluated against a snapshot of the player map. Order 0
/// is always unlocked; order n requires the chain's n-1 quest to be both
/// completed and claimed.
fn unlocked_in(
    catalog: &QuestCatalog,
    players: &HashMap<String, PlayerProgress>,
    player_id: &str,
    def: &QuestDef,
) -> bool {
    if def.order == 0 {
        return true;
    }
    let Some(prev) = catalog.previous_in_chain(def.id) else {
        return false;
    };
    players
        .get(player_id)
        .map(|progress| progress.record(prev.id))
        .map(|record| record.completed && record.claimed)
        .unwrap_or(false)
}

impl QuestEngine {
    pub fn new(catalog: Arc<QuestCatalog>, db: Arc<Database>) -> Self {
        Self {
            catalog,
            db,
            players: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<QuestCatalog> {
        &self.catalog
    }

    fn event_id(&self) -> &str {
        self.catalog.event_id()
    }

    /// Hydrate a player's records from the store, typically on join.
    pub async fn load_player(&self, player_id: &str) {
        match self.db.load_player_progress(self.event_id(), player_id).await {
            Ok(records) => {
                self.players
                    .write()
                    .await
                    .insert(player_id.to_string(), PlayerProgress::from_records(records));
            }
            Err(e) => {
                error!("Failed to load quest progress for {}: {}", player_id, e);
                self.players
                    .write()
                    .await
                    .entry(player_id.to_string())
                    .or_default();
            }
        }
    }

    pub async fn unload_player(&self, player_id: &str) {
        self.players.write().await.remove(player_id);
    }

    pub async fn is_unlocked(&self, player_id: &str, quest_id: QuestId) -> bool {
        let Some(def) = self.catalog.get(quest_id) else {
            return false;
        };
        let players = self.players.read().await;
        unlocked_in(&self.catalog, &players, player_id, &def)
    }

    /// Current record for a (player, quest) pair; untouched default if none.
    pub async fn record(&self, player_id: &str, quest_id: QuestId) -> ProgressRecord {
        self.players
            .read()
            .await
            .get(player_id)
            .map(|progress| progress.record(quest_id))
            .unwrap_or_default()
    }

    /// Derived stage for display layers.
    pub async fn stage(&self, player_id: &str, quest_id: QuestId) -> Option<QuestStage> {
        let def = self.catalog.get(quest_id)?;
        let players = self.players.read().await;
        let unlocked = unlocked_in(&self.catalog, &players, player_id, &def);
        let record = players
            .get(player_id)
            .map(|progress| progress.record(quest_id))
            .unwrap_or_default();
        Some(record.stage(unlocked))
    }

    /// Explicit player action. Returns false (and changes nothing) when the
    /// quest is locked, already accepted, or already completed. Expected
    /// user-driven races (double clicks, stale menus) land here, so this
    /// never errors.
    pub async fn accept(&self, player_id: &str, quest_id: QuestId) -> bool {
        let Some(def) = self.catalog.get(quest_id) else {
            return false;
        };

        {
            let mut players = self.players.write().await;
            if !unlocked_in(&self.catalog, &players, player_id, &def) {
                return false;
            }
            let record = players
                .entry(player_id.to_string())
                .or_default()
                .record_mut(quest_id);
            if record.accepted || record.completed {
                return false;
            }
            record.accepted = true;
        }

        if let Err(e) = self.db.mark_accepted(self.event_id(), player_id, quest_id).await {
            error!(
                "Failed to persist accept of quest {} for {}: {}",
                quest_id, player_id, e
            );
        }
        true
    }

    /// Explicit player action. Returns false when the quest is not completed
    /// or already claimed. Only flips the flag; granting the reward items is
    /// the caller's responsibility.
    pub async fn claim(&self, player_id: &str, quest_id: QuestId) -> bool {
        if self.catalog.get(quest_id).is_none() {
            return false;
        }

        {
            let mut players = self.players.write().await;
            let record = players
                .entry(player_id.to_string())
                .or_default()
                .record_mut(quest_id);
            if !record.completed || record.claimed {
                return false;
            }
            record.claimed = true;
        }

        if let Err(e) = self.db.mark_claimed(self.event_id(), player_id, quest_id).await {
            error!(
                "Failed to persist claim of quest {} for {}: {}",
                quest_id, player_id, e
            );
        }
        true
    }

    /// Feed one contribution to every quest tracking `target`. A quest
    /// advances only while unlocked, accepted and open; hard-only quests
    /// ignore non-hard kills. Amounts clamp at the requirement, so repeated
    /// kills after completion are absorbed. Returns the ids of quests this
    /// contribution completed.
    ///
    /// Droprate gating is deliberately not done here: callers roll their own
    /// trial and only call in on success, which keeps the engine
    /// deterministic.
    pub async fn add_progress(
        &self,
        player_id: &str,
        target: &str,
        amount: i32,
        hard_kill: bool,
    ) -> Vec<QuestId> {
        let matches = self.catalog.matching_target(target);
        if matches.is_empty() {
            return Vec::new();
        }

        struct Pending {
            quest_id: QuestId,
            amount: i32,
            newly_completed: bool,
        }
        let mut pending: Vec<Pending> = Vec::new();

        {
            let mut players = self.players.write().await;
            for def in &matches {
                if !def.difficulty.admits(hard_kill) {
                    continue;
                }
                if !unlocked_in(&self.catalog, &players, player_id, def) {
                    continue;
                }
                let record = players
                    .entry(player_id.to_string())
                    .or_default()
                    .record_mut(def.id);
                if !record.accepted || record.completed {
                    continue;
                }
                let newly_completed = record.add(amount, def.required);
                pending.push(Pending {
                    quest_id: def.id,
                    amount: record.amount,
                    newly_completed,
                });
            }
        }

        let mut completed = Vec::new();
        for write in pending {
            if let Err(e) = self
                .db
                .upsert_progress(self.event_id(), player_id, write.quest_id, write.amount)
                .await
            {
                error!(
                    "Failed to persist progress on quest {} for {}: {}",
                    write.quest_id, player_id, e
                );
            }
            if write.newly_completed {
                if let Err(e) = self
                    .db
                    .mark_completed(self.event_id(), player_id, write.quest_id)
                    .await
                {
                    error!(
                        "Failed to persist completion of quest {} for {}: {}",
                        write.quest_id, player_id, e
                    );
                }
                completed.push(write.quest_id);
            }
        }
        completed
    }
}
